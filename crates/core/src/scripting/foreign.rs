//! Calls into a game's own Lua 5.1 interpreter
//!
//! Only a handful of C API functions are needed: load and run a chunk, read
//! the error string on failure, and read one numeric global. They are taken
//! from the module named in the script header, never loaded by us.

use std::ffi::CStr;
use std::path::Path;

use overcursor_engine::{ResolveError, SymbolSource};
use overcursor_sdk::exports::{
    display_name, LUAL_LOADSTRING, LUA_GETFIELD, LUA_ISNUMBER, LUA_PCALL, LUA_SETTOP, LUA_TOLSTRING,
    LUA_TONUMBER,
};
use overcursor_sdk::{
    lua_State, LuaGetFieldFn, LuaIsNumberFn, LuaLLoadStringFn, LuaPCallFn, LuaSetTopFn,
    LuaToLStringFn, LuaToNumberFn, LUA_GLOBALSINDEX, LUA_OK,
};

use super::ScriptError;
use crate::hooks::OriginalSlot;

/// The slice of a foreign interpreter the hijacked engine talks to
pub trait ForeignInterpreter: Send + Sync {
    /// Load `chunk` and run it with no arguments and no results.
    ///
    /// # Safety
    /// `state` must be a live interpreter state of this API's module, used on
    /// the thread that owns it.
    unsafe fn run_chunk(&self, state: *mut lua_State, chunk: &CStr, name: &str) -> Result<(), ScriptError>;

    /// Value of a global if it is a number
    ///
    /// # Safety
    /// See [`ForeignInterpreter::run_chunk`].
    unsafe fn read_global_number(&self, state: *mut lua_State, name: &CStr) -> Option<f64>;
}

/// Function pointers into an already-loaded Lua 5.1 module
pub struct LuaApi {
    loadstring: LuaLLoadStringFn,
    pcall: LuaPCallFn,
    /// Trampoline of a hooked `lua_pcall`, used while the hook is installed
    pcall_original: Option<&'static OriginalSlot>,
    tolstring: LuaToLStringFn,
    settop: LuaSetTopFn,
    getfield: LuaGetFieldFn,
    tonumber: LuaToNumberFn,
    isnumber: LuaIsNumberFn,
}

unsafe fn lookup<F: Copy>(symbols: &dyn SymbolSource, module: &str, export: &[u8]) -> Result<F, ResolveError> {
    let address = symbols.export_address(module, display_name(export))?;
    debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<usize>());
    Ok(std::mem::transmute_copy::<usize, F>(&address))
}

impl LuaApi {
    /// Resolve the API of `module`
    ///
    /// # Safety
    /// `module` must export the Lua 5.1 C API under the standard names.
    pub unsafe fn resolve(
        module: &str,
        symbols: &dyn SymbolSource,
        pcall_original: Option<&'static OriginalSlot>,
    ) -> Result<Self, ResolveError> {
        Ok(Self {
            loadstring: lookup(symbols, module, LUAL_LOADSTRING)?,
            pcall: lookup(symbols, module, LUA_PCALL)?,
            pcall_original,
            tolstring: lookup(symbols, module, LUA_TOLSTRING)?,
            settop: lookup(symbols, module, LUA_SETTOP)?,
            getfield: lookup(symbols, module, LUA_GETFIELD)?,
            tonumber: lookup(symbols, module, LUA_TONUMBER)?,
            isnumber: lookup(symbols, module, LUA_ISNUMBER)?,
        })
    }

    fn pcall_fn(&self) -> LuaPCallFn {
        match self.pcall_original.map(OriginalSlot::get) {
            Some(address) if address != 0 => unsafe { std::mem::transmute_copy::<usize, LuaPCallFn>(&address) },
            _ => self.pcall,
        }
    }

    /// Take the error message off the stack top
    unsafe fn pop_error(&self, state: *mut lua_State, status: i32, name: &str) -> ScriptError {
        let message = (self.tolstring)(state, -1, std::ptr::null_mut());
        let message = if message.is_null() {
            "(error object is not a string)".to_string()
        } else {
            CStr::from_ptr(message).to_string_lossy().into_owned()
        };
        (self.settop)(state, -2);
        ScriptError::Foreign {
            status,
            message: format!("{}: {}", name, message),
        }
    }
}

impl ForeignInterpreter for LuaApi {
    unsafe fn run_chunk(&self, state: *mut lua_State, chunk: &CStr, name: &str) -> Result<(), ScriptError> {
        let status = (self.loadstring)(state, chunk.as_ptr());
        if status != LUA_OK {
            return Err(self.pop_error(state, status, name));
        }
        let status = (self.pcall_fn())(state, 0, 0, 0);
        if status != LUA_OK {
            return Err(self.pop_error(state, status, name));
        }
        Ok(())
    }

    unsafe fn read_global_number(&self, state: *mut lua_State, name: &CStr) -> Option<f64> {
        (self.getfield)(state, LUA_GLOBALSINDEX, name.as_ptr());
        let value = if (self.isnumber)(state, -1) != 0 {
            Some((self.tonumber)(state, -1))
        } else {
            None
        };
        (self.settop)(state, -2);
        value
    }
}

/// Chunk run before the operator script, binding the host calls through
/// LuaJIT `ffi` to the exports of the overcursor library at `library_path`
pub fn preparation_snippet(library_path: &Path) -> String {
    format!(
        r#"local ffi = require("ffi")

ffi.cdef [[
    uint32_t  overcursor_read_u32        (uintptr_t address);
    uintptr_t overcursor_resolve_address (const uint32_t *offsets, size_t length);
    void      overcursor_open_console    (void);
]]

local overcursor = ffi.load([==[{path}]==])

function ReadUInt32(address)
    return tonumber(overcursor.overcursor_read_u32(address))
end

function ResolveAddress(offsets, length)
    length = length or #offsets
    local chain = ffi.new("uint32_t[?]", length)
    for i = 1, length do
        chain[i - 1] = offsets[i]
    end
    return tonumber(overcursor.overcursor_resolve_address(chain, length))
end

function OpenConsole()
    overcursor.overcursor_open_console()
end

function AllocNew(...)
    return ffi.new(...)
end
"#,
        path = library_path.display()
    )
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn test_snippet_binds_host_calls() {
        let path = PathBuf::from("/games/th/overcursor.so");
        let snippet = preparation_snippet(&path);

        assert!(snippet.contains("ffi.load([==[/games/th/overcursor.so]==])"));
        for name in ["ReadUInt32", "ResolveAddress", "OpenConsole", "AllocNew"] {
            assert!(snippet.contains(&format!("function {}(", name)), "{}", name);
        }
        for export in [
            "overcursor_read_u32",
            "overcursor_resolve_address",
            "overcursor_open_console",
        ] {
            assert!(snippet.contains(export), "{}", export);
        }
    }

    #[test]
    fn test_snippet_runs_under_luajit() {
        // Without the library the load must fail at ffi.load, not earlier
        let lua = unsafe { mlua::Lua::unsafe_new() };
        let err = lua
            .load(preparation_snippet(Path::new("/nonexistent/overcursor-test.so")))
            .exec()
            .unwrap_err();
        assert!(err.to_string().contains("overcursor-test"), "{}", err);
    }
}
