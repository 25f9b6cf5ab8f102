//! Lua 5.1 C API type definitions
//!
//! These mirror `lua.h` / `lauxlib.h` of the 5.1 line, which is what LuaJIT
//! and most games shipped between 2005 and 2015 export. All functions use the
//! C calling convention on every platform.

use std::ffi::{c_char, c_int, c_void};

/// Opaque interpreter state (`lua_State`)
#[allow(non_camel_case_types)]
#[repr(C)]
pub struct lua_State {
    _opaque: [u8; 0],
}

/// Native function callable from Lua (`lua_CFunction`)
pub type LuaCFunction = unsafe extern "C" fn(state: *mut lua_State) -> c_int;

/// Lua number type of the 5.1 ABI
pub type LuaNumber = f64;

/// `void lua_call(lua_State *L, int nargs, int nresults)`
pub type LuaCallFn = unsafe extern "C" fn(state: *mut lua_State, nargs: c_int, nresults: c_int);

/// `int lua_pcall(lua_State *L, int nargs, int nresults, int errfunc)`
pub type LuaPCallFn = unsafe extern "C" fn(
    state: *mut lua_State,
    nargs: c_int,
    nresults: c_int,
    errfunc: c_int,
) -> c_int;

/// `int lua_cpcall(lua_State *L, lua_CFunction func, void *ud)`
pub type LuaCPCallFn =
    unsafe extern "C" fn(state: *mut lua_State, func: LuaCFunction, ud: *mut c_void) -> c_int;

/// `int luaL_callmeta(lua_State *L, int obj, const char *e)`
pub type LuaLCallMetaFn =
    unsafe extern "C" fn(state: *mut lua_State, obj: c_int, event: *const c_char) -> c_int;

/// `int luaL_loadstring(lua_State *L, const char *s)`
pub type LuaLLoadStringFn = unsafe extern "C" fn(state: *mut lua_State, s: *const c_char) -> c_int;

/// `const char *lua_tolstring(lua_State *L, int idx, size_t *len)`
pub type LuaToLStringFn =
    unsafe extern "C" fn(state: *mut lua_State, idx: c_int, len: *mut usize) -> *const c_char;

/// `void lua_settop(lua_State *L, int idx)`
pub type LuaSetTopFn = unsafe extern "C" fn(state: *mut lua_State, idx: c_int);

/// `void lua_getfield(lua_State *L, int idx, const char *k)`
pub type LuaGetFieldFn = unsafe extern "C" fn(state: *mut lua_State, idx: c_int, k: *const c_char);

/// `lua_Number lua_tonumber(lua_State *L, int idx)`
pub type LuaToNumberFn = unsafe extern "C" fn(state: *mut lua_State, idx: c_int) -> LuaNumber;

/// `int lua_isnumber(lua_State *L, int idx)`
pub type LuaIsNumberFn = unsafe extern "C" fn(state: *mut lua_State, idx: c_int) -> c_int;

/// Return all results from a call
pub const LUA_MULTRET: c_int = -1;

/// Pseudo-index of the globals table in the 5.1 ABI
pub const LUA_GLOBALSINDEX: c_int = -10002;

/// Status codes returned by `lua_pcall` / `luaL_loadstring`
pub const LUA_OK: c_int = 0;
pub const LUA_ERRRUN: c_int = 2;
pub const LUA_ERRSYNTAX: c_int = 3;
pub const LUA_ERRMEM: c_int = 4;
pub const LUA_ERRERR: c_int = 5;

/// Human-readable name for a non-zero status code
pub fn status_name(status: c_int) -> &'static str {
    match status {
        LUA_OK => "ok",
        LUA_ERRRUN => "runtime error",
        LUA_ERRSYNTAX => "syntax error",
        LUA_ERRMEM => "memory allocation error",
        LUA_ERRERR => "error in error handler",
        _ => "unknown status",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(status_name(LUA_OK), "ok");
        assert_eq!(status_name(LUA_ERRSYNTAX), "syntax error");
        assert_eq!(status_name(42), "unknown status");
    }
}
