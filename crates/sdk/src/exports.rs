//! Export names looked up in the game's interpreter module
//!
//! These strings must match exactly what the interpreter DLL exports.
//! Null-terminated so they can be passed straight to the OS loader.

/// Generic unprotected call
pub const LUA_CALL: &[u8] = b"lua_call\0";

/// Protected call
pub const LUA_PCALL: &[u8] = b"lua_pcall\0";

/// Protected C-function call bridge
pub const LUA_CPCALL: &[u8] = b"lua_cpcall\0";

/// Metamethod dispatch helper
pub const LUAL_CALLMETA: &[u8] = b"luaL_callmeta\0";

/// Chunk loader used for injection
pub const LUAL_LOADSTRING: &[u8] = b"luaL_loadstring\0";

/// String conversion, used to read error messages
pub const LUA_TOLSTRING: &[u8] = b"lua_tolstring\0";

/// Stack truncation, used to pop error messages and read values
pub const LUA_SETTOP: &[u8] = b"lua_settop\0";

/// Table field fetch, used to read the position global
pub const LUA_GETFIELD: &[u8] = b"lua_getfield\0";

/// Numeric conversion of a stack slot
pub const LUA_TONUMBER: &[u8] = b"lua_tonumber\0";

/// Numeric check of a stack slot
pub const LUA_ISNUMBER: &[u8] = b"lua_isnumber\0";

/// Call sites raced against each other when hijacking a foreign interpreter,
/// in declaration order
pub const RACE_EXPORTS: &[(&str, &[u8])] = &[
    ("lua_call", LUA_CALL),
    ("lua_pcall", LUA_PCALL),
    ("lua_cpcall", LUA_CPCALL),
    ("luaL_callmeta", LUAL_CALLMETA),
];

/// Strip the trailing nul of an export name for display
pub fn display_name(export: &[u8]) -> &str {
    let trimmed = export.strip_suffix(b"\0").unwrap_or(export);
    std::str::from_utf8(trimmed).unwrap_or("<invalid export name>")
}
