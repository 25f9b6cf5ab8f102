//! overcursor SDK - Foreign Interpreter Type Definitions
//!
//! This crate contains the C ABI surface of the Lua 5.1 family of
//! interpreters (PUC Lua 5.1 and LuaJIT) that legacy games embed.
//! It has no dependencies and compiles quickly, allowing parallel compilation
//! of dependent crates.
//!
//! # Modules
//!
//! - [`lua`] - Opaque interpreter state, function pointer types and constants
//! - [`exports`] - Export names looked up in the game's interpreter module

pub mod exports;
pub mod lua;

pub use exports::RACE_EXPORTS;
pub use lua::*;
