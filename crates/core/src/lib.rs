//! overcursor Core - Position Resolution and Overlay Logic
//!
//! This crate locates the player position inside a running game and maps it
//! into overlay pixels. The render backend drives it once per presented
//! frame through the plugin crate.
//!
//! # Modules
//!
//! - [`hooks`] - Hook registry, inline detours and attachment races
//! - [`memory`] - Guarded memory reads and pointer chains
//! - [`scripting`] - Owned and host-hijacked Lua script engines
//! - [`geometry`] - Game space to client pixel transform
//! - [`input`] - Pointer-to-keyboard remapping
//! - [`config`] - `overcursor.toml` and the game profile table
//! - [`runtime`] - The process-wide context tying everything together
//!
//! # Re-exports
//!
//! This crate re-exports the SDK and engine crates for convenience:
//! - [`sdk`] - Foreign Lua ABI types and export names
//! - [`engine`] - Process globals and module resolution

pub use overcursor_engine as engine;
pub use overcursor_sdk as sdk;

pub mod config;
pub mod geometry;
pub mod hooks;
pub mod input;
pub mod memory;
pub mod runtime;
pub mod scripting;

pub use config::{ConfigError, ConfigResult, GameProfile, OverlayConfig, ProfileTable};
pub use geometry::{FloatPoint, ScreenGeometry, SurfaceSize};
pub use hooks::{HookError, HookKey, HookRegistry, HookStatus};
pub use input::{InputMethod, PointerButtons};
pub use memory::{LocalMemory, MemoryError, ValueType};
pub use runtime::{
    install_runtime, take_runtime, with_runtime, FrameInput, FrameOutput, Runtime, RuntimeDeps,
};
pub use scripting::{ScriptError, ScriptHost};
