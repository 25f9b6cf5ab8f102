//! overcursor Engine - Host Process Globals and Module Resolution
//!
//! This crate handles:
//! - Identifying the host process (name, directories, main thread)
//! - Resolving modules and exports that the host has *already* loaded
//! - Opening the diagnostic console on request of operator scripts
//!
//! # Architecture
//!
//! Process facts are captured once during attach via [`ProcessGlobals::detect`]
//! and stored with [`init_process`]. Module and export lookups go through the
//! [`SymbolSource`] trait so the core can be exercised against a fake symbol
//! table; [`LoadedModules`] is the OS-backed implementation.
//!
//! # Thread Safety
//!
//! Globals are immutable after initialization. The attaching thread ID is
//! stored for runtime checks via [`is_main_thread()`].

pub mod console;
pub mod error;
pub mod globals;
pub mod loader;

pub use console::open_console;
pub use error::ResolveError;
pub use globals::{init_process, is_main_thread, process, process_stem, ProcessGlobals};
pub use loader::{own_module_path, LoadedModules, SymbolSource};
