//! Script-driven position resolution
//!
//! Some games keep the player position behind structures a static pointer
//! chain cannot follow. For those an operator script computes the address:
//!
//! - [`owned`] - the script runs in an interpreter overcursor creates and
//!   calls `getPositionAddress()` once per frame
//! - [`hijacked`] - the script is injected into the game's own Lua
//!   interpreter the first time the game calls into it, and publishes the
//!   address in the global `PositionAddress`
//!
//! Both expose the same host surface to scripts ([`host`]).

pub mod foreign;
pub mod header;
pub mod hijacked;
pub mod host;
pub mod owned;

use std::ffi::c_int;
use std::path::PathBuf;

use overcursor_engine::ResolveError;

use crate::hooks::HookError;

pub use foreign::{preparation_snippet, ForeignInterpreter, LuaApi};
pub use header::{parse_header, HeaderError};
pub use hijacked::{HijackState, HijackedEngine, RACE_WARN_FRAMES};
pub use host::HostCallbacks;
pub use owned::{EngineState, OwnedEngine, ENTRY_POINT};

/// Error type for script engines
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("Failed to create interpreter: {0}")]
    Interpreter(String),

    #[error("Preparation script failed: {0}")]
    Preparation(String),

    #[error("Failed to read script {path:?}: {source}")]
    ScriptIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Operator script failed: {0}")]
    Operator(String),

    #[error("Entry point '{0}' not found in global scope")]
    MissingEntryPoint(&'static str),

    #[error("Entry point raised an error: {0}")]
    EntryPoint(String),

    #[error("Entry point returned {0} instead of a number")]
    NonNumeric(String),

    #[error("Script contains a nul byte")]
    NulByte,

    #[error("Foreign interpreter error ({}): {message}", status_label(.status))]
    Foreign { status: c_int, message: String },

    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Hook(#[from] HookError),
}

fn status_label(status: &c_int) -> &'static str {
    overcursor_sdk::status_name(*status)
}

/// The script engine selected by the game profile
pub enum ScriptHost {
    Owned(OwnedEngine),
    Hijacked(HijackedEngine),
}

impl ScriptHost {
    /// Position address for this frame, if the script has one
    pub fn query(&mut self) -> Option<usize> {
        match self {
            ScriptHost::Owned(engine) => engine.query(),
            ScriptHost::Hijacked(engine) => engine.query(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScriptHost::Owned(_) => "owned",
            ScriptHost::Hijacked(_) => "hijacked",
        }
    }
}
