//! overcursor Plugin - FFI Layer
//!
//! This crate is the library that gets injected into the game. It compiles
//! to a cdylib (.dll/.so) and provides:
//!
//! - attach / detach (`DllMain` on Windows, explicit exports elsewhere)
//! - the per-frame C ABI used by render backends
//! - the host calls that injected Lua scripts reach through LuaJIT `ffi`

pub mod ffi;
mod logging;

use std::sync::Arc;

use overcursor_core::config::{OverlayConfig, ProfileTable};
use overcursor_core::hooks::InlineInterceptor;
use overcursor_core::input::KeySink;
use overcursor_core::{install_runtime, take_runtime, LocalMemory, Runtime, RuntimeDeps};
use overcursor_engine::{init_process, process, LoadedModules, ProcessGlobals, ResolveError};

/// Set up logging, load configuration and start the runtime.
///
/// Returns `false` when this process is not a configured game or the
/// configuration is unusable; nothing is installed in that case.
pub fn attach() -> bool {
    let globals = match ProcessGlobals::detect() {
        Ok(globals) => globals,
        Err(e) => {
            eprintln!("overcursor: cannot identify host process: {}", e);
            return false;
        }
    };
    if let Err(e) = init_process(globals) {
        if !matches!(e, ResolveError::AlreadyInitialized) {
            eprintln!("overcursor: {}", e);
            return false;
        }
    }
    let Some(process) = process() else {
        return false;
    };

    let config = OverlayConfig::load();
    let filter = config
        .as_ref()
        .map(|c| c.log_filter().to_string())
        .unwrap_or_else(|_| "info".to_string());
    logging::init(&process.module_dir, &filter);

    let config = config.unwrap_or_else(|e| {
        tracing::warn!("Using default overlay config: {}", e);
        OverlayConfig::default()
    });

    let profiles = match ProfileTable::load() {
        Ok(profiles) => profiles,
        Err(e) => {
            tracing::error!("Failed to load game profiles: {}", e);
            return false;
        }
    };

    let Some(profile) = profiles.find(&process.process_name).cloned() else {
        tracing::info!("No profile for '{}', staying inactive", process.process_name);
        return false;
    };

    let deps = RuntimeDeps {
        symbols: Arc::new(LoadedModules),
        memory: Arc::new(LocalMemory),
        interceptor: Box::new(InlineInterceptor),
        key_sink: key_sink(),
        base_dir: process.module_dir.clone(),
        library_path: process.module_path.clone(),
    };
    install_runtime(Runtime::start(profile, config, deps));
    true
}

/// Stop the runtime. Hooks are leaked when the process is terminating.
pub fn detach(is_process_terminating: bool) {
    if let Some(mut runtime) = take_runtime() {
        runtime.shutdown(is_process_terminating);
    }
    tracing::info!("overcursor detached");
}

#[cfg(windows)]
fn key_sink() -> Option<Box<dyn KeySink>> {
    Some(Box::new(overcursor_core::input::SendInputSink))
}

#[cfg(not(windows))]
fn key_sink() -> Option<Box<dyn KeySink>> {
    None
}
