//! Global host process facts
//!
//! Captured once during attach and stored here.
//! Access is thread-safe via OnceLock.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::thread::ThreadId;

use crate::error::ResolveError;
use crate::loader::own_module_path;

/// Facts about the process overcursor is attached to
#[derive(Debug, Clone)]
pub struct ProcessGlobals {
    /// Executable file stem, e.g. `th07` for `C:\Games\th07.exe`
    pub process_name: String,

    /// Directory containing the host executable
    pub process_dir: PathBuf,

    /// Full path of the overcursor library
    pub module_path: PathBuf,

    /// Directory containing the overcursor library (configs and scripts live here)
    pub module_dir: PathBuf,

    /// Thread that performed the attach (the host's message/render thread)
    pub main_thread_id: ThreadId,
}

/// Global process state storage
static PROCESS: OnceLock<ProcessGlobals> = OnceLock::new();

/// Initialize process globals
///
/// Called once during attach. Returns error if already initialized.
pub fn init_process(globals: ProcessGlobals) -> Result<(), ResolveError> {
    PROCESS
        .set(globals)
        .map_err(|_| ResolveError::AlreadyInitialized)
}

/// Get process globals, if attach has run
pub fn process() -> Option<&'static ProcessGlobals> {
    PROCESS.get()
}

/// Check if current thread is the thread that attached
pub fn is_main_thread() -> bool {
    PROCESS
        .get()
        .map(|g| std::thread::current().id() == g.main_thread_id)
        .unwrap_or(false)
}

/// File stem of a path, used as the case-insensitive profile match key
pub fn process_stem(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

impl ProcessGlobals {
    /// Create process globals from known paths
    ///
    /// # Arguments
    /// * `executable` - Full path of the host executable
    /// * `module_path` - Full path of the overcursor library
    pub fn new(executable: &Path, module_path: PathBuf) -> Result<Self, ResolveError> {
        let process_name = process_stem(executable).ok_or_else(|| {
            ResolveError::ProcessInfo(format!("no file name in {}", executable.display()))
        })?;
        let process_dir = executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let module_dir = module_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        Ok(Self {
            process_name,
            process_dir,
            module_path,
            module_dir,
            main_thread_id: std::thread::current().id(),
        })
    }

    /// Detect process globals for the current process
    #[tracing::instrument]
    pub fn detect() -> Result<Self, ResolveError> {
        let executable =
            std::env::current_exe().map_err(|e| ResolveError::ProcessInfo(e.to_string()))?;
        let module_path = own_module_path()?;
        let globals = Self::new(&executable, module_path)?;
        tracing::info!(
            "Attached to '{}' (library at {})",
            globals.process_name,
            globals.module_path.display()
        );
        Ok(globals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_stem() {
        assert_eq!(
            process_stem(Path::new("/games/touhou/th08.exe")).as_deref(),
            Some("th08")
        );
        assert_eq!(process_stem(Path::new("game")).as_deref(), Some("game"));
    }

    #[test]
    fn test_new_splits_directories() {
        let globals = ProcessGlobals::new(
            Path::new("/games/th07/th07.exe"),
            PathBuf::from("/tools/overcursor/overcursor.dll"),
        )
        .unwrap();
        assert_eq!(globals.process_name, "th07");
        assert_eq!(globals.process_dir, PathBuf::from("/games/th07"));
        assert_eq!(globals.module_dir, PathBuf::from("/tools/overcursor"));
    }
}
