//! Error types for module and export resolution

/// Error type for module/export lookups and process identification
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The module is not loaded in the host process
    #[error("Module not loaded: {0}")]
    ModuleNotLoaded(String),

    /// The module is loaded but does not export the symbol
    #[error("Export not found: {module}!{export}")]
    ExportNotFound { module: String, export: String },

    /// Module or export name cannot be passed to the OS loader
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// The current platform has no loader integration
    #[error("Module resolution is not supported on this platform")]
    Unsupported,

    /// Failed to identify the host process
    #[error("Failed to identify host process: {0}")]
    ProcessInfo(String),

    /// Process globals already initialized
    #[error("Process globals already initialized")]
    AlreadyInitialized,
}
