//! Diagnostic log setup
//!
//! Everything goes to `overcursor.log` next to the library. `OVERCURSOR_LOG`
//! overrides the configured filter.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

const LOG_FILE: &str = "overcursor.log";
const FILTER_ENV: &str = "OVERCURSOR_LOG";

/// Install the global subscriber; later calls are ignored
pub fn init(dir: &Path, default_filter: &str) {
    let filter = || {
        EnvFilter::try_from_env(FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter))
    };

    let path = dir.join(LOG_FILE);
    let result = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => tracing_subscriber::fmt()
            .with_env_filter(filter())
            .with_ansi(false)
            .with_thread_ids(true)
            .with_writer(Mutex::new(file))
            .try_init(),
        Err(e) => {
            eprintln!("overcursor: cannot open {}: {}", path.display(), e);
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .try_init()
        }
    };

    if result.is_ok() {
        tracing::info!("overcursor {} logging to {}", env!("CARGO_PKG_VERSION"), path.display());
    }
}
