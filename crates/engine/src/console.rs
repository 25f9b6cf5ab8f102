//! Diagnostic console for operator scripts

/// Open a console window attached to the host process.
///
/// Returns `true` when a console is available afterwards. Scripts call this
/// to see `print` output and log lines while tuning a profile.
pub fn open_console() -> bool {
    imp::open_console()
}

#[cfg(windows)]
mod imp {
    use windows::Win32::System::Console::AllocConsole;

    pub fn open_console() -> bool {
        match unsafe { AllocConsole() } {
            Ok(()) => {
                tracing::info!("Diagnostic console opened");
                true
            }
            Err(e) => {
                // Fails when the process already owns a console
                tracing::debug!("AllocConsole: {}", e);
                true
            }
        }
    }
}

#[cfg(not(windows))]
mod imp {
    pub fn open_console() -> bool {
        // Standard error already reaches the terminal that started the host
        tracing::info!("Diagnostic console requested; using the host's standard error");
        true
    }
}
