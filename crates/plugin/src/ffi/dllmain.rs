//! Windows loader entry point

use std::ffi::c_void;

use windows::Win32::Foundation::{BOOL, HINSTANCE};
use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};

/// Attach on load, detach on unload. A non-null `reserved` on detach means
/// the process is terminating. Loading always succeeds; a process without a
/// profile keeps the library resident but inactive.
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn DllMain(_module: HINSTANCE, reason: u32, reserved: *mut c_void) -> BOOL {
    match reason {
        DLL_PROCESS_ATTACH => {
            let attached = std::panic::catch_unwind(crate::attach).unwrap_or(false);
            if !attached {
                tracing::debug!("Loaded without a runtime");
            }
            BOOL::from(true)
        }
        DLL_PROCESS_DETACH => {
            let is_process_terminating = !reserved.is_null();
            let _ = std::panic::catch_unwind(|| crate::detach(is_process_terminating));
            BOOL::from(true)
        }
        _ => BOOL::from(true),
    }
}
