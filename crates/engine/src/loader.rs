//! Module and export resolution against already-loaded modules
//!
//! Nothing here loads a library. Every lookup only succeeds for modules the
//! host process has mapped on its own, which is what lets the core tell
//! "the game has not loaded its interpreter" apart from "the interpreter does
//! not export this function".

use std::ffi::CString;
use std::path::{Path, PathBuf};

use crate::error::ResolveError;

/// Source of module base addresses and export addresses
pub trait SymbolSource: Send + Sync {
    /// Base address of a loaded module; `None` selects the main executable
    fn module_base(&self, module: Option<&str>) -> Result<usize, ResolveError>;

    /// Address of `export` inside the already-loaded `module`
    fn export_address(&self, module: &str, export: &str) -> Result<usize, ResolveError>;

    /// Check whether a module is currently mapped
    fn is_loaded(&self, module: &str) -> bool {
        self.module_base(Some(module)).is_ok()
    }
}

/// OS-backed symbol source for the current process
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadedModules;

impl SymbolSource for LoadedModules {
    fn module_base(&self, module: Option<&str>) -> Result<usize, ResolveError> {
        let base = imp::module_base(module)?;
        tracing::trace!("Module {} at {:x}", module.unwrap_or("<main>"), base);
        Ok(base)
    }

    fn export_address(&self, module: &str, export: &str) -> Result<usize, ResolveError> {
        let address = imp::export_address(module, export)?;
        tracing::debug!("Resolved {}!{} at {:x}", module, export, address);
        Ok(address)
    }
}

/// Full path of the module containing this code (the overcursor library)
pub fn own_module_path() -> Result<PathBuf, ResolveError> {
    imp::own_module_path()
}

fn c_name(name: &str) -> Result<CString, ResolveError> {
    CString::new(name).map_err(|_| ResolveError::InvalidName(name.to_string()))
}

/// Compare a loaded module path against a requested module name.
///
/// A bare name matches the file name case-insensitively; a name containing a
/// path separator must match the whole path.
fn module_name_matches(loaded: &str, wanted: &str) -> bool {
    if wanted.contains(['/', '\\']) {
        return loaded.eq_ignore_ascii_case(wanted);
    }
    Path::new(loaded)
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.eq_ignore_ascii_case(wanted))
}

#[cfg(windows)]
mod imp {
    use super::*;

    use windows::core::{HSTRING, PCSTR, PCWSTR};
    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::System::LibraryLoader::{
        GetModuleFileNameW, GetModuleHandleExW, GetModuleHandleW, GetProcAddress,
        GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS, GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
    };

    fn module_handle(module: Option<&str>) -> Result<HMODULE, ResolveError> {
        let result = match module {
            Some(name) => unsafe { GetModuleHandleW(&HSTRING::from(name)) },
            None => unsafe { GetModuleHandleW(PCWSTR::null()) },
        };
        result.map_err(|_| ResolveError::ModuleNotLoaded(module.unwrap_or("<main>").to_string()))
    }

    pub fn module_base(module: Option<&str>) -> Result<usize, ResolveError> {
        Ok(module_handle(module)?.0 as usize)
    }

    pub fn export_address(module: &str, export: &str) -> Result<usize, ResolveError> {
        let handle = module_handle(Some(module))?;
        let name = c_name(export)?;
        let address = unsafe { GetProcAddress(handle, PCSTR(name.as_ptr() as *const u8)) };
        address
            .map(|f| f as usize)
            .ok_or_else(|| ResolveError::ExportNotFound {
                module: module.to_string(),
                export: export.to_string(),
            })
    }

    pub fn own_module_path() -> Result<PathBuf, ResolveError> {
        let mut handle = HMODULE::default();
        let anchor = own_module_path as *const () as *const u16;
        unsafe {
            GetModuleHandleExW(
                GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
                PCWSTR(anchor),
                &mut handle,
            )
        }
        .map_err(|e| ResolveError::ProcessInfo(e.to_string()))?;

        let mut buffer = vec![0u16; 1024];
        let len = unsafe { GetModuleFileNameW(handle, &mut buffer) } as usize;
        if len == 0 {
            return Err(ResolveError::ProcessInfo(
                "GetModuleFileNameW returned an empty path".to_string(),
            ));
        }
        Ok(PathBuf::from(String::from_utf16_lossy(&buffer[..len])))
    }
}

#[cfg(target_os = "linux")]
mod imp {
    use super::*;

    use std::ffi::{c_int, c_void, CStr};

    struct ModuleSearch<'a> {
        wanted: Option<&'a str>,
        base: Option<usize>,
    }

    unsafe extern "C" fn visit_module(
        info: *mut libc::dl_phdr_info,
        _size: usize,
        data: *mut c_void,
    ) -> c_int {
        let search = &mut *(data as *mut ModuleSearch);
        let info = &*info;
        let name = if info.dlpi_name.is_null() {
            ""
        } else {
            CStr::from_ptr(info.dlpi_name).to_str().unwrap_or("")
        };

        // The first object reported is always the main executable
        let matched = match search.wanted {
            None => true,
            Some(wanted) => module_name_matches(name, wanted),
        };

        if matched {
            search.base = Some(info.dlpi_addr as usize);
            1
        } else {
            0
        }
    }

    pub fn module_base(module: Option<&str>) -> Result<usize, ResolveError> {
        let mut search = ModuleSearch {
            wanted: module,
            base: None,
        };
        unsafe {
            libc::dl_iterate_phdr(
                Some(visit_module),
                &mut search as *mut ModuleSearch as *mut c_void,
            );
        }
        search
            .base
            .ok_or_else(|| ResolveError::ModuleNotLoaded(module.unwrap_or("<main>").to_string()))
    }

    pub fn export_address(module: &str, export: &str) -> Result<usize, ResolveError> {
        let module_c = c_name(module)?;
        let export_c = c_name(export)?;

        let handle = unsafe { libc::dlopen(module_c.as_ptr(), libc::RTLD_NOLOAD | libc::RTLD_LAZY) };
        if handle.is_null() {
            return Err(ResolveError::ModuleNotLoaded(module.to_string()));
        }

        let symbol = unsafe { libc::dlsym(handle, export_c.as_ptr()) };

        // RTLD_NOLOAD still bumps the reference count
        unsafe {
            libc::dlclose(handle);
        }

        if symbol.is_null() {
            Err(ResolveError::ExportNotFound {
                module: module.to_string(),
                export: export.to_string(),
            })
        } else {
            Ok(symbol as usize)
        }
    }

    pub fn own_module_path() -> Result<PathBuf, ResolveError> {
        let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
        let anchor = own_module_path as *const c_void;

        if unsafe { libc::dladdr(anchor, &mut info) } == 0 || info.dli_fname.is_null() {
            return Err(ResolveError::ProcessInfo(
                "dladdr could not locate the overcursor module".to_string(),
            ));
        }

        let path = unsafe { CStr::from_ptr(info.dli_fname) }
            .to_string_lossy()
            .into_owned();
        Ok(PathBuf::from(path))
    }
}

#[cfg(not(any(windows, target_os = "linux")))]
mod imp {
    use super::*;

    pub fn module_base(_module: Option<&str>) -> Result<usize, ResolveError> {
        Err(ResolveError::Unsupported)
    }

    pub fn export_address(_module: &str, _export: &str) -> Result<usize, ResolveError> {
        Err(ResolveError::Unsupported)
    }

    pub fn own_module_path() -> Result<PathBuf, ResolveError> {
        Err(ResolveError::Unsupported)
    }
}
