//! C ABI surface of the overcursor library
//!
//! - [`exports`] - attach/detach, per-frame calls and script host calls
//! - `dllmain` - Windows loader entry point

pub mod exports;

#[cfg(windows)]
mod dllmain;
