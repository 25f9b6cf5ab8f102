//! Hook system
//!
//! - [`manager`] - Hook registry (create / enable / disable / remove, teardown)
//! - [`inline`] - Inline detours built with iced-x86
//! - [`trampoline`] - Executable memory near hooked functions
//! - [`race`] - Several hooks racing for one attachment

pub mod inline;
pub mod manager;
pub mod race;
pub mod trampoline;

pub use inline::{HookError, InlineDetour, InlineInterceptor};
pub use manager::{
    ApiHookSpec, Detour, HookKey, HookRegistry, HookSpec, HookStatus, Interceptor, OriginalSlot,
    TeardownFn,
};
pub use race::{on_race_site, AttachmentRace, RaceLatch, RaceState};

#[cfg(test)]
pub(crate) use manager::testing;
