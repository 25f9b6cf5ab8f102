//! Hook registry
//!
//! Owns every interception created by the runtime. Records are created
//! disabled, toggled in batches and reverted on removal. The registry is the
//! only place that touches machine code; strategies hold [`HookKey`]s.

use std::sync::atomic::{AtomicUsize, Ordering};

use overcursor_engine::SymbolSource;
use slotmap::{new_key_type, SlotMap};

use super::inline::HookError;

new_key_type! {
    /// Handle for an installed hook record
    pub struct HookKey;
}

/// Mechanism that turns (target, detour) into a patch
pub trait Interceptor: Send {
    /// Prepare a detour of `target` to `detour`. The patch starts disabled.
    ///
    /// # Safety
    /// `target` must be the entry of a function and `detour` a function with
    /// the same signature and calling convention.
    unsafe fn create(
        &mut self,
        name: &str,
        target: usize,
        detour: usize,
    ) -> Result<Box<dyn Detour>, HookError>;
}

/// One prepared interception; dropping it restores the target
pub trait Detour: Send {
    fn target(&self) -> usize;

    /// Address that runs the original function
    fn trampoline(&self) -> usize;

    fn is_enabled(&self) -> bool;

    /// # Safety
    /// Patches live code; no thread may be executing the displaced bytes.
    unsafe fn enable(&mut self) -> Result<(), HookError>;

    /// # Safety
    /// See [`Detour::enable`].
    unsafe fn disable(&mut self) -> Result<(), HookError>;
}

/// Slot a detour reads to call through to the original function
#[derive(Debug)]
pub struct OriginalSlot(AtomicUsize);

impl OriginalSlot {
    pub const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    /// Trampoline address, or 0 while no hook record is installed
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, address: usize) {
        self.0.store(address, Ordering::Release);
    }
}

impl Default for OriginalSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Interception by address
#[derive(Debug, Clone, Copy)]
pub struct HookSpec {
    pub name: &'static str,
    pub target: usize,
    pub detour: usize,
    pub original: &'static OriginalSlot,
}

/// Interception by (module, export), resolved when the hook is created
#[derive(Debug, Clone, Copy)]
pub struct ApiHookSpec {
    pub module: &'static str,
    pub export: &'static str,
    pub detour: usize,
    pub original: &'static OriginalSlot,
}

/// Observable state of a hook record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStatus {
    NotInstalled,
    Disabled,
    Enabled,
}

/// Callback run once at unload with `is_process_terminating`
pub type TeardownFn = Box<dyn FnOnce(bool) + Send>;

struct HookEntry {
    name: String,
    detour: Box<dyn Detour>,
    original: &'static OriginalSlot,
}

/// Registry of hook records for one runtime context
pub struct HookRegistry {
    interceptor: Box<dyn Interceptor>,
    hooks: SlotMap<HookKey, HookEntry>,
    teardown: Vec<TeardownFn>,
    shut_down: bool,
}

impl HookRegistry {
    pub fn new(interceptor: Box<dyn Interceptor>) -> Self {
        Self {
            interceptor,
            hooks: SlotMap::with_key(),
            teardown: Vec::new(),
            shut_down: false,
        }
    }

    /// Create a disabled record for every spec.
    ///
    /// Either all records are created or none remain: on the first failure
    /// the records created so far are removed again.
    ///
    /// # Safety
    /// Every spec must satisfy [`Interceptor::create`].
    pub unsafe fn create_hooks(&mut self, specs: &[HookSpec]) -> Result<Vec<HookKey>, HookError> {
        let mut keys = Vec::with_capacity(specs.len());

        for spec in specs {
            match self.interceptor.create(spec.name, spec.target, spec.detour) {
                Ok(detour) => {
                    spec.original.set(detour.trampoline());
                    let key = self.hooks.insert(HookEntry {
                        name: spec.name.to_string(),
                        detour,
                        original: spec.original,
                    });
                    tracing::debug!("Created hook '{}' at {:x}", spec.name, spec.target);
                    keys.push(key);
                }
                Err(e) => {
                    tracing::error!("Failed to create hook '{}' at {:x}: {}", spec.name, spec.target, e);
                    if let Err(rollback) = self.remove_hooks(&keys) {
                        tracing::error!("Rollback of partial hook batch failed: {}", rollback);
                    }
                    return Err(e);
                }
            }
        }

        Ok(keys)
    }

    /// Resolve `module!export` among already-loaded modules and hook it
    ///
    /// # Safety
    /// See [`HookRegistry::create_hooks`].
    pub unsafe fn create_api_hook(
        &mut self,
        spec: &ApiHookSpec,
        symbols: &dyn SymbolSource,
    ) -> Result<HookKey, HookError> {
        let target = symbols.export_address(spec.module, spec.export)?;
        let keys = self.create_hooks(&[HookSpec {
            name: spec.export,
            target,
            detour: spec.detour,
            original: spec.original,
        }])?;
        keys.into_iter().next().ok_or(HookError::NotFound)
    }

    /// Enable the given records; on failure the ones enabled by this call
    /// are disabled again
    pub fn enable_hooks(&mut self, keys: &[HookKey]) -> Result<(), HookError> {
        let mut switched = Vec::new();

        for &key in keys {
            let entry = self.hooks.get_mut(key).ok_or(HookError::NotFound)?;
            if entry.detour.is_enabled() {
                continue;
            }
            match unsafe { entry.detour.enable() } {
                Ok(()) => {
                    tracing::debug!("Enabled hook '{}'", entry.name);
                    switched.push(key);
                }
                Err(e) => {
                    tracing::error!("Failed to enable hook '{}': {}", entry.name, e);
                    for key in switched {
                        if let Some(entry) = self.hooks.get_mut(key) {
                            let _ = unsafe { entry.detour.disable() };
                        }
                    }
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Disable the given records without destroying them
    pub fn disable_hooks(&mut self, keys: &[HookKey]) -> Result<(), HookError> {
        for &key in keys {
            let entry = self.hooks.get_mut(key).ok_or(HookError::NotFound)?;
            if entry.detour.is_enabled() {
                unsafe { entry.detour.disable() }?;
                tracing::debug!("Disabled hook '{}'", entry.name);
            }
        }
        Ok(())
    }

    pub fn enable_all(&mut self) -> Result<(), HookError> {
        let keys: Vec<HookKey> = self.hooks.keys().collect();
        self.enable_hooks(&keys)
    }

    pub fn disable_all(&mut self) -> Result<(), HookError> {
        let keys: Vec<HookKey> = self.hooks.keys().collect();
        self.disable_hooks(&keys)
    }

    /// Revert and forget the given records.
    ///
    /// Keys that were never installed or are already removed are skipped. A
    /// record whose target cannot be restored stays registered and the first
    /// such error is returned after the remaining keys are processed.
    pub fn remove_hooks(&mut self, keys: &[HookKey]) -> Result<(), HookError> {
        let mut first_error = None;

        for &key in keys {
            let Some(entry) = self.hooks.get_mut(key) else {
                continue;
            };
            if let Err(e) = unsafe { entry.detour.disable() } {
                tracing::error!("Failed to restore hook '{}': {}", entry.name, e);
                first_error.get_or_insert(e);
                continue;
            }
            if let Some(entry) = self.hooks.remove(key) {
                entry.original.set(0);
                tracing::debug!("Removed hook '{}'", entry.name);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn status(&self, key: HookKey) -> HookStatus {
        match self.hooks.get(key) {
            None => HookStatus::NotInstalled,
            Some(entry) if entry.detour.is_enabled() => HookStatus::Enabled,
            Some(_) => HookStatus::Disabled,
        }
    }

    /// Number of installed records (enabled or not)
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Number of enabled records
    pub fn active_count(&self) -> usize {
        self.hooks
            .values()
            .filter(|entry| entry.detour.is_enabled())
            .count()
    }

    /// Register a callback for [`HookRegistry::shutdown`]
    pub fn register_teardown(&mut self, callback: TeardownFn) {
        self.teardown.push(callback);
    }

    /// Run teardown callbacks (newest first) and release every record.
    ///
    /// When the process is terminating the records are leaked instead of
    /// restored. Later calls do nothing.
    pub fn shutdown(&mut self, is_process_terminating: bool) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        for callback in self.teardown.drain(..).rev() {
            callback(is_process_terminating);
        }

        if is_process_terminating {
            let leaked = self.hooks.len();
            for (_, entry) in self.hooks.drain() {
                std::mem::forget(entry.detour);
            }
            tracing::debug!("Process terminating, leaked {} hook records", leaked);
            return;
        }

        let keys: Vec<HookKey> = self.hooks.keys().collect();
        if let Err(e) = self.remove_hooks(&keys) {
            tracing::error!("Failed to remove hooks at shutdown: {}", e);
        }
        tracing::info!("Hook registry shut down");
    }
}

impl Drop for HookRegistry {
    fn drop(&mut self) {
        self.shutdown(false);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Interceptor that records patch state instead of writing code

    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct PatchLog {
        /// target -> currently patched
        pub patched: BTreeMap<usize, bool>,
        pub created: Vec<usize>,
        pub dropped: Vec<usize>,
    }

    #[derive(Clone, Default)]
    pub struct MockInterceptor {
        pub log: Arc<Mutex<PatchLog>>,
        pub fail_create: Arc<Mutex<BTreeSet<usize>>>,
        pub fail_enable: Arc<Mutex<BTreeSet<usize>>>,
    }

    impl MockInterceptor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn is_patched(&self, target: usize) -> bool {
            self.log.lock().patched.get(&target).copied().unwrap_or(false)
        }

        pub fn fail_create_at(&self, target: usize) {
            self.fail_create.lock().insert(target);
        }

        pub fn fail_enable_at(&self, target: usize) {
            self.fail_enable.lock().insert(target);
        }
    }

    impl Interceptor for MockInterceptor {
        unsafe fn create(
            &mut self,
            _name: &str,
            target: usize,
            _detour: usize,
        ) -> Result<Box<dyn Detour>, HookError> {
            if self.fail_create.lock().contains(&target) {
                return Err(HookError::UnsupportedPrologue {
                    address: target,
                    reason: "mock".to_string(),
                });
            }
            self.log.lock().created.push(target);
            Ok(Box::new(MockDetour {
                target,
                enabled: false,
                owner: self.clone(),
            }))
        }
    }

    pub struct MockDetour {
        target: usize,
        enabled: bool,
        owner: MockInterceptor,
    }

    impl Detour for MockDetour {
        fn target(&self) -> usize {
            self.target
        }

        fn trampoline(&self) -> usize {
            self.target + 0x1_0000
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        unsafe fn enable(&mut self) -> Result<(), HookError> {
            if self.owner.fail_enable.lock().contains(&self.target) {
                return Err(HookError::MemoryProtection("mock".to_string()));
            }
            self.enabled = true;
            self.owner.log.lock().patched.insert(self.target, true);
            Ok(())
        }

        unsafe fn disable(&mut self) -> Result<(), HookError> {
            self.enabled = false;
            self.owner.log.lock().patched.insert(self.target, false);
            Ok(())
        }
    }

    impl Drop for MockDetour {
        fn drop(&mut self) {
            self.enabled = false;
            let mut log = self.owner.log.lock();
            log.patched.insert(self.target, false);
            log.dropped.push(self.target);
        }
    }

    /// Leak a fresh slot for a test spec
    pub fn slot() -> &'static OriginalSlot {
        Box::leak(Box::new(OriginalSlot::new()))
    }

    pub fn spec(name: &'static str, target: usize) -> HookSpec {
        HookSpec {
            name,
            target,
            detour: 0xD000 + target,
            original: slot(),
        }
    }
}
