//! Injection into the game's own Lua interpreter
//!
//! The four race sites of the module named in the script header are hooked.
//! The first one the game calls runs the original, then the preparation
//! snippet and the operator script on the game's interpreter state, all
//! inside that same call. Removing the four hooks needs the runtime; it
//! happens in the call too when the runtime is free and on the next frame
//! otherwise. After that each query only reads the global `PositionAddress`.

use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::path::Path;
use std::sync::Arc;

use overcursor_engine::{ResolveError, SymbolSource};
use overcursor_sdk::exports::display_name;
use overcursor_sdk::{lua_State, LuaCFunction, RACE_EXPORTS};
use parking_lot::Mutex;

use super::foreign::{preparation_snippet, ForeignInterpreter, LuaApi};
use super::header::parse_header;
use super::ScriptError;
use crate::hooks::{on_race_site, AttachmentRace, HookRegistry, HookSpec, OriginalSlot, RaceLatch};

/// Presented frames without an attachment before a warning is logged
pub const RACE_WARN_FRAMES: u64 = 600;

const POSITION_GLOBAL: &CStr = c"PositionAddress";

/// Injection the race detours currently serve
static ACTIVE_INJECTION: Mutex<Option<Arc<Injection>>> = Mutex::new(None);

fn active_injection() -> Option<Arc<Injection>> {
    ACTIVE_INJECTION.lock().clone()
}

macro_rules! race_detours {
    ($( $export:ident ( $($arg:ident : $ty:ty),* ) $(-> $ret:ty)? ;)*) => {
        paste::paste! {
            $(
                static [<$export:upper _ORIGINAL>]: OriginalSlot = OriginalSlot::new();

                #[allow(non_snake_case)]
                extern "C" fn [<$export _detour>](state: *mut lua_State $(, $arg: $ty)*) $(-> $ret)? {
                    let original = [<$export:upper _ORIGINAL>].get();
                    if original == 0 {
                        return Default::default();
                    }
                    let original = unsafe {
                        std::mem::transmute::<usize, unsafe extern "C" fn(*mut lua_State $(, $ty)*) $(-> $ret)?>(original)
                    };
                    let Some(injection) = active_injection() else {
                        return unsafe { original(state $(, $arg)*) };
                    };
                    on_race_site(
                        &injection.latch,
                        || unsafe { original(state $(, $arg)*) },
                        || attach_from_detour(&injection, state),
                    )
                }
            )*

            /// (detour, original slot) per race export, in [`RACE_EXPORTS`] order
            fn race_sites() -> [(usize, &'static OriginalSlot); RACE_EXPORTS.len()] {
                [$(
                    ([<$export _detour>] as usize, &[<$export:upper _ORIGINAL>]),
                )*]
            }
        }
    };
}

race_detours! {
    lua_call(nargs: c_int, nresults: c_int);
    lua_pcall(nargs: c_int, nresults: c_int, errfunc: c_int) -> c_int;
    lua_cpcall(func: LuaCFunction, ud: *mut c_void) -> c_int;
    luaL_callmeta(obj: c_int, event: *const c_char) -> c_int;
}

fn attach_from_detour(injection: &Injection, state: *mut lua_State) {
    // Errors are logged by the injection and leave it failed
    let _ = unsafe { injection.run(state) };
    crate::runtime::finish_attachment();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HijackState {
    Pending,
    Attached,
    Failed,
}

/// Interpreter state captured from the winning race site
#[derive(Debug, Clone, Copy)]
struct ForeignState(*mut lua_State);

// Only dereferenced through the foreign interpreter's own API
unsafe impl Send for ForeignState {}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Attached(ForeignState),
    Failed,
}

/// Everything the winning detour needs, reachable without the runtime lock
struct Injection {
    module: String,
    chunk_name: String,
    script: CString,
    preparation: CString,
    api: Box<dyn ForeignInterpreter>,
    latch: Arc<RaceLatch>,
    outcome: Mutex<Option<Outcome>>,
}

impl Injection {
    /// Run the preparation snippet, then the operator script, and record the
    /// outcome. The caller has claimed the latch; on failure it stays claimed
    /// and the engine has no value for the rest of the process lifetime.
    ///
    /// # Safety
    /// `state` must be the live interpreter state passed to a race site,
    /// used from that call's thread.
    unsafe fn run(&self, state: *mut lua_State) -> Result<(), ScriptError> {
        let result = self
            .api
            .run_chunk(state, &self.preparation, "preparation")
            .map_err(|e| ScriptError::Preparation(e.to_string()))
            .and_then(|()| {
                self.api
                    .run_chunk(state, &self.script, &self.chunk_name)
                    .map_err(|e| ScriptError::Operator(e.to_string()))
            });

        let outcome = match &result {
            Ok(()) => {
                tracing::info!("Attached {} to the interpreter of {}", self.chunk_name, self.module);
                Outcome::Attached(ForeignState(state))
            }
            Err(e) => {
                tracing::error!("Injection into {} abandoned: {}", self.module, e);
                Outcome::Failed
            }
        };
        *self.outcome.lock() = Some(outcome);
        result
    }

    fn outcome(&self) -> Option<Outcome> {
        *self.outcome.lock()
    }

    fn state(&self) -> HijackState {
        match self.outcome() {
            None => HijackState::Pending,
            Some(Outcome::Attached(_)) => HijackState::Attached,
            Some(Outcome::Failed) => HijackState::Failed,
        }
    }
}

pub struct HijackedEngine {
    injection: Arc<Injection>,
    targets: Vec<usize>,
    race: Option<AttachmentRace>,
    pending_frames: u64,
    warned: bool,
}

impl HijackedEngine {
    /// Parse the header, check the module is loaded and resolve every export
    /// the engine needs from it
    pub fn prepare(
        script: &str,
        chunk_name: &str,
        library_path: &Path,
        symbols: &dyn SymbolSource,
    ) -> Result<Self, ScriptError> {
        let module = parse_header(script)?;
        if !symbols.is_loaded(&module) {
            return Err(ResolveError::ModuleNotLoaded(module).into());
        }

        let targets = RACE_EXPORTS
            .iter()
            .map(|(name, _)| symbols.export_address(&module, name))
            .collect::<Result<Vec<_>, _>>()?;

        let api = unsafe { LuaApi::resolve(&module, symbols, Some(&LUA_PCALL_ORIGINAL)) }?;

        Self::new(
            module,
            chunk_name,
            script,
            preparation_snippet(library_path),
            targets,
            Box::new(api),
            Arc::new(RaceLatch::new()),
        )
    }

    pub fn new(
        module: String,
        chunk_name: &str,
        script: &str,
        preparation: String,
        targets: Vec<usize>,
        api: Box<dyn ForeignInterpreter>,
        latch: Arc<RaceLatch>,
    ) -> Result<Self, ScriptError> {
        let script = CString::new(script).map_err(|_| ScriptError::NulByte)?;
        let preparation = CString::new(preparation).map_err(|_| ScriptError::NulByte)?;

        Ok(Self {
            injection: Arc::new(Injection {
                module,
                chunk_name: chunk_name.to_string(),
                script,
                preparation,
                api,
                latch,
                outcome: Mutex::new(None),
            }),
            targets,
            race: None,
            pending_frames: 0,
            warned: false,
        })
    }

    pub fn module(&self) -> &str {
        &self.injection.module
    }

    pub fn state(&self) -> HijackState {
        self.injection.state()
    }

    pub fn latch(&self) -> &Arc<RaceLatch> {
        &self.injection.latch
    }

    /// Whether the race hooks are still installed
    pub fn is_armed(&self) -> bool {
        self.race.is_some()
    }

    /// Presented frames counted while waiting for the race
    pub fn pending_frames(&self) -> u64 {
        self.pending_frames
    }

    pub fn has_warned(&self) -> bool {
        self.warned
    }

    /// Hook every race site and make this engine the one the detours serve
    pub fn arm(&mut self, registry: &mut HookRegistry) -> Result<(), ScriptError> {
        let specs: Vec<HookSpec> = RACE_EXPORTS
            .iter()
            .zip(race_sites())
            .zip(&self.targets)
            .map(|(((name, export), (detour, original)), &target)| {
                debug_assert_eq!(*name, display_name(export));
                HookSpec {
                    name: *name,
                    target,
                    detour,
                    original,
                }
            })
            .collect();

        // Published first so a site firing as soon as it is enabled finds it
        *ACTIVE_INJECTION.lock() = Some(self.injection.clone());

        match unsafe { AttachmentRace::arm(self.module(), registry, &specs, self.latch().clone()) } {
            Ok(race) => {
                self.race = Some(race);
                Ok(())
            }
            Err(e) => {
                self.deactivate();
                Err(e.into())
            }
        }
    }

    /// Inject into `state` as the winning race site would. The caller has
    /// claimed the latch.
    ///
    /// # Safety
    /// `state` must be a live interpreter state of the engine's module,
    /// used from the thread that passed it to a race site.
    pub unsafe fn inject(&self, state: *mut lua_State) -> Result<(), ScriptError> {
        self.injection.run(state)
    }

    /// Remove the race hooks once an injection has run, successful or not.
    /// Returns whether hooks were removed.
    pub fn finish(&mut self, registry: &mut HookRegistry) -> bool {
        if self.race.is_none() || self.state() == HijackState::Pending {
            return false;
        }
        self.disarm(registry);
        true
    }

    /// Value of `PositionAddress` once attached
    pub fn query(&mut self) -> Option<usize> {
        match self.injection.outcome() {
            None => {
                self.pending_frames += 1;
                if self.pending_frames >= RACE_WARN_FRAMES && !self.warned {
                    self.warned = true;
                    tracing::warn!(
                        "No supported attachment point of {} reached after {} frames",
                        self.module(),
                        self.pending_frames
                    );
                }
                None
            }
            Some(Outcome::Failed) => None,
            Some(Outcome::Attached(ForeignState(state))) => {
                let value = unsafe { self.injection.api.read_global_number(state, POSITION_GLOBAL) }?;
                if value.is_finite() && value >= 1.0 {
                    Some(value as usize)
                } else {
                    None
                }
            }
        }
    }

    /// Remove the race hooks, attached or not
    pub fn disarm(&mut self, registry: &mut HookRegistry) {
        if let Some(mut race) = self.race.take() {
            if let Err(e) = race.disarm(registry) {
                tracing::error!("Failed to remove race hooks of {}: {}", self.module(), e);
            }
        }
        self.deactivate();
    }

    /// Stop the detours from serving this engine. Hooks that stay installed
    /// only call through to the original afterwards.
    pub fn deactivate(&self) {
        let mut active = ACTIVE_INJECTION.lock();
        if active.as_ref().is_some_and(|a| Arc::ptr_eq(a, &self.injection)) {
            *active = None;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::hooks::testing::MockInterceptor;
    use crate::hooks::RaceState;

    #[test]
    fn test_winning_site_runs_original_then_scripts() {
        let _serial = serial();
        let fake = FakeInterpreter::default();
        let mock = MockInterceptor::new();
        let mut registry = HookRegistry::new(Box::new(mock.clone()));
        let mut engine = engine(&fake);
        engine.arm(&mut registry).unwrap();
        assert_eq!(registry.active_count(), 4);
        use_counting_originals();

        for _ in 0..3 {
            fire_lua_call(state());
        }

        assert_eq!(original_calls(), 3);
        assert_eq!(*fake.log.lock(), vec!["preparation", "th.lua"]);
        assert_eq!(engine.latch().state(), RaceState::Attached);
        assert_eq!(engine.state(), HijackState::Attached);

        // No runtime to remove the hooks from inside the call
        assert!(engine.is_armed());
        assert!(engine.finish(&mut registry));
        assert!(registry.is_empty());
        for target in [0x1000, 0x2000, 0x3000, 0x4000] {
            assert!(!mock.is_patched(target));
        }
        assert!(!engine.finish(&mut registry));
    }

    #[test]
    fn test_failed_injection_keeps_latch_and_yields_nothing() {
        let _serial = serial();
        let fake = FakeInterpreter {
            fail_on: Some("preparation"),
            ..Default::default()
        };
        *fake.position.lock() = Some(4096.0);
        let mut registry = HookRegistry::new(Box::new(MockInterceptor::new()));
        let mut engine = engine(&fake);
        engine.arm(&mut registry).unwrap();

        let latch = engine.latch().clone();
        assert!(latch.try_claim());
        let err = unsafe { engine.inject(state()) }.unwrap_err();
        assert!(matches!(err, ScriptError::Preparation(ref m) if m.contains("nil value")));

        assert_eq!(engine.state(), HijackState::Failed);
        assert!(engine.finish(&mut registry));
        assert_eq!(latch.state(), RaceState::Attached);
        assert!(registry.is_empty());
        assert_eq!(engine.query(), None);
        // The operator script never ran
        assert_eq!(*fake.log.lock(), vec!["preparation"]);
    }

    #[test]
    fn test_operator_failure_is_reported() {
        let fake = FakeInterpreter {
            fail_on: Some("th.lua"),
            ..Default::default()
        };
        let engine = engine(&fake);
        let err = unsafe { engine.inject(state()) }.unwrap_err();
        assert!(matches!(err, ScriptError::Operator(_)));
        assert_eq!(engine.state(), HijackState::Failed);
    }

    #[test]
    fn test_query_reads_position_global() {
        let fake = FakeInterpreter::default();
        let mut engine = engine(&fake);
        unsafe { engine.inject(state()) }.unwrap();

        assert_eq!(engine.query(), None);
        *fake.position.lock() = Some(0.0);
        assert_eq!(engine.query(), None);
        *fake.position.lock() = Some(f64::NAN);
        assert_eq!(engine.query(), None);
        *fake.position.lock() = Some(4096.0);
        assert_eq!(engine.query(), Some(4096));
    }

    #[test]
    fn test_pending_warning_after_threshold() {
        let fake = FakeInterpreter::default();
        let mut engine = engine(&fake);

        for _ in 0..RACE_WARN_FRAMES - 1 {
            assert_eq!(engine.query(), None);
        }
        assert!(!engine.has_warned());
        assert_eq!(engine.query(), None);
        assert!(engine.has_warned());
        engine.query();
        assert_eq!(engine.pending_frames(), RACE_WARN_FRAMES + 1);
        assert_eq!(engine.state(), HijackState::Pending);
    }

    #[test]
    fn test_disarm_before_attachment() {
        let _serial = serial();
        let fake = FakeInterpreter::default();
        let mut registry = HookRegistry::new(Box::new(MockInterceptor::new()));
        let mut engine = engine(&fake);
        engine.arm(&mut registry).unwrap();
        assert!(!engine.finish(&mut registry));
        engine.disarm(&mut registry);
        assert!(registry.is_empty());
        assert!(!engine.is_armed());
        engine.disarm(&mut registry);
    }

    #[test]
    fn test_deactivated_detours_only_call_through() {
        let _serial = serial();
        let fake = FakeInterpreter::default();
        let mut registry = HookRegistry::new(Box::new(MockInterceptor::new()));
        let mut engine = engine(&fake);
        engine.arm(&mut registry).unwrap();
        use_counting_originals();

        engine.deactivate();
        fire_lua_call(state());
        assert_eq!(fire_lua_pcall(state()), overcursor_sdk::LUA_OK);

        assert_eq!(original_calls(), 2);
        assert!(fake.log.lock().is_empty());
        assert_eq!(engine.latch().state(), RaceState::Pending);
        engine.disarm(&mut registry);
    }

    #[test]
    fn test_nul_byte_rejected() {
        let result = HijackedEngine::new(
            "lua.dll".to_string(),
            "x.lua",
            "bad\0script",
            String::new(),
            Vec::new(),
            Box::new(FakeInterpreter::default()),
            Arc::default(),
        );
        assert!(matches!(result, Err(ScriptError::NulByte)));
    }

    #[test]
    fn test_race_sites_match_exports() {
        let sites = race_sites();
        assert_eq!(sites.len(), RACE_EXPORTS.len());
        let detours: std::collections::BTreeSet<usize> = sites.iter().map(|(detour, _)| *detour).collect();
        assert_eq!(detours.len(), RACE_EXPORTS.len());
        assert!(!detours.contains(&0));
    }
}
