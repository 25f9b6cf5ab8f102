//! Process-wide runtime context
//!
//! One [`Runtime`] exists between attach and detach. It owns the hook
//! registry, the active position resolver and the geometry cache, and is
//! driven once per presented frame by the render backend.
//!
//! All entry points run on host threads the core does not own. The runtime
//! sits behind a single mutex. Race detours inject without it and only
//! `try_lock` it to remove their hooks, so a game calling back into its
//! interpreter while we hold the lock cannot deadlock.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use overcursor_engine::SymbolSource;
use parking_lot::Mutex;

use crate::config::{script_path, ChainBase, GameProfile, OverlayConfig, ResolutionStrategy};
use crate::geometry::{FloatPoint, ScreenGeometry, SurfaceSize};
use crate::hooks::{HookRegistry, Interceptor};
use crate::input::{GameInput, InputMethod, KeyRemapper, KeySink, PointerButtons};
use crate::memory::{read_position, ChainResolver, MemorySource};
use crate::scripting::{HijackedEngine, HostCallbacks, OwnedEngine, ScriptError, ScriptHost};

static RUNTIME: Mutex<Option<Runtime>> = Mutex::new(None);

/// Collaborators supplied by the plugin (or by tests)
pub struct RuntimeDeps {
    pub symbols: Arc<dyn SymbolSource>,
    pub memory: Arc<dyn MemorySource>,
    pub interceptor: Box<dyn Interceptor>,
    pub key_sink: Option<Box<dyn KeySink>>,
    /// Directory holding `scripts/`
    pub base_dir: PathBuf,
    /// Path of the overcursor library, loaded by injected scripts
    pub library_path: PathBuf,
}

/// What the backend reports each frame
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameInput {
    pub client: SurfaceSize,
    pub backbuffer: SurfaceSize,
    /// Pointer in client coordinates
    pub pointer: FloatPoint,
    pub buttons: PointerButtons,
    /// Whether pointer movement should drive the player this frame
    pub input_enabled: bool,
}

/// What the backend draws
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameOutput {
    /// Player position in client pixels
    pub position: Option<FloatPoint>,
    /// Cursor sprite position in back buffer pixels
    pub cursor: Option<FloatPoint>,
    pub sprite_scale: f32,
}

enum Resolver {
    Chain(ChainResolver),
    Script(ScriptHost),
    Inactive,
}

pub struct Runtime {
    profile: GameProfile,
    config: OverlayConfig,
    registry: HookRegistry,
    resolver: Resolver,
    memory: Arc<dyn MemorySource>,
    geometry: ScreenGeometry,
    remapper: Option<Arc<Mutex<KeyRemapper>>>,
    frame_count: u64,
}

impl Runtime {
    /// Build the runtime for `profile`. A strategy that cannot start leaves
    /// the runtime without a position source; it never fails the attach.
    pub fn start(profile: GameProfile, config: OverlayConfig, deps: RuntimeDeps) -> Self {
        let RuntimeDeps {
            symbols,
            memory,
            interceptor,
            key_sink,
            base_dir,
            library_path,
        } = deps;

        let mut registry = HookRegistry::new(interceptor);

        let resolver = match start_resolver(
            &profile,
            symbols.as_ref(),
            &memory,
            &mut registry,
            &base_dir,
            &library_path,
        ) {
            Ok(resolver) => resolver,
            Err(e) => {
                tracing::warn!("Position source for {} unavailable: {}", profile.process_name, e);
                Resolver::Inactive
            }
        };

        Self::assemble(profile, config, registry, resolver, memory, key_sink)
    }

    fn assemble(
        profile: GameProfile,
        config: OverlayConfig,
        mut registry: HookRegistry,
        resolver: Resolver,
        memory: Arc<dyn MemorySource>,
        key_sink: Option<Box<dyn KeySink>>,
    ) -> Self {
        let remapper = match key_sink {
            Some(sink) if profile.input_methods.contains(InputMethod::SEND_KEY) => {
                let remapper = Arc::new(Mutex::new(KeyRemapper::new(
                    config.keys.bomb,
                    config.keys.extra,
                    sink,
                )));
                let released = remapper.clone();
                registry.register_teardown(Box::new(move |is_process_terminating| {
                    if !is_process_terminating {
                        released.lock().release_all();
                    }
                }));
                Some(remapper)
            }
            _ => None,
        };

        tracing::info!(
            "Runtime started for {} (resolver: {}, key remap: {})",
            profile.process_name,
            resolver.name(),
            remapper.is_some()
        );

        Self {
            profile,
            config,
            registry,
            resolver,
            memory,
            geometry: ScreenGeometry::new(),
            remapper,
            frame_count: 0,
        }
    }

    pub fn profile(&self) -> &GameProfile {
        &self.profile
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn registry(&self) -> &HookRegistry {
        &self.registry
    }

    pub fn script_host(&self) -> Option<&ScriptHost> {
        match &self.resolver {
            Resolver::Script(host) => Some(host),
            _ => None,
        }
    }

    /// Per-frame work: resolve, transform, remap
    pub fn on_present(&mut self, frame: &FrameInput) -> FrameOutput {
        self.frame_count += 1;
        self.finish_attachment();

        let measurement = self
            .geometry
            .prepare_measurement(&self.profile.calibration(), frame.client);
        let cursor_state = self.geometry.prepare_cursor_state(
            frame.backbuffer,
            frame.client,
            self.config.cursor.base_height,
        );

        let position = self
            .resolve_raw_position()
            .zip(measurement)
            .map(|(raw, m)| m.to_screen_pixels(raw));

        if let Some(remapper) = &self.remapper {
            let input = match position {
                Some(player) if frame.input_enabled => GameInput::from_positions(
                    player,
                    frame.pointer,
                    self.config.input.dead_zone,
                    frame.buttons,
                ),
                _ => GameInput::empty(),
            };
            remapper.lock().apply(input);
        }

        FrameOutput {
            position,
            cursor: cursor_state.map(|c| c.pointer_to_backbuffer(frame.pointer)),
            sprite_scale: cursor_state.map_or(1.0, |c| c.sprite_scale),
        }
    }

    fn resolve_raw_position(&mut self) -> Option<FloatPoint> {
        let address = match &mut self.resolver {
            Resolver::Chain(chain) => chain
                .resolve(self.memory.as_ref())
                .map_err(|e| tracing::trace!("Pointer chain unresolved: {}", e))
                .ok()?,
            Resolver::Script(host) => host.query()?,
            Resolver::Inactive => return None,
        };

        read_position(self.memory.as_ref(), address, self.profile.value_type)
            .map_err(|e| tracing::trace!("Position at {:x} unreadable: {}", address, e))
            .ok()
    }

    /// Forget cached geometry after a resize or device loss
    pub fn invalidate_geometry(&mut self) {
        self.geometry.invalidate();
        tracing::debug!("Screen geometry invalidated");
    }

    /// Remove the race hooks once a race site has injected
    pub fn finish_attachment(&mut self) {
        if let Resolver::Script(ScriptHost::Hijacked(engine)) = &mut self.resolver {
            engine.finish(&mut self.registry);
        }
    }

    /// Release keys and hooks. Runs once; see [`HookRegistry::shutdown`].
    pub fn shutdown(&mut self, is_process_terminating: bool) {
        tracing::info!(
            "Runtime for {} shutting down after {} frames",
            self.profile.process_name,
            self.frame_count
        );
        if let Resolver::Script(ScriptHost::Hijacked(engine)) = &self.resolver {
            engine.deactivate();
        }
        self.registry.shutdown(is_process_terminating);
    }
}

impl Resolver {
    fn name(&self) -> &'static str {
        match self {
            Resolver::Chain(_) => "pointer chain",
            Resolver::Script(host) => host.name(),
            Resolver::Inactive => "none",
        }
    }
}

fn start_resolver(
    profile: &GameProfile,
    symbols: &dyn SymbolSource,
    memory: &Arc<dyn MemorySource>,
    registry: &mut HookRegistry,
    base_dir: &Path,
    library_path: &Path,
) -> Result<Resolver, ScriptError> {
    match &profile.strategy {
        ResolutionStrategy::PointerChain { base, offsets } => {
            let base = match base {
                ChainBase::MainModule => symbols.module_base(None)?,
                ChainBase::Module(name) => symbols.module_base(Some(name.as_str()))?,
                ChainBase::Absolute => 0,
            };
            tracing::debug!("Pointer chain base {:x}, offsets {:x?}", base, offsets);
            Ok(Resolver::Chain(ChainResolver::new(base, offsets.clone())))
        }
        ResolutionStrategy::OwnedScript => {
            let (script, chunk_name) = read_script(base_dir, &profile.process_name)?;
            let mut engine = OwnedEngine::new();
            engine.start(&script, &chunk_name, HostCallbacks::new(memory.clone()))?;
            Ok(Resolver::Script(ScriptHost::Owned(engine)))
        }
        ResolutionStrategy::HostHijackedScript => {
            let (script, chunk_name) = read_script(base_dir, &profile.process_name)?;
            let mut engine = HijackedEngine::prepare(&script, &chunk_name, library_path, symbols)?;
            engine.arm(registry)?;
            tracing::info!("Waiting for {} to call into its interpreter", engine.module());
            Ok(Resolver::Script(ScriptHost::Hijacked(engine)))
        }
    }
}

fn read_script(base_dir: &Path, process_name: &str) -> Result<(String, String), ScriptError> {
    let path = script_path(base_dir, process_name);
    let script = std::fs::read_to_string(&path).map_err(|source| ScriptError::ScriptIo {
        path: path.clone(),
        source,
    })?;
    let chunk_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| process_name.to_string());
    Ok((script, chunk_name))
}

/// Install the process-wide runtime, shutting down any previous one
pub fn install_runtime(runtime: Runtime) {
    let previous = RUNTIME.lock().replace(runtime);
    if let Some(mut previous) = previous {
        tracing::warn!("Replacing an existing runtime");
        previous.shutdown(false);
    }
}

/// Run `f` with the runtime, if one is installed
pub fn with_runtime<R>(f: impl FnOnce(&mut Runtime) -> R) -> Option<R> {
    RUNTIME.lock().as_mut().map(f)
}

/// Remove the process-wide runtime
pub fn take_runtime() -> Option<Runtime> {
    RUNTIME.lock().take()
}

/// Called by the winning race detour after it has injected. Without the
/// lock the hooks come off on the next frame instead.
pub(crate) fn finish_attachment() {
    match RUNTIME.try_lock() {
        Some(mut guard) => match guard.as_mut() {
            Some(runtime) => runtime.finish_attachment(),
            None => tracing::debug!("Race won before the runtime was installed"),
        },
        None => tracing::debug!("Runtime busy, race hooks removed on the next frame"),
    }
}
