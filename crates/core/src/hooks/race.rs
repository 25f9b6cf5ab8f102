//! Race to first attachment
//!
//! Several hooks share one latch. Whichever fires first claims the latch and
//! performs the attachment; everyone else, including re-entrant calls made
//! during the attachment, only calls through to the original. The latch is
//! never reset.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use super::inline::HookError;
use super::manager::{HookKey, HookRegistry, HookSpec};

const PENDING: u8 = 0;
const ATTACHED: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaceState {
    Pending,
    Attached,
}

/// One-shot latch shared between the race members
#[derive(Debug, Default)]
pub struct RaceLatch(AtomicU8);

impl RaceLatch {
    pub const fn new() -> Self {
        Self(AtomicU8::new(PENDING))
    }

    /// Claim the attachment; true for exactly one caller
    pub fn try_claim(&self) -> bool {
        self.0
            .compare_exchange(PENDING, ATTACHED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn state(&self) -> RaceState {
        match self.0.load(Ordering::Acquire) {
            PENDING => RaceState::Pending,
            _ => RaceState::Attached,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == RaceState::Pending
    }
}

/// Body shared by every race member's detour.
///
/// The original always runs first. The latch is claimed after it returns and
/// before `attach` runs, so `attach` executes at most once per latch.
pub fn on_race_site<R>(
    latch: &RaceLatch,
    original: impl FnOnce() -> R,
    attach: impl FnOnce(),
) -> R {
    let result = original();
    if latch.is_pending() && latch.try_claim() {
        attach();
    }
    result
}

/// Hook records racing for one attachment
#[derive(Debug)]
pub struct AttachmentRace {
    name: String,
    members: Vec<HookKey>,
    latch: Arc<RaceLatch>,
}

impl AttachmentRace {
    /// Create and enable every member. Nothing stays installed on failure.
    ///
    /// # Safety
    /// See [`HookRegistry::create_hooks`].
    pub unsafe fn arm(
        name: &str,
        registry: &mut HookRegistry,
        specs: &[HookSpec],
        latch: Arc<RaceLatch>,
    ) -> Result<Self, HookError> {
        let members = registry.create_hooks(specs)?;
        if let Err(e) = registry.enable_hooks(&members) {
            let _ = registry.remove_hooks(&members);
            return Err(e);
        }

        tracing::info!("Armed race '{}' with {} members", name, members.len());
        Ok(Self {
            name: name.to_string(),
            members,
            latch,
        })
    }

    pub fn latch(&self) -> &Arc<RaceLatch> {
        &self.latch
    }

    pub fn state(&self) -> RaceState {
        self.latch.state()
    }

    pub fn members(&self) -> &[HookKey] {
        &self.members
    }

    /// Remove every member, including the one that won
    pub fn disarm(&mut self, registry: &mut HookRegistry) -> Result<(), HookError> {
        if self.members.is_empty() {
            return Ok(());
        }
        registry.remove_hooks(&self.members)?;
        tracing::info!("Disarmed race '{}'", self.name);
        self.members.clear();
        Ok(())
    }
}
