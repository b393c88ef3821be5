//! Type-state builder for `Topup` and generic `build_controller` constructor.
//!
//! The builder enforces at compile time that a level source and a pump are
//! provided before `build()` is available. `try_build()` is always available
//! for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use topoff_traits::{
    Clock, MemoryStore, MonotonicClock, Pump, Schedule, SettingsStore, SystemWallClock, WallClock,
};

use crate::cancel::CancelToken;
use crate::config::TopupCfg;
use crate::controller::{ControllerContext, TopupController};
use crate::error::{BuildError, Result};
use crate::hw_error::map_hw_error;
use crate::ranger::LevelSource;
use crate::status::StatusHandle;

/// Dynamically dispatched controller produced by `TopupBuilder`.
pub type Topup = TopupController<Box<dyn LevelSource + Send>, Box<dyn Pump + Send>>;

impl Topup {
    /// Start building a controller.
    pub fn builder() -> TopupBuilder<Missing, Missing> {
        TopupBuilder::default()
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Optional collaborators shared by both construction paths.
#[derive(Default)]
pub struct Parts {
    pub topup: Option<TopupCfg>,
    pub schedule: Option<Schedule>,
    pub store: Option<Box<dyn SettingsStore + Send>>,
    pub clock: Option<Arc<dyn Clock + Send + Sync>>,
    pub wall: Option<Arc<dyn WallClock + Send + Sync>>,
    pub cancel: Option<CancelToken>,
    pub status: Option<StatusHandle>,
}

pub struct TopupBuilder<L, P> {
    source: Option<Box<dyn LevelSource + Send>>,
    pump: Option<Box<dyn Pump + Send>>,
    parts: Parts,
    _l: PhantomData<L>,
    _p: PhantomData<P>,
}

impl Default for TopupBuilder<Missing, Missing> {
    fn default() -> Self {
        Self {
            source: None,
            pump: None,
            parts: Parts::default(),
            _l: PhantomData,
            _p: PhantomData,
        }
    }
}

fn validate(topup: &TopupCfg) -> Result<()> {
    if !topup.trigger_level_cm.is_finite() {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "trigger_level_cm must be finite",
        )));
    }
    if topup.max_runtime_ms == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "max_runtime_ms must be > 0",
        )));
    }
    if topup.debounce_count == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "debounce_count must be >= 1",
        )));
    }
    Ok(())
}

/// Validate, load persisted settings and force the pump off.
///
/// This is the single source of truth for construction, used by both
/// `TopupBuilder::try_build()` and `build_controller()`.
fn validate_and_build<L: LevelSource, P: Pump>(
    source: L,
    mut pump: P,
    parts: Parts,
) -> Result<TopupController<L, P>> {
    let topup = parts.topup.unwrap_or_default();
    validate(&topup)?;

    let store = parts
        .store
        .unwrap_or_else(|| Box::new(MemoryStore::new()));
    let mut ctx = ControllerContext::new(topup, parts.schedule.unwrap_or_default());
    ctx.reload(&*store)?;

    // Whatever the relay was doing before we owned it, it starts off.
    pump.stop().map_err(|e| map_hw_error(e.as_ref()))?;

    let status = parts.status.unwrap_or_default();
    status.update(|s| {
        s.state = ctx.state;
        s.pump_on = false;
    });

    Ok(TopupController {
        source,
        pump,
        store,
        clock: parts.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new())),
        wall: parts.wall.unwrap_or_else(|| Arc::new(SystemWallClock)),
        ctx,
        cancel: parts.cancel.unwrap_or_default(),
        status,
    })
}

impl<L, P> TopupBuilder<L, P> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<Topup> {
        let source = self
            .source
            .ok_or_else(|| eyre::Report::new(BuildError::MissingLevelSource))?;
        let pump = self
            .pump
            .ok_or_else(|| eyre::Report::new(BuildError::MissingPump))?;
        validate_and_build(source, pump, self.parts)
    }
}

/// Chainable setters that do not affect type-state.
impl<L, P> TopupBuilder<L, P> {
    pub fn with_topup(mut self, topup: TopupCfg) -> Self {
        self.parts.topup = Some(topup);
        self
    }
    /// Schedule used when the store has none saved.
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.parts.schedule = Some(schedule);
        self
    }
    /// Settings store; defaults to a volatile `MemoryStore`.
    pub fn with_store(mut self, store: impl SettingsStore + Send + 'static) -> Self {
        self.parts.store = Some(Box::new(store));
        self
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.parts.clock = Some(clock);
        self
    }
    pub fn with_wall_clock(mut self, wall: Arc<dyn WallClock + Send + Sync>) -> Self {
        self.parts.wall = Some(wall);
        self
    }
    /// Share a cancellation token, typically the one the ranger was built with.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.parts.cancel = Some(cancel);
        self
    }
    pub fn with_status(mut self, status: StatusHandle) -> Self {
        self.parts.status = Some(status);
        self
    }
}

// Setters that advance type-state
impl<P> TopupBuilder<Missing, P> {
    pub fn with_level_source(
        self,
        source: impl LevelSource + Send + 'static,
    ) -> TopupBuilder<Set, P> {
        TopupBuilder {
            source: Some(Box::new(source)),
            pump: self.pump,
            parts: self.parts,
            _l: PhantomData,
            _p: PhantomData,
        }
    }
}

impl<L> TopupBuilder<L, Missing> {
    pub fn with_pump(self, pump: impl Pump + Send + 'static) -> TopupBuilder<L, Set> {
        TopupBuilder {
            source: self.source,
            pump: Some(Box::new(pump)),
            parts: self.parts,
            _l: PhantomData,
            _p: PhantomData,
        }
    }
}

impl TopupBuilder<Set, Set> {
    /// Validate and build. Only available when a level source and a pump are set.
    pub fn build(self) -> Result<Topup> {
        self.try_build()
    }
}

/// Build a statically dispatched controller from concrete parts.
///
/// Delegates to the shared `validate_and_build`.
pub fn build_controller<L, P>(source: L, pump: P, parts: Parts) -> Result<TopupController<L, P>>
where
    L: LevelSource,
    P: Pump,
{
    validate_and_build(source, pump, parts)
}
