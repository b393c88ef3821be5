//! Top-up state machine: threshold check, pump actuation, debounce and the
//! maximum run time cutoff.
//!
//! The pump output always matches `TopupState::pump_on()`: every state change
//! that flips the pump writes the pump first and only then updates the state.
//! Every call to `run` ends in exactly one `TriggerReason` with the pump off,
//! unless the pump itself refuses to switch off (reported as `PumpFault`).

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use topoff_traits::{Clock, Pump, Schedule, SettingsStore, WallClock};

use crate::cancel::CancelToken;
use crate::config::TopupCfg;
use crate::error::TopoffError;
use crate::hw_error::{map_hw_error, map_store_error};
use crate::ranger::LevelSource;
use crate::status::StatusHandle;
use crate::util::millis_u64;

/// Attempts made to switch the pump off before declaring a fault.
const PUMP_STOP_ATTEMPTS: u32 = 3;

/// Upper bound applied to any requested pump run time.
const MAX_RUNTIME_CAP: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopupState {
    /// Pump off, no run in progress.
    #[default]
    Idle,
    /// Pump on, level still above the trigger.
    Running,
    /// Pump on, readings below the trigger are being debounced.
    Draining,
}

impl TopupState {
    #[inline]
    pub fn pump_on(self) -> bool {
        matches!(self, TopupState::Running | TopupState::Draining)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    ThresholdReached,
    PumpTimeout,
    SensorError,
    NotNeeded,
    Cancelled,
    PumpFault,
}

impl TriggerReason {
    /// Text stored as the last-trigger reason.
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerReason::ThresholdReached => "Trigger level reached",
            TriggerReason::PumpTimeout => "The pump on time limit was reached",
            TriggerReason::SensorError => "Sensor error",
            TriggerReason::NotNeeded => "Topup not needed",
            TriggerReason::Cancelled => "Topup cancelled",
            TriggerReason::PumpFault => "Pump fault",
        }
    }

    /// Machine-friendly name.
    pub fn name(self) -> &'static str {
        match self {
            TriggerReason::ThresholdReached => "threshold_reached",
            TriggerReason::PumpTimeout => "pump_timeout",
            TriggerReason::SensorError => "sensor_error",
            TriggerReason::NotNeeded => "not_needed",
            TriggerReason::Cancelled => "cancelled",
            TriggerReason::PumpFault => "pump_fault",
        }
    }

    /// Whether this outcome is written to the audit record.
    pub fn is_recorded(self) -> bool {
        !matches!(self, TriggerReason::NotNeeded)
    }
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TopupOutcome {
    pub reason: TriggerReason,
    pub ended_at: DateTime<Local>,
    /// Last level observed during the run, if any reading succeeded.
    pub level_cm: Option<f32>,
    /// How long the pump ran.
    pub pumped_for: Duration,
}

/// Settings and state owned by one controller. Reloaded explicitly from the
/// settings store; never shared.
#[derive(Debug, Clone)]
pub struct ControllerContext {
    pub topup: TopupCfg,
    pub schedule: Schedule,
    pub state: TopupState,
    pub last_outcome: Option<TopupOutcome>,
    default_trigger_cm: f32,
    default_schedule: Schedule,
}

impl ControllerContext {
    /// `topup.trigger_level_cm` and `schedule` become the fallbacks used when
    /// the store has nothing saved.
    pub fn new(topup: TopupCfg, schedule: Schedule) -> Self {
        Self {
            default_trigger_cm: topup.trigger_level_cm,
            default_schedule: schedule,
            topup,
            schedule,
            state: TopupState::Idle,
            last_outcome: None,
        }
    }

    /// Pull the trigger level and schedule from `store`.
    pub fn reload(&mut self, store: &dyn SettingsStore) -> Result<(), TopoffError> {
        let trigger = store
            .trigger_level_cm()
            .map_err(|e| map_store_error(e.as_ref()))?;
        let schedule = store.schedule().map_err(|e| map_store_error(e.as_ref()))?;
        self.topup.trigger_level_cm = trigger.unwrap_or(self.default_trigger_cm);
        self.schedule = schedule.unwrap_or(self.default_schedule);
        tracing::debug!(
            trigger_level_cm = self.topup.trigger_level_cm,
            days = self.schedule.days,
            hour = self.schedule.hour,
            minute = self.schedule.minute,
            "settings loaded"
        );
        Ok(())
    }
}

pub struct TopupController<L, P> {
    pub(crate) source: L,
    pub(crate) pump: P,
    pub(crate) store: Box<dyn SettingsStore + Send>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) wall: Arc<dyn WallClock + Send + Sync>,
    pub(crate) ctx: ControllerContext,
    pub(crate) cancel: CancelToken,
    pub(crate) status: StatusHandle,
}

impl<L, P> core::fmt::Debug for TopupController<L, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TopupController")
            .field("ctx", &self.ctx)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl<L: LevelSource, P: Pump> TopupController<L, P> {
    /// One top-up run.
    ///
    /// Takes an averaged reading; if no top-up is needed returns `NotNeeded`
    /// without touching the pump. Otherwise switches the pump on and reads
    /// once per iteration: `num_below` counts consecutive readings below
    /// `threshold_cm` and the run ends with `ThresholdReached` when it hits
    /// `debounce_count`. Running longer than `max_runtime` ends the run with
    /// `PumpTimeout` even if the debounce would also have completed.
    pub fn run(
        &mut self,
        threshold_cm: f32,
        max_runtime: Duration,
        debounce_count: u32,
    ) -> TopupOutcome {
        tracing::info!(
            threshold_cm,
            max_runtime_ms = millis_u64(max_runtime),
            debounce_count,
            "top-up run starting"
        );

        if self.ctx.state.pump_on() {
            // A previous run could not switch the pump off.
            if let Err(e) = self.stop_pump() {
                tracing::error!(error = %e, "pump still on from a previous run");
                return self.finish(TriggerReason::PumpFault, None, Duration::ZERO);
            }
        }

        let level = match self.probe_average() {
            Ok(cm) => cm,
            Err(TopoffError::Cancelled) => {
                return self.finish(TriggerReason::Cancelled, None, Duration::ZERO);
            }
            Err(e) => {
                tracing::warn!(error = %e, "initial level read failed");
                return self.finish(TriggerReason::SensorError, None, Duration::ZERO);
            }
        };

        if !self.ctx.topup.sense.needs_topup(level, threshold_cm) {
            tracing::info!(distance_cm = level, threshold_cm, "top-up not needed");
            return self.finish(TriggerReason::NotNeeded, Some(level), Duration::ZERO);
        }

        let max_runtime = max_runtime.min(MAX_RUNTIME_CAP);
        let started = self.clock.now();
        let Some(deadline) = started.checked_add(max_runtime) else {
            tracing::error!(
                max_runtime_ms = millis_u64(max_runtime),
                "run time limit not representable, pump left off"
            );
            return self.finish(TriggerReason::PumpFault, Some(level), Duration::ZERO);
        };

        if let Err(e) = self.start_pump() {
            tracing::error!(error = %e, "pump failed to start");
            if let Err(e) = self.stop_pump() {
                tracing::error!(error = %e, "pump did not switch off");
            }
            return self.finish(TriggerReason::PumpFault, Some(level), Duration::ZERO);
        }

        let (reason, last_level) =
            self.monitor(started, deadline, threshold_cm, max_runtime, debounce_count, level);
        let pumped_for = self.clock.now().saturating_duration_since(started);

        let reason = match self.stop_pump() {
            Ok(()) => reason,
            Err(e) => {
                tracing::error!(error = %e, "pump did not switch off");
                TriggerReason::PumpFault
            }
        };
        self.finish(reason, Some(last_level), pumped_for)
    }

    fn monitor(
        &mut self,
        started: Instant,
        deadline: Instant,
        threshold_cm: f32,
        max_runtime: Duration,
        debounce_count: u32,
        mut last_level: f32,
    ) -> (TriggerReason, f32) {
        let mut num_below: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("top-up cancelled");
                return (TriggerReason::Cancelled, last_level);
            }

            let cm = match self.source.read_within(deadline) {
                Ok(cm) => cm,
                Err(TopoffError::DeadlineExceeded) => {
                    tracing::warn!("pump run time limit reached while reading level");
                    return (TriggerReason::PumpTimeout, last_level);
                }
                Err(TopoffError::Cancelled) => return (TriggerReason::Cancelled, last_level),
                Err(e) => {
                    tracing::warn!(error = %e, "level read failed while pumping");
                    return (TriggerReason::SensorError, last_level);
                }
            };
            last_level = cm;
            self.status.update(|s| s.current_level_cm = Some(cm));

            if cm < threshold_cm {
                num_below += 1;
            } else {
                num_below = 0;
            }
            self.set_pumping_state(if num_below > 0 {
                TopupState::Draining
            } else {
                TopupState::Running
            });

            let elapsed = self.clock.now().saturating_duration_since(started);
            tracing::trace!(
                distance_cm = cm,
                num_below,
                elapsed_ms = millis_u64(elapsed),
                "monitoring"
            );
            if elapsed >= max_runtime {
                tracing::warn!(elapsed_ms = millis_u64(elapsed), "pump run time limit reached");
                return (TriggerReason::PumpTimeout, last_level);
            }
            if num_below >= debounce_count {
                return (TriggerReason::ThresholdReached, last_level);
            }
        }
    }

    /// `run` with the context's current trigger level and limits.
    pub fn run_configured(&mut self) -> TopupOutcome {
        let cfg = self.ctx.topup.clone();
        self.run(cfg.trigger_level_cm, cfg.max_runtime(), cfg.debounce_count)
    }

    /// Re-read trigger level and schedule from the settings store.
    pub fn reload_settings(&mut self) -> Result<(), TopoffError> {
        self.ctx.reload(&*self.store)
    }

    /// Persist a new trigger level and apply it to subsequent runs.
    pub fn set_trigger_level_cm(&mut self, cm: f32) -> Result<(), TopoffError> {
        if !cm.is_finite() {
            return Err(TopoffError::Config("trigger level must be finite".into()));
        }
        self.store
            .set_trigger_level_cm(cm)
            .map_err(|e| map_store_error(e.as_ref()))?;
        self.ctx.topup.trigger_level_cm = cm;
        Ok(())
    }

    /// Persist a new schedule.
    pub fn set_schedule(&mut self, schedule: Schedule) -> Result<(), TopoffError> {
        self.store
            .set_schedule(schedule)
            .map_err(|e| map_store_error(e.as_ref()))?;
        self.ctx.schedule = schedule;
        Ok(())
    }

    /// Single level reading outside a run.
    pub fn probe(&mut self) -> Result<f32, TopoffError> {
        let cm = self.source.read()?;
        self.status.update(|s| s.current_level_cm = Some(cm));
        Ok(cm)
    }

    /// Averaged level reading outside a run.
    pub fn probe_average(&mut self) -> Result<f32, TopoffError> {
        let cm = self.source.read_average()?;
        self.status.update(|s| s.current_level_cm = Some(cm));
        Ok(cm)
    }

    fn start_pump(&mut self) -> Result<(), TopoffError> {
        self.pump.start().map_err(|e| map_hw_error(e.as_ref()))?;
        self.set_state(TopupState::Running);
        tracing::debug!("pump on");
        Ok(())
    }

    /// Switch the pump off regardless of the tracked state, retrying a few
    /// times. The state only becomes `Idle` once a write succeeded.
    pub(crate) fn stop_pump(&mut self) -> Result<(), TopoffError> {
        let mut last = TopoffError::Hardware("pump stop not attempted".into());
        for attempt in 1..=PUMP_STOP_ATTEMPTS {
            match self.pump.stop() {
                Ok(()) => {
                    self.set_state(TopupState::Idle);
                    tracing::debug!("pump off");
                    return Ok(());
                }
                Err(e) => {
                    last = map_hw_error(e.as_ref());
                    tracing::warn!(attempt, error = %last, "pump stop failed");
                }
            }
        }
        Err(last)
    }

    /// Move between the two pumping states; the pump output is unchanged.
    fn set_pumping_state(&mut self, next: TopupState) {
        if self.ctx.state.pump_on() && next.pump_on() && self.ctx.state != next {
            tracing::trace!(from = ?self.ctx.state, to = ?next, "state");
            self.set_state(next);
        }
    }

    fn set_state(&mut self, next: TopupState) {
        self.ctx.state = next;
        let pump_on = next.pump_on();
        self.status.update(|s| {
            s.state = next;
            s.pump_on = pump_on;
        });
    }

    fn finish(
        &mut self,
        reason: TriggerReason,
        level_cm: Option<f32>,
        pumped_for: Duration,
    ) -> TopupOutcome {
        let ended_at = self.wall.now();
        let outcome = TopupOutcome {
            reason,
            ended_at,
            level_cm,
            pumped_for,
        };

        if reason.is_recorded() {
            let at = self.wall.format(&ended_at);
            if let Err(e) = self.store.set_last_trigger(&at, reason.as_str()) {
                tracing::warn!(error = %map_store_error(e.as_ref()), "failed to record last trigger");
            }
        }

        tracing::info!(
            reason = reason.name(),
            level_cm,
            pumped_ms = millis_u64(pumped_for),
            "top-up run finished"
        );
        self.ctx.last_outcome = Some(outcome.clone());
        let snapshot = outcome.clone();
        self.status.update(|s| s.last_outcome = Some(snapshot));
        outcome
    }

    pub fn state(&self) -> TopupState {
        self.ctx.state
    }

    pub fn context(&self) -> &ControllerContext {
        &self.ctx
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}
