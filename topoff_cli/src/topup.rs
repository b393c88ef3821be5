//! Hardware assembly and the command implementations.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel as xch;
use eyre::{Result, WrapErr};
use serde_json::json;
use topoff_config::{Config, FileStore, WEEKDAYS, days_from_names};
use topoff_core::hw_error::map_store_error;
use topoff_core::{
    CancelToken, ControllerContext, LevelSource, RangeSensor, Ranger, Ranging, ScheduleGate,
    SensorHandle, TopoffError, Topup, TopupOutcome, TopupWorker, util::millis_u64,
};
use topoff_traits::{Clock, MonotonicClock, Pump, Schedule, SettingsStore, SystemWallClock, WallClock};

use crate::error_fmt::exit_code_for_reason;

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
use sim::*;

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
mod sim {
    pub use topoff_hardware::{EchoFault, SimulatedTank};

    /// Starting distance of the simulated sensor.
    pub const SIM_DISTANCE_ENV: &str = "TOPOFF_SIM_DISTANCE_CM";
    /// Distance change per second of pumping (negative = air gap shrinks).
    pub const SIM_DRIFT_ENV: &str = "TOPOFF_SIM_DRIFT_CM_PER_S";
    /// `no_echo` or `stuck_high`.
    pub const SIM_FAULT_ENV: &str = "TOPOFF_SIM_FAULT";
    /// Any value makes every pump switch fail.
    pub const SIM_PUMP_FAIL_ENV: &str = "TOPOFF_SIM_PUMP_FAIL";
}

/// A top-up that ended without reaching the trigger level.
pub struct RunEnded(pub TopupOutcome);

impl std::fmt::Debug for RunEnded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RunEnded").field(&self.0.reason).finish()
    }
}

impl std::fmt::Display for RunEnded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "top-up ended: {}", self.0.reason)
    }
}

impl std::error::Error for RunEnded {}

/// Pins (or their simulation) for one process.
pub struct Rig {
    clock: Arc<dyn Clock + Send + Sync>,
    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    tank: SimulatedTank,
}

impl Rig {
    #[cfg(all(feature = "hardware", target_os = "linux"))]
    pub fn open() -> Result<Self> {
        Ok(Self {
            clock: Arc::new(MonotonicClock::new()),
        })
    }

    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    pub fn open() -> Result<Self> {
        let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
        let distance = env_f32(SIM_DISTANCE_ENV)?.unwrap_or(10.0);
        let drift = env_f32(SIM_DRIFT_ENV)?.unwrap_or(-2.0);
        let tank = SimulatedTank::new(clock.clone(), distance).with_drift(drift);
        match std::env::var(SIM_FAULT_ENV).ok().as_deref() {
            None | Some("") => {}
            Some("no_echo") => tank.inject_fault(EchoFault::NoEcho, None),
            Some("stuck_high") => tank.inject_fault(EchoFault::StuckHigh, None),
            Some(other) => eyre::bail!("{SIM_FAULT_ENV} must be no_echo or stuck_high (got '{other}')"),
        }
        if std::env::var_os(SIM_PUMP_FAIL_ENV).is_some() {
            tank.set_pump_failure(true);
        }
        tracing::info!(distance_cm = distance, drift_cm_per_s = drift, "using simulated tank");
        Ok(Self { clock, tank })
    }

    #[cfg(all(feature = "hardware", target_os = "linux"))]
    pub fn sensor(&self, cfg: &Config) -> Result<Box<dyn Ranging + Send>> {
        let (trigger, echo) =
            topoff_hardware::gpio::open_ranging_pins(cfg.pins.trigger, cfg.pins.echo)
                .wrap_err("failed to open GPIO ranging pins")?;
        let sensor = RangeSensor::init(
            SensorHandle::new(trigger, echo),
            self.clock.clone(),
            (&cfg.ranging).into(),
        )?;
        Ok(Box::new(sensor))
    }

    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    pub fn sensor(&self, cfg: &Config) -> Result<Box<dyn Ranging + Send>> {
        let sensor = RangeSensor::init(
            SensorHandle::new(self.tank.trigger(), self.tank.echo()),
            self.clock.clone(),
            (&cfg.ranging).into(),
        )?;
        Ok(Box::new(sensor))
    }

    #[cfg(all(feature = "hardware", target_os = "linux"))]
    pub fn pump(&self, cfg: &Config) -> Result<Box<dyn Pump + Send>> {
        let pump = topoff_hardware::gpio::RelayPump::new(cfg.pins.pump, cfg.pins.pump_active_low)
            .wrap_err("failed to open GPIO pump pin")?;
        Ok(Box::new(pump))
    }

    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    pub fn pump(&self, _cfg: &Config) -> Result<Box<dyn Pump + Send>> {
        Ok(Box::new(self.tank.pump()))
    }

    fn ranger(&self, cfg: &Config, cancel: &CancelToken) -> Result<Ranger<Box<dyn Ranging + Send>>> {
        Ok(Ranger::new(self.sensor(cfg)?, self.clock.clone(), (&cfg.ranger).into())
            .with_cancel(cancel.clone()))
    }
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn env_f32(key: &str) -> Result<Option<f32>> {
    match std::env::var(key) {
        Ok(v) => v
            .trim()
            .parse::<f32>()
            .map(Some)
            .wrap_err_with(|| format!("{key} must be a number (got '{v}')")),
        Err(_) => Ok(None),
    }
}

fn store(cfg: &Config) -> FileStore {
    FileStore::new(&cfg.storage.state_file)
}

/// Wire sensor, pump and settings store into a controller. The pump is
/// switched off as part of construction.
pub fn build_topup(cfg: &Config, rig: &Rig, cancel: &CancelToken) -> Result<Topup> {
    let ranger = rig.ranger(cfg, cancel)?;
    Topup::builder()
        .with_topup((&cfg.topup).into())
        .with_schedule(cfg.schedule.to_schedule())
        .with_store(store(cfg))
        .with_clock(rig.clock.clone())
        .with_wall_clock(Arc::new(SystemWallClock))
        .with_cancel(cancel.clone())
        .with_level_source(ranger)
        .with_pump(rig.pump(cfg)?)
        .build()
}

pub fn measure(cfg: &Config, rig: &Rig, cancel: &CancelToken, average: bool, json: bool) -> Result<()> {
    let mut ranger = rig.ranger(cfg, cancel)?;
    let cm = if average {
        ranger.read_average()?
    } else {
        ranger.read()?
    };
    if json {
        println!("{}", json!({ "distance_cm": cm, "averaged": average }));
    } else {
        println!("Distance: {cm:.2} cm");
    }
    Ok(())
}

fn report_outcome(outcome: &TopupOutcome, json: bool) {
    if json {
        println!(
            "{}",
            json!({
                "reason": outcome.reason.name(),
                "message": outcome.reason.as_str(),
                "level_cm": outcome.level_cm,
                "pumped_ms": millis_u64(outcome.pumped_for),
                "ended_at": outcome.ended_at.to_rfc3339(),
            })
        );
        return;
    }
    let level = outcome
        .level_cm
        .map_or_else(|| "unknown".to_string(), |cm| format!("{cm:.2} cm"));
    println!(
        "Top-up finished: {} (level {level}, pump ran {:.1} s)",
        outcome.reason,
        outcome.pumped_for.as_secs_f32()
    );
}

/// One top-up on the worker thread; Ctrl-C cancels it.
pub fn topup(cfg: &Config, rig: &Rig, cancel: &CancelToken, json: bool) -> Result<()> {
    let worker = TopupWorker::spawn(build_topup(cfg, rig, cancel)?);
    // Submitting clears the token, so honour a Ctrl-C that came during setup.
    if cancel.is_cancelled() {
        return Err(TopoffError::Cancelled.into());
    }
    let outcome = worker.run_blocking()?;
    if exit_code_for_reason(outcome.reason) != 0 {
        return Err(RunEnded(outcome).into());
    }
    report_outcome(&outcome, json);
    Ok(())
}

/// Tick every `schedule.tick_ms`, starting a top-up whenever the schedule
/// says so, until `shutdown` is cancelled or `ticks` have elapsed.
pub fn run_daemon(
    cfg: &Config,
    rig: &Rig,
    cancel: &CancelToken,
    shutdown: &CancelToken,
    ticks: Option<u64>,
    json: bool,
) -> Result<()> {
    let store = store(cfg);
    let controller = build_topup(cfg, rig, cancel)?;
    let mut gate = ScheduleGate::new(controller.context().schedule);
    let status = controller.status();
    let worker = TopupWorker::spawn(controller);
    let wall = SystemWallClock;
    let tick = Duration::from_millis(cfg.schedule.tick_ms);

    let s = gate.schedule();
    tracing::info!(
        days = %day_names(s.days),
        hour = s.hour,
        minute = s.minute,
        tick_ms = cfg.schedule.tick_ms,
        "scheduler started"
    );

    let mut pending: Option<xch::Receiver<TopupOutcome>> = None;
    let mut elapsed_ticks: u64 = 0;
    loop {
        if let Some(rx) = &pending {
            match rx.try_recv() {
                Ok(outcome) => {
                    report_outcome(&outcome, json);
                    pending = None;
                }
                Err(xch::TryRecvError::Disconnected) => {
                    tracing::warn!("worker dropped a top-up without reporting it");
                    pending = None;
                }
                Err(xch::TryRecvError::Empty) => {
                    let snap = status.snapshot();
                    tracing::debug!(
                        level_cm = ?snap.current_level_cm,
                        pump_on = snap.pump_on,
                        state = ?snap.state,
                        "top-up in progress"
                    );
                }
            }
        }

        match store.schedule() {
            Ok(Some(saved)) if saved != gate.schedule() => {
                tracing::info!(days = %day_names(saved.days), hour = saved.hour, minute = saved.minute, "schedule changed");
                gate.set_schedule(saved);
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %map_store_error(e.as_ref()), "could not read saved schedule, keeping the current one");
            }
        }

        if gate.due(&wall.now()) {
            match worker.submit_scheduled() {
                Ok(rx) => pending = Some(rx),
                Err(TopoffError::Busy) => {
                    tracing::warn!("previous top-up still running, skipping this slot");
                }
                Err(e) => return Err(e.into()),
            }
        }

        elapsed_ticks += 1;
        if ticks.is_some_and(|max| elapsed_ticks >= max) {
            break;
        }
        if shutdown.sleep(&*rig.clock, tick).is_err() {
            tracing::info!("shutdown requested");
            break;
        }
    }

    // Dropping the worker cancels an active run and waits for the pump to stop.
    drop(worker);
    if let Some(outcome) = pending.and_then(|rx| rx.try_recv().ok()) {
        report_outcome(&outcome, json);
    }
    tracing::info!("scheduler stopped");
    Ok(())
}

/// Comma-separated weekday names for a Monday-first mask.
pub fn day_names(mask: u8) -> String {
    let names: Vec<&str> = WEEKDAYS
        .iter()
        .enumerate()
        .filter(|(i, _)| (mask >> i) & 1 == 1)
        .map(|(_, d)| *d)
        .collect();
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(",")
    }
}

pub fn status(cfg: &Config, rig: &Rig, cancel: &CancelToken, json: bool) -> Result<()> {
    let store = store(cfg);
    let mut ctx = ControllerContext::new((&cfg.topup).into(), cfg.schedule.to_schedule());
    ctx.reload(&store)?;
    let last = store.last_trigger().map_err(|e| map_store_error(e.as_ref()))?;

    let mut ranger = rig.ranger(cfg, cancel)?;
    let level = match ranger.read_average() {
        Ok(cm) => cm,
        Err(e) => {
            tracing::warn!(error = %e, "level read failed");
            -1.0
        }
    };

    let trigger = ctx.topup.trigger_level_cm;
    let s = ctx.schedule;
    if json {
        let days: Vec<&str> = WEEKDAYS
            .iter()
            .enumerate()
            .filter(|(i, _)| s.includes_weekday(*i as u32))
            .map(|(_, d)| *d)
            .collect();
        println!(
            "{}",
            json!({
                "level_cm": level,
                "trigger_level_cm": trigger,
                "schedule": { "days": days, "hour": s.hour, "minute": s.minute },
                "last_trigger": last.as_ref().map(|t| json!({ "at": t.at, "reason": t.reason })),
            })
        );
        return Ok(());
    }

    println!("Water level: {level:.2} cm");
    println!("Trigger level: {trigger:.2} cm");
    println!("Schedule: {} at {:02}:{:02}", day_names(s.days), s.hour, s.minute);
    match last {
        Some(t) => println!("Last trigger: {} ({})", t.at, t.reason),
        None => println!("Last trigger: never"),
    }
    Ok(())
}

pub fn set_trigger(cfg: &Config, cm: f32, json: bool) -> Result<()> {
    if !cm.is_finite() || cm < 0.0 {
        return Err(TopoffError::Config(format!("trigger level must be a finite value >= 0 (got {cm})")).into());
    }
    let mut store = store(cfg);
    store
        .set_trigger_level_cm(cm)
        .map_err(|e| map_store_error(e.as_ref()))?;
    tracing::info!(trigger_level_cm = cm, "trigger level saved");
    if json {
        println!("{}", json!({ "trigger_level_cm": cm }));
    } else {
        println!("Trigger level set to {cm:.2} cm");
    }
    Ok(())
}

/// `--days` as weekday names or a single numeric bitmask.
fn parse_days(days: &[String]) -> Result<u8> {
    if let [single] = days
        && let Ok(mask) = single.trim().parse::<u8>()
    {
        if mask > 0x7F {
            return Err(TopoffError::Config("days bitmask must only use bits 0..=6".into()).into());
        }
        return Ok(mask);
    }
    days_from_names(days)
}

pub fn set_schedule(
    cfg: &Config,
    days: Option<&[String]>,
    hour: Option<u8>,
    minute: Option<u8>,
    json: bool,
) -> Result<()> {
    let mut store = store(cfg);
    let current = store
        .schedule()
        .map_err(|e| map_store_error(e.as_ref()))?
        .unwrap_or_else(|| cfg.schedule.to_schedule());
    let schedule = Schedule {
        days: days.map(parse_days).transpose()?.unwrap_or(current.days),
        hour: hour.unwrap_or(current.hour),
        minute: minute.unwrap_or(current.minute),
    };
    store
        .set_schedule(schedule)
        .map_err(|e| map_store_error(e.as_ref()))?;
    tracing::info!(days = schedule.days, hour = schedule.hour, minute = schedule.minute, "schedule saved");
    if json {
        println!(
            "{}",
            json!({ "days": schedule.days, "hour": schedule.hour, "minute": schedule.minute })
        );
    } else {
        println!(
            "Schedule set to {} at {:02}:{:02}",
            day_names(schedule.days),
            schedule.hour,
            schedule.minute
        );
    }
    Ok(())
}

/// Config, pins, settings store and one reading. Leaves the pump off.
pub fn self_check(cfg: &Config, rig: &Rig, cancel: &CancelToken, json: bool) -> Result<()> {
    let mut topup = build_topup(cfg, rig, cancel)?;
    let cm = topup.probe()?;
    if json {
        println!("{}", json!({ "ok": true, "distance_cm": cm }));
    } else {
        println!("OK: sensor reads {cm:.2} cm, pump is off");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_names_are_monday_first() {
        assert_eq!(day_names(0b000_1001), "mon,thu");
        assert_eq!(day_names(0b100_0000), "sun");
        assert_eq!(day_names(0), "none");
    }

    #[test]
    fn days_accept_a_mask_or_names() {
        assert_eq!(parse_days(&["9".to_string()]).unwrap(), 9);
        assert_eq!(
            parse_days(&["fri".to_string(), "sat".to_string()]).unwrap(),
            0b011_0000
        );
        assert!(parse_days(&["200".to_string()]).is_err());
        assert!(parse_days(&["someday".to_string()]).is_err());
    }
}
