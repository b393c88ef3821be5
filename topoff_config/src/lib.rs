#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and settings persistence for the top-off controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - `FileStore` keeps operator settings and the last-run record in a small
//!   TOML state file, rewritten atomically on every change.

mod atomic;
pub mod store;

use serde::Deserialize;
use serde::de::Deserializer;
use topoff_traits::Schedule;

pub use atomic::write_atomic;
pub use store::{FileStore, StoreError};

/// Weekday names accepted in `[schedule].days` and by `days_from_names`,
/// Monday first.
pub const WEEKDAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

#[derive(Debug, Deserialize)]
pub struct Pins {
    /// BCM number of the ranging trigger output.
    pub trigger: u8,
    /// BCM number of the ranging echo input.
    pub echo: u8,
    /// BCM number of the pump relay output.
    pub pump: u8,
    /// Relay energises on a low level.
    #[serde(default)]
    pub pump_active_low: bool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RangingCfg {
    pub ping_timeout_us: u64,
    pub max_echo_us: u64,
    pub trigger_low_us: u64,
    pub trigger_high_us: u64,
    /// Echo microseconds per centimetre (speed of sound round trip).
    pub us_per_cm: f32,
}

impl Default for RangingCfg {
    fn default() -> Self {
        Self {
            ping_timeout_us: 600_000,
            max_echo_us: 14_559,
            trigger_low_us: 4,
            trigger_high_us: 10,
            us_per_cm: 58.2377,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RangerCfg {
    pub error_retries: u32,
    pub average_samples: u32,
    pub retry_delay_ms: u64,
    pub sample_delay_ms: u64,
}

impl Default for RangerCfg {
    fn default() -> Self {
        Self {
            error_retries: 10,
            average_samples: 5,
            retry_delay_ms: 60,
            sample_delay_ms: 60,
        }
    }
}

/// How the sensor reading relates to the water level.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Sense {
    /// Reading rises with the water.
    #[default]
    Height,
    /// Reading is the air gap under a downward-facing sensor.
    AirGap,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TopupCfg {
    /// Used until a trigger level is saved with `set-trigger`.
    pub trigger_level_cm: f32,
    pub max_runtime_ms: u64,
    pub debounce_count: u32,
    pub sense: Sense,
}

impl Default for TopupCfg {
    fn default() -> Self {
        Self {
            trigger_level_cm: 3.0,
            max_runtime_ms: 15_000,
            debounce_count: 3,
            sense: Sense::Height,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ScheduleCfg {
    /// Bitmask (bit 0 = Monday) or a list of weekday names.
    #[serde(deserialize_with = "de_days")]
    pub days: u8,
    pub hour: u8,
    pub minute: u8,
    /// Daemon tick period.
    pub tick_ms: u64,
}

impl Default for ScheduleCfg {
    fn default() -> Self {
        let s = Schedule::default();
        Self {
            days: s.days,
            hour: s.hour,
            minute: s.minute,
            tick_ms: 1000,
        }
    }
}

impl ScheduleCfg {
    pub fn to_schedule(&self) -> Schedule {
        Schedule {
            days: self.days,
            hour: self.hour,
            minute: self.minute,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Storage {
    /// Path of the TOML state file holding trigger level, schedule and last run.
    pub state_file: String,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            state_file: "topoff_state.toml".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub pins: Pins,
    #[serde(default)]
    pub ranging: RangingCfg,
    #[serde(default)]
    pub ranger: RangerCfg,
    #[serde(default)]
    pub topup: TopupCfg,
    #[serde(default)]
    pub schedule: ScheduleCfg,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Fold weekday names (`"mon"`, `"Thursday"`, ...) into a Monday-first bitmask.
pub fn days_from_names<S: AsRef<str>>(names: &[S]) -> eyre::Result<u8> {
    let mut mask = 0u8;
    for name in names {
        let key = name.as_ref().trim().to_ascii_lowercase();
        let Some(idx) = WEEKDAYS
            .iter()
            .position(|d| key.len() >= 3 && key.starts_with(d))
        else {
            eyre::bail!("unknown weekday '{}'", name.as_ref());
        };
        mask |= 1 << idx;
    }
    Ok(mask)
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DaysToml {
    Mask(u8),
    Names(Vec<String>),
}

fn de_days<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    match DaysToml::deserialize(deserializer)? {
        DaysToml::Mask(m) => Ok(m),
        DaysToml::Names(names) => days_from_names(&names).map_err(serde::de::Error::custom),
    }
}

impl Config {
    /// Validate ranges and invariants; returns a descriptive error on failure.
    pub fn validate(&self) -> eyre::Result<()> {
        // Pins
        if self.pins.trigger == self.pins.echo
            || self.pins.trigger == self.pins.pump
            || self.pins.echo == self.pins.pump
        {
            eyre::bail!("pins.trigger, pins.echo and pins.pump must be distinct");
        }

        // Ranging
        if self.ranging.ping_timeout_us == 0 {
            eyre::bail!("ranging.ping_timeout_us must be >= 1");
        }
        if self.ranging.max_echo_us == 0 {
            eyre::bail!("ranging.max_echo_us must be >= 1");
        }
        if self.ranging.trigger_high_us < 10 {
            eyre::bail!("ranging.trigger_high_us must be >= 10");
        }
        if !(self.ranging.us_per_cm.is_finite() && self.ranging.us_per_cm > 0.0) {
            eyre::bail!("ranging.us_per_cm must be > 0");
        }

        // Ranger
        if self.ranger.average_samples == 0 {
            eyre::bail!("ranger.average_samples must be >= 1");
        }
        if self.ranger.error_retries > 100 {
            eyre::bail!("ranger.error_retries is unreasonably large (>100)");
        }

        // Top-up
        if !self.topup.trigger_level_cm.is_finite() || self.topup.trigger_level_cm < 0.0 {
            eyre::bail!("topup.trigger_level_cm must be a finite value >= 0");
        }
        if self.topup.max_runtime_ms == 0 {
            eyre::bail!("topup.max_runtime_ms must be >= 1");
        }
        if self.topup.max_runtime_ms > 60 * 60 * 1000 {
            eyre::bail!("topup.max_runtime_ms is unreasonably large (>1h)");
        }
        if self.topup.debounce_count == 0 {
            eyre::bail!("topup.debounce_count must be >= 1");
        }

        // Schedule
        if self.schedule.days > 0x7F {
            eyre::bail!("schedule.days must only use bits 0..=6");
        }
        if self.schedule.hour > 23 {
            eyre::bail!("schedule.hour must be in 0..=23");
        }
        if self.schedule.minute > 59 {
            eyre::bail!("schedule.minute must be in 0..=59");
        }
        if self.schedule.tick_ms == 0 || self.schedule.tick_ms > 60_000 {
            eyre::bail!("schedule.tick_ms must be in 1..=60000");
        }

        // Storage
        if self.storage.state_file.trim().is_empty() {
            eyre::bail!("storage.state_file must not be empty");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_names_fold_into_mask() {
        assert_eq!(days_from_names(&["mon", "Thursday"]).unwrap(), 0b000_1001);
        assert_eq!(days_from_names(&["sun"]).unwrap(), 0b100_0000);
        assert!(days_from_names(&["mo"]).is_err());
        assert!(days_from_names(&["funday"]).is_err());
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = load_toml("[pins]\ntrigger = 5\necho = 6\npump = 13\n").unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.topup.debounce_count, 3);
        assert_eq!(cfg.schedule.to_schedule(), Schedule::default());
        assert_eq!(cfg.storage.state_file, "topoff_state.toml");
        assert!(!cfg.pins.pump_active_low);
    }
}
