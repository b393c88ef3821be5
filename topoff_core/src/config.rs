//! Runtime configuration for the ranging driver and the top-up controller.
//!
//! These are the structs consumed by `topoff_core`; the TOML schema lives in
//! `topoff_config` and is mapped in via `conversions`.

use std::time::Duration;

/// Round-trip time of sound per centimetre of range (µs/cm).
pub const US_PER_CM: f32 = 58.2377;

/// Pulse timing for one HC-SR04 style trigger/echo cycle.
#[derive(Debug, Clone)]
pub struct RangingCfg {
    /// Give up waiting for the echo to start after this many µs.
    pub ping_timeout_us: u64,
    /// Give up waiting for the echo to end once this many µs have passed since the pulse.
    pub max_echo_us: u64,
    /// Trigger low settle time before the pulse.
    pub trigger_low_us: u64,
    /// Trigger high pulse width.
    pub trigger_high_us: u64,
    /// Echo microseconds per centimetre of distance.
    pub us_per_cm: f32,
}

impl Default for RangingCfg {
    fn default() -> Self {
        Self {
            ping_timeout_us: 600_000,
            // 250 cm of range
            max_echo_us: (250.0 * US_PER_CM) as u64,
            trigger_low_us: 4,
            trigger_high_us: 10,
            us_per_cm: US_PER_CM,
        }
    }
}

/// Retry and averaging policy layered over single measurements.
#[derive(Debug, Clone)]
pub struct RangerCfg {
    /// Extra attempts after a failed measurement before giving up.
    pub error_retries: u32,
    /// Readings combined by `read_average`.
    pub average_samples: u32,
    /// Pause between a failed measurement and its retry.
    pub retry_delay_ms: u64,
    /// Pause before each reading taken for an average.
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

/// How a distance reading relates to the amount of water in the tank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LevelSense {
    /// The reading grows as the water rises; top up while reading < trigger.
    #[default]
    Height,
    /// The reading is the air gap below a downward-facing sensor; top up while
    /// reading >= trigger.
    AirGap,
}

impl LevelSense {
    #[inline]
    pub fn needs_topup(self, reading_cm: f32, trigger_cm: f32) -> bool {
        match self {
            LevelSense::Height => reading_cm < trigger_cm,
            LevelSense::AirGap => reading_cm >= trigger_cm,
        }
    }
}

/// Top-up run parameters.
#[derive(Debug, Clone)]
pub struct TopupCfg {
    pub trigger_level_cm: f32,
    /// Hard cap on pump on-time for a single run.
    pub max_runtime_ms: u64,
    /// Consecutive below-trigger readings that end a run.
    pub debounce_count: u32,
    pub sense: LevelSense,
}

impl TopupCfg {
    #[inline]
    pub fn max_runtime(&self) -> Duration {
        Duration::from_millis(self.max_runtime_ms)
    }
}

impl Default for TopupCfg {
    fn default() -> Self {
        Self {
            trigger_level_cm: 3.0,
            max_runtime_ms: 15_000,
            debounce_count: 3,
            sense: LevelSense::Height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_echo_window_covers_250_cm() {
        assert_eq!(RangingCfg::default().max_echo_us, 14_559);
    }

    #[test]
    fn sense_decides_direction() {
        assert!(LevelSense::Height.needs_topup(2.0, 3.0));
        assert!(!LevelSense::Height.needs_topup(3.0, 3.0));
        assert!(LevelSense::AirGap.needs_topup(3.0, 3.0));
        assert!(!LevelSense::AirGap.needs_topup(2.9, 3.0));
    }
}
