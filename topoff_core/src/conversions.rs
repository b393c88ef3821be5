//! `From` implementations bridging `topoff_config` types to `topoff_core` types.

use crate::config::{LevelSense, RangerCfg, RangingCfg, TopupCfg};

// ── RangingCfg ───────────────────────────────────────────────────────────────

impl From<&topoff_config::RangingCfg> for RangingCfg {
    fn from(c: &topoff_config::RangingCfg) -> Self {
        Self {
            ping_timeout_us: c.ping_timeout_us,
            max_echo_us: c.max_echo_us,
            trigger_low_us: c.trigger_low_us,
            trigger_high_us: c.trigger_high_us,
            us_per_cm: c.us_per_cm,
        }
    }
}

// ── RangerCfg ────────────────────────────────────────────────────────────────

impl From<&topoff_config::RangerCfg> for RangerCfg {
    fn from(c: &topoff_config::RangerCfg) -> Self {
        Self {
            error_retries: c.error_retries,
            average_samples: c.average_samples,
            retry_delay_ms: c.retry_delay_ms,
            sample_delay_ms: c.sample_delay_ms,
        }
    }
}

// ── TopupCfg ─────────────────────────────────────────────────────────────────

impl From<topoff_config::Sense> for LevelSense {
    fn from(s: topoff_config::Sense) -> Self {
        match s {
            topoff_config::Sense::Height => LevelSense::Height,
            topoff_config::Sense::AirGap => LevelSense::AirGap,
        }
    }
}

impl From<&topoff_config::TopupCfg> for TopupCfg {
    fn from(c: &topoff_config::TopupCfg) -> Self {
        Self {
            trigger_level_cm: c.trigger_level_cm,
            max_runtime_ms: c.max_runtime_ms,
            debounce_count: c.debounce_count,
            sense: c.sense.into(),
        }
    }
}
