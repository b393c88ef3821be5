//! Common time helpers for topoff_core.

use std::time::Duration;

/// Milliseconds in `d`, saturating at `u64::MAX`.
#[inline]
pub fn millis_u64(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Microseconds in `d`, saturating at `u64::MAX`.
#[inline]
pub fn micros_u64(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}
