//! Cooperative cancellation for long sensor waits and top-up runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use topoff_traits::Clock;

use crate::error::TopoffError;

/// Longest uninterrupted sleep inside `CancelToken::sleep`.
const SLEEP_SLICE: Duration = Duration::from_millis(5);

/// Shared cancellation flag. Once cancelled it stays cancelled until `reset`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }

    /// Sleep for `d` on `clock`, waking early with `Cancelled` if the token fires.
    pub fn sleep(&self, clock: &dyn Clock, d: Duration) -> Result<(), TopoffError> {
        let start = clock.now();
        loop {
            if self.is_cancelled() {
                return Err(TopoffError::Cancelled);
            }
            let slept = clock.now().saturating_duration_since(start);
            if slept >= d {
                return Ok(());
            }
            clock.sleep((d - slept).min(SLEEP_SLICE));
        }
    }
}
