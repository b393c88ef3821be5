//! Read-only status snapshot shared between the controller and its observers.

use std::sync::{Arc, RwLock};

use crate::controller::{TopupOutcome, TopupState};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    /// Most recent successful level reading.
    pub current_level_cm: Option<f32>,
    pub pump_on: bool,
    pub state: TopupState,
    pub last_outcome: Option<TopupOutcome>,
}

/// Cloneable handle to the latest snapshot. Readers may see a slightly stale
/// copy; only the controller writes.
#[derive(Debug, Clone, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<StatusSnapshot>>,
}

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        match self.inner.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut StatusSnapshot)) {
        match self.inner.write() {
            Ok(mut g) => f(&mut g),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }
}
