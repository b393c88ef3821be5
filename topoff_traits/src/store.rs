//! Persistence contract for operator settings and the last-run audit record.
//!
//! Getters return `Ok(None)` when nothing has been stored yet; callers fall
//! back to a built-in default in that case. Any `Err` is a real storage fault.

use std::sync::{Arc, Mutex};

use crate::BoxError;

/// Days-of-week bitmask plus a trigger time.
///
/// Bit 0 is Monday, bit 6 is Sunday; bit 7 is unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub days: u8,
    pub hour: u8,
    pub minute: u8,
}

impl Default for Schedule {
    /// Monday and Thursday at 14:30.
    fn default() -> Self {
        Self {
            days: 0b000_1001,
            hour: 14,
            minute: 30,
        }
    }
}

impl Schedule {
    /// Whether the Monday-based weekday index (0 = Monday .. 6 = Sunday) is enabled.
    pub fn includes_weekday(&self, monday_based: u32) -> bool {
        monday_based < 7 && (self.days >> monday_based) & 1 == 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastTrigger {
    pub at: String,
    pub reason: String,
}

pub trait SettingsStore {
    fn trigger_level_cm(&self) -> Result<Option<f32>, BoxError>;
    fn set_trigger_level_cm(&mut self, cm: f32) -> Result<(), BoxError>;
    fn schedule(&self) -> Result<Option<Schedule>, BoxError>;
    fn set_schedule(&mut self, schedule: Schedule) -> Result<(), BoxError>;
    fn last_trigger(&self) -> Result<Option<LastTrigger>, BoxError>;
    fn set_last_trigger(&mut self, at: &str, reason: &str) -> Result<(), BoxError>;
}

impl<T: SettingsStore + ?Sized> SettingsStore for Box<T> {
    fn trigger_level_cm(&self) -> Result<Option<f32>, BoxError> {
        (**self).trigger_level_cm()
    }
    fn set_trigger_level_cm(&mut self, cm: f32) -> Result<(), BoxError> {
        (**self).set_trigger_level_cm(cm)
    }
    fn schedule(&self) -> Result<Option<Schedule>, BoxError> {
        (**self).schedule()
    }
    fn set_schedule(&mut self, schedule: Schedule) -> Result<(), BoxError> {
        (**self).set_schedule(schedule)
    }
    fn last_trigger(&self) -> Result<Option<LastTrigger>, BoxError> {
        (**self).last_trigger()
    }
    fn set_last_trigger(&mut self, at: &str, reason: &str) -> Result<(), BoxError> {
        (**self).set_last_trigger(at, reason)
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    trigger_level_cm: Option<f32>,
    schedule: Option<Schedule>,
    last_trigger: Option<LastTrigger>,
}

/// Volatile store; clones share state so a test can inspect what a
/// controller recorded after handing it a copy.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut MemoryState) -> R) -> Result<R, BoxError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| BoxError::from("memory store poisoned"))?;
        Ok(f(&mut guard))
    }
}

impl SettingsStore for MemoryStore {
    fn trigger_level_cm(&self) -> Result<Option<f32>, BoxError> {
        self.with(|s| s.trigger_level_cm)
    }
    fn set_trigger_level_cm(&mut self, cm: f32) -> Result<(), BoxError> {
        self.with(|s| s.trigger_level_cm = Some(cm))
    }
    fn schedule(&self) -> Result<Option<Schedule>, BoxError> {
        self.with(|s| s.schedule)
    }
    fn set_schedule(&mut self, schedule: Schedule) -> Result<(), BoxError> {
        self.with(|s| s.schedule = Some(schedule))
    }
    fn last_trigger(&self) -> Result<Option<LastTrigger>, BoxError> {
        self.with(|s| s.last_trigger.clone())
    }
    fn set_last_trigger(&mut self, at: &str, reason: &str) -> Result<(), BoxError> {
        self.with(|s| {
            s.last_trigger = Some(LastTrigger {
                at: at.to_string(),
                reason: reason.to_string(),
            });
        })
    }
}
