//! TOML state file implementing `SettingsStore`.
//!
//! Layout:
//!
//! ```toml
//! trigger_level_mcm = 3000      # trigger level in thousandths of a cm
//!
//! [schedule]
//! days = 9
//! hour = 14
//! minute = 30
//!
//! [last_trigger]
//! at = "Mon Mar  4 14:30:12 2024"
//! reason = "Trigger level reached"
//! ```
//!
//! A missing file or key reads as `None`. Every write re-reads the file,
//! updates one entry and replaces the file atomically.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use topoff_traits::{BoxError, LastTrigger, Schedule, SettingsStore};

use crate::atomic::write_atomic;

/// Fixed-point scale of the stored trigger level.
const MCM_PER_CM: f32 = 1000.0;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access state file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state file {path} is not valid TOML: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to encode state: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("state file holds an invalid {0}")]
    Invalid(&'static str),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    trigger_level_mcm: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schedule: Option<StoredSchedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_trigger: Option<StoredTrigger>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct StoredSchedule {
    days: u8,
    hour: u8,
    minute: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredTrigger {
    at: String,
    reason: String,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StateFile, StoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StateFile::default()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        toml::from_str(&text).map_err(|source| StoreError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    fn update(&self, f: impl FnOnce(&mut StateFile)) -> Result<(), StoreError> {
        let mut state = self.load()?;
        f(&mut state);
        let text = toml::to_string(&state)?;
        write_atomic(&self.path, text.as_bytes()).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl SettingsStore for FileStore {
    fn trigger_level_cm(&self) -> Result<Option<f32>, BoxError> {
        let state = self.load()?;
        Ok(state.trigger_level_mcm.map(|mcm| mcm as f32 / MCM_PER_CM))
    }

    fn set_trigger_level_cm(&mut self, cm: f32) -> Result<(), BoxError> {
        if !cm.is_finite() {
            return Err(StoreError::Invalid("trigger level").into());
        }
        let mcm = (cm * MCM_PER_CM).round() as i64;
        self.update(|s| s.trigger_level_mcm = Some(mcm))?;
        Ok(())
    }

    fn schedule(&self) -> Result<Option<Schedule>, BoxError> {
        let Some(s) = self.load()?.schedule else {
            return Ok(None);
        };
        if s.days > 0x7F || s.hour > 23 || s.minute > 59 {
            return Err(StoreError::Invalid("schedule").into());
        }
        Ok(Some(Schedule {
            days: s.days,
            hour: s.hour,
            minute: s.minute,
        }))
    }

    fn set_schedule(&mut self, schedule: Schedule) -> Result<(), BoxError> {
        self.update(|s| {
            s.schedule = Some(StoredSchedule {
                days: schedule.days,
                hour: schedule.hour,
                minute: schedule.minute,
            });
        })?;
        Ok(())
    }

    fn last_trigger(&self) -> Result<Option<LastTrigger>, BoxError> {
        Ok(self.load()?.last_trigger.map(|t| LastTrigger {
            at: t.at,
            reason: t.reason,
        }))
    }

    fn set_last_trigger(&mut self, at: &str, reason: &str) -> Result<(), BoxError> {
        self.update(|s| {
            s.last_trigger = Some(StoredTrigger {
                at: at.to_string(),
                reason: reason.to_string(),
            });
        })?;
        Ok(())
    }
}
