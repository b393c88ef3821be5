//! Day/time gate deciding when a scheduled top-up should start.

use chrono::{DateTime, Datelike, Local, Timelike};
use topoff_traits::Schedule;

/// Fires at most once per calendar day when the weekday bit is set and the
/// wall clock reads the scheduled hour and minute.
#[derive(Debug, Clone)]
pub struct ScheduleGate {
    schedule: Schedule,
    /// Day of month of the last firing.
    last_fired_day: Option<u32>,
}

impl ScheduleGate {
    pub fn new(schedule: Schedule) -> Self {
        Self {
            schedule,
            last_fired_day: None,
        }
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// Replace the schedule; a change does not re-arm a day that already fired.
    pub fn set_schedule(&mut self, schedule: Schedule) {
        self.schedule = schedule;
    }

    /// Whether a run is due at `now`. Returning `true` marks the day as fired.
    pub fn due(&mut self, now: &DateTime<Local>) -> bool {
        let weekday = now.weekday().num_days_from_monday();
        if !self.schedule.includes_weekday(weekday) {
            return false;
        }
        if now.hour() != u32::from(self.schedule.hour)
            || now.minute() != u32::from(self.schedule.minute)
        {
            return false;
        }
        if self.last_fired_day == Some(now.day()) {
            return false;
        }
        self.last_fired_day = Some(now.day());
        tracing::info!(
            weekday,
            hour = now.hour(),
            minute = now.minute(),
            "scheduled top-up due"
        );
        true
    }
}
