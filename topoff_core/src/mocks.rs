//! Test and helper mocks for topoff_core

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use topoff_traits::{BoxError, Clock, ManualClock, Pump};

use crate::error::{RangingError, TopoffError};
use crate::ranger::LevelSource;
use crate::sensor::Ranging;

/// Shared call counter handed out by the scripted mocks.
#[derive(Debug, Clone, Default)]
pub struct CallCount(Arc<AtomicU32>);

impl CallCount {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Ranging stub that replays a script; the last entry repeats forever.
pub struct ScriptedRanging {
    script: VecDeque<Result<f32, RangingError>>,
    last: Result<f32, RangingError>,
    calls: CallCount,
}

impl ScriptedRanging {
    pub fn new(script: impl IntoIterator<Item = Result<f32, RangingError>>) -> Self {
        Self {
            script: script.into_iter().collect(),
            last: Err(RangingError::Unknown(-1)),
            calls: CallCount::default(),
        }
    }

    /// Every measurement fails with `err`.
    pub fn failing(err: RangingError) -> Self {
        Self::new([Err(err)])
    }

    pub fn calls(&self) -> CallCount {
        self.calls.clone()
    }
}

impl Ranging for ScriptedRanging {
    fn measure_cm(&mut self) -> Result<f32, RangingError> {
        self.calls.bump();
        if let Some(next) = self.script.pop_front() {
            self.last = next;
        }
        self.last.clone()
    }
}

type ReadHook = Box<dyn FnMut() + Send>;

/// Level source stub for controller tests.
///
/// `read_average` consumes one entry of the averaged script, `read` and
/// `read_within` consume the monitoring script (last entry repeats). Each
/// monitoring read can advance a `ManualClock` to simulate measurement time,
/// and run a hook so tests can observe the pump while the loop is active.
pub struct ScriptedLevels {
    average: VecDeque<Result<f32, TopoffError>>,
    readings: VecDeque<Result<f32, TopoffError>>,
    last: Result<f32, TopoffError>,
    clock: Option<(ManualClock, Duration)>,
    on_read: Option<ReadHook>,
    calls: CallCount,
}

impl ScriptedLevels {
    pub fn new(
        average: Result<f32, TopoffError>,
        readings: impl IntoIterator<Item = Result<f32, TopoffError>>,
    ) -> Self {
        Self {
            average: VecDeque::from([average]),
            readings: readings.into_iter().collect(),
            last: Err(TopoffError::State("script exhausted".into())),
            clock: None,
            on_read: None,
            calls: CallCount::default(),
        }
    }

    /// Advance `clock` by `per_read` on every monitoring read.
    pub fn advancing(mut self, clock: ManualClock, per_read: Duration) -> Self {
        self.clock = Some((clock, per_read));
        self
    }

    pub fn on_read(mut self, hook: impl FnMut() + Send + 'static) -> Self {
        self.on_read = Some(Box::new(hook));
        self
    }

    /// Number of monitoring reads taken.
    pub fn calls(&self) -> CallCount {
        self.calls.clone()
    }

    fn next_reading(&mut self) -> Result<f32, TopoffError> {
        self.calls.bump();
        if let Some(hook) = self.on_read.as_mut() {
            hook();
        }
        if let Some((clock, step)) = &self.clock {
            clock.advance(*step);
        }
        if let Some(next) = self.readings.pop_front() {
            self.last = next;
        }
        self.last.clone()
    }
}

impl LevelSource for ScriptedLevels {
    fn read(&mut self) -> Result<f32, TopoffError> {
        self.next_reading()
    }

    fn read_average(&mut self) -> Result<f32, TopoffError> {
        self.average
            .pop_front()
            .unwrap_or_else(|| Err(TopoffError::State("no averaged reading scripted".into())))
    }

    fn read_within(&mut self, deadline: Instant) -> Result<f32, TopoffError> {
        let reading = self.next_reading();
        match &self.clock {
            Some((clock, _)) if reading.is_err() && clock.now() >= deadline => {
                Err(TopoffError::DeadlineExceeded)
            }
            _ => reading,
        }
    }
}

#[derive(Debug, Default)]
struct PumpLog {
    on: bool,
    writes: Vec<bool>,
    fail_start: bool,
    fail_stop: u32,
}

/// Pump that records every write. Clones share one log.
#[derive(Debug, Clone, Default)]
pub struct RecordingPump {
    log: Arc<Mutex<PumpLog>>,
}

impl RecordingPump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `start` fail.
    pub fn fail_start(self) -> Self {
        if let Ok(mut l) = self.log.lock() {
            l.fail_start = true;
        }
        self
    }

    /// Make the next `n` `stop` calls fail.
    pub fn fail_stops(self, n: u32) -> Self {
        if let Ok(mut l) = self.log.lock() {
            l.fail_stop = n;
        }
        self
    }

    pub fn is_on(&self) -> bool {
        self.log.lock().map(|l| l.on).unwrap_or(false)
    }

    /// Successful writes so far, `true` for on.
    pub fn writes(&self) -> Vec<bool> {
        self.log.lock().map(|l| l.writes.clone()).unwrap_or_default()
    }

    /// Whether the pump was ever switched on.
    pub fn ever_started(&self) -> bool {
        self.writes().contains(&true)
    }
}

impl Pump for RecordingPump {
    fn start(&mut self) -> Result<(), BoxError> {
        let mut l = self.log.lock().map_err(|_| BoxError::from("pump log poisoned"))?;
        if l.fail_start {
            return Err("relay did not close".into());
        }
        l.on = true;
        l.writes.push(true);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BoxError> {
        let mut l = self.log.lock().map_err(|_| BoxError::from("pump log poisoned"))?;
        if l.fail_stop > 0 {
            l.fail_stop -= 1;
            return Err("relay did not open".into());
        }
        l.on = false;
        l.writes.push(false);
        Ok(())
    }
}
