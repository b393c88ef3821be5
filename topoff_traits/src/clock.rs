use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

/// Monotonic clock abstraction for ranging and control timing across the stack.
///
/// - now(): returns a monotonic Instant
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - delay_us(): short busy delay for pulse shaping; never yields the thread
/// - us_since()/ms_since(): elapsed helpers from an epoch Instant
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Busy-wait for `us` microseconds.
    fn delay_us(&self, us: u64) {
        let until = self.now() + Duration::from_micros(us);
        while self.now() < until {
            std::hint::spin_loop();
        }
    }

    /// Microseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn us_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        u64::try_from(dur.as_micros()).unwrap_or(u64::MAX)
    }

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        u64::try_from(dur.as_millis()).unwrap_or(u64::MAX)
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }
    fn sleep(&self, d: Duration) {
        (**self).sleep(d);
    }
    fn delay_us(&self, us: u64) {
        (**self).delay_us(us);
    }
}

/// Default, real-time monotonic clock backed by std::time::Instant.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Deterministic clock whose time only moves when advanced.
///
/// now() = origin + offset
/// sleep(d) and delay_us(us) advance internal time without actually waiting.
/// Clones share the same timeline, so a simulated pin can advance the clock
/// that the driver under test is polling.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }

    /// Time elapsed since this clock was created.
    pub fn elapsed(&self) -> Duration {
        self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }

    fn delay_us(&self, us: u64) {
        self.advance(Duration::from_micros(us));
    }
}

/// Calendar time source used for schedules and audit timestamps.
pub trait WallClock {
    fn now(&self) -> DateTime<Local>;

    /// Human-readable timestamp in the locale's date-time representation.
    fn format(&self, ts: &DateTime<Local>) -> String {
        ts.format("%c").to_string()
    }
}

impl<T: WallClock + ?Sized> WallClock for Arc<T> {
    fn now(&self) -> DateTime<Local> {
        (**self).now()
    }
    fn format(&self, ts: &DateTime<Local>) -> String {
        (**self).format(ts)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Wall clock pinned to a settable instant.
#[derive(Debug, Clone)]
pub struct FixedWallClock {
    at: Arc<Mutex<DateTime<Local>>>,
}

impl FixedWallClock {
    pub fn new(at: DateTime<Local>) -> Self {
        Self {
            at: Arc::new(Mutex::new(at)),
        }
    }

    pub fn set(&self, at: DateTime<Local>) {
        if let Ok(mut g) = self.at.lock() {
            *g = at;
        }
    }
}

impl WallClock for FixedWallClock {
    fn now(&self) -> DateTime<Local> {
        self.at.lock().map(|g| *g).unwrap_or_else(|_| Local::now())
    }
}
