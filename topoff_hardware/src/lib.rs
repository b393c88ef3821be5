pub mod error;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use topoff_traits::{BoxError, Clock, InputPin, OutputPin, Pump};
use tracing::trace;

use crate::error::HwError;

/// Round-trip time of sound per centimetre of range, in microseconds.
const SIM_US_PER_CM: f64 = 58.2377;
/// Delay between the trigger falling edge and the echo rising edge.
pub const SIM_ECHO_DELAY_US: u64 = 200;
/// Shortest trigger pulse the simulated transducer reacts to.
pub const SIM_MIN_TRIGGER_US: u64 = 10;
/// Simulated cost of a single echo-line read.
const SIM_POLL_COST_US: u64 = 1;

/// Echo misbehaviour that can be injected into the simulated sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoFault {
    /// Echo line never rises (object too close / transducer dead).
    NoEcho,
    /// Echo line rises but never falls (object too far / lost echo).
    StuckHigh,
}

struct TankState {
    distance_cm: f32,
    drift_cm_per_s: f32,
    pump_on: bool,
    pump_since: Option<Instant>,
    pump_starts: u32,
    pump_stops: u32,
    pump_fails: bool,
    trigger_high: bool,
    raised_at: Option<Instant>,
    ping: Option<Ping>,
    fault: Option<EchoFault>,
    // None = persistent; Some(n) = affects the next n pings
    fault_pings: Option<u32>,
}

#[derive(Clone, Copy)]
struct Ping {
    fired_at: Instant,
    width_us: u64,
    fault: Option<EchoFault>,
}

impl TankState {
    /// Fold the pump's effect so far into `distance_cm`.
    fn settle(&mut self, now: Instant) {
        if let (true, Some(since)) = (self.pump_on, self.pump_since) {
            let secs = now.saturating_duration_since(since).as_secs_f32();
            self.distance_cm = (self.distance_cm + self.drift_cm_per_s * secs).max(0.0);
            self.pump_since = Some(now);
        }
    }

    fn take_fault(&mut self) -> Option<EchoFault> {
        let fault = self.fault?;
        match self.fault_pings {
            None => Some(fault),
            Some(0) => {
                self.fault = None;
                None
            }
            Some(n) => {
                self.fault_pings = Some(n - 1);
                if n == 1 {
                    self.fault = None;
                    self.fault_pings = None;
                }
                Some(fault)
            }
        }
    }
}

/// In-process model of a tank, an HC-SR04 style transducer and a pump.
///
/// The pins handed out share one state and one clock. While the pump runs the
/// measured distance moves by `drift_cm_per_s` (negative for a downward-looking
/// sensor whose air gap shrinks as the tank fills).
#[derive(Clone)]
pub struct SimulatedTank {
    state: Arc<Mutex<TankState>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl SimulatedTank {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>, distance_cm: f32) -> Self {
        Self {
            state: Arc::new(Mutex::new(TankState {
                distance_cm,
                drift_cm_per_s: 0.0,
                pump_on: false,
                pump_since: None,
                pump_starts: 0,
                pump_stops: 0,
                pump_fails: false,
                trigger_high: false,
                raised_at: None,
                ping: None,
                fault: None,
                fault_pings: None,
            })),
            clock,
        }
    }

    pub fn with_drift(self, cm_per_s: f32) -> Self {
        if let Ok(mut s) = self.state.lock() {
            s.drift_cm_per_s = cm_per_s;
        }
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, TankState>, HwError> {
        self.state
            .lock()
            .map_err(|_| HwError::Gpio("simulated tank state poisoned".into()))
    }

    pub fn set_distance(&self, cm: f32) {
        if let Ok(mut s) = self.state.lock() {
            s.distance_cm = cm;
            s.pump_since = s.pump_on.then(|| self.clock.now());
        }
    }

    /// Current distance including the pump's effect up to now.
    pub fn distance_cm(&self) -> f32 {
        match self.state.lock() {
            Ok(mut s) => {
                s.settle(self.clock.now());
                s.distance_cm
            }
            Err(_) => f32::NAN,
        }
    }

    /// Inject `fault` for the next `pings` trigger pulses, or for all of them when `None`.
    pub fn inject_fault(&self, fault: EchoFault, pings: Option<u32>) {
        if let Ok(mut s) = self.state.lock() {
            s.fault = Some(fault);
            s.fault_pings = pings;
        }
    }

    /// Make every pump start/stop fail with a relay error.
    pub fn set_pump_failure(&self, fails: bool) {
        if let Ok(mut s) = self.state.lock() {
            s.pump_fails = fails;
        }
    }

    pub fn pump_on(&self) -> bool {
        self.state.lock().map(|s| s.pump_on).unwrap_or(false)
    }

    /// (starts, stops) issued to the pump so far.
    pub fn pump_switches(&self) -> (u32, u32) {
        self.state
            .lock()
            .map(|s| (s.pump_starts, s.pump_stops))
            .unwrap_or((0, 0))
    }

    pub fn trigger(&self) -> SimulatedTrigger {
        SimulatedTrigger { tank: self.clone() }
    }

    pub fn echo(&self) -> SimulatedEcho {
        SimulatedEcho { tank: self.clone() }
    }

    pub fn pump(&self) -> SimulatedPump {
        SimulatedPump { tank: self.clone() }
    }
}

/// Trigger output of the simulated transducer. A falling edge after a high
/// phase of at least `SIM_MIN_TRIGGER_US` emits a ping.
pub struct SimulatedTrigger {
    tank: SimulatedTank,
}

impl OutputPin for SimulatedTrigger {
    fn set_level(&mut self, high: bool) -> Result<(), BoxError> {
        let now = self.tank.clock.now();
        let mut s = self.tank.lock()?;
        if high && !s.trigger_high {
            s.raised_at = Some(now);
        } else if !high && s.trigger_high {
            let held_us = s
                .raised_at
                .map(|t| now.saturating_duration_since(t).as_micros())
                .unwrap_or(0);
            if held_us >= u128::from(SIM_MIN_TRIGGER_US) {
                s.settle(now);
                let width_us = (f64::from(s.distance_cm) * SIM_US_PER_CM).round() as u64;
                let fault = s.take_fault();
                s.ping = Some(Ping {
                    fired_at: now,
                    width_us,
                    fault,
                });
                trace!(width_us, ?fault, "simulated ping");
            } else {
                s.ping = None;
            }
        }
        s.trigger_high = high;
        Ok(())
    }
}

/// Echo input of the simulated transducer.
pub struct SimulatedEcho {
    tank: SimulatedTank,
}

impl InputPin for SimulatedEcho {
    fn is_high(&mut self) -> bool {
        self.tank.clock.delay_us(SIM_POLL_COST_US);
        let now = self.tank.clock.now();
        let Ok(s) = self.tank.state.lock() else {
            return false;
        };
        let Some(ping) = s.ping else {
            return false;
        };
        let t = now.saturating_duration_since(ping.fired_at);
        let rise = Duration::from_micros(SIM_ECHO_DELAY_US);
        match ping.fault {
            Some(EchoFault::NoEcho) => false,
            Some(EchoFault::StuckHigh) => t >= rise,
            None => t >= rise && t < rise + Duration::from_micros(ping.width_us),
        }
    }
}

pub struct SimulatedPump {
    tank: SimulatedTank,
}

impl SimulatedPump {
    fn switch(&mut self, on: bool) -> Result<(), BoxError> {
        let now = self.tank.clock.now();
        let mut s = self.tank.lock()?;
        if s.pump_fails {
            return Err(Box::new(HwError::Pump("simulated relay failure".into())));
        }
        s.settle(now);
        if on {
            s.pump_starts += 1;
            s.pump_since = Some(now);
        } else {
            s.pump_stops += 1;
            s.pump_since = None;
        }
        s.pump_on = on;
        Ok(())
    }
}

impl Pump for SimulatedPump {
    fn start(&mut self) -> Result<(), BoxError> {
        self.switch(true)
    }
    fn stop(&mut self) -> Result<(), BoxError> {
        self.switch(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use topoff_traits::ManualClock;

    fn tank(distance_cm: f32) -> (ManualClock, SimulatedTank) {
        let clock = ManualClock::new();
        let tank = SimulatedTank::new(Arc::new(clock.clone()), distance_cm);
        (clock, tank)
    }

    fn fire(clock: &ManualClock, trigger: &mut SimulatedTrigger, high_us: u64) {
        trigger.set_level(true).unwrap();
        clock.delay_us(high_us);
        trigger.set_level(false).unwrap();
    }

    #[test]
    fn echo_pulse_tracks_distance() {
        let (clock, tank) = tank(10.0);
        let mut trigger = tank.trigger();
        let mut echo = tank.echo();
        fire(&clock, &mut trigger, 10);
        let fired = clock.elapsed();

        while !echo.is_high() {}
        let rose = clock.elapsed();
        while echo.is_high() {}
        let fell = clock.elapsed();

        assert!(rose - fired >= Duration::from_micros(SIM_ECHO_DELAY_US));
        let width = (fell - rose).as_micros() as i64;
        assert!((width - 582).abs() <= 2, "width {width}");
    }

    #[test]
    fn short_trigger_pulse_is_ignored() {
        let (clock, tank) = tank(10.0);
        let mut trigger = tank.trigger();
        let mut echo = tank.echo();
        fire(&clock, &mut trigger, 5);
        for _ in 0..2_000 {
            assert!(!echo.is_high());
        }
    }

    #[test]
    fn fault_applies_to_limited_pings() {
        let (clock, tank) = tank(10.0);
        tank.inject_fault(EchoFault::NoEcho, Some(1));
        let mut trigger = tank.trigger();
        let mut echo = tank.echo();

        fire(&clock, &mut trigger, 10);
        clock.advance(Duration::from_micros(SIM_ECHO_DELAY_US + 10));
        assert!(!echo.is_high());

        fire(&clock, &mut trigger, 10);
        clock.advance(Duration::from_micros(SIM_ECHO_DELAY_US + 10));
        assert!(echo.is_high());
    }

    #[test]
    fn pump_drift_moves_distance() {
        let (clock, tank) = tank(8.0);
        let tank = tank.with_drift(-1.0);
        let mut pump = tank.pump();
        pump.start().unwrap();
        clock.advance(Duration::from_secs(3));
        assert!((tank.distance_cm() - 5.0).abs() < 1e-4);
        pump.stop().unwrap();
        clock.advance(Duration::from_secs(3));
        assert!((tank.distance_cm() - 5.0).abs() < 1e-4);
        assert_eq!(tank.pump_switches(), (1, 1));
    }

    #[test]
    fn pump_failure_is_reported() {
        let (_clock, tank) = tank(8.0);
        tank.set_pump_failure(true);
        let mut pump = tank.pump();
        let err = pump.start().expect_err("relay should fail");
        assert!(err.to_string().contains("relay"));
        assert!(!tank.pump_on());
    }
}
