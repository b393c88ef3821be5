//! Ranging driver against the simulated transducer.
//!
//! The simulated echo line advances the shared `ManualClock` by 1 µs per
//! poll, so busy-wait timing is exercised without real delays.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use topoff_core::{
    LevelSource, RangeSensor, Ranger, RangerCfg, Ranging, RangingCfg, RangingError, SensorHandle,
    TopoffError,
};
use topoff_hardware::{EchoFault, SimulatedEcho, SimulatedTank, SimulatedTrigger};
use topoff_traits::{Clock, ManualClock};

type SimSensor = RangeSensor<SimulatedTrigger, SimulatedEcho>;

fn sensor(distance_cm: f32) -> (ManualClock, SimulatedTank, SimSensor) {
    let clock = ManualClock::new();
    let shared: Arc<dyn Clock + Send + Sync> = Arc::new(clock.clone());
    let tank = SimulatedTank::new(shared.clone(), distance_cm);
    let handle = SensorHandle::new(tank.trigger(), tank.echo());
    let sensor = RangeSensor::init(handle, shared, RangingCfg::default()).expect("init");
    (clock, tank, sensor)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn pulse_width_maps_to_distance(distance in 2.0f32..240.0) {
        let (_clock, _tank, mut s) = sensor(distance);
        let cm = s.measure_cm().expect("echo inside window");
        // one poll of quantisation on each edge
        prop_assert!((cm - distance).abs() < 0.05, "measured {cm} for {distance}");
    }
}

#[test]
fn missing_echo_is_a_ping_timeout() {
    let (clock, tank, mut s) = sensor(20.0);
    tank.inject_fault(EchoFault::NoEcho, None);
    let t0 = clock.now();
    assert_eq!(s.measure_cm(), Err(RangingError::PingTimeout));
    assert!(clock.us_since(t0) >= 600_000);
    assert!(clock.us_since(t0) < 600_100);
}

#[test]
fn echo_that_never_falls_is_an_echo_timeout() {
    let (clock, tank, mut s) = sensor(20.0);
    tank.inject_fault(EchoFault::StuckHigh, None);
    let t0 = clock.now();
    assert_eq!(s.measure_cm(), Err(RangingError::EchoTimeout));
    let waited = clock.us_since(t0);
    assert!((14_559..14_700).contains(&waited), "waited {waited} us");
}

// The echo window opens at the end of the trigger pulse and the simulated
// echo rises 200 us later, so the longest measurable target is ~246.5 cm.
#[test]
fn target_just_inside_the_echo_window_is_measured() {
    let (_clock, _tank, mut s) = sensor(245.0);
    let cm = s.measure_cm().expect("echo inside window");
    assert!((cm - 245.0).abs() < 0.05, "measured {cm}");
}

#[test]
fn target_just_outside_the_echo_window_is_an_echo_timeout() {
    let (_clock, _tank, mut s) = sensor(248.0);
    assert_eq!(s.measure_cm(), Err(RangingError::EchoTimeout));
}

#[test]
fn target_beyond_range_is_an_echo_timeout() {
    let (_clock, _tank, mut s) = sensor(300.0);
    assert_eq!(s.measure_cm(), Err(RangingError::EchoTimeout));
}

#[test]
fn measurement_marks_failures_invalid() {
    let (_clock, tank, mut s) = sensor(20.0);
    assert!(s.measure().valid);
    tank.inject_fault(EchoFault::NoEcho, Some(1));
    let m = s.measure();
    assert!(!m.valid);
    assert!(s.measure().valid);
}

#[test]
fn ranger_rides_out_transient_timeouts() {
    let (clock, tank, s) = sensor(42.0);
    tank.inject_fault(EchoFault::NoEcho, Some(2));
    let shared: Arc<dyn Clock + Send + Sync> = Arc::new(clock.clone());
    let mut ranger = Ranger::new(s, shared, RangerCfg::default());
    let t0 = clock.now();
    let cm = ranger.read().expect("third attempt succeeds");
    assert!((cm - 42.0).abs() < 0.05);
    // two ping timeouts plus two retry delays
    assert!(clock.ms_since(t0) >= 2 * 600 + 2 * 60);
}

#[test]
fn ranger_average_over_simulated_tank() {
    let (clock, _tank, s) = sensor(12.0);
    let shared: Arc<dyn Clock + Send + Sync> = Arc::new(clock.clone());
    let mut ranger = Ranger::new(s, shared, RangerCfg::default());
    let cm = ranger.read_average().expect("average");
    assert!((cm - 12.0).abs() < 0.05);
    assert!(clock.elapsed() >= Duration::from_millis(300));
}

#[test]
fn persistent_fault_exhausts_retries() {
    let (clock, tank, s) = sensor(12.0);
    tank.inject_fault(EchoFault::StuckHigh, None);
    let shared: Arc<dyn Clock + Send + Sync> = Arc::new(clock.clone());
    let mut ranger = Ranger::new(s, shared, RangerCfg::default());
    assert_eq!(
        ranger.read(),
        Err(TopoffError::SensorFailure {
            attempts: 11,
            last: RangingError::EchoTimeout
        })
    );
}
