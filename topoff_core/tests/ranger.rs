use std::sync::Arc;
use std::time::Duration;

use rstest::rstest;
use topoff_core::mocks::ScriptedRanging;
use topoff_core::{LevelSource, Ranger, RangerCfg, RangingError, TopoffError};
use topoff_traits::ManualClock;

fn ranger(script: ScriptedRanging) -> (ManualClock, Ranger<ScriptedRanging>) {
    let clock = ManualClock::new();
    let r = Ranger::new(script, Arc::new(clock.clone()), RangerCfg::default());
    (clock, r)
}

#[rstest]
#[case::too_close(RangingError::PingTimeout)]
#[case::too_far(RangingError::EchoTimeout)]
#[case::unknown(RangingError::Unknown(7))]
fn read_gives_up_after_ten_retries(#[case] kind: RangingError) {
    let script = ScriptedRanging::failing(kind.clone());
    let calls = script.calls();
    let (clock, mut r) = ranger(script);

    let err = r.read().expect_err("sensor never answers");
    assert_eq!(
        err,
        TopoffError::SensorFailure {
            attempts: 11,
            last: kind
        }
    );
    // one initial attempt plus ten retries, 60 ms apart
    assert_eq!(calls.get(), 11);
    assert_eq!(clock.elapsed(), Duration::from_millis(600));
}

#[test]
fn read_recovers_after_transient_errors() {
    let (clock, mut r) = ranger(ScriptedRanging::new([
        Err(RangingError::PingTimeout),
        Err(RangingError::EchoTimeout),
        Ok(5.5),
    ]));
    assert_eq!(r.read(), Ok(5.5));
    assert_eq!(clock.elapsed(), Duration::from_millis(120));
}

#[test]
fn average_is_the_exact_mean_of_five_reads() {
    let script = ScriptedRanging::new([Ok(1.0), Ok(2.0), Ok(3.0), Ok(4.0), Ok(5.0), Ok(100.0)]);
    let calls = script.calls();
    let (clock, mut r) = ranger(script);
    assert_eq!(r.read_average(), Ok(3.0));
    assert_eq!(calls.get(), 5);
    // 60 ms before each of the five reads
    assert_eq!(clock.elapsed(), Duration::from_millis(300));
}

#[test]
fn average_includes_readings_that_needed_retries() {
    let (_clock, mut r) = ranger(ScriptedRanging::new([
        Ok(2.0),
        Err(RangingError::EchoTimeout),
        Ok(4.0),
        Ok(6.0),
        Ok(8.0),
        Ok(10.0),
    ]));
    assert_eq!(r.read_average(), Ok(6.0));
}

#[test]
fn any_failed_read_fails_the_average() {
    let (_clock, mut r) = ranger(ScriptedRanging::new([
        Ok(1.0),
        Ok(2.0),
        Err(RangingError::PingTimeout),
    ]));
    match r.read_average() {
        Err(TopoffError::SensorFailure { attempts, last }) => {
            assert_eq!(attempts, 11);
            assert_eq!(last, RangingError::PingTimeout);
        }
        other => panic!("expected SensorFailure, got {other:?}"),
    }
}

#[test]
fn configured_retry_policy_is_honoured() {
    let clock = ManualClock::new();
    let script = ScriptedRanging::failing(RangingError::EchoTimeout);
    let calls = script.calls();
    let cfg = RangerCfg {
        error_retries: 2,
        retry_delay_ms: 10,
        ..RangerCfg::default()
    };
    let mut r = Ranger::new(script, Arc::new(clock.clone()), cfg);
    assert!(r.read().is_err());
    assert_eq!(calls.get(), 3);
    assert_eq!(clock.elapsed(), Duration::from_millis(20));
}
