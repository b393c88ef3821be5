use std::sync::Arc;

use rstest::rstest;
use topoff_core::error::BuildError;
use topoff_core::mocks::{RecordingPump, ScriptedLevels};
use topoff_core::{Parts, Topup, TopupCfg, build_controller};
use topoff_traits::{BoxError, LastTrigger, Schedule, SettingsStore};

#[rstest]
fn builder_missing_level_source_yields_typed_build_error() {
    let err = Topup::builder()
        // missing with_level_source()
        .with_pump(RecordingPump::new())
        .try_build()
        .expect_err("should fail with MissingLevelSource");

    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingLevelSource) => {}
        other => panic!("expected MissingLevelSource, got: {other:?}"),
    }
}

#[rstest]
#[case::zero_runtime(TopupCfg { max_runtime_ms: 0, ..TopupCfg::default() }, "max_runtime_ms")]
#[case::zero_debounce(TopupCfg { debounce_count: 0, ..TopupCfg::default() }, "debounce_count")]
#[case::nan_trigger(TopupCfg { trigger_level_cm: f32::NAN, ..TopupCfg::default() }, "trigger_level_cm")]
fn invalid_topup_config_is_rejected(#[case] topup: TopupCfg, #[case] field: &str) {
    let err = Topup::builder()
        .with_level_source(ScriptedLevels::new(Ok(1.0), []))
        .with_pump(RecordingPump::new())
        .with_topup(topup)
        .build()
        .expect_err("invalid config must not build");
    assert!(
        matches!(err.downcast_ref::<BuildError>(), Some(BuildError::InvalidConfig(_))),
        "unexpected error: {err:?}"
    );
    assert!(err.to_string().contains(field), "{err}");
}

#[rstest]
fn pump_that_cannot_be_parked_fails_the_build() {
    let pump = RecordingPump::new().fail_stops(1);
    let err = build_controller(ScriptedLevels::new(Ok(1.0), []), pump, Parts::default())
        .expect_err("pump fault at startup is fatal");
    assert!(err.to_string().contains("relay did not open"), "{err}");
}

struct BrokenStore;

impl SettingsStore for BrokenStore {
    fn trigger_level_cm(&self) -> Result<Option<f32>, BoxError> {
        Err("state file unreadable".into())
    }
    fn set_trigger_level_cm(&mut self, _cm: f32) -> Result<(), BoxError> {
        Err("read-only".into())
    }
    fn schedule(&self) -> Result<Option<Schedule>, BoxError> {
        Ok(None)
    }
    fn set_schedule(&mut self, _schedule: Schedule) -> Result<(), BoxError> {
        Err("read-only".into())
    }
    fn last_trigger(&self) -> Result<Option<LastTrigger>, BoxError> {
        Ok(None)
    }
    fn set_last_trigger(&mut self, _at: &str, _reason: &str) -> Result<(), BoxError> {
        Err("read-only".into())
    }
}

#[rstest]
fn store_errors_other_than_not_found_are_fatal_at_startup() {
    let err = Topup::builder()
        .with_level_source(ScriptedLevels::new(Ok(1.0), []))
        .with_pump(RecordingPump::new())
        .with_store(BrokenStore)
        .build()
        .expect_err("unreadable store must fail startup");
    assert!(err.to_string().contains("state file unreadable"), "{err}");
}

#[rstest]
fn statically_dispatched_controller_builds_with_defaults() {
    let parts = Parts {
        clock: Some(Arc::new(topoff_traits::ManualClock::new())),
        ..Parts::default()
    };
    let c = build_controller(ScriptedLevels::new(Ok(1.0), []), RecordingPump::new(), parts)
        .expect("defaults are valid");
    assert_eq!(c.context().topup.trigger_level_cm, 3.0);
    assert_eq!(c.context().schedule, Schedule::default());
}
