//! Worker thread serialization, reentrancy guard and shutdown.
//!
//! Verifies that:
//! - A run submitted to the worker returns its outcome
//! - A second request while a run is in flight is refused with `Busy`
//! - Dropping the worker cancels an active run and leaves the pump off
//! - A cancel issued after submission is not lost

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use topoff_core::mocks::{RecordingPump, ScriptedLevels};
use topoff_core::{LevelSense, TopoffError, Topup, TopupCfg, TopupWorker, TriggerReason};
use topoff_traits::{ManualClock, MemoryStore, SettingsStore};

fn controller(levels: ScriptedLevels, pump: &RecordingPump, store: &MemoryStore) -> Topup {
    Topup::builder()
        .with_level_source(levels)
        .with_pump(pump.clone())
        .with_store(store.clone())
        .with_clock(Arc::new(ManualClock::new()))
        .with_topup(TopupCfg {
            sense: LevelSense::AirGap,
            ..TopupCfg::default()
        })
        .build()
        .expect("controller")
}

#[test]
fn run_blocking_returns_the_outcome() {
    let pump = RecordingPump::new();
    let store = MemoryStore::new();
    let worker = TopupWorker::spawn(controller(
        ScriptedLevels::new(Ok(1.0), []),
        &pump,
        &store,
    ));

    let outcome = worker.run_blocking().expect("worker alive");
    assert_eq!(outcome.reason, TriggerReason::NotNeeded);
    assert!(!worker.is_busy());
    assert_eq!(
        worker.status().snapshot().last_outcome.map(|o| o.reason),
        Some(TriggerReason::NotNeeded)
    );
}

#[test]
fn overlapping_request_is_rejected_with_busy() {
    let pump = RecordingPump::new();
    let store = MemoryStore::new();
    let clock = ManualClock::new();
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let mut first = true;
    let levels = ScriptedLevels::new(Ok(5.0), [Ok(5.0)])
        .advancing(clock.clone(), Duration::from_secs(1))
        .on_read(move || {
            if first {
                first = false;
                let _ = started_tx.send(());
                let _ = release_rx.recv();
            }
        });
    let controller = Topup::builder()
        .with_level_source(levels)
        .with_pump(pump.clone())
        .with_store(store.clone())
        .with_clock(Arc::new(clock))
        .with_topup(TopupCfg {
            sense: LevelSense::AirGap,
            ..TopupCfg::default()
        })
        .build()
        .expect("controller");
    let worker = TopupWorker::spawn(controller);

    let pending = worker.submit().expect("first run accepted");
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("run started");
    assert!(worker.is_busy());
    assert_eq!(worker.submit().err(), Some(TopoffError::Busy));
    assert_eq!(worker.submit_scheduled().err(), Some(TopoffError::Busy));

    release_tx.send(()).expect("release");
    let outcome = pending
        .recv_timeout(Duration::from_secs(5))
        .expect("run finished");
    assert_eq!(outcome.reason, TriggerReason::PumpTimeout);
    assert!(!pump.is_on());
}

#[test]
fn drop_cancels_active_run_and_stops_pump() {
    let pump = RecordingPump::new();
    let store = MemoryStore::new();
    let (started_tx, started_rx) = mpsc::channel();
    // readings never reach the trigger and the clock never moves: the run
    // only ends when cancelled
    let mut first = true;
    let levels = ScriptedLevels::new(Ok(5.0), [Ok(5.0)]).on_read(move || {
        if std::mem::take(&mut first) {
            let _ = started_tx.send(());
        }
    });
    let worker = TopupWorker::spawn(controller(levels, &pump, &store));

    let pending = worker.submit().expect("accepted");
    started_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("run started");
    assert!(pump.is_on());

    drop(worker);

    let outcome = pending.recv().expect("outcome delivered before exit");
    assert_eq!(outcome.reason, TriggerReason::Cancelled);
    assert!(!pump.is_on());
    assert_eq!(
        store.last_trigger().expect("store").map(|t| t.reason),
        Some("Topup cancelled".to_string())
    );
}

#[test]
fn cancel_right_after_submit_reaches_the_queued_run() {
    let pump = RecordingPump::new();
    let store = MemoryStore::new();
    // without a cancel this run never ends
    let levels = ScriptedLevels::new(Ok(5.0), [Ok(5.0)]);
    let worker = TopupWorker::spawn(controller(levels, &pump, &store));

    let pending = worker.submit().expect("accepted");
    worker.cancel();

    let outcome = pending
        .recv_timeout(Duration::from_secs(5))
        .expect("run finished");
    assert_eq!(outcome.reason, TriggerReason::Cancelled);
    assert!(!pump.is_on());
}

#[test]
fn cancel_before_submit_does_not_abort_the_next_run() {
    let pump = RecordingPump::new();
    let store = MemoryStore::new();
    let levels = ScriptedLevels::new(Ok(5.0), [Ok(2.0)]);
    let worker = TopupWorker::spawn(controller(levels, &pump, &store));

    worker.cancel();
    let outcome = worker.run_blocking().expect("worker alive");

    assert_eq!(outcome.reason, TriggerReason::ThresholdReached);
    assert!(!pump.is_on());
}

#[test]
fn scheduled_run_reloads_settings_first() {
    let pump = RecordingPump::new();
    let mut store = MemoryStore::new();
    let worker = TopupWorker::spawn(controller(
        ScriptedLevels::new(Ok(5.0), [Ok(2.0)]),
        &pump,
        &store,
    ));
    // 5.0 cm of air gap is below a 6 cm trigger: nothing to do
    store.set_trigger_level_cm(6.0).expect("store");

    let outcome = worker
        .submit_scheduled()
        .expect("accepted")
        .recv_timeout(Duration::from_secs(5))
        .expect("finished");
    assert_eq!(outcome.reason, TriggerReason::NotNeeded);
    assert!(!pump.ever_started());
}

#[test]
fn multiple_workers_dont_leak_threads() {
    for _ in 0..10 {
        let pump = RecordingPump::new();
        let store = MemoryStore::new();
        let worker = TopupWorker::spawn(controller(
            ScriptedLevels::new(Ok(1.0), []),
            &pump,
            &store,
        ));
        let _ = worker.run_blocking();
        drop(worker);
    }
    // Test passes if we reach here without hanging or panicking
}
