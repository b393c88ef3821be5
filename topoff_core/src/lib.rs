#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core top-off logic (hardware-agnostic).
//!
//! This crate provides the ultrasonic ranging driver and the top-up control
//! loop. All hardware interactions go through the `topoff_traits` pin, pump
//! and clock traits.
//!
//! ## Architecture
//!
//! - **Ranging**: one trigger/echo cycle to a distance (`sensor` module)
//! - **Ranger**: retry on sensor errors and multi-sample averaging (`ranger`)
//! - **Control**: threshold check, debounce and run time cutoff (`controller`)
//! - **Scheduling**: day/time gate and the run-serializing worker thread
//! - **Status**: read-only snapshot for observers (`status`)
//!
//! ## Timing
//!
//! Every wait, from microsecond echo polling to the 60 ms retry delay, goes
//! through an injected `Clock`. Tests use `ManualClock` so that none of it
//! takes real time.

pub mod builder;
pub mod cancel;
pub mod config;
pub mod controller;
mod conversions;
pub mod error;
pub mod hw_error;
pub mod mocks;
pub mod ranger;
pub mod schedule;
pub mod sensor;
pub mod status;
pub mod util;
pub mod worker;

pub use builder::{Parts, Topup, TopupBuilder, build_controller};
pub use cancel::CancelToken;
pub use config::{LevelSense, RangerCfg, RangingCfg, TopupCfg, US_PER_CM};
pub use controller::{ControllerContext, TopupController, TopupOutcome, TopupState, TriggerReason};
pub use error::{BuildError, RangingError, Report, Result, TopoffError};
pub use ranger::{LevelSource, Ranger};
pub use schedule::ScheduleGate;
pub use sensor::{Measurement, RangeSensor, Ranging, SensorHandle, pulse_to_cm};
pub use status::{StatusHandle, StatusSnapshot};
pub use worker::TopupWorker;
