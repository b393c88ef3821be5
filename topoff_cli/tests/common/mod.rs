#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::prelude::*;
use std::process::Command;
use tempfile::TempDir;

/// A tempdir holding a sim-friendly config and its (not yet created) state file.
pub struct Setup {
    pub dir: TempDir,
    pub config: PathBuf,
    pub state: PathBuf,
}

impl Setup {
    pub fn new(max_runtime_ms: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.toml");
        let toml = format!(
            r#"
[pins]
# pins are unused by the simulated tank but must be present
trigger = 23
echo = 24
pump = 17

[ranging]
# the simulated echo starts 200 us after the trigger
ping_timeout_us = 2000

[ranger]
retry_delay_ms = 1
sample_delay_ms = 1

[topup]
trigger_level_cm = 3.0
max_runtime_ms = {max_runtime_ms}
debounce_count = 3
sense = "air_gap"

[schedule]
# never due, so `run` only ticks
days = 0
tick_ms = 10

[storage]
state_file = {state:?}
"#,
            state = state.display().to_string()
        );
        let config = dir.path().join("topoff.toml");
        fs::write(&config, toml).unwrap();
        Self { dir, config, state }
    }

    /// `topoff --config <cfg>` with the given simulated distance and drift.
    pub fn cmd(&self, distance_cm: f32, drift_cm_per_s: f32) -> Command {
        let mut cmd = Command::cargo_bin("topoff").unwrap();
        cmd.env("TOPOFF_SIM_DISTANCE_CM", distance_cm.to_string())
            .env("TOPOFF_SIM_DRIFT_CM_PER_S", drift_cm_per_s.to_string())
            .env_remove("TOPOFF_SIM_FAULT")
            .env_remove("TOPOFF_SIM_PUMP_FAIL")
            .env_remove("RUST_LOG")
            .arg("--config")
            .arg(&self.config);
        cmd
    }

    pub fn state_text(&self) -> String {
        fs::read_to_string(&self.state).unwrap_or_default()
    }
}
