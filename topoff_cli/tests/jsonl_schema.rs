mod common;

use common::Setup;
use serde_json::Value;

fn last_json_line(stdout: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with('{'))
        .unwrap_or_else(|| panic!("no JSON line in stdout: {text}"));
    serde_json::from_str(line).unwrap()
}

/// Validate the JSON schema for a successful top-up.
#[test]
fn json_success_schema() {
    let setup = Setup::new(5000);
    let out = setup
        .cmd(5.0, -20.0)
        .args(["--json", "topup"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let v = last_json_line(&out.stdout);
    assert_eq!(v["reason"], "threshold_reached");
    assert_eq!(v["message"], "Trigger level reached");
    assert!(v["level_cm"].as_f64().unwrap() < 3.0);
    assert!(v["pumped_ms"].as_u64().is_some());
    assert!(v["ended_at"].as_str().is_some());
}

/// Failed runs print a structured error on stdout with the outcome details.
#[test]
fn json_sensor_error_schema() {
    let setup = Setup::new(5000);
    let out = setup
        .cmd(10.0, 0.0)
        .env("TOPOFF_SIM_FAULT", "no_echo")
        .args(["--json", "topup"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(4));

    let v = last_json_line(&out.stdout);
    assert_eq!(v["reason"], "sensor_error");
    assert!(v["message"].as_str().unwrap().starts_with("What happened:"));
    assert!(v["details"]["level_cm"].is_null());
    assert_eq!(v["details"]["pumped_ms"], 0);
}

#[test]
fn json_measure_reports_distance() {
    let setup = Setup::new(5000);
    let out = setup
        .cmd(12.5, 0.0)
        .args(["--json", "measure", "--average"])
        .output()
        .unwrap();
    assert!(out.status.success());

    let v = last_json_line(&out.stdout);
    let cm = v["distance_cm"].as_f64().unwrap();
    assert!((cm - 12.5).abs() < 0.5, "distance {cm}");
    assert_eq!(v["averaged"], true);
}

#[test]
fn json_status_schema() {
    let setup = Setup::new(5000);
    let out = setup
        .cmd(10.0, 0.0)
        .args(["--json", "status"])
        .output()
        .unwrap();
    assert!(out.status.success());

    let v = last_json_line(&out.stdout);
    assert!(v["level_cm"].as_f64().is_some());
    assert_eq!(v["trigger_level_cm"], 3.0);
    assert_eq!(v["schedule"]["days"], serde_json::json!([]));
    assert_eq!(v["schedule"]["hour"], 14);
    assert_eq!(v["schedule"]["minute"], 30);
    assert!(v["last_trigger"].is_null());
}
