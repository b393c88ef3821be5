//! Human-readable error descriptions and structured JSON error formatting.

use crate::topup::RunEnded;
use topoff_core::{BuildError, TopoffError, TriggerReason};

fn explain(what: &str, causes: &str, fix: &str) -> String {
    format!("What happened: {what}\nLikely causes: {causes}\nHow to fix: {fix}")
}

fn explain_reason(reason: TriggerReason) -> Option<String> {
    use TriggerReason::*;
    Some(match reason {
        PumpTimeout => explain(
            "The pump on time limit was reached before the water got to the trigger level.",
            "Empty reservoir, blocked hose, or topup.max_runtime_ms too low for the pump.",
            "Refill the reservoir and check the hose; raise topup.max_runtime_ms if the pump is just slow.",
        ),
        SensorError => explain(
            "The level sensor gave no valid reading.",
            "Sensor too close to or too far from the surface, loose trigger/echo wiring, or condensation on the transducer.",
            "Check [pins] trigger/echo and the sensor mounting height, then run `topoff measure`.",
        ),
        Cancelled => explain(
            "The top-up was cancelled.",
            "Ctrl-C or a shutdown request while the run was in progress.",
            "Start a new run with `topoff topup` when ready.",
        ),
        PumpFault => explain(
            "The pump relay could not be switched.",
            "Wrong [pins].pump, relay wiring, or missing GPIO permissions. The pump may still be running.",
            "Cut pump power now, then verify the relay wiring and pins.pump_active_low.",
        ),
        ThresholdReached | NotNeeded => return None,
    })
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(RunEnded(outcome)) = err.downcast_ref::<RunEnded>()
        && let Some(msg) = explain_reason(outcome.reason)
    {
        return msg;
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingLevelSource => explain(
                "No level sensor was provided to the controller.",
                "The range sensor failed to initialize or was not wired into the builder.",
                "Ensure the sensor is created successfully and passed via with_level_source(...).",
            ),
            BuildError::MissingPump => explain(
                "No pump was provided to the controller.",
                "The pump relay failed to initialize or was not wired into the builder.",
                "Ensure the relay is created successfully and passed via with_pump(...).",
            ),
            BuildError::InvalidConfig(msg) => explain(
                &format!("Invalid configuration ({msg})."),
                "Missing or out-of-range values in the TOML.",
                "Edit the config file, then rerun. See etc/topoff.toml for a sample.",
            ),
        };
    }

    if let Some(te) = err.downcast_ref::<TopoffError>() {
        return match te {
            TopoffError::SensorFailure { attempts, last } => explain(
                &format!("The level sensor failed {attempts} times in a row ({last})."),
                "Sensor too close to or too far from the surface, or trigger/echo wiring problems.",
                "Check [pins] trigger/echo and the mounting height; raise ranging.ping_timeout_us if the sensor is slow to answer.",
            ),
            TopoffError::Cancelled => explain(
                "The operation was cancelled.",
                "Ctrl-C was pressed.",
                "Run the command again.",
            ),
            TopoffError::Busy => explain(
                "A top-up is already running.",
                "A second run was requested before the first finished.",
                "Wait for the current run to finish.",
            ),
            TopoffError::Storage(msg) => explain(
                &format!("The settings file could not be used ({msg})."),
                "Wrong storage.state_file path, missing permissions, or a hand-edited file with a typo.",
                "Fix or delete the state file; deleting it restores the default trigger level and schedule.",
            ),
            TopoffError::Hardware(msg) => explain(
                &format!("A GPIO operation failed ({msg})."),
                "Incorrect pin numbers or insufficient GPIO permissions.",
                "Fix the [pins] values in the config; ensure the process may access /dev/gpiomem.",
            ),
            other => explain(
                &format!("{other}."),
                "See logs.",
                "Re-run with --log-level=debug or set RUST_LOG for more detail.",
            ),
        };
    }

    // String-based heuristics for errors coming from init or config
    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();

    if lower.contains("gpio") || lower.contains("open trigger pin") || lower.contains("open echo pin")
    {
        return explain(
            "Failed to initialize hardware pins.",
            "Incorrect pin numbers or insufficient GPIO permissions.",
            "Fix the [pins] values in the config; ensure the process has permission to access GPIO.",
        );
    }

    if lower.contains("config") {
        let full = err
            .chain()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(": ");
        return explain(
            &format!("Configuration is invalid or unreadable ({full})."),
            "Missing [pins] (trigger, echo, pump), a typo in a key, or out-of-range values.",
            "Edit the TOML config and try again.",
        );
    }

    // Generic fallback
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit code for an unsuccessful run outcome.
pub fn exit_code_for_reason(reason: TriggerReason) -> i32 {
    match reason {
        TriggerReason::ThresholdReached | TriggerReason::NotNeeded => 0,
        TriggerReason::PumpTimeout => 3,
        TriggerReason::SensorError => 4,
        TriggerReason::Cancelled => 5,
        TriggerReason::PumpFault => 6,
    }
}

/// Map run outcomes and sensor/cancel errors to stable exit codes; anything else returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if let Some(RunEnded(outcome)) = err.downcast_ref::<RunEnded>() {
        return exit_code_for_reason(outcome.reason);
    }
    match err.downcast_ref::<TopoffError>() {
        Some(TopoffError::SensorFailure { .. }) => exit_code_for_reason(TriggerReason::SensorError),
        Some(TopoffError::Cancelled) => exit_code_for_reason(TriggerReason::Cancelled),
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    let msg = humanize(err);
    if let Some(RunEnded(outcome)) = err.downcast_ref::<RunEnded>() {
        return json!({
            "reason": outcome.reason.name(),
            "message": msg,
            "details": {
                "level_cm": outcome.level_cm,
                "pumped_ms": topoff_core::util::millis_u64(outcome.pumped_for),
                "ended_at": outcome.ended_at.to_rfc3339(),
            },
        })
        .to_string();
    }
    if let Some(TopoffError::SensorFailure { attempts, last }) = err.downcast_ref::<TopoffError>() {
        return json!({
            "reason": TriggerReason::SensorError.name(),
            "message": msg,
            "details": { "attempts": attempts, "last": last.to_string() },
        })
        .to_string();
    }

    // Generic error JSON
    json!({ "reason": "error", "message": msg }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use topoff_core::RangingError;

    #[test]
    fn sensor_failure_maps_to_sensor_exit_code() {
        let err = eyre::Report::new(TopoffError::SensorFailure {
            attempts: 11,
            last: RangingError::PingTimeout,
        });
        assert_eq!(exit_code_for_error(&err), 4);
        assert!(humanize(&err).contains("failed 11 times"));
    }

    #[test]
    fn plain_errors_exit_with_one() {
        let err = eyre::eyre!("boom");
        assert_eq!(exit_code_for_error(&err), 1);
        let v: serde_json::Value = serde_json::from_str(&format_error_json(&err)).unwrap();
        assert_eq!(v["reason"], "error");
    }

    #[test]
    fn successful_reasons_exit_with_zero() {
        assert_eq!(exit_code_for_reason(TriggerReason::ThresholdReached), 0);
        assert_eq!(exit_code_for_reason(TriggerReason::NotNeeded), 0);
        assert_eq!(exit_code_for_reason(TriggerReason::PumpTimeout), 3);
    }
}
