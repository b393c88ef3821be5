//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "topoff", version, about = "Aquarium auto top-off controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/topoff.toml")]
    pub config: PathBuf,

    /// Print results and errors as JSON lines; logs become JSON too
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides [logging].level
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read the distance to the water surface
    Measure {
        /// Average `ranger.average_samples` readings instead of taking one
        #[arg(long, action = ArgAction::SetTrue)]
        average: bool,
    },
    /// Run one top-up now, regardless of the schedule
    Topup,
    /// Run the scheduler: top up on the configured days and time until Ctrl-C
    Run {
        /// Stop after this many scheduler ticks
        #[arg(long, value_name = "N")]
        ticks: Option<u64>,
        /// Enable real-time mode (SCHED_FIFO, mlockall)
        #[arg(
            long,
            action = ArgAction::SetTrue,
            long_help = "Enable real-time mode on Linux.\n\nAttempts SCHED_FIFO priority and calls mlockall to keep the process resident. Ranging busy-waits on the echo line, so preemption in the middle of a measurement skews the distance. Requires CAP_SYS_NICE / CAP_IPC_LOCK or root."
        )]
        rt: bool,
        /// Real-time priority for SCHED_FIFO (1..=99); defaults to the maximum
        #[arg(long, value_name = "PRIO")]
        rt_prio: Option<i32>,
        /// Memory locking mode for --rt
        #[arg(long, value_enum, value_name = "MODE", default_value = "current")]
        rt_lock: RtLock,
    },
    /// Show the water level, saved settings and the last recorded trigger
    Status,
    /// Save a new trigger level in centimetres
    SetTrigger {
        #[arg(value_name = "CM", allow_negative_numbers = true)]
        cm: f32,
    },
    /// Save a new top-up schedule; omitted fields keep their current value
    SetSchedule {
        /// Weekdays, e.g. `mon,thu`, or a bitmask with bit 0 = Monday
        #[arg(long, value_name = "DAYS", value_delimiter = ',')]
        days: Option<Vec<String>>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=23))]
        hour: Option<u8>,
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=59))]
        minute: Option<u8>,
    },
    /// Quick health check (config, pins, one reading)
    SelfCheck,
}
