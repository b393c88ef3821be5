use thiserror::Error;

/// Why a single trigger/echo cycle produced no distance.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RangingError {
    #[error("ping timeout: echo never started (sensor likely too close to the surface)")]
    PingTimeout,
    #[error("echo timeout: echo never ended (sensor likely too far from the surface)")]
    EchoTimeout,
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("unknown ranging error (code {0})")]
    Unknown(i32),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TopoffError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("sensor failure after {attempts} attempts: {last}")]
    SensorFailure { attempts: u32, last: RangingError },
    #[error("run deadline passed while waiting for a reading")]
    DeadlineExceeded,
    #[error("operation cancelled")]
    Cancelled,
    #[error("a top-up run is already in progress")]
    Busy,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing level source")]
    MissingLevelSource,
    #[error("missing pump")]
    MissingPump,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
