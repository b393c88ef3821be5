//! Retry and averaging on top of single ranging measurements.

use std::sync::Arc;
use std::time::{Duration, Instant};

use topoff_traits::Clock;

use crate::cancel::CancelToken;
use crate::config::RangerCfg;
use crate::error::{RangingError, TopoffError};
use crate::sensor::Ranging;

/// A source of liquid level readings in centimetres.
pub trait LevelSource {
    /// One reading, retried on transient sensor errors.
    fn read(&mut self) -> Result<f32, TopoffError>;

    /// Mean of several readings; any failed reading fails the whole average.
    fn read_average(&mut self) -> Result<f32, TopoffError>;

    /// Like `read`, but gives up with `DeadlineExceeded` instead of retrying
    /// past `deadline`.
    fn read_within(&mut self, deadline: Instant) -> Result<f32, TopoffError> {
        let _ = deadline;
        self.read()
    }
}

impl<T: LevelSource + ?Sized> LevelSource for Box<T> {
    fn read(&mut self) -> Result<f32, TopoffError> {
        (**self).read()
    }
    fn read_average(&mut self) -> Result<f32, TopoffError> {
        (**self).read_average()
    }
    fn read_within(&mut self, deadline: Instant) -> Result<f32, TopoffError> {
        (**self).read_within(deadline)
    }
}

pub struct Ranger<R> {
    sensor: R,
    clock: Arc<dyn Clock + Send + Sync>,
    cfg: RangerCfg,
    cancel: CancelToken,
}

impl<R: Ranging> Ranger<R> {
    pub fn new(sensor: R, clock: Arc<dyn Clock + Send + Sync>, cfg: RangerCfg) -> Self {
        Self {
            sensor,
            clock,
            cfg,
            cancel: CancelToken::new(),
        }
    }

    /// Share a cancellation token so retry delays can be interrupted.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn read_until(&mut self, deadline: Option<Instant>) -> Result<f32, TopoffError> {
        let retry_delay = Duration::from_millis(self.cfg.retry_delay_ms);
        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return Err(TopoffError::Cancelled);
            }
            attempt += 1;
            let err = match self.sensor.measure_cm() {
                Ok(cm) => {
                    tracing::trace!(distance_cm = cm, attempt, "level read");
                    return Ok(cm);
                }
                Err(e) => e,
            };
            log_failure(&err, attempt);

            if attempt > self.cfg.error_retries {
                tracing::error!(attempts = attempt, last = %err, "sensor retries exhausted");
                return Err(TopoffError::SensorFailure {
                    attempts: attempt,
                    last: err,
                });
            }
            match deadline {
                Some(deadline) => {
                    let left = deadline.saturating_duration_since(self.clock.now());
                    self.cancel.sleep(&*self.clock, retry_delay.min(left))?;
                    if self.clock.now() >= deadline {
                        tracing::debug!(attempt, "deadline passed while retrying");
                        return Err(TopoffError::DeadlineExceeded);
                    }
                }
                None => self.cancel.sleep(&*self.clock, retry_delay)?,
            }
        }
    }
}

fn log_failure(err: &RangingError, attempt: u32) {
    match err {
        RangingError::PingTimeout => {
            tracing::warn!(attempt, "ping timeout, sensor likely too close to the surface");
        }
        RangingError::EchoTimeout => {
            tracing::warn!(attempt, "echo timeout, sensor likely too far from the surface");
        }
        other => tracing::warn!(attempt, error = %other, "ranging failed"),
    }
}

impl<R: Ranging> LevelSource for Ranger<R> {
    fn read(&mut self) -> Result<f32, TopoffError> {
        self.read_until(None)
    }

    fn read_average(&mut self) -> Result<f32, TopoffError> {
        let samples = self.cfg.average_samples.max(1);
        let delay = Duration::from_millis(self.cfg.sample_delay_ms);
        let mut sum = 0.0_f32;
        for _ in 0..samples {
            self.cancel.sleep(&*self.clock, delay)?;
            sum += self.read()?;
        }
        let mean = sum / samples as f32;
        tracing::debug!(distance_cm = mean, samples, "averaged level");
        Ok(mean)
    }

    fn read_within(&mut self, deadline: Instant) -> Result<f32, TopoffError> {
        self.read_until(Some(deadline))
    }
}
