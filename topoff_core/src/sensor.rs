//! Ultrasonic time-of-flight ranging over a trigger/echo GPIO pair.
//!
//! One measurement is a short trigger pulse followed by two busy-wait phases:
//! wait for the echo line to rise (bounded by `ping_timeout_us`), then track the
//! echo until it falls (bounded by `max_echo_us` from the end of the pulse).
//! All timing goes through the injected `Clock`, so tests can drive the loop
//! with a `ManualClock` and a simulated echo line.

use std::sync::Arc;
use std::time::{Duration, Instant};

use topoff_traits::{Clock, InputPin, OutputPin};

use crate::config::RangingCfg;
use crate::error::{RangingError, TopoffError};
use crate::hw_error::map_hw_error;
use crate::util::micros_u64;

/// Trigger output plus echo input of one transducer.
pub struct SensorHandle<T, E> {
    trigger: T,
    echo: E,
}

impl<T: OutputPin, E: InputPin> SensorHandle<T, E> {
    pub fn new(trigger: T, echo: E) -> Self {
        Self { trigger, echo }
    }
}

/// Result of one ranging attempt as seen by status consumers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub distance_cm: f32,
    pub valid: bool,
}

impl Measurement {
    pub fn invalid() -> Self {
        Self {
            distance_cm: -1.0,
            valid: false,
        }
    }
}

impl From<Result<f32, RangingError>> for Measurement {
    fn from(r: Result<f32, RangingError>) -> Self {
        match r {
            Ok(distance_cm) => Self {
                distance_cm,
                valid: true,
            },
            Err(_) => Self::invalid(),
        }
    }
}

/// Anything that can produce a single distance measurement.
pub trait Ranging {
    fn measure_cm(&mut self) -> Result<f32, RangingError>;
}

impl<T: Ranging + ?Sized> Ranging for Box<T> {
    fn measure_cm(&mut self) -> Result<f32, RangingError> {
        (**self).measure_cm()
    }
}

/// Convert an echo pulse width to centimetres. No clamping is applied.
#[inline]
pub fn pulse_to_cm(width: Duration, us_per_cm: f32) -> f32 {
    (width.as_secs_f64() * 1_000_000.0 / f64::from(us_per_cm)) as f32
}

pub struct RangeSensor<T, E> {
    handle: SensorHandle<T, E>,
    clock: Arc<dyn Clock + Send + Sync>,
    cfg: RangingCfg,
}

impl<T: OutputPin, E: InputPin> RangeSensor<T, E> {
    /// Take ownership of the pins and park the trigger line low.
    pub fn init(
        mut handle: SensorHandle<T, E>,
        clock: Arc<dyn Clock + Send + Sync>,
        cfg: RangingCfg,
    ) -> Result<Self, TopoffError> {
        handle
            .trigger
            .set_level(false)
            .map_err(|e| map_hw_error(e.as_ref()))?;
        tracing::debug!(
            ping_timeout_us = cfg.ping_timeout_us,
            max_echo_us = cfg.max_echo_us,
            "range sensor ready"
        );
        Ok(Self { handle, clock, cfg })
    }

    /// One measurement, folded into a `Measurement` (invalid on any error).
    pub fn measure(&mut self) -> Measurement {
        self.measure_cm().into()
    }

    fn pulse(&mut self) -> Result<Instant, RangingError> {
        let hw = |e: topoff_traits::BoxError| RangingError::Hardware(e.to_string());
        let trigger = &mut self.handle.trigger;
        trigger.set_level(false).map_err(hw)?;
        self.clock.delay_us(self.cfg.trigger_low_us);
        trigger.set_level(true).map_err(hw)?;
        self.clock.delay_us(self.cfg.trigger_high_us);
        trigger.set_level(false).map_err(hw)?;
        Ok(self.clock.now())
    }
}

impl<T: OutputPin, E: InputPin> Ranging for RangeSensor<T, E> {
    fn measure_cm(&mut self) -> Result<f32, RangingError> {
        let pulse_end = self.pulse()?;
        let clock = &self.clock;
        let echo = &mut self.handle.echo;

        let echo_start = loop {
            let high = echo.is_high();
            let now = clock.now();
            if high {
                break now;
            }
            if clock.us_since(pulse_end) >= self.cfg.ping_timeout_us {
                return Err(RangingError::PingTimeout);
            }
            std::hint::spin_loop();
        };

        let mut last_high = echo_start;
        loop {
            let high = echo.is_high();
            let now = clock.now();
            if !high {
                break;
            }
            last_high = now;
            if clock.us_since(pulse_end) >= self.cfg.max_echo_us {
                return Err(RangingError::EchoTimeout);
            }
            std::hint::spin_loop();
        }

        let width = last_high.saturating_duration_since(echo_start);
        let cm = pulse_to_cm(width, self.cfg.us_per_cm);
        tracing::trace!(width_us = micros_u64(width), distance_cm = cm, "echo");
        Ok(cm)
    }
}
