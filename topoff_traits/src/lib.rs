pub mod clock;
pub mod store;

pub use clock::{Clock, FixedWallClock, ManualClock, MonotonicClock, SystemWallClock, WallClock};
pub use store::{LastTrigger, MemoryStore, Schedule, SettingsStore};

/// Error type used at every hardware/persistence seam.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A GPIO line configured as an output.
pub trait OutputPin {
    fn set_level(&mut self, high: bool) -> Result<(), BoxError>;
}

/// A GPIO line configured as an input.
pub trait InputPin {
    fn is_high(&mut self) -> bool;
}

/// On/off pump actuator.
pub trait Pump {
    fn start(&mut self) -> Result<(), BoxError>;
    fn stop(&mut self) -> Result<(), BoxError>;
}

impl<T: OutputPin + ?Sized> OutputPin for Box<T> {
    fn set_level(&mut self, high: bool) -> Result<(), BoxError> {
        (**self).set_level(high)
    }
}

impl<T: InputPin + ?Sized> InputPin for Box<T> {
    fn is_high(&mut self) -> bool {
        (**self).is_high()
    }
}

impl<T: Pump + ?Sized> Pump for Box<T> {
    fn start(&mut self) -> Result<(), BoxError> {
        (**self).start()
    }
    fn stop(&mut self) -> Result<(), BoxError> {
        (**self).stop()
    }
}
