//! Raspberry Pi GPIO adapters (rppal) for the HC-SR04 line pair and the pump relay.

use rppal::gpio::Gpio;
use topoff_traits::{BoxError, InputPin, OutputPin, Pump};
use tracing::{debug, trace};

use crate::error::{HwError, Result};

pub struct GpioOutput {
    pin: rppal::gpio::OutputPin,
}

impl OutputPin for GpioOutput {
    #[inline]
    fn set_level(&mut self, high: bool) -> std::result::Result<(), BoxError> {
        if high {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        Ok(())
    }
}

pub struct GpioInput {
    pin: rppal::gpio::InputPin,
}

impl InputPin for GpioInput {
    #[inline]
    fn is_high(&mut self) -> bool {
        self.pin.is_high()
    }
}

/// Claim the trigger line as an output driven low and the echo line as an input.
pub fn open_ranging_pins(trigger: u8, echo: u8) -> Result<(GpioOutput, GpioInput)> {
    let gpio = Gpio::new().map_err(|e| HwError::Gpio(format!("open gpio: {e}")))?;
    let trigger_pin = gpio
        .get(trigger)
        .map_err(|e| HwError::Gpio(format!("open trigger pin {trigger}: {e}")))?
        .into_output_low();
    let echo_pin = gpio
        .get(echo)
        .map_err(|e| HwError::Gpio(format!("open echo pin {echo}: {e}")))?
        .into_input();
    trace!(trigger, echo, "ranging pins configured");
    Ok((
        GpioOutput { pin: trigger_pin },
        GpioInput { pin: echo_pin },
    ))
}

/// Pump driven through a relay or MOSFET on a single output line.
pub struct RelayPump {
    pin: rppal::gpio::OutputPin,
    active_low: bool,
}

impl RelayPump {
    /// Claim `pin` and drive it to the inactive (pump off) level.
    pub fn new(pin: u8, active_low: bool) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(format!("open gpio: {e}")))?;
        let p = gpio
            .get(pin)
            .map_err(|e| HwError::Pump(format!("open pump pin {pin}: {e}")))?;
        let out = if active_low {
            p.into_output_high()
        } else {
            p.into_output_low()
        };
        Ok(Self {
            pin: out,
            active_low,
        })
    }

    fn drive(&mut self, on: bool) {
        if on != self.active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }
}

impl Pump for RelayPump {
    fn start(&mut self) -> std::result::Result<(), BoxError> {
        self.drive(true);
        debug!("pump relay energised");
        Ok(())
    }

    fn stop(&mut self) -> std::result::Result<(), BoxError> {
        self.drive(false);
        debug!("pump relay released");
        Ok(())
    }
}

impl Drop for RelayPump {
    fn drop(&mut self) {
        self.drive(false);
    }
}
