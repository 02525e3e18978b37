use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
};

use anyhow::{Context, Result};
use rppal::gpio::{Gpio, InputPin, Level, OutputPin};

use crate::{
    config::PinConfig,
    digit::Digit,
    hardware::{DialActiveSensor, HookSensor, KeystrokeSink, PulseSensor, StatusIndicator},
    hid,
};

// All inputs are pulled down and driven high by the phone's contacts.

pub struct HookSwitch(InputPin);

impl HookSensor for HookSwitch {
    fn read(&mut self) -> bool {
        self.0.is_high()
    }
}

pub struct DialLatch(InputPin);

impl DialActiveSensor for DialLatch {
    fn read(&mut self) -> bool {
        self.0.is_high()
    }
}

pub struct DialPulse(InputPin);

impl PulseSensor for DialPulse {
    fn read(&mut self) -> bool {
        self.0.is_high()
    }
}

pub struct StatusLed(OutputPin);

impl StatusIndicator for StatusLed {
    fn set(&mut self, on: bool) {
        self.0.write(if on { Level::High } else { Level::Low });
    }
}

pub struct Hardware {
    pub hook_switch: HookSwitch,
    pub dial_latch: DialLatch,
    pub dial_pulse: DialPulse,
    pub status_led: StatusLed,
}

impl Hardware {
    pub fn create(pins: &PinConfig) -> Result<Self> {
        let gpio = Gpio::new().context("initializing GPIO")?;

        let input = |pin: u8| -> Result<InputPin> {
            Ok(gpio
                .get(pin)
                .with_context(|| format!("getting input pin {pin}"))?
                .into_input_pulldown())
        };

        let status_led = gpio
            .get(pins.status_led)
            .with_context(|| format!("getting LED pin {}", pins.status_led))?
            .into_output_low();

        Ok(Hardware {
            hook_switch: HookSwitch(input(pins.hook_switch)?),
            dial_latch: DialLatch(input(pins.dial_latch)?),
            dial_pulse: DialPulse(input(pins.dial_pulse)?),
            status_led: StatusLed(status_led),
        })
    }
}

/// Keyboard function of a Linux USB gadget, e.g. `/dev/hidg0`.
pub struct HidGadgetKeyboard {
    device: File,
}

impl HidGadgetKeyboard {
    pub fn open(path: &Path) -> Result<Self> {
        let device = OpenOptions::new()
            .write(true)
            .open(path)
            .with_context(|| format!("opening HID gadget {}", path.display()))?;

        Ok(Self { device })
    }
}

impl KeystrokeSink for HidGadgetKeyboard {
    fn press_and_release(&mut self, digit: Digit) -> Result<()> {
        for report in hid::keystroke(digit) {
            self.device
                .write_all(&report.to_bytes())
                .with_context(|| format!("sending keystroke for {digit}"))?;
        }

        self.device.flush().context("flushing HID gadget")
    }
}
