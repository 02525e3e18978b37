#[cfg(feature = "emulated")]
pub mod emulated;
#[cfg(feature = "real")]
pub mod physical;

use anyhow::Result;

use crate::digit::Digit;

/// Hook switch. `true` while the handset is lifted.
pub trait HookSensor {
    fn read(&mut self) -> bool;
}

/// Dial latch. `true` while the dial is away from its rest position.
pub trait DialActiveSensor {
    fn read(&mut self) -> bool;
}

/// Pulse contact. `true` when the loop is made, `false` during a break.
pub trait PulseSensor {
    fn read(&mut self) -> bool;
}

pub trait StatusIndicator {
    fn set(&mut self, on: bool);
}

pub trait KeystrokeSink {
    /// Types `digit` and releases every key.
    fn press_and_release(&mut self, digit: Digit) -> Result<()>;
}
