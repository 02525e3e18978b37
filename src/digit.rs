use std::fmt;

/// Number of pulses the dial sends for its last finger hole, which carries "0".
pub const MAX_PULSES: u8 = 10;

/// A decoded dial digit, always in `0..=9`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digit(u8);

impl Digit {
    pub fn new(value: u8) -> Option<Self> {
        (value <= 9).then_some(Self(value))
    }

    /// Maps a rotation's pulse count to the dialed digit.
    ///
    /// One to nine pulses are the digits themselves and ten pulses is zero.
    /// Zero pulses or more than ten are not a dial event.
    pub fn from_pulses(pulses: u8) -> Option<Self> {
        match pulses {
            1..=MAX_PULSES => Some(Self(pulses % 10)),
            _ => None,
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Pulses the dial sends for this digit.
    pub fn pulses(self) -> u8 {
        if self.0 == 0 {
            MAX_PULSES
        } else {
            self.0
        }
    }

    /// HID usage ID on the keyboard page (0x07).
    ///
    /// The usage table runs 1..9 then 0 (`0x1E`..`0x27`), the same order as
    /// the finger holes on the dial, so the code is `0x1D + pulses`.
    pub fn hid_usage(self) -> u8 {
        0x1D + self.pulses()
    }

    pub fn as_char(self) -> char {
        (b'0' + self.0) as char
    }
}

impl fmt::Display for Digit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
