//! USB HID boot keyboard reports.
//!
//! The Linux USB gadget driver (`/dev/hidg*`) takes the same 8-byte input
//! report a firmware keyboard would put on its interrupt endpoint.

use crate::digit::Digit;

pub const REPORT_LEN: usize = 8;

/// Standard USB HID keyboard report (8 bytes).
/// Byte 0: modifier keys bitmask
/// Byte 1: reserved (0x00)
/// Bytes 2-7: up to 6 simultaneous keycodes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardReport {
    pub modifiers: u8,
    pub reserved: u8,
    pub keys: [u8; 6],
}

impl KeyboardReport {
    /// All keys released.
    pub const fn empty() -> Self {
        Self {
            modifiers: 0,
            reserved: 0,
            keys: [0; 6],
        }
    }

    /// A single unmodified key press for `digit`.
    pub fn digit(digit: Digit) -> Self {
        let mut report = Self::empty();
        report.keys[0] = digit.hid_usage();
        report
    }

    pub fn to_bytes(&self) -> [u8; REPORT_LEN] {
        let mut bytes = [0; REPORT_LEN];
        bytes[0] = self.modifiers;
        bytes[1] = self.reserved;
        bytes[2..].copy_from_slice(&self.keys);
        bytes
    }
}

/// Press-then-release pair for one keystroke.
pub fn keystroke(digit: Digit) -> [KeyboardReport; 2] {
    [KeyboardReport::digit(digit), KeyboardReport::empty()]
}
