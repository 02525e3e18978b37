use std::{env, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};

pub const HOOK_SWITCH_PIN: u8 = 17;

pub const DIAL_LATCH_PIN: u8 = 22;
pub const DIAL_PULSE_PIN: u8 = 27;

pub const STATUS_LED_PIN: u8 = 25;

pub const HID_GADGET_DEVICE: &str = "/dev/hidg0";

pub const SAMPLE_DELAY: Duration = Duration::from_millis(5);

/// Timing knobs of the dial decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Delay after each hook, dial-active and pulse sample.
    pub sample_delay: Duration,
    /// Maximum number of reads spent waiting for the pulse line to return
    /// high. `None` waits forever.
    pub pulse_release_limit: Option<u32>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            sample_delay: SAMPLE_DELAY,
            pulse_release_limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinConfig {
    pub hook_switch: u8,
    pub dial_latch: u8,
    pub dial_pulse: u8,
    pub status_led: u8,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            hook_switch: HOOK_SWITCH_PIN,
            dial_latch: DIAL_LATCH_PIN,
            dial_pulse: DIAL_PULSE_PIN,
            status_led: STATUS_LED_PIN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub decoder: DecoderConfig,
    pub pins: PinConfig,
    pub hid_device: PathBuf,
    pub scenario: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::default(),
            pins: PinConfig::default(),
            hid_device: PathBuf::from(HID_GADGET_DEVICE),
            scenario: None,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(ms) = parse_var::<u64>(&lookup, "DIAL_SAMPLE_DELAY_MS")? {
            config.decoder.sample_delay = Duration::from_millis(ms);
        }
        if let Some(limit) = parse_var::<u32>(&lookup, "DIAL_PULSE_RELEASE_LIMIT")? {
            anyhow::ensure!(limit > 0, "DIAL_PULSE_RELEASE_LIMIT must be at least 1");
            config.decoder.pulse_release_limit = Some(limit);
        }

        if let Some(pin) = parse_var(&lookup, "DIAL_HOOK_PIN")? {
            config.pins.hook_switch = pin;
        }
        if let Some(pin) = parse_var(&lookup, "DIAL_ACTIVE_PIN")? {
            config.pins.dial_latch = pin;
        }
        if let Some(pin) = parse_var(&lookup, "DIAL_PULSE_PIN")? {
            config.pins.dial_pulse = pin;
        }
        if let Some(pin) = parse_var(&lookup, "DIAL_LED_PIN")? {
            config.pins.status_led = pin;
        }

        if let Some(path) = lookup("DIAL_HID_DEVICE") {
            config.hid_device = PathBuf::from(path);
        }
        config.scenario = lookup("DIAL_SCENARIO").map(PathBuf::from);

        Ok(config)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("invalid value {value:?} for {key}"))
        })
        .transpose()
}
