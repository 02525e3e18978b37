pub mod config;
pub mod decoder;
pub mod digit;
pub mod hardware;
pub mod hid;

use anyhow::Result;
use dotenv::dotenv;
use log::{error, info};

use crate::{config::Config, decoder::DialDecoder};

fn main() {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = Config::from_env().and_then(run) {
        error!("{err:#}");
        std::process::exit(1);
    }
}

#[cfg(not(any(feature = "real", feature = "emulated")))]
compile_error!("enable the `real` or `emulated` feature");

#[cfg(feature = "real")]
fn run(config: Config) -> Result<()> {
    use hardware::physical::{Hardware, HidGadgetKeyboard};

    let hardware = Hardware::create(&config.pins)?;
    let keyboard = HidGadgetKeyboard::open(&config.hid_device)?;

    info!(
        "Rotary keypad ready (hook {}, dial {}, pulse {}, HID {})",
        config.pins.hook_switch,
        config.pins.dial_latch,
        config.pins.dial_pulse,
        config.hid_device.display()
    );

    let mut decoder = DialDecoder::new(
        hardware.hook_switch,
        hardware.dial_latch,
        hardware.dial_pulse,
        hardware.status_led,
        keyboard,
        rppal::hal::Delay::new(),
        config.decoder,
    );

    decoder.run()
}

#[cfg(all(feature = "emulated", not(feature = "real")))]
fn run(config: Config) -> Result<()> {
    use hardware::emulated::{
        demo_scenario, load_scenario, Clock, EmulatedDelay, EmulatedKeyboard, EmulatedLed,
        EmulatedPhone, Timeline,
    };

    let gestures = match &config.scenario {
        Some(path) => load_scenario(path)?,
        None => demo_scenario(),
    };
    let timeline = Timeline::from_gestures(&gestures)?;

    info!(
        "Emulating {} gestures over {:.1}s",
        gestures.len(),
        timeline.end().as_secs_f64()
    );

    let clock = Clock::wall();
    let phone = EmulatedPhone::new(timeline, clock.clone());
    let keyboard = EmulatedKeyboard::default();

    let mut decoder = DialDecoder::new(
        phone.hook_switch(),
        phone.dial_latch(),
        phone.dial_pulse(),
        EmulatedLed::default(),
        keyboard.clone(),
        EmulatedDelay::new(clock),
        config.decoder,
    );

    decoder.run_until(|_| phone.finished())?;

    info!("Typed: {}", keyboard.typed());

    Ok(())
}
