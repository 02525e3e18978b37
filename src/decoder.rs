//! Rotary dial decoder.
//!
//! Polls the hook switch, the dial latch and the pulse contact, counts the
//! breaks of each rotation and types the resulting digit.

use anyhow::Result;
use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use crate::{
    config::DecoderConfig,
    digit::Digit,
    hardware::{DialActiveSensor, HookSensor, KeystrokeSink, PulseSensor, StatusIndicator},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Handset on the hook.
    Idle,
    /// Off hook with the dial at rest.
    WaitingForDial,
    /// Dial turning, pulses being counted.
    Dialing,
    /// Dial back at rest, digit not yet typed.
    EmitDigit,
}

pub struct DialDecoder<H, A, P, L, K, D> {
    hook_switch: H,
    dial_latch: A,
    dial_pulse: P,
    status_led: L,
    keyboard: K,
    delay: D,

    config: DecoderConfig,

    phase: Phase,
    pulses: u8,
    /// Set when the pulse line stayed open past the release limit; the
    /// current rotation is then thrown away.
    jammed: bool,
    dialed_number: String,
}

impl<H, A, P, L, K, D> DialDecoder<H, A, P, L, K, D>
where
    H: HookSensor,
    A: DialActiveSensor,
    P: PulseSensor,
    L: StatusIndicator,
    K: KeystrokeSink,
    D: DelayNs,
{
    pub fn new(
        hook_switch: H,
        dial_latch: A,
        dial_pulse: P,
        status_led: L,
        keyboard: K,
        delay: D,
        config: DecoderConfig,
    ) -> Self {
        Self {
            hook_switch,
            dial_latch,
            dial_pulse,
            status_led,
            keyboard,
            delay,

            config,

            phase: Phase::Idle,
            pulses: 0,
            jammed: false,
            dialed_number: String::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Pulses counted so far in the current rotation.
    pub fn pulse_count(&self) -> u8 {
        self.pulses
    }

    /// Digits typed since the handset was lifted.
    pub fn dialed_number(&self) -> &str {
        &self.dialed_number
    }

    /// Polls forever. Only returns if a keystroke cannot be sent.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.poll()?;
        }
    }

    pub fn run_until(&mut self, mut stop: impl FnMut(&Self) -> bool) -> Result<()> {
        while !stop(self) {
            self.poll()?;
        }

        Ok(())
    }

    /// Runs one sampling pass of the current phase.
    pub fn poll(&mut self) -> Result<()> {
        match self.phase {
            Phase::Idle => self.poll_idle(),
            Phase::WaitingForDial => self.poll_waiting(),
            Phase::Dialing => self.poll_dialing(),
            Phase::EmitDigit => return self.emit_digit(),
        }

        Ok(())
    }

    fn poll_idle(&mut self) {
        if self.sample_hook() {
            self.enter(Phase::WaitingForDial);
        }
    }

    fn poll_waiting(&mut self) {
        let dial_active = self.dial_latch.read();
        self.settle();

        if !self.sample_hook() {
            self.hang_up();
        } else if dial_active {
            self.enter(Phase::Dialing);
        }
    }

    fn poll_dialing(&mut self) {
        if self.jammed {
            self.settle();
        } else {
            let pulse = self.dial_pulse.read();
            self.settle();

            if !pulse {
                self.pulses = self.pulses.saturating_add(1);
                debug!("Pulse {}", self.pulses);

                if !self.await_pulse_release() {
                    warn!(
                        "Pulse line stuck open after pulse {}, dropping this rotation",
                        self.pulses
                    );
                    self.jammed = true;
                }
            }
        }

        if !self.dial_latch.read() {
            self.enter(Phase::EmitDigit);
            return;
        }

        if !self.sample_hook() {
            if self.pulses > 0 {
                info!("Hung up mid-dial, dropping {} pulses", self.pulses);
            }
            self.hang_up();
        }
    }

    fn emit_digit(&mut self) -> Result<()> {
        let pulses = self.pulses;

        if self.jammed {
            warn!("Discarding rotation with a stuck pulse line");
        } else {
            match Digit::from_pulses(pulses) {
                Some(digit) => {
                    info!("Final number dialed = {digit}");
                    self.keyboard.press_and_release(digit)?;
                    self.dialed_number.push(digit.as_char());
                }
                None if pulses == 0 => warn!("Dial moved without sending any pulses"),
                None => warn!("Ignoring rotation with {pulses} pulses"),
            }
        }

        if self.sample_hook() {
            self.enter(Phase::WaitingForDial);
        } else {
            self.hang_up();
        }

        Ok(())
    }

    /// Blocks until the pulse contact closes again. Gives up after
    /// `pulse_release_limit` reads if one is configured.
    fn await_pulse_release(&mut self) -> bool {
        match self.config.pulse_release_limit {
            Some(limit) => (0..limit).any(|_| self.dial_pulse.read()),
            None => {
                while !self.dial_pulse.read() {}
                true
            }
        }
    }

    /// Reads the hook switch, waits out contact bounce and mirrors the
    /// result on the status LED.
    fn sample_hook(&mut self) -> bool {
        let off_hook = self.hook_switch.read();
        self.settle();
        self.status_led.set(off_hook);
        off_hook
    }

    fn settle(&mut self) {
        let us = u32::try_from(self.config.sample_delay.as_micros()).unwrap_or(u32::MAX);
        self.delay.delay_us(us);
    }

    fn hang_up(&mut self) {
        if !self.dialed_number.is_empty() {
            info!("Hung up after dialing {}", self.dialed_number);
            self.dialed_number.clear();
        }
        self.pulses = 0;
        self.enter(Phase::Idle);
    }

    fn enter(&mut self, phase: Phase) {
        debug!("{:?} -> {:?}", self.phase, phase);

        match phase {
            Phase::Idle => info!("On hook"),
            Phase::WaitingForDial => {
                info!("Waiting to dial");
                self.pulses = 0;
                self.jammed = false;
            }
            Phase::Dialing => info!("Dial is active"),
            Phase::EmitDigit => {}
        }

        self.phase = phase;
    }
}

#[cfg(all(test, feature = "emulated"))]
mod tests {
    use std::{cell::Cell, rc::Rc, time::Duration};

    use super::*;
    use crate::hardware::emulated::{
        Clock, EmulatedDelay, EmulatedKeyboard, EmulatedLed, EmulatedLine, EmulatedPhone,
        Gesture, Timeline,
    };

    type TestDecoder = DialDecoder<
        EmulatedLine,
        EmulatedLine,
        EmulatedLine,
        EmulatedLed,
        EmulatedKeyboard,
        EmulatedDelay,
    >;

    /// Large enough for a 40ms break at 10us per read, small enough that a
    /// wiring fault cannot hang the test run.
    const TEST_RELEASE_LIMIT: u32 = 20_000;

    fn test_config() -> DecoderConfig {
        DecoderConfig {
            pulse_release_limit: Some(TEST_RELEASE_LIMIT),
            ..DecoderConfig::default()
        }
    }

    /// Hook line that remembers the level it last reported.
    struct TappedHook {
        line: EmulatedLine,
        last: Rc<Cell<Option<bool>>>,
    }

    impl HookSensor for TappedHook {
        fn read(&mut self) -> bool {
            let off_hook = HookSensor::read(&mut self.line);
            self.last.set(Some(off_hook));
            off_hook
        }
    }

    /// A line that stays wherever the test puts it.
    #[derive(Clone, Default)]
    struct Lever(Rc<Cell<bool>>);

    impl Lever {
        fn set(&self, level: bool) {
            self.0.set(level);
        }
    }

    impl HookSensor for Lever {
        fn read(&mut self) -> bool {
            self.0.get()
        }
    }

    impl DialActiveSensor for Lever {
        fn read(&mut self) -> bool {
            self.0.get()
        }
    }

    impl PulseSensor for Lever {
        fn read(&mut self) -> bool {
            self.0.get()
        }
    }

    struct Rig {
        phone: EmulatedPhone,
        clock: Clock,
        led: EmulatedLed,
        keyboard: EmulatedKeyboard,
        decoder: TestDecoder,
    }

    impl Rig {
        fn new(gestures: &[Gesture]) -> Self {
            Self::with_keyboard(gestures, EmulatedKeyboard::default())
        }

        fn with_keyboard(gestures: &[Gesture], keyboard: EmulatedKeyboard) -> Self {
            let clock = Clock::virtual_time();
            let phone = EmulatedPhone::new(Timeline::from_gestures(gestures).unwrap(), clock.clone());
            let led = EmulatedLed::default();

            let decoder = DialDecoder::new(
                phone.hook_switch(),
                phone.dial_latch(),
                phone.dial_pulse(),
                led.clone(),
                keyboard.clone(),
                EmulatedDelay::new(clock.clone()),
                test_config(),
            );

            Self {
                phone,
                clock,
                led,
                keyboard,
                decoder,
            }
        }

        fn play(&mut self) -> Result<()> {
            let phone = &self.phone;
            self.decoder.run_until(|_| phone.finished())
        }
    }

    fn dialed(gestures: &[Gesture]) -> Vec<u8> {
        let mut rig = Rig::new(gestures);
        rig.play().unwrap();
        rig.keyboard.digits()
    }

    #[test]
    fn lift_and_hang_up_without_dialing() {
        let mut rig = Rig::new(&[
            Gesture::LiftHandset,
            Gesture::Wait { ms: 500 },
            Gesture::Hangup,
        ]);
        rig.play().unwrap();

        assert!(rig.keyboard.digits().is_empty());
        assert_eq!(rig.decoder.phase(), Phase::Idle);
    }

    #[test]
    fn three_pulses_type_three() {
        assert_eq!(
            dialed(&[Gesture::LiftHandset, Gesture::Rotate { pulses: 3 }]),
            vec![3]
        );
    }

    #[test]
    fn ten_pulses_type_zero() {
        assert_eq!(
            dialed(&[Gesture::LiftHandset, Gesture::Rotate { pulses: 10 }]),
            vec![0]
        );
    }

    #[test]
    fn every_pulse_count_maps_to_its_digit() {
        for pulses in 1..=10 {
            assert_eq!(
                dialed(&[Gesture::LiftHandset, Gesture::Rotate { pulses }]),
                vec![pulses % 10],
                "{pulses} pulses"
            );
        }
    }

    #[test]
    fn hanging_up_mid_dial_types_nothing() {
        let mut rig = Rig::new(&[
            Gesture::LiftHandset,
            Gesture::HangupMidDial { pulses: 2 },
        ]);
        rig.play().unwrap();

        assert!(rig.keyboard.digits().is_empty());
        assert_eq!(rig.decoder.phase(), Phase::Idle);
        assert_eq!(rig.decoder.pulse_count(), 0);
        assert!(!rig.led.is_on());
    }

    #[test]
    fn sequential_rotations_type_in_order() {
        assert_eq!(
            dialed(&[
                Gesture::LiftHandset,
                Gesture::Dial { digit: 5 },
                Gesture::Dial { digit: 7 },
            ]),
            vec![5, 7]
        );
    }

    #[test]
    fn counter_resets_between_rotations() {
        let mut rig = Rig::new(&[
            Gesture::LiftHandset,
            Gesture::Dial { digit: 9 },
            Gesture::Dial { digit: 1 },
        ]);

        let keyboard = rig.keyboard.clone();
        rig.decoder
            .run_until(|_| keyboard.digits().len() == 1)
            .unwrap();
        assert_eq!(rig.decoder.phase(), Phase::WaitingForDial);
        assert_eq!(rig.decoder.pulse_count(), 0);

        rig.play().unwrap();
        assert_eq!(rig.keyboard.digits(), vec![9, 1]);
    }

    #[test]
    fn second_lift_without_dialing_types_nothing() {
        assert!(dialed(&[
            Gesture::LiftHandset,
            Gesture::Wait { ms: 300 },
            Gesture::Hangup,
            Gesture::LiftHandset,
            Gesture::Wait { ms: 300 },
            Gesture::Hangup,
        ])
        .is_empty());
    }

    #[test]
    fn led_mirrors_last_hook_sample() {
        let clock = Clock::virtual_time();
        let phone = EmulatedPhone::new(
            Timeline::from_gestures(&[
                Gesture::LiftHandset,
                Gesture::Dial { digit: 2 },
                Gesture::Hangup,
                Gesture::LiftHandset,
                Gesture::HangupMidDial { pulses: 4 },
            ])
            .unwrap(),
            clock.clone(),
        );
        let last_hook = Rc::new(Cell::new(None));
        let led = EmulatedLed::default();

        let mut decoder = DialDecoder::new(
            TappedHook {
                line: phone.hook_switch(),
                last: Rc::clone(&last_hook),
            },
            phone.dial_latch(),
            phone.dial_pulse(),
            led.clone(),
            EmulatedKeyboard::default(),
            EmulatedDelay::new(clock),
            test_config(),
        );

        let mut saw_off_hook = false;
        while !phone.finished() {
            decoder.poll().unwrap();
            if let Some(off_hook) = last_hook.get() {
                assert_eq!(led.is_on(), off_hook);
                saw_off_hook |= off_hook;
            }
        }

        assert!(saw_off_hook);
        assert_eq!(last_hook.get(), Some(false));
        assert!(!led.is_on());
    }

    #[test]
    fn hook_samples_wait_for_the_sample_delay() {
        let mut rig = Rig::new(&[]);
        rig.decoder.poll().unwrap();

        assert_eq!(rig.decoder.phase(), Phase::Idle);
        assert!(rig.clock.now() >= Duration::from_millis(5));
    }

    #[test]
    fn hanging_up_as_the_dial_rests_types_then_idles() {
        let mut rig = Rig::new(&[
            Gesture::LiftHandset,
            Gesture::RotateThenHangup { pulses: 4 },
        ]);

        let mut phases = vec![rig.decoder.phase()];
        while !rig.phone.finished() {
            rig.decoder.poll().unwrap();
            if phases.last() != Some(&rig.decoder.phase()) {
                phases.push(rig.decoder.phase());
            }
        }

        assert_eq!(rig.keyboard.digits(), vec![4]);
        assert_eq!(
            phases,
            vec![
                Phase::Idle,
                Phase::WaitingForDial,
                Phase::Dialing,
                Phase::EmitDigit,
                Phase::Idle,
            ]
        );
        assert_eq!(rig.decoder.dialed_number(), "");
        assert!(!rig.led.is_on());
    }

    #[test]
    fn on_hook_beats_dial_active_while_waiting() {
        let hook = Lever::default();
        let dial = Lever::default();
        let pulse = Lever::default();
        pulse.set(true);
        let keyboard = EmulatedKeyboard::default();
        let led = EmulatedLed::default();

        let mut decoder = DialDecoder::new(
            hook.clone(),
            dial.clone(),
            pulse,
            led.clone(),
            keyboard.clone(),
            EmulatedDelay::new(Clock::virtual_time()),
            test_config(),
        );

        hook.set(true);
        decoder.poll().unwrap();
        assert_eq!(decoder.phase(), Phase::WaitingForDial);

        hook.set(false);
        dial.set(true);
        decoder.poll().unwrap();
        assert_eq!(decoder.phase(), Phase::Idle);

        for _ in 0..10 {
            decoder.poll().unwrap();
            assert_eq!(decoder.phase(), Phase::Idle);
        }
        assert!(keyboard.digits().is_empty());
        assert!(!led.is_on());
    }

    #[test]
    fn dialing_while_hanging_up_never_counts() {
        let mut rig = Rig::new(&[
            Gesture::LiftHandset,
            Gesture::Wait { ms: 300 },
            Gesture::DialOnHook { pulses: 3 },
        ]);

        while !rig.phone.finished() {
            rig.decoder.poll().unwrap();
            assert_ne!(rig.decoder.phase(), Phase::Dialing);
        }

        assert!(rig.keyboard.digits().is_empty());
        assert_eq!(rig.decoder.phase(), Phase::Idle);
    }

    // A latch flick with no pulses would come out as "0" if the count were
    // simply taken modulo ten. It is dropped instead.
    #[test]
    fn rotation_without_pulses_is_dropped() {
        assert!(dialed(&[Gesture::LiftHandset, Gesture::Rotate { pulses: 0 }]).is_empty());
    }

    #[test]
    fn rotation_with_too_many_pulses_is_dropped() {
        assert_eq!(
            dialed(&[
                Gesture::LiftHandset,
                Gesture::Rotate { pulses: 11 },
                Gesture::Dial { digit: 1 },
            ]),
            vec![1]
        );
    }

    #[test]
    fn stuck_pulse_line_drops_only_that_rotation() {
        assert_eq!(
            dialed(&[
                Gesture::LiftHandset,
                Gesture::JamPulse { ms: 1_000 },
                Gesture::Dial { digit: 3 },
            ]),
            vec![3]
        );
    }

    #[test]
    fn dialed_number_clears_on_hang_up() {
        let mut rig = Rig::new(&[
            Gesture::LiftHandset,
            Gesture::Dial { digit: 4 },
            Gesture::Dial { digit: 2 },
            Gesture::Hangup,
        ]);

        rig.decoder
            .run_until(|decoder| decoder.dialed_number() == "42")
            .unwrap();
        assert_eq!(rig.keyboard.typed(), "42");

        rig.play().unwrap();
        assert_eq!(rig.decoder.dialed_number(), "");
        assert_eq!(rig.decoder.phase(), Phase::Idle);
    }

    #[test]
    fn keyboard_failure_stops_the_loop() {
        let mut rig = Rig::with_keyboard(
            &[Gesture::LiftHandset, Gesture::Dial { digit: 6 }],
            EmulatedKeyboard::unplugged(),
        );

        assert!(rig.decoder.run().is_err());
        assert_eq!(rig.decoder.phase(), Phase::EmitDigit);
    }
}
