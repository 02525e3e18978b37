//! A scripted rotary phone.
//!
//! A scenario of [`Gesture`]s is compiled into a [`Timeline`] of line levels
//! using the timing of a real dial mechanism. The lines are then sampled
//! against a [`Clock`], which is either wall time (the emulator binary) or a
//! virtual time that only moves when the decoder reads or sleeps (tests).

use std::{
    cell::{Cell, RefCell},
    fs,
    path::Path,
    rc::Rc,
    thread,
    time::{Duration, Instant},
};

use anyhow::{bail, Context, Result};
use embedded_hal::delay::DelayNs;
use serde::{Deserialize, Serialize};

use crate::{
    digit::Digit,
    hardware::{DialActiveSensor, HookSensor, KeystrokeSink, PulseSensor, StatusIndicator},
    hid,
};

/// Loop break per pulse.
pub const BREAK_TIME: Duration = Duration::from_millis(40);
/// Loop make between pulses.
pub const MAKE_TIME: Duration = Duration::from_millis(60);
/// Finger pulling the dial round before letting go.
pub const WIND_UP_TIME: Duration = Duration::from_millis(300);
pub const INTER_DIGIT_TIME: Duration = Duration::from_millis(400);
pub const HOOK_SETTLE_TIME: Duration = Duration::from_millis(200);

/// Virtual cost of one pin read.
const READ_COST: Duration = Duration::from_micros(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Gesture {
    LiftHandset,
    Hangup,
    Wait { ms: u64 },
    Dial { digit: u8 },
    /// A full rotation sending exactly `pulses` pulses, valid or not.
    Rotate { pulses: u8 },
    /// Hang up after `pulses` pulses while the dial is still turning.
    HangupMidDial { pulses: u8 },
    /// Hang up at the moment the dial comes back to rest.
    RotateThenHangup { pulses: u8 },
    /// Hang up and start turning the dial at the same moment.
    DialOnHook { pulses: u8 },
    /// The pulse contact sticks open for `ms` during a rotation.
    JamPulse { ms: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Levels {
    pub off_hook: bool,
    pub dial_active: bool,
    pub pulse: bool,
}

impl Levels {
    pub const REST: Levels = Levels {
        off_hook: false,
        dial_active: false,
        pulse: true,
    };
}

#[derive(Debug, Clone)]
pub struct Timeline {
    changes: Vec<(Duration, Levels)>,
    end: Duration,
}

impl Timeline {
    pub fn from_gestures(gestures: &[Gesture]) -> Result<Self> {
        let mut builder = TimelineBuilder::new();

        for gesture in gestures {
            match *gesture {
                Gesture::LiftHandset => {
                    builder.update(|l| l.off_hook = true);
                    builder.hold(HOOK_SETTLE_TIME);
                }
                Gesture::Hangup => {
                    builder.update(|l| l.off_hook = false);
                    builder.hold(HOOK_SETTLE_TIME);
                }
                Gesture::Wait { ms } => builder.hold(Duration::from_millis(ms)),
                Gesture::Dial { digit } => {
                    let Some(digit) = Digit::new(digit) else {
                        bail!("cannot dial {digit}, the dial only has 0 to 9");
                    };
                    builder.rotate(digit.pulses());
                }
                Gesture::Rotate { pulses } => builder.rotate(pulses),
                Gesture::HangupMidDial { pulses } => {
                    builder.wind_up();
                    builder.pulses(pulses);
                    builder.update(|l| l.off_hook = false);
                    builder.hold(MAKE_TIME + BREAK_TIME);
                    builder.update(|l| l.dial_active = false);
                    builder.hold(HOOK_SETTLE_TIME);
                }
                Gesture::RotateThenHangup { pulses } => {
                    builder.wind_up();
                    builder.pulses(pulses);
                    builder.update(|l| {
                        l.dial_active = false;
                        l.off_hook = false;
                    });
                    builder.hold(HOOK_SETTLE_TIME);
                }
                Gesture::DialOnHook { pulses } => {
                    builder.update(|l| l.off_hook = false);
                    builder.rotate(pulses);
                }
                Gesture::JamPulse { ms } => {
                    builder.wind_up();
                    builder.update(|l| l.pulse = false);
                    builder.hold(Duration::from_millis(ms));
                    builder.update(|l| l.pulse = true);
                    builder.hold(MAKE_TIME);
                    builder.update(|l| l.dial_active = false);
                    builder.hold(INTER_DIGIT_TIME);
                }
            }
        }

        Ok(builder.finish())
    }

    pub fn levels_at(&self, at: Duration) -> Levels {
        let idx = self.changes.partition_point(|(start, _)| *start <= at);
        idx.checked_sub(1)
            .map(|i| self.changes[i].1)
            .unwrap_or(Levels::REST)
    }

    pub fn end(&self) -> Duration {
        self.end
    }
}

struct TimelineBuilder {
    now: Duration,
    levels: Levels,
    changes: Vec<(Duration, Levels)>,
}

impl TimelineBuilder {
    fn new() -> Self {
        Self {
            now: Duration::ZERO,
            levels: Levels::REST,
            changes: vec![(Duration::ZERO, Levels::REST)],
        }
    }

    fn update(&mut self, change: impl FnOnce(&mut Levels)) {
        change(&mut self.levels);

        // Several updates at the same instant collapse into one change.
        if let Some((start, levels)) = self.changes.last_mut() {
            if *start == self.now {
                *levels = self.levels;
                return;
            }
        }
        self.changes.push((self.now, self.levels));
    }

    fn hold(&mut self, duration: Duration) {
        self.now += duration;
    }

    fn wind_up(&mut self) {
        self.update(|l| l.dial_active = true);
        self.hold(WIND_UP_TIME);
    }

    fn pulses(&mut self, count: u8) {
        for _ in 0..count {
            self.update(|l| l.pulse = false);
            self.hold(BREAK_TIME);
            self.update(|l| l.pulse = true);
            self.hold(MAKE_TIME);
        }
    }

    fn rotate(&mut self, pulses: u8) {
        self.wind_up();
        self.pulses(pulses);
        self.update(|l| l.dial_active = false);
        self.hold(INTER_DIGIT_TIME);
    }

    fn finish(self) -> Timeline {
        Timeline {
            changes: self.changes,
            end: self.now,
        }
    }
}

pub fn load_scenario(path: &Path) -> Result<Vec<Gesture>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
}

/// Dials 555 0123 and hangs up.
pub fn demo_scenario() -> Vec<Gesture> {
    let mut gestures = vec![Gesture::LiftHandset, Gesture::Wait { ms: 500 }];
    gestures.extend([5, 5, 5, 0, 1, 2, 3].map(|digit| Gesture::Dial { digit }));
    gestures.push(Gesture::Hangup);
    gestures
}

#[derive(Debug, Clone)]
pub enum Clock {
    Virtual(Rc<Cell<Duration>>),
    Wall(Instant),
}

impl Clock {
    pub fn virtual_time() -> Self {
        Clock::Virtual(Rc::new(Cell::new(Duration::ZERO)))
    }

    pub fn wall() -> Self {
        Clock::Wall(Instant::now())
    }

    pub fn now(&self) -> Duration {
        match self {
            Clock::Virtual(now) => now.get(),
            Clock::Wall(start) => start.elapsed(),
        }
    }

    pub fn sleep(&self, duration: Duration) {
        match self {
            Clock::Virtual(now) => now.set(now.get() + duration),
            Clock::Wall(_) => thread::sleep(duration),
        }
    }

    fn read_latency(&self) {
        if let Clock::Virtual(now) = self {
            now.set(now.get() + READ_COST);
        }
    }
}

pub struct EmulatedDelay {
    clock: Clock,
}

impl EmulatedDelay {
    pub fn new(clock: Clock) -> Self {
        Self { clock }
    }
}

impl DelayNs for EmulatedDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.clock.sleep(Duration::from_nanos(ns.into()));
    }
}

pub struct EmulatedPhone {
    timeline: Rc<Timeline>,
    clock: Clock,
}

impl EmulatedPhone {
    pub fn new(timeline: Timeline, clock: Clock) -> Self {
        Self {
            timeline: Rc::new(timeline),
            clock,
        }
    }

    pub fn hook_switch(&self) -> EmulatedLine {
        self.line(|l| l.off_hook)
    }

    pub fn dial_latch(&self) -> EmulatedLine {
        self.line(|l| l.dial_active)
    }

    pub fn dial_pulse(&self) -> EmulatedLine {
        self.line(|l| l.pulse)
    }

    /// True once the scenario has played out.
    pub fn finished(&self) -> bool {
        self.clock.now() >= self.timeline.end()
    }

    fn line(&self, select: fn(&Levels) -> bool) -> EmulatedLine {
        EmulatedLine {
            timeline: Rc::clone(&self.timeline),
            clock: self.clock.clone(),
            select,
        }
    }
}

/// One input line of an [`EmulatedPhone`].
pub struct EmulatedLine {
    timeline: Rc<Timeline>,
    clock: Clock,
    select: fn(&Levels) -> bool,
}

impl EmulatedLine {
    fn sample(&mut self) -> bool {
        self.clock.read_latency();
        (self.select)(&self.timeline.levels_at(self.clock.now()))
    }
}

impl HookSensor for EmulatedLine {
    fn read(&mut self) -> bool {
        self.sample()
    }
}

impl DialActiveSensor for EmulatedLine {
    fn read(&mut self) -> bool {
        self.sample()
    }
}

impl PulseSensor for EmulatedLine {
    fn read(&mut self) -> bool {
        self.sample()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmulatedLed {
    on: Rc<Cell<bool>>,
    writes: Rc<Cell<usize>>,
}

impl EmulatedLed {
    pub fn is_on(&self) -> bool {
        self.on.get()
    }

    pub fn writes(&self) -> usize {
        self.writes.get()
    }
}

impl StatusIndicator for EmulatedLed {
    fn set(&mut self, on: bool) {
        self.on.set(on);
        self.writes.set(self.writes.get() + 1);
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmulatedKeyboard {
    digits: Rc<RefCell<Vec<Digit>>>,
    unplugged: bool,
}

impl EmulatedKeyboard {
    /// A keyboard whose host has gone away; every keystroke fails.
    pub fn unplugged() -> Self {
        Self {
            unplugged: true,
            ..Self::default()
        }
    }

    pub fn digits(&self) -> Vec<u8> {
        self.digits.borrow().iter().map(|d| d.value()).collect()
    }

    pub fn typed(&self) -> String {
        self.digits.borrow().iter().map(|d| d.as_char()).collect()
    }
}

impl KeystrokeSink for EmulatedKeyboard {
    fn press_and_release(&mut self, digit: Digit) -> Result<()> {
        if self.unplugged {
            bail!("keyboard host is not connected");
        }

        for report in hid::keystroke(digit) {
            log::debug!("HID report {:02X?}", report.to_bytes());
        }
        self.digits.borrow_mut().push(digit);

        Ok(())
    }
}
