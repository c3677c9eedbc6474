//! Blink pattern state machine.
//!
//! [`step`] is a pure transition `(state, event) -> state`. Timers and the
//! network only produce [`BlinkEvent`]s; `driver` owns the clock. Control
//! messages carry gauge-like values, so applying the same one twice leaves
//! the state where applying it once did.

use flotilla_common::{ControlEvent, NodeConf};
use rand::Rng;
use std::ops::RangeInclusive;

pub const MIN_INTERVAL_MS: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkState {
    /// Video on/off (master pad).
    pub master_enabled: bool,
    /// Whether blinking is wanted at all (knob above zero).
    pub blink_enabled: bool,
    pub visible: bool,
    pub interval_ms: u32,
    /// Toggle timer running. Suspended by the master pad and by the `off` pattern.
    pub toggle_armed: bool,
}

impl BlinkState {
    pub fn initial(interval_ms: u32) -> Self {
        Self {
            master_enabled: true,
            blink_enabled: true,
            visible: true,
            interval_ms: interval_ms.max(MIN_INTERVAL_MS),
            toggle_armed: true,
        }
    }

    fn animating(&self) -> bool {
        self.blink_enabled && self.master_enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Fast,
    Medium,
    Slow,
    Off,
}

impl Pattern {
    pub const ALL: [Pattern; 4] = [Pattern::Fast, Pattern::Medium, Pattern::Slow, Pattern::Off];

    pub fn interval_range(self) -> Option<RangeInclusive<u32>> {
        match self {
            Pattern::Fast => Some(50..=150),
            Pattern::Medium => Some(200..=400),
            Pattern::Slow => Some(500..=1000),
            Pattern::Off => None,
        }
    }
}

/// Outcome of one randomization draw, made by the caller so that `step` stays pure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternDraw {
    pub pattern: Pattern,
    /// `None` for [`Pattern::Off`].
    pub interval_ms: Option<u32>,
}

impl PatternDraw {
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let pattern = Pattern::ALL[rng.gen_range(0..Pattern::ALL.len())];
        let interval_ms = pattern.interval_range().map(|r| rng.gen_range(r));
        Self { pattern, interval_ms }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkEvent {
    Toggle,
    Control(ControlEvent),
    Randomize(PatternDraw),
}

/// Which knob and pad drive this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlMapping {
    pub blink_controller: u8,
    pub master_note: u8,
}

impl From<&NodeConf> for ControlMapping {
    fn from(conf: &NodeConf) -> Self {
        Self { blink_controller: conf.blink_controller, master_note: conf.master_note }
    }
}

/// Interval for a knob value: `round(500 - 3.5 * value)`, never below 50 ms.
pub fn knob_interval_ms(value: u8) -> u32 {
    let raw = (500.0 - 3.5 * f64::from(value)).round();
    if raw <= f64::from(MIN_INTERVAL_MS) {
        MIN_INTERVAL_MS
    } else {
        raw as u32
    }
}

pub fn step(state: BlinkState, event: &BlinkEvent, mapping: &ControlMapping) -> BlinkState {
    let mut next = state;
    match event {
        BlinkEvent::Toggle => {
            if next.toggle_armed && next.animating() {
                next.visible = !next.visible;
            }
        }

        BlinkEvent::Control(ControlEvent::ControlChange(cc)) if cc.controller == mapping.blink_controller => {
            if cc.value == 0 {
                next.blink_enabled = false;
                next.visible = true;
                next.toggle_armed = false;
            } else {
                next.blink_enabled = true;
                next.interval_ms = knob_interval_ms(cc.value);
                next.toggle_armed = true;
            }
        }

        // Velocity 0 is a release on devices that never send note-off.
        BlinkEvent::Control(ControlEvent::NoteOn(note))
            if note.note == mapping.master_note && note.velocity > 0 =>
        {
            next.master_enabled = !next.master_enabled;
            if next.master_enabled {
                next.visible = true;
                next.toggle_armed = next.blink_enabled;
            } else {
                next.visible = false;
                next.toggle_armed = false;
            }
        }

        BlinkEvent::Control(_) => {}

        BlinkEvent::Randomize(draw) => {
            if next.animating() {
                match draw.interval_ms {
                    Some(interval) => {
                        next.interval_ms = interval.max(MIN_INTERVAL_MS);
                        next.toggle_armed = true;
                    }
                    None => {
                        next.toggle_armed = false;
                        next.visible = true;
                    }
                }
            }
        }
    }
    next
}
