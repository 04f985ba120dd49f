//! Simulated sequential gearbox and its gear-position sensor.
//!
//! The box follows the usual 1-N-2-3-4-5 pattern. A solenoid pulse shorter
//! than the engagement time does nothing. Between first and second, a pulse
//! whose length falls inside the neutral window only travels half way and the
//! box settles in neutral.

use std::fmt;

use gearbox_core::Ticks;
use gearbox_core::gear::Gear;

/// Direction of a solenoid pulse.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Stroke {
    Up,
    Down,
}

/// Inclusive range of pulse lengths that stop the drum in neutral.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NeutralWindow {
    pub low: Ticks,
    pub high: Ticks,
}

impl NeutralWindow {
    pub const fn new(low: Ticks, high: Ticks) -> Self {
        Self { low, high }
    }

    fn contains(&self, length: Ticks) -> bool {
        (self.low.as_u16()..=self.high.as_u16()).contains(&length.as_u16())
    }
}

impl fmt::Display for NeutralWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.low.as_u16(), self.high.as_u16())
    }
}

pub const DEFAULT_NEUTRAL_WINDOW: NeutralWindow = NeutralWindow::new(Ticks::new(230), Ticks::new(300));
/// Shortest pulse that completes a full shift.
pub const DEFAULT_ENGAGEMENT: Ticks = Ticks::new(300);

#[derive(Clone, Debug)]
pub struct GearboxModel {
    gear: Gear,
    window: NeutralWindow,
    engagement: Ticks,
}

impl GearboxModel {
    pub fn new(gear: Gear) -> Self {
        Self {
            gear,
            window: DEFAULT_NEUTRAL_WINDOW,
            engagement: DEFAULT_ENGAGEMENT,
        }
    }

    pub fn gear(&self) -> Gear {
        self.gear
    }

    pub fn window(&self) -> NeutralWindow {
        self.window
    }

    pub fn set_window(&mut self, window: NeutralWindow) {
        self.window = window;
    }

    /// Applies one solenoid pulse and returns the gear it left the box in.
    pub fn pulse(&mut self, stroke: Stroke, length: Ticks) -> Gear {
        let half_shift = matches!(
            (self.gear, stroke),
            (Gear::First, Stroke::Up) | (Gear::Second, Stroke::Down)
        );
        if half_shift && length < self.window.low {
            return self.gear;
        }
        if half_shift && self.window.contains(length) {
            self.gear = Gear::Neutral;
            return self.gear;
        }
        if !half_shift && length < self.engagement {
            return self.gear;
        }

        self.gear = match (self.gear, stroke) {
            (Gear::Neutral, Stroke::Up) | (Gear::First, Stroke::Up) => Gear::Second,
            (Gear::Neutral, Stroke::Down) | (Gear::Second, Stroke::Down) => Gear::First,
            (Gear::Second, Stroke::Up) => Gear::Third,
            (Gear::Third, Stroke::Up) => Gear::Fourth,
            (Gear::Fourth, Stroke::Up) | (Gear::Fifth, Stroke::Up) => Gear::Fifth,
            (Gear::Third, Stroke::Down) => Gear::Second,
            (Gear::Fourth, Stroke::Down) => Gear::Third,
            (Gear::Fifth, Stroke::Down) => Gear::Fourth,
            (Gear::First, Stroke::Down) => Gear::First,
            (Gear::Unknown, _) => Gear::Unknown,
        };
        self.gear
    }

    /// Raw sensor reading for the current gear, centred in its band.
    pub fn pot_reading(&self) -> u16 {
        match self.gear {
            Gear::First => 800,
            Gear::Neutral => 1300,
            Gear::Second => 1725,
            Gear::Third => 2575,
            Gear::Fourth => 3500,
            Gear::Fifth => 4475,
            // between the third and fourth bands
            Gear::Unknown => 3000,
        }
    }
}
