//! Gear model as reported by the engine computer.

use core::fmt;

use portable_atomic::{AtomicU8, AtomicU16, Ordering};

/// Wire code used for the neutral position.
pub const NEUTRAL_CODE: u8 = 0;
/// Wire code reported when the gear-position sensor reading is invalid.
pub const UNKNOWN_CODE: u8 = 11;
/// Engine speed assumed until the engine computer reports one.
pub const INITIAL_REVS: u16 = 1000;

/// Gearbox position.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Gear {
    Neutral,
    First,
    Second,
    Third,
    Fourth,
    Fifth,
    /// Sensor reading outside every band, or the engine computer is silent.
    Unknown,
}

impl Gear {
    pub const fn code(self) -> u8 {
        match self {
            Gear::Neutral => NEUTRAL_CODE,
            Gear::First => 1,
            Gear::Second => 2,
            Gear::Third => 3,
            Gear::Fourth => 4,
            Gear::Fifth => 5,
            Gear::Unknown => UNKNOWN_CODE,
        }
    }

    /// Decodes a wire code. Anything unrecognised is treated as `Unknown`.
    pub const fn from_code(code: u8) -> Self {
        match code {
            NEUTRAL_CODE => Gear::Neutral,
            1 => Gear::First,
            2 => Gear::Second,
            3 => Gear::Third,
            4 => Gear::Fourth,
            5 => Gear::Fifth,
            _ => Gear::Unknown,
        }
    }
}

impl fmt::Display for Gear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Gear::Neutral => f.write_str("N"),
            Gear::Unknown => f.write_str("?"),
            other => write!(f, "{}", other.code()),
        }
    }
}

/// Gear a neutral attempt started from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Approach {
    /// Up-solenoid pulse out of first.
    FromFirst,
    /// Down-solenoid pulse out of second.
    FromSecond,
}

impl Approach {
    /// Approach used from `gear`, if a neutral attempt is possible there.
    pub const fn from_gear(gear: Gear) -> Option<Self> {
        match gear {
            Gear::First => Some(Approach::FromFirst),
            Gear::Second => Some(Approach::FromSecond),
            _ => None,
        }
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Approach::FromFirst => f.write_str("from-1"),
            Approach::FromSecond => f.write_str("from-2"),
        }
    }
}

/// Voltage bands of the gear-position potentiometer, bounds exclusive.
const POT_BANDS: [(u16, u16, Gear); 6] = [
    (700, 900, Gear::First),
    (1100, 1500, Gear::Neutral),
    (1600, 1850, Gear::Second),
    (2450, 2700, Gear::Third),
    (3400, 3600, Gear::Fourth),
    (4350, 4600, Gear::Fifth),
];

/// Maps the raw gear-position sensor value forwarded by the engine computer.
pub fn gear_from_pot(raw: u16) -> Gear {
    POT_BANDS
        .iter()
        .find(|(low, high, _)| raw > *low && raw < *high)
        .map_or(Gear::Unknown, |(_, _, gear)| *gear)
}

/// Current gear and engine speed shared between the CAN receive path, the
/// failsafe monitor and the sequencer.
#[derive(Debug)]
pub struct GearState {
    gear: AtomicU8,
    revs: AtomicU16,
}

impl GearState {
    pub const fn new() -> Self {
        Self {
            gear: AtomicU8::new(UNKNOWN_CODE),
            revs: AtomicU16::new(INITIAL_REVS),
        }
    }

    pub fn gear(&self) -> Gear {
        Gear::from_code(self.gear.load(Ordering::Relaxed))
    }

    pub fn set_gear(&self, gear: Gear) {
        self.gear.store(gear.code(), Ordering::Relaxed);
    }

    pub fn revs(&self) -> u16 {
        self.revs.load(Ordering::Relaxed)
    }

    pub fn set_revs(&self, revs: u16) {
        self.revs.store(revs, Ordering::Relaxed);
    }
}

impl Default for GearState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pot_bands_map_to_gears() {
        assert_eq!(gear_from_pot(791), Gear::First);
        assert_eq!(gear_from_pot(1296), Gear::Neutral);
        assert_eq!(gear_from_pot(1730), Gear::Second);
        assert_eq!(gear_from_pot(2587), Gear::Third);
        assert_eq!(gear_from_pot(3500), Gear::Fourth);
        assert_eq!(gear_from_pot(4453), Gear::Fifth);
    }

    #[test]
    fn band_edges_and_gaps_are_unknown() {
        for raw in [0, 700, 900, 1000, 1100, 1500, 1850, 3000, 4600, u16::MAX] {
            assert_eq!(gear_from_pot(raw), Gear::Unknown, "raw {raw}");
        }
    }

    #[test]
    fn codes_round_trip_and_unrecognised_codes_are_unknown() {
        for gear in [
            Gear::Neutral,
            Gear::First,
            Gear::Second,
            Gear::Third,
            Gear::Fourth,
            Gear::Fifth,
            Gear::Unknown,
        ] {
            assert_eq!(Gear::from_code(gear.code()), gear);
        }
        assert_eq!(Gear::from_code(7), Gear::Unknown);
    }

    #[test]
    fn state_starts_unknown() {
        let state = GearState::new();
        assert_eq!(state.gear(), Gear::Unknown);
        assert_eq!(state.revs(), INITIAL_REVS);
        state.set_gear(Gear::Second);
        assert_eq!(state.gear(), Gear::Second);
    }
}
