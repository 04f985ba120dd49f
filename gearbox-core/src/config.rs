//! Per-node parameter sets.
//!
//! Every physical node runs the same sequencing and clutch code with its own
//! delay tables, calibration points and filter constants. The presets below
//! capture the values each car was tuned with; none of them are derived from
//! one another.

use core::fmt;

use crate::Ticks;
use crate::gear::Gear;
use crate::hal::ReceiverFilter;

/// Solenoid and shift-cut timings used by the gear sequencer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ShiftTimings {
    /// Shift-cut lead time indexed by departing gear, first through fourth.
    pub shift_cut: [Ticks; 4],
    /// Shift-cut lead time when the departing gear is not in the table.
    pub shift_cut_fallback: Ticks,
    pub gear_up: Ticks,
    /// Extra up-solenoid time when leaving first, for the longer travel.
    pub gear_up_first_bonus: Ticks,
    pub gear_up_from_neutral: Ticks,
    pub gear_down: Ticks,
    /// Extra down-solenoid time when leaving second.
    pub gear_down_second_bonus: Ticks,
    pub gear_down_from_neutral: Ticks,
    /// Length of the launch-control request pulse.
    pub launch_pulse: Ticks,
}

impl ShiftTimings {
    /// Shift-cut lead time before the up-solenoid fires.
    pub const fn shift_cut_for(&self, gear: Gear) -> Ticks {
        match gear {
            Gear::First => self.shift_cut[0],
            Gear::Second => self.shift_cut[1],
            Gear::Third => self.shift_cut[2],
            Gear::Fourth => self.shift_cut[3],
            _ => self.shift_cut_fallback,
        }
    }

    /// Up-solenoid pulse length when leaving `gear`.
    pub const fn gear_up_for(&self, gear: Gear) -> Ticks {
        match gear {
            Gear::Neutral => self.gear_up_from_neutral,
            Gear::First => self.gear_up.saturating_add(self.gear_up_first_bonus),
            _ => self.gear_up,
        }
    }

    /// Down-solenoid pulse length when leaving `gear`.
    pub const fn gear_down_for(&self, gear: Gear) -> Ticks {
        match gear {
            Gear::Neutral => self.gear_down_from_neutral,
            Gear::Second => self.gear_down.saturating_add(self.gear_down_second_bonus),
            _ => self.gear_down,
        }
    }
}

/// Neutral search flavour used for repeated attempts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SearchStrategy {
    /// Nudge the try-time by a fixed step after each miss.
    Linear,
    /// Halve the interval of plausible try-times after each miss.
    Bisection,
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchStrategy::Linear => f.write_str("linear"),
            SearchStrategy::Bisection => f.write_str("bisect"),
        }
    }
}

/// Neutral finder parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NeutralConfig {
    /// Initial up-solenoid pulse used from first gear.
    pub try_up: Ticks,
    /// Initial down-solenoid pulse used from second gear.
    pub try_down: Ticks,
    pub adjust_step: Ticks,
    /// Settling time for the gear-position sensor after each pulse.
    pub stabilisation: Ticks,
    pub repeat_limit: u8,
    pub bounds_low: Ticks,
    pub bounds_high: Ticks,
    pub strategy: SearchStrategy,
}

/// Calibration error raised when clutch positions are out of order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationError {
    /// `closed < break_closed <= break_open < open` does not hold.
    PositionsNotIncreasing,
    FilterFactorOutOfRange,
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::PositionsNotIncreasing => {
                f.write_str("clutch calibration positions must increase")
            }
            CalibrationError::FilterFactorOutOfRange => {
                f.write_str("clutch filter factor must lie in (0, 1]")
            }
        }
    }
}

/// Position-to-duty calibration of one clutch paddle.
///
/// Positions are raw ADC counts, duty values are servo timer compare values.
/// A table with a single break point uses the same position and duty for both
/// `break_*` entries, which collapses the middle segment.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClutchCalibration {
    pub closed: f32,
    pub break_closed: f32,
    pub break_open: f32,
    pub open: f32,
    pub dc_closed: f32,
    pub dc_break_closed: f32,
    pub dc_break_open: f32,
    pub dc_open: f32,
}

impl ClutchCalibration {
    /// Four-point calibration with two break points.
    pub const fn new(positions: [f32; 4], duties: [f32; 4]) -> Self {
        Self {
            closed: positions[0],
            break_closed: positions[1],
            break_open: positions[2],
            open: positions[3],
            dc_closed: duties[0],
            dc_break_closed: duties[1],
            dc_break_open: duties[2],
            dc_open: duties[3],
        }
    }

    /// Three-point calibration with a single break point.
    pub const fn single_break(positions: [f32; 3], duties: [f32; 3]) -> Self {
        Self::new(
            [positions[0], positions[1], positions[1], positions[2]],
            [duties[0], duties[1], duties[1], duties[2]],
        )
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        let ordered = self.closed < self.break_closed
            && self.break_closed <= self.break_open
            && self.break_open < self.open;
        if ordered {
            Ok(())
        } else {
            Err(CalibrationError::PositionsNotIncreasing)
        }
    }
}

/// How the servo target is chosen from the two paddle duties.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SelectPolicy {
    Minimum,
    Maximum,
}

/// Clutch actuator parameters.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClutchConfig {
    pub left: ClutchCalibration,
    pub right: ClutchCalibration,
    /// Weight of the newest sample in the first-order filter.
    pub filter_factor: f32,
    pub select: SelectPolicy,
}

impl ClutchConfig {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        self.left.validate()?;
        self.right.validate()?;
        if self.filter_factor > 0.0 && self.filter_factor <= 1.0 {
            Ok(())
        } else {
            Err(CalibrationError::FilterFactorOutOfRange)
        }
    }
}

/// When a still-healthy peer's receiver gets re-armed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RearmPolicy {
    /// Once per silent stretch, when the counter hits the re-arm threshold.
    Once,
    /// On every tick after the counter passes the re-arm threshold.
    Repeated,
}

/// Peer silence detection parameters, in scheduler ticks (100 Hz).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct FailsafeConfig {
    pub trip_threshold: u8,
    pub rearm_threshold: u8,
    pub rearm_policy: RearmPolicy,
    /// Engine speed reported once the engine computer is declared silent.
    pub fallback_revs: u16,
}

/// Brake light hysteresis on the brake pressure reading.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BrakeConfig {
    pub on_above: u16,
    pub off_below: u16,
}

/// CAN identifiers consumed and produced by the rear node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CanIds {
    /// Gear, clutch and launch commands from the mid node.
    pub commands: ReceiverFilter,
    pub gear: u32,
    pub clutch: u32,
    pub launch: u32,
    /// Brake pressure from the front node.
    pub brake: ReceiverFilter,
    /// Engine computer broadcast.
    pub dta: ReceiverFilter,
    pub dta_revs: u32,
    pub dta_gear_pot: u32,
    pub log_wheel_speed: u32,
    pub log_suspension: u32,
    pub log_neutral: u32,
    pub log_clutch_filtered: u32,
    pub log_duty_cycle: u32,
    pub log_current_gear: u32,
}

/// Complete parameter set of one node.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NodeConfig {
    pub name: &'static str,
    pub shift: ShiftTimings,
    pub neutral: NeutralConfig,
    pub clutch: ClutchConfig,
    pub failsafe: FailsafeConfig,
    pub brake: BrakeConfig,
    pub can: CanIds,
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        self.clutch.validate()
    }
}

pub const LUR7_CAN_IDS: CanIds = CanIds {
    commands: ReceiverFilter::new(0x1500, 0xFFFF_FFFC, 4),
    gear: 0x1500,
    clutch: 0x1501,
    launch: 0x1502,
    brake: ReceiverFilter::new(0x4002, 0xFFFF_FFFF, 4),
    // wide enough for the gear-position frame at 0x2004
    dta: ReceiverFilter::new(0x2000, 0xFFFF_FFF8, 8),
    dta_revs: 0x2000,
    dta_gear_pot: 0x2004,
    log_wheel_speed: 0x4500,
    log_suspension: 0x4501,
    log_neutral: 0x4502,
    log_clutch_filtered: 0x4503,
    log_duty_cycle: 0x4504,
    log_current_gear: 0x9876,
};

pub const STANDARD_FAILSAFE: FailsafeConfig = FailsafeConfig {
    trip_threshold: 100,
    rearm_threshold: 20,
    rearm_policy: RearmPolicy::Once,
    fallback_revs: 13_000,
};

pub const STANDARD_BRAKE: BrakeConfig = BrakeConfig {
    on_above: 100,
    off_below: 80,
};

const LUR7_REAR_CLUTCH_SIDE: ClutchCalibration =
    ClutchCalibration::single_break([360.0, 460.0, 485.0], [13_000.0, 9_500.0, 4_500.0]);

/// LUR7 rear node.
pub const REAR_NODE: NodeConfig = NodeConfig {
    name: "lur7-rear",
    shift: ShiftTimings {
        shift_cut: [Ticks::new(300); 4],
        shift_cut_fallback: Ticks::new(300),
        gear_up: Ticks::new(400),
        gear_up_first_bonus: Ticks::new(400),
        gear_up_from_neutral: Ticks::new(800),
        gear_down: Ticks::new(400),
        gear_down_second_bonus: Ticks::new(400),
        gear_down_from_neutral: Ticks::new(770),
        launch_pulse: Ticks::new(500),
    },
    neutral: NeutralConfig {
        try_up: Ticks::new(200),
        try_down: Ticks::new(250),
        adjust_step: Ticks::new(20),
        stabilisation: Ticks::new(10_000),
        repeat_limit: 10,
        bounds_low: Ticks::new(300),
        bounds_high: Ticks::new(700),
        strategy: SearchStrategy::Linear,
    },
    clutch: ClutchConfig {
        left: LUR7_REAR_CLUTCH_SIDE,
        right: LUR7_REAR_CLUTCH_SIDE,
        filter_factor: 0.1,
        select: SelectPolicy::Minimum,
    },
    failsafe: STANDARD_FAILSAFE,
    brake: STANDARD_BRAKE,
    can: LUR7_CAN_IDS,
};

const LUR6_REAR_CLUTCH_SIDE: ClutchCalibration = ClutchCalibration::new(
    [360.0, 410.0, 460.0, 485.0],
    [13_000.0, 9_000.0, 7_000.0, 3_000.0],
);

/// LUR6 rear node: flat shift-cut and long solenoid pulses.
pub const REAR_NODE_LUR6: NodeConfig = NodeConfig {
    name: "lur6-rear",
    shift: ShiftTimings {
        shift_cut: [Ticks::new(200); 4],
        shift_cut_fallback: Ticks::new(200),
        gear_up: Ticks::new(1000),
        gear_up_first_bonus: Ticks::new(150),
        gear_up_from_neutral: Ticks::new(1000),
        gear_down: Ticks::new(1000),
        gear_down_second_bonus: Ticks::new(150),
        gear_down_from_neutral: Ticks::new(1000),
        launch_pulse: Ticks::new(500),
    },
    neutral: NeutralConfig {
        try_up: Ticks::new(500),
        try_down: Ticks::new(500),
        adjust_step: Ticks::new(50),
        stabilisation: Ticks::new(10_000),
        repeat_limit: 10,
        bounds_low: Ticks::new(300),
        bounds_high: Ticks::new(700),
        strategy: SearchStrategy::Linear,
    },
    clutch: ClutchConfig {
        left: LUR6_REAR_CLUTCH_SIDE,
        right: LUR6_REAR_CLUTCH_SIDE,
        filter_factor: 0.1,
        select: SelectPolicy::Minimum,
    },
    failsafe: STANDARD_FAILSAFE,
    brake: STANDARD_BRAKE,
    can: LUR7_CAN_IDS,
};

const MID_CLUTCH_SIDE: ClutchCalibration = ClutchCalibration::new(
    [360.0, 410.0, 460.0, 485.0],
    [3_000.0, 7_000.0, 9_000.0, 13_000.0],
);

/// Clutch calibration of the mid node variant that drives the servo itself.
/// Its duty rises with paddle travel, so the larger of the two sides wins.
pub const MID_NODE_CLUTCH: ClutchConfig = ClutchConfig {
    left: MID_CLUTCH_SIDE,
    right: MID_CLUTCH_SIDE,
    filter_factor: 0.05,
    select: SelectPolicy::Maximum,
};
