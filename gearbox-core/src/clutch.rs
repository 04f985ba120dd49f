//! Clutch paddle filtering and servo duty mapping.
//!
//! Each paddle sample passes through a first-order filter and a three-segment
//! piecewise-linear curve. The servo follows whichever side the node's
//! selection policy prefers.

use crate::config::{CalibrationError, ClutchCalibration, ClutchConfig, SelectPolicy};

/// First-order IIR filter over raw paddle positions.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClutchFilter {
    factor: f32,
    value: f32,
}

impl ClutchFilter {
    pub const fn new(factor: f32) -> Self {
        Self { factor, value: 0.0 }
    }

    /// Feeds one raw sample and returns the new filtered position.
    ///
    /// Equivalent to `factor * raw + (1 - factor) * previous`, arranged so a
    /// sample equal to the current value leaves it untouched.
    pub fn filter(&mut self, raw: u16) -> f32 {
        let raw = f32::from(raw);
        self.value += self.factor * (raw - self.value);
        self.value
    }

    pub const fn value(&self) -> f32 {
        self.value
    }
}

/// Position-to-duty curve with slopes computed once from the calibration.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DutyCurve {
    calibration: ClutchCalibration,
    slope_closed: f32,
    slope_middle: f32,
    slope_open: f32,
}

impl DutyCurve {
    pub fn new(calibration: &ClutchCalibration) -> Result<Self, CalibrationError> {
        calibration.validate()?;
        let c = calibration;
        let slope_middle = if c.break_open > c.break_closed {
            (c.dc_break_open - c.dc_break_closed) / (c.break_open - c.break_closed)
        } else {
            0.0
        };
        Ok(Self {
            calibration: *calibration,
            slope_closed: (c.dc_break_closed - c.dc_closed) / (c.break_closed - c.closed),
            slope_middle,
            slope_open: (c.dc_open - c.dc_break_open) / (c.open - c.break_open),
        })
    }

    /// Maps a filtered position to a servo duty value.
    pub fn compute_duty_cycle(&self, position: f32) -> f32 {
        let c = &self.calibration;
        if position > c.open {
            c.dc_open
        } else if position > c.break_open {
            (position - c.break_open) * self.slope_open + c.dc_break_open
        } else if position > c.break_closed {
            (position - c.break_closed) * self.slope_middle + c.dc_break_closed
        } else if position > c.closed {
            (position - c.closed) * self.slope_closed + c.dc_closed
        } else {
            c.dc_closed
        }
    }

    pub const fn calibration(&self) -> &ClutchCalibration {
        &self.calibration
    }
}

/// Picks the duty that drives the servo.
pub fn select_active_duty(policy: SelectPolicy, left: f32, right: f32) -> f32 {
    match policy {
        SelectPolicy::Minimum => left.min(right),
        SelectPolicy::Maximum => left.max(right),
    }
}

/// Filter, curve and last duty for one paddle.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClutchChannel {
    filter: ClutchFilter,
    curve: DutyCurve,
    duty: f32,
}

impl ClutchChannel {
    fn new(calibration: &ClutchCalibration, factor: f32) -> Result<Self, CalibrationError> {
        let curve = DutyCurve::new(calibration)?;
        Ok(Self {
            filter: ClutchFilter::new(factor),
            curve,
            duty: calibration.dc_closed,
        })
    }

    fn update(&mut self, raw: u16) -> f32 {
        let position = self.filter.filter(raw);
        self.duty = self.curve.compute_duty_cycle(position);
        self.duty
    }

    pub const fn filtered(&self) -> f32 {
        self.filter.value()
    }

    pub const fn duty(&self) -> f32 {
        self.duty
    }
}

/// Both clutch paddles and the servo selection policy.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ClutchActuator {
    left: ClutchChannel,
    right: ClutchChannel,
    select: SelectPolicy,
}

impl ClutchActuator {
    pub fn new(config: &ClutchConfig) -> Result<Self, CalibrationError> {
        config.validate()?;
        Ok(Self {
            left: ClutchChannel::new(&config.left, config.filter_factor)?,
            right: ClutchChannel::new(&config.right, config.filter_factor)?,
            select: config.select,
        })
    }

    /// Filters both raw samples, maps them and returns the servo duty.
    pub fn update(&mut self, raw_left: u16, raw_right: u16) -> u16 {
        let left = self.left.update(raw_left);
        let right = self.right.update(raw_right);
        // float to int casts saturate, and calibrated duties are never negative
        select_active_duty(self.select, left, right) as u16
    }

    pub const fn left(&self) -> &ClutchChannel {
        &self.left
    }

    pub const fn right(&self) -> &ClutchChannel {
        &self.right
    }
}
