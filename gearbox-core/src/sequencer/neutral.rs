//! Adaptive try-times for the neutral finder.
//!
//! Neutral sits between first and second, and the only feedback is the coarse
//! gear code read back after each pulse. A pulse out of first that leaves the
//! box in first was too short; one that lands in second was too long. The
//! search keeps both try-times across sessions and tunes them from that
//! observation.

use crate::Ticks;
use crate::config::{NeutralConfig, SearchStrategy};
use crate::gear::Approach;

/// Interval of plausible try-times for each direction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BisectionBounds {
    pub up_low: Ticks,
    pub up_high: Ticks,
    pub down_low: Ticks,
    pub down_high: Ticks,
}

impl BisectionBounds {
    pub const fn new(low: Ticks, high: Ticks) -> Self {
        Self {
            up_low: low,
            up_high: high,
            down_low: low,
            down_high: high,
        }
    }

    /// Bounds for the direction of `approach`.
    pub const fn range(&self, approach: Approach) -> (Ticks, Ticks) {
        match approach {
            Approach::FromFirst => (self.up_low, self.up_high),
            Approach::FromSecond => (self.down_low, self.down_high),
        }
    }
}

/// Search state that survives between neutral requests.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct NeutralSearch {
    config: NeutralConfig,
    strategy: SearchStrategy,
    try_up: Ticks,
    try_down: Ticks,
    last: Option<Approach>,
    attempts: u8,
    bounds: BisectionBounds,
}

impl NeutralSearch {
    pub const fn new(config: NeutralConfig) -> Self {
        Self {
            config,
            strategy: config.strategy,
            try_up: config.try_up,
            try_down: config.try_down,
            last: None,
            attempts: 0,
            bounds: BisectionBounds::new(config.bounds_low, config.bounds_high),
        }
    }

    /// Starts a repeated-search session. Try-times are kept.
    pub fn begin(&mut self, strategy: SearchStrategy) {
        self.strategy = strategy;
        self.last = None;
        self.attempts = 0;
        if strategy == SearchStrategy::Bisection {
            self.bounds = BisectionBounds::new(self.config.bounds_low, self.config.bounds_high);
        }
    }

    /// Pulse length currently used for `approach`.
    pub const fn try_time(&self, approach: Approach) -> Ticks {
        match approach {
            Approach::FromFirst => self.try_up,
            Approach::FromSecond => self.try_down,
        }
    }

    /// Tunes the try-times from where the previous pulse left the gearbox.
    ///
    /// `now` is the direction the next pulse will take, which is also where
    /// the previous pulse ended up. Returns the pulse length to use.
    pub fn prepare_attempt(&mut self, now: Approach) -> Ticks {
        match self.strategy {
            SearchStrategy::Linear => self.adjust_linear(now),
            SearchStrategy::Bisection => self.adjust_bisection(now),
        }
        self.attempts = self.attempts.saturating_add(1);
        self.last = Some(now);
        self.try_time(now)
    }

    fn adjust_linear(&mut self, now: Approach) {
        let step = self.config.adjust_step;
        match (now, self.last) {
            // still in first after pushing up: too soft
            (Approach::FromFirst, Some(Approach::FromFirst)) => {
                self.try_up = self.try_up.saturating_add(step);
            }
            // pushed down from second straight through to first: too hard
            (Approach::FromFirst, Some(Approach::FromSecond)) => {
                self.try_down = self.try_down.saturating_sub(step);
            }
            (Approach::FromSecond, Some(Approach::FromFirst)) => {
                self.try_up = self.try_up.saturating_sub(step);
            }
            (Approach::FromSecond, Some(Approach::FromSecond)) => {
                self.try_down = self.try_down.saturating_add(step);
            }
            (_, None) => {}
        }
    }

    fn adjust_bisection(&mut self, now: Approach) {
        let bounds = &mut self.bounds;
        match (now, self.last) {
            (Approach::FromFirst, Some(Approach::FromFirst)) => {
                bounds.up_low = bounds.up_low.max(self.try_up);
            }
            (Approach::FromFirst, Some(Approach::FromSecond)) => {
                bounds.down_high = bounds.down_high.min(self.try_down);
            }
            (Approach::FromSecond, Some(Approach::FromFirst)) => {
                bounds.up_high = bounds.up_high.min(self.try_up);
            }
            (Approach::FromSecond, Some(Approach::FromSecond)) => {
                bounds.down_low = bounds.down_low.max(self.try_down);
            }
            (_, None) => {}
        }
        match now {
            Approach::FromFirst => {
                self.try_up = Ticks::midpoint(bounds.up_low, bounds.up_high);
            }
            Approach::FromSecond => {
                self.try_down = Ticks::midpoint(bounds.down_low, bounds.down_high);
            }
        }
    }

    pub const fn strategy(&self) -> SearchStrategy {
        self.strategy
    }

    pub const fn attempts(&self) -> u8 {
        self.attempts
    }

    pub const fn limit_reached(&self) -> bool {
        self.attempts >= self.config.repeat_limit
    }

    /// Direction of the most recent pulse in this session.
    pub const fn last(&self) -> Option<Approach> {
        self.last
    }

    pub const fn bounds(&self) -> &BisectionBounds {
        &self.bounds
    }

    pub const fn stabilisation(&self) -> Ticks {
        self.config.stabilisation
    }
}
