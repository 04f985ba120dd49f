//! Timer tick arithmetic for the one-shot sequencing timer.
//!
//! The gearbox timer counts in 100 µs ticks, so 10 000 ticks make up the
//! one second stabilisation delay used by the neutral finder.

use core::time::Duration;

/// Length of a single timer tick in microseconds.
pub const TICK_MICROS: u64 = 100;

/// Number of ticks in one millisecond.
pub const TICKS_PER_MILLI: u16 = 10;

/// Duration expressed in one-shot timer ticks.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Ticks(u16);

impl Ticks {
    pub const ZERO: Ticks = Ticks(0);

    pub const fn new(ticks: u16) -> Self {
        Self(ticks)
    }

    /// Builds a tick count from whole milliseconds, saturating at `u16::MAX`.
    pub const fn from_millis(millis: u16) -> Self {
        Self(millis.saturating_mul(TICKS_PER_MILLI))
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    pub const fn saturating_add(self, other: Ticks) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub const fn saturating_sub(self, other: Ticks) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Halfway point between two tick counts, rounding down.
    pub const fn midpoint(low: Ticks, high: Ticks) -> Self {
        let sum = low.0 as u32 + high.0 as u32;
        Self((sum >> 1) as u16)
    }

    /// Converts the tick count into wall-clock time.
    pub const fn as_duration(self) -> Duration {
        Duration::from_micros(self.0 as u64 * TICK_MICROS)
    }
}

impl From<u16> for Ticks {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stabilisation_delay_is_one_second() {
        assert_eq!(Ticks::new(10_000).as_duration(), Duration::from_secs(1));
        assert_eq!(Ticks::from_millis(30), Ticks::new(300));
    }

    #[test]
    fn midpoint_halves_instead_of_doubling() {
        assert_eq!(Ticks::midpoint(Ticks::new(300), Ticks::new(700)), Ticks::new(500));
        assert_eq!(Ticks::midpoint(Ticks::new(300), Ticks::new(301)), Ticks::new(300));
        assert_eq!(
            Ticks::midpoint(Ticks::new(u16::MAX), Ticks::new(u16::MAX)),
            Ticks::new(u16::MAX)
        );
    }

    #[test]
    fn arithmetic_saturates() {
        assert_eq!(Ticks::new(10).saturating_sub(Ticks::new(20)), Ticks::ZERO);
        assert_eq!(
            Ticks::new(u16::MAX).saturating_add(Ticks::new(1)),
            Ticks::new(u16::MAX)
        );
    }
}
