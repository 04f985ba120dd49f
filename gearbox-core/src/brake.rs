//! Brake light hysteresis.

use crate::config::BrakeConfig;
use crate::hal::{Level, Output, OutputDriver};

/// Brake light driven from a pressure reading with an on/off dead band.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BrakeLight {
    config: BrakeConfig,
    lit: bool,
}

impl BrakeLight {
    pub const fn new(config: BrakeConfig) -> Self {
        Self { config, lit: false }
    }

    /// Applies a pressure sample. Readings inside the dead band keep the
    /// previous state. Returns whether the light is on afterwards.
    pub fn update<O: OutputDriver>(&mut self, pressure: u16, outputs: &mut O) -> bool {
        if pressure > self.config.on_above {
            outputs.set_output(Output::BrakeLight, Level::Asserted);
            self.lit = true;
        } else if pressure < self.config.off_below {
            outputs.set_output(Output::BrakeLight, Level::TriState);
            self.lit = false;
        }
        self.lit
    }

    pub const fn is_lit(&self) -> bool {
        self.lit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::STANDARD_BRAKE;

    #[derive(Default)]
    struct LastLevel(Option<Level>);

    impl OutputDriver for LastLevel {
        fn set_output(&mut self, output: Output, level: Level) {
            assert_eq!(output, Output::BrakeLight);
            self.0 = Some(level);
        }
    }

    #[test]
    fn dead_band_holds_previous_state() {
        let mut light = BrakeLight::new(STANDARD_BRAKE);
        let mut out = LastLevel::default();

        assert!(!light.update(90, &mut out));
        assert_eq!(out.0, None);

        assert!(light.update(101, &mut out));
        assert_eq!(out.0, Some(Level::Asserted));

        out.0 = None;
        assert!(light.update(90, &mut out));
        assert_eq!(out.0, None);

        assert!(!light.update(79, &mut out));
        assert_eq!(out.0, Some(Level::TriState));
    }
}
