use crate::error::Error;
use crate::platform::{PinId, Ticks};

/// Electrical direction of the monitored pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinMode {
    Disabled,
    #[default]
    Input,
    Output,
    InputOutput,
    InputOutputOpenDrain,
}

impl PinMode {
    pub const fn can_read(self) -> bool {
        matches!(
            self,
            PinMode::Input | PinMode::InputOutput | PinMode::InputOutputOpenDrain
        )
    }
}

/// Construction time settings of a filtered interrupt.
///
/// The settle times are the number of ticks a new level has to persist
/// before it is committed, one per direction. Zero commits on the edge itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InterruptConfig {
    pub go_high_ticks: Ticks,
    pub go_low_ticks: Ticks,
    pub mode: PinMode,
    pub pull_up: bool,
    pub pull_down: bool,
    pub inverse_logic: bool,
}

impl InterruptConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same settle time in both directions
    pub fn debounce(self, ticks: Ticks) -> Self {
        self.go_high(ticks).go_low(ticks)
    }

    pub fn go_high(mut self, ticks: Ticks) -> Self {
        self.go_high_ticks = ticks;
        self
    }

    pub fn go_low(mut self, ticks: Ticks) -> Self {
        self.go_low_ticks = ticks;
        self
    }

    pub fn mode(mut self, mode: PinMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn pull_up(mut self, enable: bool) -> Self {
        self.pull_up = enable;
        self
    }

    pub fn pull_down(mut self, enable: bool) -> Self {
        self.pull_down = enable;
        self
    }

    pub fn inverse_logic(mut self, enable: bool) -> Self {
        self.inverse_logic = enable;
        self
    }

    pub fn validate(&self, pin: PinId) -> Result<(), Error> {
        if !self.mode.can_read() {
            return Err(Error::NotAnInput(pin));
        }
        if self.pull_up && self.pull_down {
            return Err(Error::ConflictingPulls(pin));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_commit_immediately() {
        let config = InterruptConfig::new();
        assert_eq!(config.go_high_ticks, 0);
        assert_eq!(config.go_low_ticks, 0);
        assert_eq!(config.mode, PinMode::Input);
        assert!(!config.inverse_logic);
        assert!(config.validate(4).is_ok());
    }

    #[test]
    fn asymmetric_windows() {
        let config = InterruptConfig::new().debounce(20).go_low(5);
        assert_eq!(config.go_high_ticks, 20);
        assert_eq!(config.go_low_ticks, 5);
    }

    #[test]
    fn rejects_both_pulls() {
        let config = InterruptConfig::new().pull_up(true).pull_down(true);
        assert!(matches!(config.validate(3), Err(Error::ConflictingPulls(3))));
    }

    #[test]
    fn rejects_modes_without_input() {
        for mode in [PinMode::Disabled, PinMode::Output] {
            let config = InterruptConfig::new().mode(mode);
            assert!(matches!(config.validate(7), Err(Error::NotAnInput(7))));
        }
        let config = InterruptConfig::new().mode(PinMode::InputOutputOpenDrain).pull_up(true);
        assert!(config.validate(7).is_ok());
    }
}
