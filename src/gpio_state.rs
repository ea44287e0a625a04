use core::fmt;
use core::ops::Not;

/// Logical level of a filtered input.
///
/// `Undefined` is only ever seen before the first edge of a pin was observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i8)]
pub enum GpioState {
    #[default]
    Undefined = -1,
    Low = 0,
    High = 1,
}

impl GpioState {
    /// Build a state from an electrical level, flipping it when `inverse_logic` is set
    #[inline(always)]
    pub const fn from_level(level: bool, inverse_logic: bool) -> Self {
        if level != inverse_logic {
            GpioState::High
        } else {
            GpioState::Low
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            GpioState::Undefined => "Undefined",
            GpioState::Low => "Low",
            GpioState::High => "High",
        }
    }

    pub const fn is_high(self) -> bool {
        matches!(self, GpioState::High)
    }

    pub const fn is_low(self) -> bool {
        matches!(self, GpioState::Low)
    }

    pub const fn is_defined(self) -> bool {
        !matches!(self, GpioState::Undefined)
    }

    /// Encoding used to keep the state in an `AtomicI8`
    #[inline(always)]
    pub const fn to_raw(self) -> i8 {
        self as i8
    }

    /// Inverse of [`GpioState::to_raw`], anything out of range decodes as `Undefined`
    #[inline(always)]
    pub const fn from_raw(raw: i8) -> Self {
        match raw {
            0 => GpioState::Low,
            1 => GpioState::High,
            _ => GpioState::Undefined,
        }
    }
}

impl Not for GpioState {
    type Output = GpioState;

    fn not(self) -> Self::Output {
        match self {
            GpioState::Low => GpioState::High,
            GpioState::High => GpioState::Low,
            GpioState::Undefined => GpioState::Undefined,
        }
    }
}

impl fmt::Display for GpioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_undefined() {
        assert_eq!(GpioState::default(), GpioState::Undefined);
        assert!(!GpioState::default().is_defined());
    }

    #[test]
    fn inverse_logic_flips_at_capture() {
        assert_eq!(GpioState::from_level(false, false), GpioState::Low);
        assert_eq!(GpioState::from_level(true, false), GpioState::High);
        assert_eq!(GpioState::from_level(false, true), GpioState::High);
        assert_eq!(GpioState::from_level(true, true), GpioState::Low);
    }

    #[test]
    fn negation_keeps_undefined() {
        assert_eq!(!GpioState::Low, GpioState::High);
        assert_eq!(!GpioState::High, GpioState::Low);
        assert_eq!(!GpioState::Undefined, GpioState::Undefined);
    }

    #[test]
    fn raw_encoding() {
        for state in [GpioState::Undefined, GpioState::Low, GpioState::High] {
            assert_eq!(GpioState::from_raw(state.to_raw()), state);
        }
        assert_eq!(GpioState::from_raw(42), GpioState::Undefined);
    }

    #[test]
    fn display_names() {
        assert_eq!(GpioState::High.to_string(), "High");
        assert_eq!(GpioState::Low.to_string(), "Low");
        assert_eq!(GpioState::Undefined.to_string(), "Undefined");
    }
}
