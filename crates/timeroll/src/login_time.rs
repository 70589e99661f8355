//! Login time values (`HH:MM:SS.ffffff`).

use crate::error::ValidationError;
use chrono::{NaiveTime, Timelike};
use std::fmt;
use std::str::FromStr;

/// A validated time of day, always rendered with six fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct LoginTime(NaiveTime);

impl LoginTime {
    /// Parse operator input. Surrounding whitespace is ignored; the fraction
    /// may have one to six digits.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        let invalid = |reason| ValidationError {
            input: trimmed.to_string(),
            reason,
        };

        let (clock, fraction) = trimmed
            .split_once('.')
            .ok_or_else(|| invalid("missing fractional seconds"))?;

        let parts: Vec<&str> = clock.split(':').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.len() != 2 || !all_digits(p)) {
            return Err(invalid("expected HH:MM:SS"));
        }
        if fraction.is_empty() || fraction.len() > 6 || !all_digits(fraction) {
            return Err(invalid("expected 1 to 6 fractional digits"));
        }

        let time = NaiveTime::parse_from_str(clock, "%H:%M:%S")
            .map_err(|_| invalid("time of day out of range"))?;
        // Leap seconds are represented by nanos past one second.
        if time.nanosecond() >= 1_000_000_000 || time.second() > 59 {
            return Err(invalid("time of day out of range"));
        }

        let micros: u32 = format!("{fraction:0<6}")
            .parse()
            .map_err(|_| invalid("expected 1 to 6 fractional digits"))?;
        let time = time
            .with_nanosecond(micros * 1_000)
            .ok_or_else(|| invalid("time of day out of range"))?;

        Ok(Self(time))
    }
}

fn all_digits(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit())
}

impl fmt::Display for LoginTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M:%S%.6f"))
    }
}

impl FromStr for LoginTime {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_form() {
        let time = LoginTime::parse("09:15:30.500000").unwrap();
        assert_eq!(time.to_string(), "09:15:30.500000");
    }

    #[test]
    fn normalizes_short_fraction_and_whitespace() {
        let time = LoginTime::parse("  23:59:59.5\n").unwrap();
        assert_eq!(time.to_string(), "23:59:59.500000");
    }

    #[test]
    fn rejects_malformed_input() {
        for input in [
            "not-a-time",
            "",
            "09:15:30",
            "9:15:30.000000",
            "09:15:30.",
            "09:15:30.1234567",
            "24:00:00.000000",
            "12:60:00.000000",
            "12:00:60.000000",
            "12:00:00.00000a",
            "user_input_new_time",
            "2024-01-01 12:00:00.000000",
        ] {
            assert!(LoginTime::parse(input).is_err(), "accepted {input:?}");
        }
    }

    #[test]
    fn error_keeps_trimmed_input() {
        let err = LoginTime::parse(" nope ").unwrap_err();
        assert_eq!(err.input, "nope");
    }
}
