//! Raw encoder counts, mechanical angle, and astronomical-coordinate value
//! types, plus the conversions that tie API commands to controller
//! setpoints.
//!
//! `AnglePosition` and `AstronomicalPosition` are sexagesimal value objects.
//! Their canonical form carries the overall sign on the highest-order
//! non-zero component (degrees/hours, falling back to minutes, falling back
//! to seconds) with the remaining components non-negative; no angular wrap
//! is ever applied, so `-10°` and `350°` compare unequal.

use serde::{Deserialize, Serialize};

/// Accumulated encoder counts. Unbounded (free-running across revolutions),
/// signed 64-bit so wraparound accumulation never overflows in practice.
pub type RawCounts = i64;

fn sign_and_magnitude(degrees: i32, minutes: i32, seconds: f64) -> (f64, f64) {
    let sign = if degrees != 0 {
        degrees.signum() as f64
    } else if minutes != 0 {
        minutes.signum() as f64
    } else if seconds != 0.0 {
        seconds.signum()
    } else {
        1.0
    };
    let magnitude =
        degrees.unsigned_abs() as f64 + minutes.unsigned_abs() as f64 / 60.0 + seconds.abs() / 3600.0;
    (sign, magnitude)
}

fn canonicalize(x: f64) -> (i32, i32, f64) {
    let sign = if x < 0.0 { -1 } else { 1 };
    let magnitude = x.abs();

    let mut degrees = magnitude.floor();
    let mut minutes = ((magnitude - degrees) * 60.0).floor();
    let mut seconds = ((magnitude - degrees) * 60.0 - minutes) * 60.0;

    // Guard against float rounding landing exactly on a carry boundary.
    if seconds >= 60.0 {
        seconds -= 60.0;
        minutes += 1.0;
    }
    if minutes >= 60.0 {
        minutes -= 60.0;
        degrees += 1.0;
    }

    let degrees = degrees as i32;
    let mut minutes = minutes as i32;

    if sign < 0 {
        if degrees != 0 {
            return (-degrees, minutes, seconds);
        }
        if minutes != 0 {
            minutes = -minutes;
            return (0, minutes, seconds);
        }
        seconds = -seconds;
        return (0, 0, seconds);
    }

    (degrees, minutes, seconds)
}

/// A signed mechanical angle in degrees/arc-minutes/arc-seconds.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnglePosition {
    pub degrees: i32,
    pub minutes: i32,
    pub seconds: f64,
}

impl AnglePosition {
    pub fn new(degrees: i32, minutes: i32, seconds: f64) -> Self {
        Self {
            degrees,
            minutes,
            seconds,
        }
    }

    /// Signed decimal degrees.
    pub fn to_decimal(&self) -> f64 {
        let (sign, magnitude) = sign_and_magnitude(self.degrees, self.minutes, self.seconds);
        sign * magnitude
    }

    /// Alias for [`Self::to_decimal`]; angles are already in degrees.
    pub fn to_degrees(&self) -> f64 {
        self.to_decimal()
    }

    /// Canonicalizes `x` decimal degrees into sexagesimal form.
    pub fn from_decimal(x: f64) -> Self {
        let (degrees, minutes, seconds) = canonicalize(x);
        Self {
            degrees,
            minutes,
            seconds,
        }
    }

    /// Component-wise addition used by the HTTP surface's relative-goto
    /// routes. Result is re-canonicalized.
    pub fn add(&self, delta: &AnglePosition) -> Self {
        Self::from_decimal(self.to_decimal() + delta.to_decimal())
    }
}

/// A signed astronomical coordinate (right ascension / hour angle) in
/// hours/minutes/seconds.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstronomicalPosition {
    pub hours: i32,
    pub minutes: i32,
    pub seconds: f64,
}

impl AstronomicalPosition {
    pub fn new(hours: i32, minutes: i32, seconds: f64) -> Self {
        Self {
            hours,
            minutes,
            seconds,
        }
    }

    /// Signed decimal hours.
    pub fn to_decimal(&self) -> f64 {
        let (sign, magnitude) = sign_and_magnitude(self.hours, self.minutes, self.seconds);
        sign * magnitude
    }

    /// Canonicalizes `x` decimal hours into sexagesimal form.
    pub fn from_decimal(x: f64) -> Self {
        let (hours, minutes, seconds) = canonicalize(x);
        Self {
            hours,
            minutes,
            seconds,
        }
    }

    /// Decimal degrees (`to_decimal() * 15`).
    pub fn to_degrees(&self) -> f64 {
        self.to_decimal() * 15.0
    }

    /// Canonicalizes `d` decimal degrees into hours/minutes/seconds.
    pub fn from_degrees(d: f64) -> Self {
        Self::from_decimal(d / 15.0)
    }

    pub fn add(&self, delta: &AstronomicalPosition) -> Self {
        Self::from_decimal(self.to_decimal() + delta.to_decimal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_float_eq::*;

    #[test]
    fn angle_round_trip() {
        for x in [0.0, 1.111, -1.111, 368.888, -368.888, 0.5, -0.5, 123.456] {
            assert_float_absolute_eq!(AnglePosition::from_decimal(x).to_decimal(), x, 1E-9);
        }
    }

    #[test]
    fn astronomical_round_trip() {
        for x in [0.0, 5.5, -5.5, 23.999, -12.3456] {
            assert_float_absolute_eq!(
                AstronomicalPosition::from_decimal(x).to_decimal(),
                x,
                1E-9
            );
        }
    }

    #[test]
    fn astronomical_degrees_round_trip() {
        for d in [0.0, 15.0, -15.0, 270.0, -359.999] {
            assert_float_absolute_eq!(AstronomicalPosition::from_degrees(d).to_degrees(), d, 1E-9);
        }
    }

    #[test]
    fn sub_one_degree_carries_sign_on_minutes() {
        let a = AnglePosition::from_decimal(-0.5);
        assert_eq!(a.degrees, 0);
        assert_eq!(a.minutes, -30);
        assert_float_absolute_eq!(a.to_decimal(), -0.5, 1E-9);
    }

    #[test]
    fn dms_decomposition() {
        let a = AnglePosition::from_decimal(368.888);
        assert_eq!(a.degrees, 368);
        assert_eq!(a.minutes, 53);
        assert_float_relative_eq!(a.seconds, 16.8, 1E-3);
    }

    #[test]
    fn exact_wrap_not_applied() {
        let a = AnglePosition::from_decimal(-10.0);
        let b = AnglePosition::from_decimal(350.0);
        assert_ne!(a, b);
    }

    #[test]
    fn independently_signed_components_use_first_nonzero_sign() {
        // Not a canonical value, but to_decimal must still follow the rule.
        let a = AnglePosition::new(-5, 30, 0.0);
        assert_float_absolute_eq!(a.to_decimal(), -5.5, 1E-9);
    }
}
