//! Money values and rounding helpers.
//!
//! Amounts are carried as whole cents in an `i64`. Comparisons between amounts that
//! originate from officer input allow a one cent tolerance.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

pub const CENTS_PER_UNIT: i64 = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);
    /// Largest difference still treated as equal.
    pub const TOLERANCE: Money = Money(1);

    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub const fn from_units(units: i64) -> Self {
        Money(units * CENTS_PER_UNIT)
    }

    /// Converts a decimal amount, rounding half away from zero to the nearest cent.
    pub fn from_major(value: f64) -> Self {
        if !value.is_finite() {
            return Money::ZERO;
        }
        Money((value * CENTS_PER_UNIT as f64).round() as i64)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn to_major(self) -> f64 {
        self.0 as f64 / CENTS_PER_UNIT as f64
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    /// Rounds to the nearest whole currency unit.
    pub fn round_units(self) -> Self {
        Money::from_major(self.to_major().round())
    }

    pub fn approx_eq(self, other: Money) -> bool {
        (self.0 - other.0).abs() <= Self::TOLERANCE.0
    }

    pub fn clamp_to(self, lo: Money, hi: Money) -> Self {
        Money(self.0.clamp(lo.0, hi.0.max(lo.0)))
    }
}

/// Rounds a decimal value to two places, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(
            f,
            "{sign}{}.{:02}",
            abs / CENTS_PER_UNIT as u64,
            abs % CENTS_PER_UNIT as u64
        )
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_major_rounds_to_nearest_cent() {
        assert_eq!(Money::from_major(4488.999_999_9).cents(), 448_900);
        assert_eq!(Money::from_major(0.005).cents(), 1);
        assert_eq!(Money::from_major(-0.005).cents(), -1);
        assert_eq!(Money::from_major(f64::NAN), Money::ZERO);
    }

    #[test]
    fn display_pads_cents() {
        assert_eq!(Money::from_cents(123_405).to_string(), "1234.05");
        assert_eq!(Money::from_cents(-50).to_string(), "-0.50");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn tolerance_is_one_cent() {
        let a = Money::from_units(100);
        assert!(a.approx_eq(a + Money::from_cents(1)));
        assert!(!a.approx_eq(a + Money::from_cents(2)));
    }

    #[test]
    fn round_units_uses_half_away_from_zero() {
        assert_eq!(Money::from_cents(51_050).round_units(), Money::from_units(511));
        assert_eq!(Money::from_cents(51_049).round_units(), Money::from_units(510));
    }

    #[test]
    fn serializes_as_cents() {
        let json = serde_json::to_string(&Money::from_cents(1050)).unwrap();
        assert_eq!(json, "1050");
    }

    #[test]
    fn round2_matches_cents() {
        assert_eq!(round2(919.090_909), 919.09);
    }
}
