//! Integer minor-unit currency arithmetic.
//!
//! All amounts handled by the engine are whole centavos stored in an `i64`.
//! Decimal math (percentages, compounding) goes through `BigDecimal` and is
//! brought back to centavos with a single round-half-up step.

use bigdecimal::{BigDecimal, RoundingMode, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use crate::types::{BillingError, BillingResult};

/// A signed amount in minor currency units (centavos).
///
/// ```
/// use billing_core::Centavos;
///
/// let dues: Centavos = "950.00".parse().unwrap();
/// assert_eq!(dues, Centavos::new(95_000));
/// assert_eq!(dues.to_string(), "950.00");
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Centavos(i64);

impl Centavos {
    /// Minor units per major unit.
    pub const PER_UNIT: i64 = 100;

    /// Zero value.
    pub const ZERO: Self = Centavos(0);

    /// Wrap a raw minor-unit value
    pub const fn new(minor_units: i64) -> Self {
        Centavos(minor_units)
    }

    /// Build from whole major units (e.g. pesos)
    pub fn from_major(units: i64) -> BillingResult<Self> {
        units
            .checked_mul(Self::PER_UNIT)
            .map(Centavos)
            .ok_or_else(|| {
                BillingError::Validation(format!("{} major units do not fit in minor units", units))
            })
    }

    /// Raw minor-unit value
    pub const fn minor_units(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Returns the positive portion of this amount, or zero
    pub fn positive_part(self) -> Self {
        Centavos(self.0.max(0))
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Centavos)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Centavos)
    }

    /// Exact decimal value of this amount in minor units
    pub fn to_decimal(self) -> BigDecimal {
        BigDecimal::from(self.0)
    }

    /// Round an exact minor-unit decimal to whole centavos, half away from zero.
    pub fn round_half_up(value: &BigDecimal) -> BillingResult<Self> {
        value
            .with_scale_round(0, RoundingMode::HalfUp)
            .to_i64()
            .map(Centavos)
            .ok_or_else(|| {
                BillingError::InvariantViolation(format!(
                    "Amount {} does not fit in minor units",
                    value
                ))
            })
    }

    /// `rate_percent`% of this amount, rounded half-up to the nearest centavo
    pub fn percentage(self, rate_percent: &BigDecimal) -> BillingResult<Self> {
        let exact = self.to_decimal() * rate_percent / BigDecimal::from(100);
        Self::round_half_up(&exact)
    }
}

impl FromStr for Centavos {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || BillingError::Validation(format!("Invalid amount: '{}'", s));

        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, fraction) = match digits.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (digits, ""),
        };

        if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if fraction.len() > 2 || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if digits.ends_with('.') {
            return Err(invalid());
        }

        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let fraction: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => fraction.parse().map_err(|_| invalid())?,
        };

        let magnitude = whole
            .checked_mul(Self::PER_UNIT)
            .and_then(|w| w.checked_add(fraction))
            .ok_or_else(invalid)?;

        Ok(Centavos(if negative { -magnitude } else { magnitude }))
    }
}

impl fmt::Display for Centavos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        write!(
            f,
            "{}{}.{:02}",
            sign,
            magnitude / Self::PER_UNIT as u64,
            magnitude % Self::PER_UNIT as u64
        )
    }
}

impl Add for Centavos {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Centavos(self.0 + rhs.0)
    }
}

impl AddAssign for Centavos {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Centavos {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Centavos(self.0 - rhs.0)
    }
}

impl SubAssign for Centavos {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Centavos {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Centavos(-self.0)
    }
}

impl Sum for Centavos {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Centavos::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Centavos> for Centavos {
    fn sum<I: Iterator<Item = &'a Centavos>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_major_unit_strings() {
        assert_eq!("950".parse::<Centavos>().unwrap(), Centavos::new(95_000));
        assert_eq!("950.5".parse::<Centavos>().unwrap(), Centavos::new(95_050));
        assert_eq!("950.05".parse::<Centavos>().unwrap(), Centavos::new(95_005));
        assert_eq!(" -12.34 ".parse::<Centavos>().unwrap(), Centavos::new(-1_234));
        assert_eq!("0.07".parse::<Centavos>().unwrap(), Centavos::new(7));
    }

    #[test]
    fn test_parse_rejects_malformed_or_sub_centavo_input() {
        for input in ["", "abc", "1.234", "1.", ".5", "1,000.00", "--1", "1.-5"] {
            assert!(input.parse::<Centavos>().is_err(), "accepted '{}'", input);
        }
    }

    #[test]
    fn test_from_major_and_overflow() {
        assert_eq!(Centavos::from_major(950).unwrap(), Centavos::new(95_000));
        assert!(matches!(
            Centavos::from_major(i64::MAX / 10),
            Err(BillingError::Validation(_))
        ));
        assert!("99999999999999999999".parse::<Centavos>().is_err());
        assert_eq!(Centavos::new(i64::MAX).checked_add(Centavos::new(1)), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Centavos::new(95_000).to_string(), "950.00");
        assert_eq!(Centavos::new(-5).to_string(), "-0.05");
        assert_eq!(Centavos::ZERO.to_string(), "0.00");
        assert_eq!(Centavos::new(104_736).to_string(), "1047.36");
    }

    #[test]
    fn test_percentage_rounds_half_up() {
        let base = Centavos::new(95_000);
        assert_eq!(base.percentage(&BigDecimal::from(5)).unwrap(), Centavos::new(4_750));

        // 0.5 centavo rounds away from zero
        let odd = Centavos::new(99_750);
        assert_eq!(odd.percentage(&BigDecimal::from(5)).unwrap(), Centavos::new(4_988));
    }

    #[test]
    fn test_arithmetic_and_sum() {
        let amounts = [Centavos::new(100), Centavos::new(250), Centavos::new(-50)];
        let total: Centavos = amounts.iter().sum();
        assert_eq!(total, Centavos::new(300));
        assert_eq!(-total, Centavos::new(-300));
        assert_eq!(Centavos::new(-300).positive_part(), Centavos::ZERO);
        assert_eq!(Centavos::new(i64::MAX).checked_add(Centavos::new(1)), None);
    }
}
