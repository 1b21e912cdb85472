//! # Quantity and Percentage
//!
//! Fixed-precision decimal amounts for stock, recipe lines and wastage.
//!
//! ## Why Not f64?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Flour stock stored as f64:                                             │
//! │     0.1 kg + 0.2 kg = 0.30000000000000004 kg                            │
//! │                                                                         │
//! │  After a year of ledger entries the recomputed stock drifts away from  │
//! │  the stored stock and the audit check fails.                           │
//! │                                                                         │
//! │  Quantity stores a Decimal normalised to 6 decimal places:             │
//! │     0.1 + 0.2 = 0.3 (exactly)                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Quantities persist as decimal text (`"12.5"`), so they round-trip through
//! SQLite and JSON without binary float conversion.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::QUANTITY_DECIMAL_PLACES;

/// Errors from parsing or constructing quantities.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("invalid decimal quantity '{0}'")]
    Invalid(String),

    #[error("percentage {0} must be between 0 and 100")]
    PercentageOutOfRange(String),
}

// =============================================================================
// Quantity
// =============================================================================

/// An amount of an item, in that item's unit of measure.
///
/// Every constructor rounds to [`QUANTITY_DECIMAL_PLACES`] using midpoint
/// away from zero and strips trailing zeros, so equal amounts always have
/// equal representations.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Quantity(Decimal);

impl Quantity {
    /// Zero of any unit.
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    /// Creates a quantity, rounding to the fixed precision.
    pub fn new(value: Decimal) -> Self {
        Quantity(
            value
                .round_dp_with_strategy(QUANTITY_DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
                .normalize(),
        )
    }

    /// Creates a quantity from a mantissa and scale, e.g. `(25, 1)` is `2.5`.
    pub fn from_parts(mantissa: i64, scale: u32) -> Self {
        Self::new(Decimal::new(mantissa, scale))
    }

    /// Returns the underlying decimal value.
    #[inline]
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    #[inline]
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Adds two quantities, returning `None` if the sum leaves the decimal
    /// range.
    pub fn checked_add(&self, other: Quantity) -> Option<Quantity> {
        self.0.checked_add(other.0).map(Quantity::new)
    }

    /// Subtracts `other`, returning `None` if the difference leaves the
    /// decimal range.
    pub fn checked_sub(&self, other: Quantity) -> Option<Quantity> {
        self.0.checked_sub(other.0).map(Quantity::new)
    }

    /// Multiplies by a plain decimal factor, rounding the result.
    pub fn checked_mul(&self, factor: Decimal) -> Option<Quantity> {
        self.0.checked_mul(factor).map(Quantity::new)
    }

    /// Divides by another quantity, returning a plain ratio.
    ///
    /// Returns `None` when `divisor` is zero.
    pub fn ratio_to(&self, divisor: Quantity) -> Option<Decimal> {
        self.0.checked_div(divisor.0)
    }

    /// `self` as a percentage of `whole`, rounded to two places.
    ///
    /// A zero `whole` yields zero.
    pub fn percent_of(&self, whole: Quantity) -> Decimal {
        let scaled = match self.0.checked_mul(Decimal::ONE_HUNDRED) {
            Some(scaled) => scaled.checked_div(whole.0),
            // Only reachable near the top of the range, where `/ whole` first
            // keeps the product representable.
            None => self
                .0
                .checked_div(whole.0)
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED)),
        };
        match scaled {
            Some(pct) => pct.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            None => Decimal::ZERO,
        }
    }

    /// Difference clamped at zero (`self - other` or zero).
    pub fn saturating_sub(&self, other: Quantity) -> Quantity {
        if other >= *self {
            Quantity::ZERO
        } else {
            *self - other
        }
    }
}

impl From<i64> for Quantity {
    fn from(value: i64) -> Self {
        Quantity(Decimal::from(value))
    }
}

impl From<Decimal> for Quantity {
    fn from(value: Decimal) -> Self {
        Quantity::new(value)
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim())
            .map(Quantity::new)
            .map_err(|_| QuantityError::Invalid(s.to_string()))
    }
}

/// Row decoding: quantities are stored as TEXT.
impl TryFrom<String> for Quantity {
    type Error = QuantityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operators saturate at the decimal range. Write paths use
/// [`Quantity::checked_add`] and [`Quantity::checked_sub`] and reject the
/// overflow instead.
impl Add for Quantity {
    type Output = Quantity;

    fn add(self, other: Quantity) -> Quantity {
        Quantity::new(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, other: Quantity) {
        *self = *self + other;
    }
}

impl Sub for Quantity {
    type Output = Quantity;

    fn sub(self, other: Quantity) -> Quantity {
        Quantity::new(self.0.saturating_sub(other.0))
    }
}

impl SubAssign for Quantity {
    fn sub_assign(&mut self, other: Quantity) {
        *self = *self - other;
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::ZERO, |acc, q| acc + q)
    }
}

impl<'a> Sum<&'a Quantity> for Quantity {
    fn sum<I: Iterator<Item = &'a Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::ZERO, |acc, q| acc + *q)
    }
}

// =============================================================================
// Percentage
// =============================================================================

/// A percentage in the closed range `[0, 100]`, used for recipe wastage
/// and production overrun tolerance.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Percentage(Decimal);

impl Percentage {
    pub const ZERO: Percentage = Percentage(Decimal::ZERO);

    /// Creates a percentage, rejecting values outside `[0, 100]`.
    pub fn new(value: Decimal) -> Result<Self, QuantityError> {
        if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
            return Err(QuantityError::PercentageOutOfRange(value.to_string()));
        }
        Ok(Percentage(value.normalize()))
    }

    /// Whole-number shorthand, e.g. `Percentage::whole(10)` for 10%.
    pub fn whole(value: u32) -> Result<Self, QuantityError> {
        Self::new(Decimal::from(value))
    }

    #[inline]
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// The numerator of the `(100 + p) / 100` growth factor.
    ///
    /// Callers multiply by this and divide by one hundred as their very last
    /// step so that exact inputs stay exact.
    pub fn grown_hundredths(&self) -> Decimal {
        Decimal::ONE_HUNDRED + self.0
    }
}

impl TryFrom<Decimal> for Percentage {
    type Error = QuantityError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Percentage::new(value)
    }
}

impl From<Percentage> for Decimal {
    fn from(value: Percentage) -> Self {
        value.0
    }
}

impl FromStr for Percentage {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value =
            Decimal::from_str(s.trim()).map_err(|_| QuantityError::Invalid(s.to_string()))?;
        Percentage::new(value)
    }
}

/// Row decoding: percentages are stored as TEXT.
impl TryFrom<String> for Percentage {
    type Error = QuantityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantity_precision() {
        let q: Quantity = "0.1".parse().unwrap();
        let r: Quantity = "0.2".parse().unwrap();
        assert_eq!((q + r).to_string(), "0.3");

        // Rounded to six places, midpoint away from zero
        let q: Quantity = "1.0000005".parse().unwrap();
        assert_eq!(q.to_string(), "1.000001");
        let q: Quantity = "-1.0000005".parse().unwrap();
        assert_eq!(q.to_string(), "-1.000001");
    }

    #[test]
    fn test_quantity_normalises_trailing_zeros() {
        let a: Quantity = "4.000000".parse().unwrap();
        assert_eq!(a, Quantity::from(4));
        assert_eq!(a.to_string(), "4");
    }

    #[test]
    fn test_quantity_parse_rejects_garbage() {
        assert!("abc".parse::<Quantity>().is_err());
        assert!(Quantity::try_from(String::from("")).is_err());
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(Quantity::from(3).percent_of(Quantity::from(4)), Decimal::new(75, 0));
        assert_eq!(
            Quantity::from(1).percent_of(Quantity::from(3)),
            Decimal::new(3333, 2)
        );
        assert_eq!(Quantity::from(1).percent_of(Quantity::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_quantity_sum() {
        let total: Quantity = vec![Quantity::from(2), Quantity::from_parts(5, 1)]
            .into_iter()
            .sum();
        assert_eq!(total, Quantity::from_parts(25, 1));
    }

    #[test]
    fn test_arithmetic_at_the_decimal_limit() {
        let max = Quantity::new(Decimal::MAX);
        assert_eq!(max.checked_add(Quantity::from(1)), None);
        assert_eq!(Quantity::new(Decimal::MIN).checked_sub(Quantity::from(1)), None);
        assert_eq!(max + Quantity::from(1), max);
        assert_eq!(max.percent_of(max), Decimal::ONE_HUNDRED);
    }

    #[test]
    fn test_quantity_serializes_as_string() {
        let json = serde_json::to_string(&Quantity::from_parts(125, 1)).unwrap();
        assert_eq!(json, "\"12.5\"");
    }

    #[test]
    fn test_percentage_range() {
        assert!(Percentage::whole(0).is_ok());
        assert!(Percentage::whole(100).is_ok());
        assert!(Percentage::whole(101).is_err());
        assert!(Percentage::new(Decimal::new(-1, 0)).is_err());
    }

    #[test]
    fn test_percentage_deserialize_validates() {
        let ok: Percentage = serde_json::from_str("\"12.5\"").unwrap();
        assert_eq!(ok.as_decimal(), Decimal::new(125, 1));
        assert!(serde_json::from_str::<Percentage>("\"150\"").is_err());
    }
}
