//! # Money Module
//!
//! Provides the `Money` type for unit costs, unit prices and BOM costing.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │  Costing a batch in floating point:                                     │
//! │    2.5 kg × 0.10 per kg = 0.25000000000000006  ❌ WRONG!                │
//! │                                                                         │
//! │  OUR SOLUTION: Integer Cents × Decimal Quantity                         │
//! │    10 cents × 2.5 = 25 cents (exact)                                   │
//! │    10 cents × 0.125 = 1.25 → rounds half away from zero → 1 cent       │
//! │    Every rounding happens in exactly one place: multiply_quantity      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kiln_core::money::Money;
//! use kiln_core::quantity::Quantity;
//!
//! let flour = Money::from_cents(250); // 2.50 per kg
//!
//! let line_cost = flour.multiply_quantity(Quantity::from(4));
//! assert_eq!(line_cost.cents(), 1000);
//!
//! let total = line_cost + Money::from_cents(500);
//! assert_eq!(total.cents(), 1500);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::quantity::Quantity;

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in the smallest currency unit (cents).
///
/// ## Design Decisions
/// - **i64 (signed)**: Differences between costings can be negative
/// - **Single field tuple struct**: Zero-cost abstraction over i64
/// - **Single currency**: there is no currency code anywhere in the engine
///
/// ## Where Money is Used
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │                                                                         │
/// │  Item.unit_cost_cents ──► RecipeCost line ──► RecipeCost.total_cost     │
/// │                                                                         │
/// │  NewLedgerEntry.unit_price_cents ──► LedgerEntry (audit value only)    │
/// │                                                                         │
/// │  Production consumption cost ──► unit price of the production_in entry │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents (the smallest currency unit).
    ///
    /// ## Example
    /// ```rust
    /// use kiln_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from major and minor units.
    ///
    /// For negative amounts, only the major unit should be negative.
    /// `from_major_minor(-5, 50)` = -5.50, not -4.50
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in cents (smallest currency unit).
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the major unit portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies money by a decimal quantity, rounding half away from zero
    /// to the cent.
    ///
    /// ## Example
    /// ```rust
    /// use kiln_core::money::Money;
    /// use kiln_core::quantity::Quantity;
    ///
    /// let per_kg = Money::from_cents(10);
    /// assert_eq!(per_kg.multiply_quantity(Quantity::from_parts(25, 1)).cents(), 25);
    /// assert_eq!(per_kg.multiply_quantity(Quantity::from_parts(125, 3)).cents(), 1);
    /// assert_eq!(per_kg.multiply_quantity(Quantity::from_parts(15, 2)).cents(), 2);
    /// ```
    ///
    /// ## User Workflow
    /// ```text
    /// Flour: 2.50 per kg
    /// Required: 4 kg
    ///      │
    ///      ▼
    /// multiply_quantity(4) ← THIS FUNCTION
    ///      │
    ///      ▼
    /// Line cost: 10.00
    /// ```
    ///
    /// Results beyond the `i64` range saturate.
    pub fn multiply_quantity(&self, qty: Quantity) -> Money {
        match Decimal::from(self.0).checked_mul(qty.as_decimal()) {
            Some(exact) => Money::from_decimal_cents(exact),
            None if self.is_negative() != qty.is_negative() => Money(i64::MIN),
            None => Money(i64::MAX),
        }
    }

    /// Adds two amounts, returning `None` on `i64` overflow.
    #[inline]
    pub fn checked_add(&self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Divides money by a quantity (e.g. a batch cost per output unit).
    ///
    /// Returns `None` for a zero quantity.
    pub fn divide_by_quantity(&self, qty: Quantity) -> Option<Money> {
        Decimal::from(self.0)
            .checked_div(qty.as_decimal())
            .map(Money::from_decimal_cents)
    }

    /// The value in major units as a decimal, e.g. `10.50`.
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    fn from_decimal_cents(exact: Decimal) -> Money {
        let rounded = exact.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        match rounded.to_i64() {
            Some(cents) => Money(cents),
            None if rounded.is_sign_negative() => Money(i64::MIN),
            None => Money(i64::MAX),
        }
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Shows money as `major.minor` without a currency symbol.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, self.major().abs(), self.cents_part())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

/// Operators saturate at the `i64` range. Costing sums use
/// [`Money::checked_add`].
impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0.saturating_add(other.0))
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0.saturating_sub(other.0))
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        *self = *self - other;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0.saturating_mul(qty))
    }
}

impl Mul<Quantity> for Money {
    type Output = Self;

    fn mul(self, qty: Quantity) -> Self {
        self.multiply_quantity(qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert_eq!(money.major(), 10);
        assert_eq!(money.cents_part(), 99);
    }

    #[test]
    fn test_from_major_minor() {
        assert_eq!(Money::from_major_minor(10, 99).cents(), 1099);
        assert_eq!(Money::from_major_minor(-5, 50).cents(), -550);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Money::from_cents(1099)), "10.99");
        assert_eq!(format!("{}", Money::from_cents(500)), "5.00");
        assert_eq!(format!("{}", Money::from_cents(-550)), "-5.50");
        assert_eq!(format!("{}", Money::from_cents(0)), "0.00");
    }

    #[test]
    fn test_multiply_quantity_rounds_half_away_from_zero() {
        let per_unit = Money::from_cents(10);
        assert_eq!(per_unit.multiply_quantity(Quantity::from_parts(15, 2)).cents(), 2);
        assert_eq!(per_unit.multiply_quantity(Quantity::from_parts(14, 2)).cents(), 1);
        assert_eq!(per_unit.multiply_quantity(Quantity::from_parts(-15, 2)).cents(), -2);
    }

    #[test]
    fn test_cookie_flour_cost() {
        let flour = Money::from_cents(250);
        assert_eq!((flour * Quantity::from(4)).cents(), 1000);
        assert_eq!(flour.multiply_quantity(Quantity::ZERO), Money::zero());
    }

    #[test]
    fn test_divide_by_quantity() {
        let batch = Money::from_cents(1000);
        assert_eq!(batch.divide_by_quantity(Quantity::from(20)), Some(Money::from_cents(50)));
        assert_eq!(batch.divide_by_quantity(Quantity::from(3)), Some(Money::from_cents(333)));
        assert_eq!(batch.divide_by_quantity(Quantity::ZERO), None);
    }

    #[test]
    fn test_sum_and_arithmetic() {
        let total: Money = vec![Money::from_cents(1000), Money::from_cents(500)]
            .into_iter()
            .sum();
        assert_eq!(total.cents(), 1500);
        assert_eq!((total - Money::from_cents(1500)), Money::zero());
        assert_eq!((Money::from_cents(250) * 3).cents(), 750);
        assert_eq!(Money::from_cents(1050).to_decimal(), Decimal::new(1050, 2));
    }

    #[test]
    fn test_overflow_saturates_or_is_checked() {
        let max = Money::from_cents(i64::MAX);
        assert_eq!(max.checked_add(Money::from_cents(1)), None);
        assert_eq!(max + Money::from_cents(1), max);
        assert_eq!(max.multiply_quantity(Quantity::new(Decimal::MAX)), max);
        assert_eq!(
            Money::from_cents(-5).multiply_quantity(Quantity::new(Decimal::MAX)).cents(),
            i64::MIN
        );
    }
}
