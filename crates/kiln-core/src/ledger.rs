//! # Ledger Rules
//!
//! Transaction kinds and the effect each one has on an item's stock.
//!
//! ## Kind Semantics
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Kind             Effect           Quantity rule      Guard             │
//! │  ───────────────  ───────────────  ─────────────────  ───────────────── │
//! │  purchase         stock += q       q > 0              -                 │
//! │  production_in    stock += q       q > 0              -                 │
//! │  sale             stock -= q       q > 0              stock - q >= 0    │
//! │  production_out   stock -= q       q > 0              stock - q >= 0    │
//! │  waste            stock -= q       q > 0              stock - q >= 0    │
//! │  adjustment       stock := q       q >= 0             -                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entries are immutable once written. A correction is a new `adjustment`
//! entry, so the stored stock of an item is always the fold of its entries
//! in sequence order (see [`fold_stock`]).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::quantity::Quantity;
use crate::validation::{
    validate_cents, validate_date_range, validate_non_negative, validate_optional_text,
    validate_positive, ValidationResult,
};

// =============================================================================
// Transaction Kind
// =============================================================================

/// What caused a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Purchase,
    Sale,
    ProductionIn,
    ProductionOut,
    Adjustment,
    Waste,
}

/// How a kind changes stock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    Increase,
    Decrease,
    Set,
}

impl StockEffect {
    /// Applies the effect without any guard, saturating at the decimal range.
    pub fn apply(self, current: Quantity, quantity: Quantity) -> Quantity {
        match self {
            StockEffect::Increase => current + quantity,
            StockEffect::Decrease => current - quantity,
            StockEffect::Set => quantity,
        }
    }

    /// Applies the effect, returning `None` if the result leaves the decimal
    /// range.
    pub fn checked_apply(self, current: Quantity, quantity: Quantity) -> Option<Quantity> {
        match self {
            StockEffect::Increase => current.checked_add(quantity),
            StockEffect::Decrease => current.checked_sub(quantity),
            StockEffect::Set => Some(quantity),
        }
    }
}

impl TransactionKind {
    pub const ALL: [TransactionKind; 6] = [
        TransactionKind::Purchase,
        TransactionKind::Sale,
        TransactionKind::ProductionIn,
        TransactionKind::ProductionOut,
        TransactionKind::Adjustment,
        TransactionKind::Waste,
    ];

    pub fn effect(&self) -> StockEffect {
        match self {
            TransactionKind::Purchase | TransactionKind::ProductionIn => StockEffect::Increase,
            TransactionKind::Sale | TransactionKind::ProductionOut | TransactionKind::Waste => {
                StockEffect::Decrease
            }
            TransactionKind::Adjustment => StockEffect::Set,
        }
    }

    /// Kinds that must not drive stock below zero.
    #[inline]
    pub fn is_consuming(&self) -> bool {
        self.effect() == StockEffect::Decrease
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "purchase",
            TransactionKind::Sale => "sale",
            TransactionKind::ProductionIn => "production_in",
            TransactionKind::ProductionOut => "production_out",
            TransactionKind::Adjustment => "adjustment",
            TransactionKind::Waste => "waste",
        }
    }

    /// Checks the quantity rule for this kind.
    pub fn validate_quantity(&self, quantity: Quantity) -> ValidationResult<()> {
        match self.effect() {
            StockEffect::Set => validate_non_negative("quantity", quantity),
            StockEffect::Increase | StockEffect::Decrease => {
                validate_positive("quantity", quantity)
            }
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| ValidationError::invalid("kind", format!("unknown kind '{s}'")))
    }
}

// =============================================================================
// Stock Arithmetic
// =============================================================================

/// Computes the stock after one entry, enforcing the non-negative guard.
///
/// ## User Workflow
/// ```text
/// stock 5, sale 3   → Ok(2)
/// stock 2, sale 10  → Err(InsufficientStock { available: 2, requested: 10 })
/// stock 2, adjust 7 → Ok(7)
/// ```
pub fn apply_stock_effect(
    item_id: &str,
    kind: TransactionKind,
    current: Quantity,
    quantity: Quantity,
) -> CoreResult<Quantity> {
    kind.validate_quantity(quantity)?;

    let next = kind
        .effect()
        .checked_apply(current, quantity)
        .ok_or_else(|| {
            ValidationError::invalid(
                "quantity",
                format!("{} of {} on stock {} is too large", kind, quantity, current),
            )
        })?;
    if kind.is_consuming() && next.is_negative() {
        return Err(CoreError::InsufficientStock {
            item_id: item_id.to_string(),
            available: current,
            requested: quantity,
        });
    }

    Ok(next)
}

/// Replays a sequence of entries from zero stock.
///
/// Stored entries were guarded at write time, so no guard is applied here.
pub fn fold_stock<I>(entries: I) -> Quantity
where
    I: IntoIterator<Item = (TransactionKind, Quantity)>,
{
    entries
        .into_iter()
        .fold(Quantity::ZERO, |stock, (kind, qty)| kind.effect().apply(stock, qty))
}

// =============================================================================
// Entries
// =============================================================================

/// One immutable stock movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct LedgerEntry {
    pub id: String,

    /// Monotonic creation order across the whole ledger.
    pub seq: i64,

    pub item_id: String,
    pub kind: TransactionKind,

    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub quantity: Quantity,

    pub unit_price_cents: i64,

    /// Stock of the item immediately after this entry.
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub balance_after: Quantity,

    /// Links back to the business event (`production:<id>`, a PO number, ...).
    pub reference: Option<String>,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// A request to append one entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub item_id: String,
    pub kind: TransactionKind,
    pub quantity: Quantity,
    #[serde(default)]
    pub unit_price_cents: i64,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewLedgerEntry {
    pub fn new(item_id: impl Into<String>, kind: TransactionKind, quantity: Quantity) -> Self {
        Self {
            item_id: item_id.into(),
            kind,
            quantity,
            unit_price_cents: 0,
            reference: None,
            notes: None,
        }
    }

    pub fn unit_price_cents(mut self, cents: i64) -> Self {
        self.unit_price_cents = cents;
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// Stateless checks that run before any storage access.
    pub fn validate(&self) -> ValidationResult<()> {
        self.kind.validate_quantity(self.quantity)?;
        validate_cents("unit_price_cents", self.unit_price_cents)?;
        validate_optional_text("reference", self.reference.as_deref())?;
        validate_optional_text("notes", self.notes.as_deref())?;
        Ok(())
    }
}

/// History query. Every field narrows the result; `Default` returns all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerFilter {
    pub item_id: Option<String>,
    pub kind: Option<TransactionKind>,
    pub reference: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

impl LedgerFilter {
    pub fn for_item(item_id: impl Into<String>) -> Self {
        Self {
            item_id: Some(item_id.into()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> ValidationResult<()> {
        validate_date_range(self.from, self.to)?;
        if self.limit == Some(0) {
            return Err(ValidationError::MustBePositive {
                field: "limit".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sale_reduces_stock() {
        let next =
            apply_stock_effect("item", TransactionKind::Sale, Quantity::from(5), Quantity::from(3))
                .unwrap();
        assert_eq!(next, Quantity::from(2));
    }

    #[test]
    fn test_sale_beyond_stock_is_rejected() {
        let err =
            apply_stock_effect("item", TransactionKind::Sale, Quantity::from(2), Quantity::from(10))
                .unwrap_err();
        match err {
            CoreError::InsufficientStock {
                available,
                requested,
                ..
            } => {
                assert_eq!(available, Quantity::from(2));
                assert_eq!(requested, Quantity::from(10));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_purchase_past_decimal_limit_is_rejected() {
        let full = Quantity::new(rust_decimal::Decimal::MAX);
        let err = apply_stock_effect("item", TransactionKind::Purchase, full, Quantity::from(1))
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_consuming_to_exactly_zero_is_allowed() {
        let next =
            apply_stock_effect("item", TransactionKind::Waste, Quantity::from(4), Quantity::from(4))
                .unwrap();
        assert!(next.is_zero());
    }

    #[test]
    fn test_adjustment_sets_absolute_value() {
        let next = apply_stock_effect(
            "item",
            TransactionKind::Adjustment,
            Quantity::from(40),
            Quantity::from(7),
        )
        .unwrap();
        assert_eq!(next, Quantity::from(7));

        // Zero is a valid count
        assert!(apply_stock_effect(
            "item",
            TransactionKind::Adjustment,
            Quantity::from(40),
            Quantity::ZERO
        )
        .is_ok());
    }

    #[test]
    fn test_quantity_rules_per_kind() {
        for kind in TransactionKind::ALL {
            let zero = kind.validate_quantity(Quantity::ZERO);
            if kind == TransactionKind::Adjustment {
                assert!(zero.is_ok());
            } else {
                assert!(zero.is_err(), "{kind} accepted zero");
            }
            assert!(kind.validate_quantity(Quantity::from(-1)).is_err());
        }
    }

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in TransactionKind::ALL {
            assert_eq!(kind.as_str().parse::<TransactionKind>().unwrap(), kind);
        }
        assert!("refund".parse::<TransactionKind>().is_err());
    }

    #[test]
    fn test_filter_rejects_inverted_range() {
        let now = Utc::now();
        let filter = LedgerFilter {
            from: Some(now),
            to: Some(now - chrono::Duration::days(1)),
            ..Default::default()
        };
        assert!(filter.validate().is_err());
        assert!(LedgerFilter::default().validate().is_ok());
    }

    fn arb_kind() -> impl Strategy<Value = TransactionKind> {
        prop::sample::select(TransactionKind::ALL.to_vec())
    }

    proptest! {
        /// Accepted entries fold back to the running stock, and no accepted
        /// prefix ever leaves stock negative.
        #[test]
        fn prop_stock_is_conserved(ops in prop::collection::vec((arb_kind(), 0i64..50), 0..60)) {
            let mut stock = Quantity::ZERO;
            let mut accepted = Vec::new();

            for (kind, qty) in ops {
                let qty = Quantity::from(qty);
                match apply_stock_effect("item", kind, stock, qty) {
                    Ok(next) => {
                        prop_assert!(!next.is_negative());
                        stock = next;
                        accepted.push((kind, qty));
                    }
                    Err(_) => {
                        prop_assert!(
                            (qty.is_zero() && kind != TransactionKind::Adjustment)
                                || (kind.is_consuming() && qty > stock)
                        );
                    }
                }
            }

            prop_assert_eq!(fold_stock(accepted), stock);
        }
    }
}
