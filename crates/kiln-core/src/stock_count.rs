//! # Stock Counts
//!
//! Physical count sessions and the rules for reconciling them against the
//! ledger.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ┌───────┐    ┌─────────────┐    ┌───────────┐  reconcile ┌──────────┐ │
//! │  │ DRAFT │ ─► │ IN_PROGRESS │ ─► │ COMPLETED │ ─────────► │RECONCILED│ │
//! │  └───┬───┘    └──────┬──────┘    └───────────┘            └──────────┘ │
//! │      │               │                                                  │
//! │      └───────┬───────┘                                                  │
//! │              ▼                                                          │
//! │        ┌───────────┐    update_status moves one step forward only.     │
//! │        │ CANCELLED │    RECONCILED is reached only through reconcile.  │
//! │        └───────────┘    Counts may be recorded in DRAFT / IN_PROGRESS. │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every line keeps `discrepancy = actual - expected`; it is recomputed on
//! every change to `actual_quantity` and never written on its own.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::ledger::LedgerEntry;
use crate::quantity::Quantity;
use crate::validation::{
    validate_non_negative, validate_optional_text, validate_unique_ids, ValidationResult,
};

// =============================================================================
// Status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum StockCountStatus {
    Draft,
    InProgress,
    Completed,
    Reconciled,
    Cancelled,
}

impl StockCountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockCountStatus::Draft => "draft",
            StockCountStatus::InProgress => "in_progress",
            StockCountStatus::Completed => "completed",
            StockCountStatus::Reconciled => "reconciled",
            StockCountStatus::Cancelled => "cancelled",
        }
    }

    /// Whether `update_status` may move a session from `self` to `next`.
    pub fn can_transition_to(&self, next: StockCountStatus) -> bool {
        use StockCountStatus::*;
        matches!(
            (self, next),
            (Draft, InProgress)
                | (InProgress, Completed)
                | (Draft, Cancelled)
                | (InProgress, Cancelled)
        )
    }

    /// Actual quantities may still be entered.
    #[inline]
    pub fn accepts_counts(&self) -> bool {
        matches!(self, StockCountStatus::Draft | StockCountStatus::InProgress)
    }
}

impl fmt::Display for StockCountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checks a requested status change.
///
/// ## Errors
/// - `InvalidState` for any move other than one step forward or a
///   cancellation of an open session
pub fn check_transition(
    count_id: &str,
    current: StockCountStatus,
    next: StockCountStatus,
) -> CoreResult<()> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(CoreError::invalid_state(
            "Stock count",
            count_id,
            current,
            format!("move to {next}"),
        ))
    }
}

// =============================================================================
// Session & Lines
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockCount {
    pub id: String,
    pub count_date: NaiveDate,
    pub status: StockCountStatus,
    pub notes: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub reconciled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockCountLine {
    pub id: String,
    pub count_id: String,
    pub item_id: String,

    /// Ledger-derived stock when the session was created.
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub expected_quantity: Quantity,

    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub actual_quantity: Quantity,

    /// `actual - expected`.
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub discrepancy: Quantity,

    pub reconciled: bool,
    pub reconciled_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl StockCountLine {
    /// Sets the counted quantity and recomputes the discrepancy.
    pub fn set_actual(&mut self, actual: Quantity) {
        self.actual_quantity = actual;
        self.discrepancy = discrepancy(self.expected_quantity, actual);
    }

    /// Line still needs an adjustment entry on reconcile.
    pub fn needs_adjustment(&self) -> bool {
        !self.reconciled && !self.discrepancy.is_zero()
    }
}

/// `actual - expected`.
#[inline]
pub fn discrepancy(expected: Quantity, actual: Quantity) -> Quantity {
    actual - expected
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockCountWithLines {
    #[serde(flatten)]
    pub count: StockCount,
    pub lines: Vec<StockCountLine>,
}

impl StockCountWithLines {
    pub fn line_for(&self, item_id: &str) -> Option<&StockCountLine> {
        self.lines.iter().find(|l| l.item_id == item_id)
    }

    pub fn all_reconciled(&self) -> bool {
        self.lines.iter().all(|l| l.reconciled)
    }
}

/// A row of a count template: what the ledger says is on the shelf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountTemplateLine {
    pub item_id: String,
    pub sku: String,
    pub name: String,
    pub category: Option<String>,
    pub unit: String,
    pub expected_quantity: Quantity,
}

// =============================================================================
// Inputs & Results
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStockCountLine {
    pub item_id: String,
    /// Counted quantity; zero is a valid placeholder until counted.
    #[serde(default)]
    pub actual_quantity: Quantity,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewStockCountLine {
    pub fn new(item_id: impl Into<String>, actual_quantity: Quantity) -> Self {
        Self {
            item_id: item_id.into(),
            actual_quantity,
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewStockCount {
    pub count_date: NaiveDate,
    pub lines: Vec<NewStockCountLine>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewStockCount {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_optional_text("notes", self.notes.as_deref())?;
        validate_unique_ids("item_id", self.lines.iter().map(|l| l.item_id.as_str()))?;
        for line in &self.lines {
            validate_non_negative("actual_quantity", line.actual_quantity)?;
            validate_optional_text("line.notes", line.notes.as_deref())?;
        }
        Ok(())
    }
}

/// Outcome of one `reconcile` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationSummary {
    pub count_id: String,
    pub status: StockCountStatus,
    /// Adjustment entries written by this call.
    pub adjustments: Vec<LedgerEntry>,
    /// Lines marked reconciled by this call, with or without an entry.
    pub lines_reconciled: usize,
}

// =============================================================================
// Unit Tests
// =============================================================================
