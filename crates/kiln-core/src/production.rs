//! # Production Orders
//!
//! The production order state machine, output planning and progress
//! aggregation.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   ┌─────────┐  record_output   ┌─────────────┐  completed >= requested  │
//! │   │ PLANNED │ ───────────────► │ IN_PROGRESS │ ──────────────┐          │
//! │   └────┬────┘                  └──────┬──────┘               ▼          │
//! │        │                              │ record_output  ┌───────────┐    │
//! │        │ cancel                       └──────────────► │ COMPLETED │    │
//! │        ▼                                               └───────────┘    │
//! │   ┌───────────┐                                                         │
//! │   │ CANCELLED │      update / cancel / delete: PLANNED only            │
//! │   └───────────┘      record_output: PLANNED or IN_PROGRESS             │
//! │                                                                         │
//! │   A single record_output may jump PLANNED → COMPLETED.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Transitions only move forward. Terminal states accept nothing.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::quantity::{Percentage, Quantity};
use crate::validation::{
    validate_optional_text, validate_positive, validate_required, ValidationResult,
};

// =============================================================================
// Status & Priority
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ProductionStatus {
    Planned,
    InProgress,
    Completed,
    Cancelled,
}

impl ProductionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductionStatus::Planned => "planned",
            ProductionStatus::InProgress => "in_progress",
            ProductionStatus::Completed => "completed",
            ProductionStatus::Cancelled => "cancelled",
        }
    }

    /// Output may be recorded against planned and running orders.
    #[inline]
    pub fn accepts_output(&self) -> bool {
        matches!(self, ProductionStatus::Planned | ProductionStatus::InProgress)
    }

    /// Update, cancel and delete are only allowed before work starts.
    #[inline]
    pub fn is_editable(&self) -> bool {
        matches!(self, ProductionStatus::Planned)
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProductionStatus::Completed | ProductionStatus::Cancelled)
    }
}

impl fmt::Display for ProductionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

// =============================================================================
// Order & Record
// =============================================================================

/// A request to produce `quantity` units of a recipe's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProductionOrder {
    pub id: String,

    /// Optional human batch code, unique across orders.
    pub batch_number: Option<String>,

    pub recipe_id: String,

    /// Requested quantity of the output item.
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub quantity: Quantity,

    /// Sum of all recorded output. Never decreases.
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub completed_quantity: Quantity,

    pub planned_start: NaiveDate,
    pub priority: Priority,
    pub assigned_to: Option<String>,
    pub status: ProductionStatus,
    pub notes: Option<String>,
    pub created_by: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductionOrder {
    /// Quantity still to be produced (zero once complete).
    pub fn remaining(&self) -> Quantity {
        self.quantity.saturating_sub(self.completed_quantity)
    }

    /// Largest completed quantity allowed under the overrun tolerance.
    ///
    /// `requested × (100 + tolerance) / 100`
    pub fn completion_cap(&self, tolerance: Percentage) -> Quantity {
        match self.quantity.as_decimal().checked_mul(tolerance.grown_hundredths()) {
            Some(grown) => Quantity::new(grown / Decimal::ONE_HUNDRED),
            None => Quantity::new(Decimal::MAX),
        }
    }

    pub fn invalid_state(&self, operation: &str) -> CoreError {
        CoreError::invalid_state("Production order", &self.id, self.status, operation)
    }
}

/// One output-recording event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct ProductionRecord {
    pub id: String,
    pub order_id: String,
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub quantity: Quantity,
    pub worker_id: String,
    pub notes: Option<String>,
    /// Set when the batch had a quality problem; triggers a notification.
    pub quality_note: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Inputs
// =============================================================================

/// Input for creating an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProductionOrder {
    pub recipe_id: String,
    pub quantity: Quantity,
    pub planned_start: NaiveDate,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub assigned_to: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub batch_number: Option<String>,
}

impl NewProductionOrder {
    pub fn validate(&self) -> ValidationResult<()> {
        validate_required("recipe_id", &self.recipe_id, 64)?;
        validate_positive("quantity", self.quantity)?;
        validate_optional_text("notes", self.notes.as_deref())?;
        if let Some(batch) = &self.batch_number {
            validate_required("batch_number", batch, 64)?;
        }
        Ok(())
    }
}

/// Editable fields of a planned order. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProductionOrder {
    pub quantity: Option<Quantity>,
    pub planned_start: Option<NaiveDate>,
    pub priority: Option<Priority>,
    pub assigned_to: Option<String>,
    pub notes: Option<String>,
}

impl UpdateProductionOrder {
    pub fn validate(&self) -> ValidationResult<()> {
        if let Some(qty) = self.quantity {
            validate_positive("quantity", qty)?;
        }
        validate_optional_text("notes", self.notes.as_deref())?;
        Ok(())
    }

    /// Applies the changes to an order that is still planned.
    pub fn apply_to(&self, order: &mut ProductionOrder) -> CoreResult<()> {
        if !order.status.is_editable() {
            return Err(order.invalid_state("update"));
        }
        self.validate()?;

        if let Some(qty) = self.quantity {
            order.quantity = qty;
        }
        if let Some(date) = self.planned_start {
            order.planned_start = date;
        }
        if let Some(priority) = self.priority {
            order.priority = priority;
        }
        if let Some(assignee) = &self.assigned_to {
            order.assigned_to = Some(assignee.clone());
        }
        if let Some(notes) = &self.notes {
            order.notes = Some(notes.clone());
        }
        Ok(())
    }
}

/// Input for one output-recording event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputRecord {
    pub quantity: Quantity,
    pub worker_id: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub quality_note: Option<String>,
}

impl OutputRecord {
    pub fn new(quantity: Quantity, worker_id: impl Into<String>) -> Self {
        Self {
            quantity,
            worker_id: worker_id.into(),
            notes: None,
            quality_note: None,
        }
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn quality_note(mut self, note: impl Into<String>) -> Self {
        self.quality_note = Some(note.into());
        self
    }
}

// =============================================================================
// Output Planning
// =============================================================================

/// What one `record_output` call does to the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputTransition {
    pub completed_quantity: Quantity,
    pub status: ProductionStatus,
    /// The order moves out of `planned` with this call.
    pub starts: bool,
    /// The order reaches `completed` with this call.
    pub completes: bool,
}

/// Checks an increment against the order and computes the resulting state.
///
/// ## Errors
/// - `InvalidState` unless the order is planned or in progress
/// - `InvalidArgument` for a non-positive increment, an empty worker id, or
///   an increment that would exceed `requested × (1 + tolerance)`
///
/// ```text
/// requested 10, completed 6, tolerance 0%
///   increment 3 → completed 9,  in_progress
///   increment 4 → completed 10, completed
///   increment 5 → InvalidArgument (11 > 10)
/// ```
pub fn plan_output(
    order: &ProductionOrder,
    output: &OutputRecord,
    tolerance: Percentage,
) -> CoreResult<OutputTransition> {
    if !order.status.accepts_output() {
        return Err(order.invalid_state("record output"));
    }

    validate_positive("quantity", output.quantity)?;
    validate_required("worker_id", &output.worker_id, 200)?;
    validate_optional_text("notes", output.notes.as_deref())?;
    validate_optional_text("quality_note", output.quality_note.as_deref())?;

    let completed_quantity = order
        .completed_quantity
        .checked_add(output.quantity)
        .ok_or_else(|| {
            ValidationError::invalid("quantity", format!("{} is too large", output.quantity))
        })?;
    let cap = order.completion_cap(tolerance);
    if completed_quantity > cap {
        return Err(ValidationError::invalid(
            "quantity",
            format!(
                "recording {} would bring completed quantity to {}, above the allowed {}",
                output.quantity, completed_quantity, cap
            ),
        )
        .into());
    }

    let completes = completed_quantity >= order.quantity;
    Ok(OutputTransition {
        completed_quantity,
        status: if completes {
            ProductionStatus::Completed
        } else {
            ProductionStatus::InProgress
        },
        starts: order.status == ProductionStatus::Planned,
        completes,
    })
}

// =============================================================================
// Progress
// =============================================================================

/// One worker's share of an order's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerContribution {
    pub quantity: Quantity,
    pub record_count: u32,
    pub last_recorded_at: DateTime<Utc>,
    pub record_ids: Vec<String>,
}

/// Progress of an order derived from its production records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductionProgress {
    pub order_id: String,
    pub status: ProductionStatus,
    pub requested_quantity: Quantity,
    pub completed_quantity: Quantity,
    /// `completed / requested × 100`, two decimal places.
    pub percent_complete: Decimal,
    /// Keyed by worker id.
    pub workers: BTreeMap<String, WorkerContribution>,
}

/// Aggregates records into per-worker contributions.
pub fn summarize_progress(
    order: &ProductionOrder,
    records: &[ProductionRecord],
) -> ProductionProgress {
    let mut workers: BTreeMap<String, WorkerContribution> = BTreeMap::new();

    for record in records {
        workers
            .entry(record.worker_id.clone())
            .and_modify(|c| {
                c.quantity += record.quantity;
                c.record_count += 1;
                c.last_recorded_at = c.last_recorded_at.max(record.recorded_at);
                c.record_ids.push(record.id.clone());
            })
            .or_insert_with(|| WorkerContribution {
                quantity: record.quantity,
                record_count: 1,
                last_recorded_at: record.recorded_at,
                record_ids: vec![record.id.clone()],
            });
    }

    let completed_quantity: Quantity = records.iter().map(|r| r.quantity).sum();

    ProductionProgress {
        order_id: order.id.clone(),
        status: order.status,
        requested_quantity: order.quantity,
        completed_quantity,
        percent_complete: completed_quantity.percent_of(order.quantity),
        workers,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn order(requested: i64, completed: i64, status: ProductionStatus) -> ProductionOrder {
        let now = Utc::now();
        ProductionOrder {
            id: "po-1".to_string(),
            batch_number: None,
            recipe_id: "recipe-1".to_string(),
            quantity: Quantity::from(requested),
            completed_quantity: Quantity::from(completed),
            planned_start: now.date_naive(),
            priority: Priority::Normal,
            assigned_to: None,
            status,
            notes: None,
            created_by: "planner".to_string(),
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn record(id: &str, worker: &str, qty: i64, at: DateTime<Utc>) -> ProductionRecord {
        ProductionRecord {
            id: id.to_string(),
            order_id: "po-1".to_string(),
            quantity: Quantity::from(qty),
            worker_id: worker.to_string(),
            notes: None,
            quality_note: None,
            recorded_at: at,
        }
    }

    #[test]
    fn test_first_output_starts_order() {
        let o = order(10, 0, ProductionStatus::Planned);
        let t = plan_output(&o, &OutputRecord::new(Quantity::from(4), "w1"), Percentage::ZERO)
            .unwrap();
        assert!(t.starts);
        assert!(!t.completes);
        assert_eq!(t.status, ProductionStatus::InProgress);
        assert_eq!(t.completed_quantity, Quantity::from(4));
    }

    #[test]
    fn test_reaching_requested_completes() {
        let o = order(10, 6, ProductionStatus::InProgress);
        let t = plan_output(&o, &OutputRecord::new(Quantity::from(4), "w1"), Percentage::ZERO)
            .unwrap();
        assert!(t.completes);
        assert!(!t.starts);
        assert_eq!(t.status, ProductionStatus::Completed);
    }

    #[test]
    fn test_single_increment_can_complete_planned_order() {
        let o = order(10, 0, ProductionStatus::Planned);
        let t = plan_output(&o, &OutputRecord::new(Quantity::from(10), "w1"), Percentage::ZERO)
            .unwrap();
        assert!(t.starts && t.completes);
    }

    #[test]
    fn test_overrun_rejected_without_tolerance() {
        let o = order(10, 6, ProductionStatus::InProgress);
        let err = plan_output(&o, &OutputRecord::new(Quantity::from(5), "w1"), Percentage::ZERO)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_overrun_allowed_within_tolerance() {
        let o = order(10, 6, ProductionStatus::InProgress);
        let tolerance = Percentage::whole(10).unwrap();
        let t = plan_output(&o, &OutputRecord::new(Quantity::from(5), "w1"), tolerance).unwrap();
        assert_eq!(t.completed_quantity, Quantity::from(11));
        assert!(t.completes);

        let err = plan_output(&o, &OutputRecord::new(Quantity::from(6), "w1"), tolerance)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_terminal_orders_reject_output() {
        for status in [ProductionStatus::Completed, ProductionStatus::Cancelled] {
            let o = order(10, 10, status);
            let err = plan_output(&o, &OutputRecord::new(Quantity::from(1), "w1"), Percentage::ZERO)
                .unwrap_err();
            assert!(matches!(err, CoreError::InvalidState { .. }));
        }
    }

    #[test]
    fn test_non_positive_increment_rejected() {
        let o = order(10, 0, ProductionStatus::Planned);
        let err = plan_output(&o, &OutputRecord::new(Quantity::ZERO, "w1"), Percentage::ZERO)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_update_only_when_planned() {
        let mut o = order(10, 0, ProductionStatus::InProgress);
        let update = UpdateProductionOrder {
            quantity: Some(Quantity::from(20)),
            ..Default::default()
        };
        assert!(matches!(
            update.apply_to(&mut o),
            Err(CoreError::InvalidState { .. })
        ));

        let mut o = order(10, 0, ProductionStatus::Planned);
        update.apply_to(&mut o).unwrap();
        assert_eq!(o.quantity, Quantity::from(20));
    }

    #[test]
    fn test_progress_breakdown_by_worker() {
        let o = order(10, 7, ProductionStatus::InProgress);
        let t0 = Utc::now();
        let records = vec![
            record("r1", "alice", 3, t0),
            record("r2", "bob", 2, t0 + Duration::minutes(5)),
            record("r3", "alice", 2, t0 + Duration::minutes(10)),
        ];

        let progress = summarize_progress(&o, &records);
        assert_eq!(progress.completed_quantity, Quantity::from(7));
        assert_eq!(progress.percent_complete, Decimal::new(70, 0));

        let alice = &progress.workers["alice"];
        assert_eq!(alice.quantity, Quantity::from(5));
        assert_eq!(alice.record_count, 2);
        assert_eq!(alice.last_recorded_at, t0 + Duration::minutes(10));
        assert_eq!(alice.record_ids, vec!["r1".to_string(), "r3".to_string()]);

        assert_eq!(progress.workers["bob"].quantity, Quantity::from(2));
    }

    #[test]
    fn test_progress_without_records() {
        let o = order(10, 0, ProductionStatus::Planned);
        let progress = summarize_progress(&o, &[]);
        assert!(progress.completed_quantity.is_zero());
        assert!(progress.workers.is_empty());
        assert_eq!(progress.percent_complete, Decimal::ZERO);
    }
}
