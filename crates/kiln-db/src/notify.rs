//! # Production Notifications
//!
//! The seam through which production orders tell the outside world what
//! happened. Delivery (email, chat, push) lives behind [`Notifier`].
//!
//! ## Dispatch
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      When Events Fire                                   │
//! │                                                                         │
//! │  record_output(order, 10, "ana", quality_note = "burnt edges")         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  tx.commit()  ← nothing is sent for a rolled-back call                 │
//! │       │                                                                 │
//! │       ├──► OutputRecorded { order_id, record_id, quantity, worker_id } │
//! │       ├──► QualityIssue   { order_id, record_id, worker_id, note }     │
//! │       ├──► OrderCompleted { .. }   (only when the order completed)     │
//! │       └──► LowStock       { .. }   (per input at/below min_stock)      │
//! │                                                                         │
//! │  Notifier::notify() errors are logged at WARN and swallowed.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use kiln_core::Quantity;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Something a production order did that someone may want to hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProductionEvent {
    /// A batch of output was recorded against an order.
    OutputRecorded {
        order_id: String,
        record_id: String,
        quantity: Quantity,
        worker_id: String,
    },

    /// The order reached its requested quantity.
    OrderCompleted {
        order_id: String,
        recipe_id: String,
        completed_quantity: Quantity,
        completed_at: DateTime<Utc>,
    },

    /// A production record carried a quality note.
    QualityIssue {
        order_id: String,
        record_id: String,
        worker_id: String,
        note: String,
    },

    /// An input fell to or below its minimum stock after consumption.
    LowStock {
        item_id: String,
        sku: String,
        current_stock: Quantity,
        min_stock: Quantity,
    },
}

impl ProductionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProductionEvent::OutputRecorded { .. } => "output_recorded",
            ProductionEvent::OrderCompleted { .. } => "order_completed",
            ProductionEvent::QualityIssue { .. } => "quality_issue",
            ProductionEvent::LowStock { .. } => "low_stock",
        }
    }
}

/// Delivery failure reported by a [`Notifier`].
#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Receives production events after the writing transaction committed.
///
/// Implementations must not block for long; they run on the caller's task.
pub trait Notifier: Send + Sync + fmt::Debug {
    fn notify(&self, event: &ProductionEvent) -> Result<(), NotifyError>;
}

/// Default notifier: one structured log line per event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &ProductionEvent) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(event).map_err(|e| NotifyError(e.to_string()))?;
        info!(event = event.name(), payload = %payload, "Production event");
        Ok(())
    }
}

/// Sends every event, logging and suppressing failures.
pub(crate) fn dispatch(notifier: &dyn Notifier, events: &[ProductionEvent]) {
    for event in events {
        if let Err(e) = notifier.notify(event) {
            warn!(event = event.name(), error = %e, "Notification dropped");
        }
    }
}
