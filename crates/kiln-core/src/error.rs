//! # Error Types
//!
//! Domain-specific error types for kiln-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  kiln-core errors (this file)                                          │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  kiln-db errors (separate crate)                                       │
//! │  └── DbError          - Wraps CoreError + storage failures             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → caller                  │
//! │                                                                         │
//! │  Every error maps to one ErrorKind:                                    │
//! │  NotFound │ InvalidArgument │ InvalidState │ InsufficientStock │       │
//! │  InsufficientMaterials │ Conflict │ Storage                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (item, order, status)
//! 3. Errors are enum variants, never String
//! 4. Stock and state violations are never coerced into success

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bom::Shortage;
use crate::quantity::Quantity;

// =============================================================================
// Error Kind
// =============================================================================

/// The caller-facing category of an error.
///
/// Transport layers map these to status codes; tests match on them instead
/// of on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    InvalidState,
    InsufficientStock,
    InsufficientMaterials,
    Conflict,
    /// Failure of the durable store itself (connection, query, lock timeout).
    Storage,
}

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An item, recipe, order or count session does not exist
    /// (or was deactivated).
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Input rejected before any state was touched.
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),

    /// The operation is not permitted in the entity's current status.
    ///
    /// ## When This Occurs
    /// - Recording output on a completed or cancelled order
    /// - Editing or deleting an order that already started
    /// - Reconciling a count session that is still in progress
    #[error("{entity} {id} is {status}, cannot {operation}")]
    InvalidState {
        entity: String,
        id: String,
        status: String,
        operation: String,
    },

    /// A consuming ledger entry would drive stock below zero.
    ///
    /// ## User Workflow
    /// ```text
    /// record(flour, sale, 10)
    ///      │
    ///      ▼
    /// current stock: 2
    ///      │
    ///      ▼
    /// InsufficientStock { item_id: "flour", available: 2, requested: 10 }
    ///      │
    ///      ▼
    /// nothing written, stock remains 2
    /// ```
    #[error("Insufficient stock for {item_id}: available {available}, requested {requested}")]
    InsufficientStock {
        item_id: String,
        available: Quantity,
        requested: Quantity,
    },

    /// One or more recipe inputs cannot cover the requested production.
    #[error("Insufficient materials: {} input(s) short", .shortages.len())]
    InsufficientMaterials { shortages: Vec<Shortage> },

    /// Duplicate identifying key (e.g. batch number, SKU).
    #[error("Duplicate {field}: '{value}' already exists")]
    Conflict { field: String, value: String },
}

impl CoreError {
    /// Creates a NotFound error for a given entity type and ID.
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Creates an InvalidState error.
    pub fn invalid_state(
        entity: impl Into<String>,
        id: impl Into<String>,
        status: impl std::fmt::Display,
        operation: impl Into<String>,
    ) -> Self {
        CoreError::InvalidState {
            entity: entity.into(),
            id: id.into(),
            status: status.to_string(),
            operation: operation.into(),
        }
    }

    /// Returns the caller-facing category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            CoreError::InvalidState { .. } => ErrorKind::InvalidState,
            CoreError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            CoreError::InsufficientMaterials { .. } => ErrorKind::InsufficientMaterials,
            CoreError::Conflict { .. } => ErrorKind::Conflict,
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be strictly positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must be zero or greater.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: String,
        min: String,
        max: String,
    },

    /// Invalid format or inconsistent combination of values.
    #[error("{field} is invalid: {reason}")]
    Invalid { field: String, reason: String },

    /// Duplicate value inside a single request (e.g. an item counted twice).
    #[error("{field} '{value}' appears more than once")]
    Duplicate { field: String, value: String },
}

impl ValidationError {
    /// Creates an Invalid error.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
