//! # Validation Module
//!
//! Input validation utilities for Kiln.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Caller (HTTP handler, job)                                   │
//! │  └── Type validation (deserialization, Percentage range)               │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Repository entry (kiln-db)                                   │
//! │  └── THIS MODULE: Business rule validation, before any write           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL / CHECK constraints                                      │
//! │  ├── UNIQUE constraints (sku, batch_number)                            │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use kiln_core::validation::{validate_sku, validate_positive};
//! use kiln_core::Quantity;
//!
//! validate_sku("FLOUR-25KG").unwrap();
//! validate_positive("quantity", Quantity::from(5)).unwrap();
//! ```

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::quantity::Quantity;
use crate::types::{NewItem, NewRecipe};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Longest accepted reference or notes text.
pub const MAX_NOTE_LENGTH: usize = 1000;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a SKU (Stock Keeping Unit).
///
/// ## Rules
/// - Must not be empty
/// - At most 50 characters
/// - Only alphanumeric characters, hyphens, underscores
///
/// ## Example
/// ```rust
/// use kiln_core::validation::validate_sku;
///
/// assert!(validate_sku("FLOUR-25KG").is_ok());
/// assert!(validate_sku("").is_err());
/// assert!(validate_sku("A B").is_err());
/// ```
pub fn validate_sku(sku: &str) -> ValidationResult<()> {
    let sku = sku.trim();

    validate_required("sku", sku, 50)?;

    if !sku
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::invalid(
            "sku",
            "must contain only letters, numbers, hyphens, and underscores",
        ));
    }

    Ok(())
}

/// Validates a non-empty, bounded text field.
pub fn validate_required(field: &str, value: &str, max: usize) -> ValidationResult<()> {
    let value = value.trim();

    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if value.chars().count() > max {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max,
        });
    }

    Ok(())
}

/// Validates optional free text (notes, references, quality notes).
pub fn validate_optional_text(field: &str, value: Option<&str>) -> ValidationResult<()> {
    match value {
        Some(v) if v.chars().count() > MAX_NOTE_LENGTH => Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_NOTE_LENGTH,
        }),
        _ => Ok(()),
    }
}

/// Validates an actor id supplied by the authentication layer.
///
/// The id is opaque; only emptiness is checked.
pub fn validate_actor(actor: &str) -> ValidationResult<()> {
    validate_required("actor", actor, 200)
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates that a quantity is strictly positive.
pub fn validate_positive(field: &str, qty: Quantity) -> ValidationResult<()> {
    if !qty.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates that a quantity is zero or greater.
pub fn validate_non_negative(field: &str, qty: Quantity) -> ValidationResult<()> {
    if qty.is_negative() {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a price or cost in cents.
///
/// Zero is allowed (free samples, zero-cost by-products).
pub fn validate_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a history date range. Either bound may be open.
pub fn validate_date_range(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> ValidationResult<()> {
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(ValidationError::invalid(
                "date_range",
                "start must not be after end",
            ));
        }
    }
    Ok(())
}

// =============================================================================
// Aggregate Validators
// =============================================================================

/// Validates a new item before insert.
pub fn validate_new_item(item: &NewItem) -> ValidationResult<()> {
    validate_sku(&item.sku)?;
    validate_required("name", &item.name, 200)?;
    validate_required("unit", &item.unit, 20)?;
    validate_cents("unit_cost_cents", item.unit_cost_cents)?;
    validate_non_negative("min_stock", item.min_stock)?;
    Ok(())
}

/// Validates a recipe's structure.
///
/// ## Rules
/// - Name, output unit are required
/// - Output quantity > 0
/// - Every line quantity > 0, unit required
/// - No line may consume the recipe's own output item
///
/// Item existence is checked by the repository, which owns the data.
pub fn validate_new_recipe(recipe: &NewRecipe) -> ValidationResult<()> {
    validate_required("name", &recipe.name, 200)?;
    validate_required("output_unit", &recipe.output_unit, 20)?;
    validate_required("output_item_id", &recipe.output_item_id, 64)?;
    validate_positive("output_quantity", recipe.output_quantity)?;

    for line in &recipe.lines {
        validate_positive("line.quantity", line.quantity)?;
        validate_required("line.unit", &line.unit, 20)?;
        if line.item_id == recipe.output_item_id {
            return Err(ValidationError::invalid(
                "line.item_id",
                "a recipe cannot consume its own output item",
            ));
        }
    }

    Ok(())
}

/// Rejects the same id appearing twice in one request.
pub fn validate_unique_ids<'a>(
    field: &str,
    ids: impl IntoIterator<Item = &'a str>,
) -> ValidationResult<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ValidationError::Duplicate {
                field: field.to_string(),
                value: id.to_string(),
            });
        }
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemKind, NewRecipeLine};
    use chrono::Duration;

    #[test]
    fn test_validate_sku() {
        assert!(validate_sku("FLOUR-25KG").is_ok());
        assert!(validate_sku("sugar_1").is_ok());
        assert!(validate_sku("").is_err());
        assert!(validate_sku("   ").is_err());
        assert!(validate_sku(&"A".repeat(51)).is_err());
        assert!(validate_sku("HAS SPACE").is_err());
    }

    #[test]
    fn test_validate_quantities() {
        assert!(validate_positive("quantity", Quantity::from(1)).is_ok());
        assert!(validate_positive("quantity", Quantity::ZERO).is_err());
        assert!(validate_non_negative("quantity", Quantity::ZERO).is_ok());
        assert!(validate_non_negative("quantity", Quantity::from(-1)).is_err());
    }

    #[test]
    fn test_validate_date_range() {
        let now = Utc::now();
        assert!(validate_date_range(Some(now), Some(now)).is_ok());
        assert!(validate_date_range(None, Some(now)).is_ok());
        assert!(validate_date_range(Some(now + Duration::hours(1)), Some(now)).is_err());
    }

    #[test]
    fn test_validate_new_item() {
        let mut item = NewItem {
            sku: "FLOUR".to_string(),
            name: "Flour".to_string(),
            kind: ItemKind::RawMaterial,
            category: Some("dry goods".to_string()),
            unit: "kg".to_string(),
            unit_cost_cents: 250,
            min_stock: Quantity::from(10),
        };
        assert!(validate_new_item(&item).is_ok());

        item.unit_cost_cents = -1;
        assert!(validate_new_item(&item).is_err());
    }

    #[test]
    fn test_recipe_cannot_consume_its_output() {
        let recipe = NewRecipe {
            name: "Loop".to_string(),
            output_item_id: "dough".to_string(),
            output_quantity: Quantity::from(1),
            output_unit: "kg".to_string(),
            lines: vec![NewRecipeLine::new("dough", Quantity::from(1), "kg")],
        };
        let err = validate_new_recipe(&recipe).unwrap_err();
        assert!(matches!(err, ValidationError::Invalid { .. }));
    }

    #[test]
    fn test_recipe_requires_positive_output() {
        let recipe = NewRecipe {
            name: "Cookies".to_string(),
            output_item_id: "cookies".to_string(),
            output_quantity: Quantity::ZERO,
            output_unit: "pack".to_string(),
            lines: vec![],
        };
        assert!(matches!(
            validate_new_recipe(&recipe),
            Err(ValidationError::MustBePositive { .. })
        ));
    }

    #[test]
    fn test_unique_ids() {
        assert!(validate_unique_ids("item_id", ["a", "b"]).is_ok());
        assert!(matches!(
            validate_unique_ids("item_id", ["a", "b", "a"]),
            Err(ValidationError::Duplicate { .. })
        ));
    }
}
