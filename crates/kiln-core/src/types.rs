//! # Domain Types
//!
//! Items and recipes: the catalogue side of Kiln.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Item       │   │     Recipe      │   │   RecipeLine    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │◄──│  output_item_id │   │  recipe_id (FK) │       │
//! │  │  sku (business) │   │  output_quantity│◄──│  item_id (FK)   │──►Item│
//! │  │  kind           │   │  output_unit    │   │  quantity       │       │
//! │  │  current_stock  │   │  is_active      │   │  wastage_percent│       │
//! │  │  unit_cost_cents│   └─────────────────┘   └─────────────────┘       │
//! │  └─────────────────┘                                                    │
//! │                                                                         │
//! │  Ledger, production and stock-count types live in their own modules.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every item has:
//! - `id`: UUID v4 - immutable, used for database relations
//! - `sku`: human-readable business key, unique

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::quantity::{Percentage, Quantity};

// =============================================================================
// Item Kind
// =============================================================================

/// Whether an item is bought in or made here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    #[default]
    RawMaterial,
    FinishedGood,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::RawMaterial => "raw_material",
            ItemKind::FinishedGood => "finished_good",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Item
// =============================================================================

/// A stocked good: a raw material or a finished product.
///
/// `current_stock` is derived from the ledger; it only ever changes inside
/// a ledger write.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Item {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Stock Keeping Unit - business identifier.
    pub sku: String,

    pub name: String,

    pub kind: ItemKind,

    /// Free-form grouping used by stock-count templates.
    pub category: Option<String>,

    /// Unit of measure (kg, l, pack, ...).
    pub unit: String,

    /// Current stock level (running fold of ledger entries).
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub current_stock: Quantity,

    /// Cost per unit in cents.
    pub unit_cost_cents: i64,

    /// Threshold at or below which the item counts as low on stock.
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub min_stock: Quantity,

    /// Whether item is active (soft delete).
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Item {
    /// Returns the unit cost as Money type.
    #[inline]
    pub fn unit_cost(&self) -> Money {
        Money::from_cents(self.unit_cost_cents)
    }

    /// True when a positive minimum is configured and stock is at or below it.
    pub fn is_low_stock(&self) -> bool {
        self.min_stock.is_positive() && self.current_stock <= self.min_stock
    }
}

/// Input for creating an item. Stock always starts at zero; opening
/// balances are recorded as purchases or adjustments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    pub sku: String,
    pub name: String,
    #[serde(default)]
    pub kind: ItemKind,
    #[serde(default)]
    pub category: Option<String>,
    pub unit: String,
    #[serde(default)]
    pub unit_cost_cents: i64,
    #[serde(default)]
    pub min_stock: Quantity,
}

/// Editable item attributes. `None` leaves a field unchanged.
///
/// There is deliberately no stock field here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateItem {
    pub name: Option<String>,
    pub category: Option<String>,
    pub unit: Option<String>,
    pub unit_cost_cents: Option<i64>,
    pub min_stock: Option<Quantity>,
}

// =============================================================================
// Recipe
// =============================================================================

/// How to produce `output_quantity` units of one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Recipe {
    pub id: String,
    pub name: String,
    pub output_item_id: String,

    /// Batch size the line quantities are written for (> 0).
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub output_quantity: Quantity,

    pub output_unit: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One input of a recipe, quantities given per batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct RecipeLine {
    pub id: String,
    pub recipe_id: String,

    /// Display order within the recipe, starting at 0.
    pub position: i64,

    pub item_id: String,

    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub quantity: Quantity,

    pub unit: String,

    /// Extra material lost in production, applied multiplicatively.
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub wastage_percent: Percentage,
}

/// A recipe together with its ordered lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeWithLines {
    #[serde(flatten)]
    pub recipe: Recipe,
    pub lines: Vec<RecipeLine>,
}

/// Input for creating a recipe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecipe {
    pub name: String,
    pub output_item_id: String,
    pub output_quantity: Quantity,
    pub output_unit: String,
    #[serde(default)]
    pub lines: Vec<NewRecipeLine>,
}

/// Input for one recipe line. Missing wastage means 0%.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRecipeLine {
    pub item_id: String,
    pub quantity: Quantity,
    pub unit: String,
    #[serde(default)]
    pub wastage_percent: Percentage,
}

impl NewRecipeLine {
    /// Line without wastage.
    pub fn new(item_id: impl Into<String>, quantity: Quantity, unit: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            quantity,
            unit: unit.into(),
            wastage_percent: Percentage::ZERO,
        }
    }

    pub fn with_wastage(mut self, wastage: Percentage) -> Self {
        self.wastage_percent = wastage;
        self
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn item(current: i64, min: i64) -> Item {
        let now = Utc::now();
        Item {
            id: "item-1".to_string(),
            sku: "FLOUR".to_string(),
            name: "Flour".to_string(),
            kind: ItemKind::RawMaterial,
            category: None,
            unit: "kg".to_string(),
            current_stock: Quantity::from(current),
            unit_cost_cents: 250,
            min_stock: Quantity::from(min),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_low_stock() {
        assert!(item(5, 5).is_low_stock());
        assert!(item(4, 5).is_low_stock());
        assert!(!item(6, 5).is_low_stock());
        // No threshold configured
        assert!(!item(0, 0).is_low_stock());
    }

    #[test]
    fn test_item_kind_serde() {
        let json = serde_json::to_string(&ItemKind::FinishedGood).unwrap();
        assert_eq!(json, "\"finished_good\"");
        assert_eq!(ItemKind::RawMaterial.to_string(), "raw_material");
    }

    #[test]
    fn test_new_recipe_line_defaults_wastage() {
        let json = r#"{"item_id":"flour","quantity":"2","unit":"kg"}"#;
        let line: NewRecipeLine = serde_json::from_str(json).unwrap();
        assert!(line.wastage_percent.is_zero());
        assert_eq!(line.quantity, Quantity::from(2));
    }
}
