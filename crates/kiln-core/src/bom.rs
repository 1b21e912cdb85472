//! # Bill of Materials
//!
//! Turns a recipe written for one batch size into requirements, costs and
//! availability for an arbitrary desired quantity.
//!
//! ## Scaling Formula
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │              line_quantity × desired × (100 + wastage%)                 │
//! │  required = ─────────────────────────────────────────────               │
//! │                      output_quantity × 100                              │
//! │                                                                         │
//! │  Cookies: 10 packs per batch, Flour 2 kg, 0% wastage                   │
//! │    desired 20 → 2 × 20 × 100 / (10 × 100) = 4 kg                       │
//! │                                                                         │
//! │  Every multiplication happens before the single division, so exact     │
//! │  inputs give exact results and requirements(2Q) = 2 × requirements(Q). │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The functions here are pure. `kiln-db` loads the recipe and stock and
//! hands them in.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;
use crate::quantity::{Percentage, Quantity};
use crate::types::{Item, RecipeWithLines};
use crate::validation::validate_positive;

// =============================================================================
// Result Types
// =============================================================================

/// One scaled input of a recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRequirement {
    pub line_id: String,
    pub item_id: String,
    pub required_quantity: Quantity,
    pub unit: String,
}

/// One costed input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostLine {
    pub item_id: String,
    pub required_quantity: Quantity,
    pub unit_cost: Money,
    pub line_cost: Money,
}

/// Full costing of a recipe at a desired quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeCost {
    pub recipe_id: String,
    pub desired_quantity: Quantity,
    pub lines: Vec<CostLine>,
    pub total_cost: Money,
    /// `total_cost / desired_quantity`, per output unit.
    pub unit_cost: Money,
}

/// An input that cannot be covered by current stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortage {
    pub item_id: String,
    pub required: Quantity,
    pub available: Quantity,
    /// `required - available`, always positive.
    pub shortfall: Quantity,
}

/// Answer to "can we make this many right now?".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub is_available: bool,
    pub shortages: Vec<Shortage>,
}

// =============================================================================
// Scaling
// =============================================================================

/// Scales one line quantity from a batch of `output_quantity` to `desired`.
///
/// ## Errors
/// - `InvalidArgument` if `output_quantity` is zero or the product leaves the
///   decimal range
pub fn scale_line(
    line_quantity: Quantity,
    desired: Quantity,
    output_quantity: Quantity,
    wastage: Percentage,
) -> CoreResult<Quantity> {
    if output_quantity.is_zero() {
        return Err(ValidationError::invalid(
            "output_quantity",
            "recipe batch size must be positive",
        )
        .into());
    }

    let too_large = || {
        CoreError::from(ValidationError::invalid(
            "quantity",
            format!("{line_quantity} scaled to {desired} is too large to represent"),
        ))
    };

    let numerator = line_quantity
        .as_decimal()
        .checked_mul(desired.as_decimal())
        .and_then(|n| n.checked_mul(wastage.grown_hundredths()))
        .ok_or_else(too_large)?;
    let denominator = output_quantity
        .as_decimal()
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or_else(too_large)?;

    numerator
        .checked_div(denominator)
        .map(Quantity::new)
        .ok_or_else(too_large)
}

/// Scaled requirements for `desired` units of the recipe's output, one per
/// line in line order.
///
/// ## Errors
/// - `InvalidArgument` if `desired <= 0` or the recipe has a zero batch size
pub fn requirements(
    recipe: &RecipeWithLines,
    desired: Quantity,
) -> CoreResult<Vec<MaterialRequirement>> {
    validate_positive("desired_quantity", desired)?;
    validate_positive("output_quantity", recipe.recipe.output_quantity)?;

    recipe
        .lines
        .iter()
        .map(|line| {
            let required = scale_line(
                line.quantity,
                desired,
                recipe.recipe.output_quantity,
                line.wastage_percent,
            )?;

            Ok(MaterialRequirement {
                line_id: line.id.clone(),
                item_id: line.item_id.clone(),
                required_quantity: required,
                unit: line.unit.clone(),
            })
        })
        .collect()
}

/// Sums requirements per item, ordered by item id.
///
/// The ascending order is the order in which writers claim item rows.
///
/// ## Errors
/// - `InvalidArgument` if an item's total leaves the decimal range
pub fn totals_by_item(
    requirements: &[MaterialRequirement],
) -> CoreResult<BTreeMap<String, Quantity>> {
    let mut totals: BTreeMap<String, Quantity> = BTreeMap::new();
    for req in requirements {
        let total = totals.entry(req.item_id.clone()).or_default();
        *total = total.checked_add(req.required_quantity).ok_or_else(|| {
            ValidationError::invalid(
                "quantity",
                format!("total requirement for item {} is too large", req.item_id),
            )
        })?;
    }
    Ok(totals)
}

// =============================================================================
// Costing
// =============================================================================

/// Costs a set of requirements using each input item's unit cost.
///
/// `items` must contain every required item; a missing item is `NotFound`.
pub fn cost(
    recipe: &RecipeWithLines,
    desired: Quantity,
    items: &BTreeMap<String, Item>,
) -> CoreResult<RecipeCost> {
    let reqs = requirements(recipe, desired)?;

    let mut lines = Vec::with_capacity(reqs.len());
    for req in reqs {
        let item = items
            .get(&req.item_id)
            .ok_or_else(|| CoreError::not_found("Item", req.item_id.clone()))?;
        let unit_cost = item.unit_cost();
        lines.push(CostLine {
            line_cost: unit_cost.multiply_quantity(req.required_quantity),
            item_id: req.item_id,
            required_quantity: req.required_quantity,
            unit_cost,
        });
    }

    let total_cost = lines
        .iter()
        .try_fold(Money::zero(), |total, line| total.checked_add(line.line_cost))
        .ok_or_else(|| ValidationError::invalid("quantity", "recipe cost is too large"))?;
    let unit_cost = total_cost.divide_by_quantity(desired).unwrap_or_default();

    Ok(RecipeCost {
        recipe_id: recipe.recipe.id.clone(),
        desired_quantity: desired,
        lines,
        total_cost,
        unit_cost,
    })
}

// =============================================================================
// Availability
// =============================================================================

/// Compares per-item required totals against available stock.
///
/// Items absent from `stock` count as zero available. Shortages come out in
/// item-id order.
pub fn shortages(
    totals: &BTreeMap<String, Quantity>,
    stock: impl Fn(&str) -> Quantity,
) -> Vec<Shortage> {
    totals
        .iter()
        .filter_map(|(item_id, required)| {
            let available = stock(item_id);
            (available < *required).then(|| Shortage {
                item_id: item_id.clone(),
                required: *required,
                available,
                shortfall: *required - available,
            })
        })
        .collect()
}

/// Availability of a recipe at `desired` against the given stock levels.
pub fn check_availability(
    recipe: &RecipeWithLines,
    desired: Quantity,
    stock: impl Fn(&str) -> Quantity,
) -> CoreResult<Availability> {
    let reqs = requirements(recipe, desired)?;
    let shortages = shortages(&totals_by_item(&reqs)?, stock);
    Ok(Availability {
        is_available: shortages.is_empty(),
        shortages,
    })
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ItemKind, Recipe, RecipeLine};
    use chrono::Utc;
    use proptest::prelude::*;

    fn recipe(output: Quantity, lines: Vec<(&str, Quantity, Percentage)>) -> RecipeWithLines {
        let now = Utc::now();
        RecipeWithLines {
            recipe: Recipe {
                id: "cookies-recipe".to_string(),
                name: "Cookies".to_string(),
                output_item_id: "cookies".to_string(),
                output_quantity: output,
                output_unit: "pack".to_string(),
                is_active: true,
                created_at: now,
                updated_at: now,
            },
            lines: lines
                .into_iter()
                .enumerate()
                .map(|(i, (item, qty, wastage))| RecipeLine {
                    id: format!("line-{i}"),
                    recipe_id: "cookies-recipe".to_string(),
                    position: i as i64,
                    item_id: item.to_string(),
                    quantity: qty,
                    unit: "kg".to_string(),
                    wastage_percent: wastage,
                })
                .collect(),
        }
    }

    fn item(id: &str, cost_cents: i64, stock: i64) -> Item {
        let now = Utc::now();
        Item {
            id: id.to_string(),
            sku: id.to_uppercase(),
            name: id.to_string(),
            kind: ItemKind::RawMaterial,
            category: None,
            unit: "kg".to_string(),
            current_stock: Quantity::from(stock),
            unit_cost_cents: cost_cents,
            min_stock: Quantity::ZERO,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn cookies() -> RecipeWithLines {
        recipe(
            Quantity::from(10),
            vec![("flour", Quantity::from(2), Percentage::ZERO)],
        )
    }

    #[test]
    fn test_cookies_requirements() {
        let reqs = requirements(&cookies(), Quantity::from(20)).unwrap();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].item_id, "flour");
        assert_eq!(reqs[0].required_quantity, Quantity::from(4));
        assert_eq!(reqs[0].unit, "kg");
    }

    #[test]
    fn test_cookies_cost() {
        let items = BTreeMap::from([("flour".to_string(), item("flour", 250, 500))]);
        let costed = cost(&cookies(), Quantity::from(20), &items).unwrap();
        assert_eq!(costed.lines[0].line_cost, Money::from_cents(1000));
        assert_eq!(costed.total_cost, Money::from_cents(1000));
        assert_eq!(costed.unit_cost, Money::from_cents(50));
    }

    #[test]
    fn test_cookies_available() {
        let availability =
            check_availability(&cookies(), Quantity::from(20), |_| Quantity::from(500)).unwrap();
        assert!(availability.is_available);
        assert!(availability.shortages.is_empty());
    }

    #[test]
    fn test_wastage_is_multiplicative() {
        let r = recipe(
            Quantity::from(10),
            vec![("flour", Quantity::from(2), Percentage::whole(10).unwrap())],
        );
        let reqs = requirements(&r, Quantity::from(20)).unwrap();
        assert_eq!(reqs[0].required_quantity, Quantity::from_parts(44, 1));
    }

    #[test]
    fn test_huge_quantities_are_rejected() {
        let r = recipe(
            Quantity::from(1),
            vec![("flour", Quantity::from(1_000_000_000_000), Percentage::ZERO)],
        );
        let desired = Quantity::from(100_000_000_000_000_000);

        let err = requirements(&r, desired).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));

        let err = check_availability(&r, desired, |_| Quantity::ZERO).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_cost_overflowing_total_is_rejected() {
        let r = recipe(
            Quantity::from(1),
            vec![
                ("flour", Quantity::from(1), Percentage::ZERO),
                ("sugar", Quantity::from(1), Percentage::ZERO),
            ],
        );
        let items = BTreeMap::from([
            ("flour".to_string(), item("flour", 1_000_000_000_000_000, 0)),
            ("sugar".to_string(), item("sugar", 1_000_000_000_000_000, 0)),
        ]);

        // Each line saturates at i64::MAX cents; their sum does not fit.
        let err = cost(&r, Quantity::from(100_000), &items).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_zero_lines_trivially_available_and_free() {
        let r = recipe(Quantity::from(1), vec![]);
        let availability = check_availability(&r, Quantity::from(5), |_| Quantity::ZERO).unwrap();
        assert!(availability.is_available);

        let costed = cost(&r, Quantity::from(5), &BTreeMap::new()).unwrap();
        assert!(costed.lines.is_empty());
        assert_eq!(costed.total_cost, Money::zero());
    }

    #[test]
    fn test_zero_unit_cost_is_valid() {
        let items = BTreeMap::from([("flour".to_string(), item("flour", 0, 500))]);
        let costed = cost(&cookies(), Quantity::from(20), &items).unwrap();
        assert_eq!(costed.total_cost, Money::zero());
    }

    #[test]
    fn test_desired_must_be_positive() {
        let err = requirements(&cookies(), Quantity::ZERO).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
        let err = requirements(&cookies(), Quantity::from(-3)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument(_)));
    }

    #[test]
    fn test_shortage_reports_gap() {
        let availability =
            check_availability(&cookies(), Quantity::from(20), |_| Quantity::from(1)).unwrap();
        assert!(!availability.is_available);
        assert_eq!(
            availability.shortages,
            vec![Shortage {
                item_id: "flour".to_string(),
                required: Quantity::from(4),
                available: Quantity::from(1),
                shortfall: Quantity::from(3),
            }]
        );
    }

    #[test]
    fn test_duplicate_lines_are_summed_for_availability() {
        let r = recipe(
            Quantity::from(1),
            vec![
                ("sugar", Quantity::from(2), Percentage::ZERO),
                ("sugar", Quantity::from(3), Percentage::ZERO),
            ],
        );
        // Reported per line
        assert_eq!(requirements(&r, Quantity::from(1)).unwrap().len(), 2);

        // Each line alone fits in 4, together they do not
        let availability = check_availability(&r, Quantity::from(1), |_| Quantity::from(4)).unwrap();
        assert!(!availability.is_available);
        assert_eq!(availability.shortages[0].required, Quantity::from(5));
    }

    #[test]
    fn test_cost_missing_item_is_not_found() {
        let err = cost(&cookies(), Quantity::from(1), &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    // Batch sizes whose reciprocal terminates within the quantity precision,
    // so scaling is exact and linearity can be asserted with equality.
    const BATCH_SIZES: [i64; 7] = [1, 2, 4, 5, 10, 25, 100];

    proptest! {
        #[test]
        fn prop_requirements_are_linear(
            line_hundredths in 1i64..100_000,
            desired in 1i64..10_000,
            batch_idx in 0usize..BATCH_SIZES.len(),
            wastage in 0u32..=100,
            factor in 2i64..5,
        ) {
            let r = recipe(
                Quantity::from(BATCH_SIZES[batch_idx]),
                vec![("flour", Quantity::from_parts(line_hundredths, 2), Percentage::whole(wastage).unwrap())],
            );

            let single = requirements(&r, Quantity::from(desired)).unwrap();
            let scaled = requirements(&r, Quantity::from(desired * factor)).unwrap();

            let expected = single[0]
                .required_quantity
                .checked_mul(Decimal::from(factor))
                .unwrap();
            prop_assert_eq!(scaled[0].required_quantity, expected);
        }

        #[test]
        fn prop_scaling_at_batch_size_returns_line(
            line_hundredths in 1i64..100_000,
            batch_idx in 0usize..BATCH_SIZES.len(),
        ) {
            let batch = Quantity::from(BATCH_SIZES[batch_idx]);
            let line = Quantity::from_parts(line_hundredths, 2);
            let scaled = scale_line(line, batch, batch, Percentage::ZERO).unwrap();
            prop_assert_eq!(scaled, line);
        }
    }
}
