//! # BOM Engine
//!
//! Read-side calculations over stored recipes: scaled material
//! requirements, costs and availability against current stock.
//!
//! ## Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  check_availability(cookies, 20)                                       │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  load recipe + lines   (NotFound if missing/inactive)                  │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  kiln_core::bom::requirements()   FLOUR 2 kg × 20/10 = 4 kg            │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  load current_stock of each input item                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  shortages summed per item → Availability { is_available, shortages }  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here writes. Production orders reuse [`availability_on`] inside
//! their own connection.

use std::collections::BTreeMap;

use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::item::fetch_active_item;
use super::recipe::load_with_lines;
use crate::error::{DbError, DbResult};
use kiln_core::bom;
use kiln_core::{Availability, Item, MaterialRequirement, Quantity, RecipeCost, RecipeWithLines};

/// Loads every item a recipe consumes, keyed by id.
///
/// A deactivated input is `NotFound`, like a deactivated recipe.
pub(crate) async fn load_inputs(
    conn: &mut SqliteConnection,
    recipe: &RecipeWithLines,
) -> DbResult<BTreeMap<String, Item>> {
    let mut items = BTreeMap::new();
    for line in &recipe.lines {
        if items.contains_key(&line.item_id) {
            continue;
        }
        let item = fetch_active_item(&mut *conn, &line.item_id).await?;
        items.insert(line.item_id.clone(), item);
    }
    Ok(items)
}

/// Availability of `recipe` for `desired` units against stock as seen on `conn`.
pub(crate) async fn availability_on(
    conn: &mut SqliteConnection,
    recipe: &RecipeWithLines,
    desired: Quantity,
) -> DbResult<Availability> {
    let items = load_inputs(conn, recipe).await?;
    let availability = bom::check_availability(recipe, desired, |id| {
        items
            .get(id)
            .map(|item| item.current_stock)
            .unwrap_or(Quantity::ZERO)
    })?;
    Ok(availability)
}

/// BOM calculations over stored recipes.
///
/// ## Usage
/// ```rust,ignore
/// let engine = db.bom();
///
/// let reqs = engine.requirements(&recipe_id, Quantity::from(20)).await?;
/// let cost = engine.cost(&recipe_id, Quantity::from(20)).await?;
/// println!("{} per pack", cost.unit_cost);
/// ```
#[derive(Debug, Clone)]
pub struct BomEngine {
    pool: SqlitePool,
}

impl BomEngine {
    pub fn new(pool: SqlitePool) -> Self {
        BomEngine { pool }
    }

    /// Material requirements for `desired` units of output, one per line.
    ///
    /// ## Errors
    /// * `NotFound` - recipe missing or inactive
    /// * `InvalidArgument` - `desired` not positive
    pub async fn requirements(
        &self,
        recipe_id: &str,
        desired: Quantity,
    ) -> DbResult<Vec<MaterialRequirement>> {
        debug!(recipe_id = %recipe_id, desired = %desired, "Computing requirements");

        let mut conn = self.pool.acquire().await?;
        let recipe = load_with_lines(&mut conn, recipe_id, false).await?;
        Ok(bom::requirements(&recipe, desired)?)
    }

    /// Cost of `desired` units at current item unit costs.
    pub async fn cost(&self, recipe_id: &str, desired: Quantity) -> DbResult<RecipeCost> {
        debug!(recipe_id = %recipe_id, desired = %desired, "Costing recipe");

        let mut conn = self.pool.acquire().await?;
        let recipe = load_with_lines(&mut conn, recipe_id, false).await?;
        let items = load_inputs(&mut conn, &recipe).await?;
        Ok(bom::cost(&recipe, desired, &items)?)
    }

    /// Whether current stock covers `desired` units, with every shortage.
    pub async fn check_availability(
        &self,
        recipe_id: &str,
        desired: Quantity,
    ) -> DbResult<Availability> {
        let mut conn = self.pool.acquire().await?;
        let recipe = load_with_lines(&mut conn, recipe_id, false).await?;
        let availability = availability_on(&mut conn, &recipe, desired).await?;

        debug!(
            recipe_id = %recipe_id,
            desired = %desired,
            shortages = availability.shortages.len(),
            "Checked availability"
        );
        Ok(availability)
    }
}

#[cfg(test)]
mod tests {
    use crate::repository::test_support::{cookies, finished, raw, setup};
    use kiln_core::{ErrorKind, Money, NewRecipe, NewRecipeLine, Percentage, Quantity};

    #[tokio::test]
    async fn test_cookies_scenario() {
        let db = setup().await;
        let (recipe, flour, _) = cookies(&db, 500).await;
        let id = &recipe.recipe.id;

        let reqs = db.bom().requirements(id, Quantity::from(20)).await.unwrap();
        assert_eq!(reqs.len(), 1);
        assert_eq!(reqs[0].item_id, flour.id);
        assert_eq!(reqs[0].required_quantity, Quantity::from(4));

        let cost = db.bom().cost(id, Quantity::from(20)).await.unwrap();
        assert_eq!(cost.lines[0].line_cost, Money::from_cents(1000));
        assert_eq!(cost.total_cost, Money::from_cents(1000));

        let availability = db.bom().check_availability(id, Quantity::from(20)).await.unwrap();
        assert!(availability.is_available);
    }

    #[tokio::test]
    async fn test_shortage_reports_gap() {
        let db = setup().await;
        let (recipe, flour, _) = cookies(&db, 3).await;

        let availability = db
            .bom()
            .check_availability(&recipe.recipe.id, Quantity::from(20))
            .await
            .unwrap();

        assert!(!availability.is_available);
        let shortage = &availability.shortages[0];
        assert_eq!(shortage.item_id, flour.id);
        assert_eq!(shortage.required, Quantity::from(4));
        assert_eq!(shortage.available, Quantity::from(3));
        assert_eq!(shortage.shortfall, Quantity::from(1));
    }

    #[tokio::test]
    async fn test_wastage_applies_to_requirements() {
        let db = setup().await;
        let butter = raw(&db, "BUTTER", 0, 1000).await;
        let bread = finished(&db, "BREAD").await;
        let recipe = db
            .recipes()
            .create(&NewRecipe {
                name: "Bread".to_string(),
                output_item_id: bread.id.clone(),
                output_quantity: Quantity::from(4),
                output_unit: "loaf".to_string(),
                lines: vec![NewRecipeLine::new(&butter.id, Quantity::from(1), "kg")
                    .with_wastage(Percentage::whole(10).unwrap())],
            })
            .await
            .unwrap();

        let reqs = db
            .bom()
            .requirements(&recipe.recipe.id, Quantity::from(8))
            .await
            .unwrap();
        assert_eq!(reqs[0].required_quantity, Quantity::from_parts(22, 1));

        let cost = db.bom().cost(&recipe.recipe.id, Quantity::from(8)).await.unwrap();
        assert_eq!(cost.total_cost, Money::from_cents(2200));
    }

    #[tokio::test]
    async fn test_recipe_without_lines_is_free_and_available() {
        let db = setup().await;
        let water = finished(&db, "WATER").await;
        let recipe = db
            .recipes()
            .create(&NewRecipe {
                name: "Water".to_string(),
                output_item_id: water.id.clone(),
                output_quantity: Quantity::from(1),
                output_unit: "l".to_string(),
                lines: vec![],
            })
            .await
            .unwrap();

        let cost = db.bom().cost(&recipe.recipe.id, Quantity::from(5)).await.unwrap();
        assert!(cost.total_cost.is_zero());
        assert!(db
            .bom()
            .check_availability(&recipe.recipe.id, Quantity::from(5))
            .await
            .unwrap()
            .is_available);
    }

    #[tokio::test]
    async fn test_errors() {
        let db = setup().await;
        let (recipe, _, _) = cookies(&db, 0).await;

        let err = db.bom().requirements("missing", Quantity::from(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = db
            .bom()
            .requirements(&recipe.recipe.id, Quantity::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        db.recipes().deactivate(&recipe.recipe.id).await.unwrap();
        let err = db
            .bom()
            .cost(&recipe.recipe.id, Quantity::from(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
