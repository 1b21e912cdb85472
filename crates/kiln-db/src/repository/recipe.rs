//! # Recipe Repository
//!
//! Storage for bills of materials.
//!
//! ## Recipe Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  recipes                          recipe_lines (ordered by position)   │
//! │  ┌──────────────────────────┐      ┌──────────────────────────────────┐ │
//! │  │ Cookies                  │──┬──►│ 0  FLOUR   2 kg    wastage 0%   │ │
//! │  │ output: COOKIES × 10 pack│  ├──►│ 1  BUTTER  0.5 kg  wastage 2%   │ │
//! │  └──────────────────────────┘  └──►│ 2  SUGAR   0.8 kg  wastage 0%   │ │
//! │                                     └──────────────────────────────────┘ │
//! │                                                                         │
//! │  replace_lines() swaps the whole line set in one transaction.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Validation here is structural: positive quantities, existing active
//! items, no recipe consuming its own output.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::item::fetch_active_item;
use crate::error::{DbError, DbResult};
use kiln_core::validation::validate_new_recipe;
use kiln_core::{NewRecipe, NewRecipeLine, Recipe, RecipeLine, RecipeWithLines};

const RECIPE_COLUMNS: &str =
    "id, name, output_item_id, output_quantity, output_unit, is_active, created_at, updated_at";

const LINE_COLUMNS: &str = "id, recipe_id, position, item_id, quantity, unit, wastage_percent";

/// Loads a recipe and its lines on an existing connection.
///
/// Production orders keep consuming through a recipe that was deactivated
/// after they were planned, so they pass `include_inactive`.
pub(crate) async fn load_with_lines(
    conn: &mut SqliteConnection,
    id: &str,
    include_inactive: bool,
) -> DbResult<RecipeWithLines> {
    let sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = ?1");
    let recipe = sqlx::query_as::<_, Recipe>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .filter(|r| include_inactive || r.is_active)
        .ok_or_else(|| DbError::not_found("Recipe", id))?;

    let sql = format!("SELECT {LINE_COLUMNS} FROM recipe_lines WHERE recipe_id = ?1 ORDER BY position");
    let lines = sqlx::query_as::<_, RecipeLine>(&sql)
        .bind(id)
        .fetch_all(&mut *conn)
        .await?;

    Ok(RecipeWithLines { recipe, lines })
}

/// Every referenced item must exist and be active.
async fn check_items(conn: &mut SqliteConnection, recipe: &NewRecipe) -> DbResult<()> {
    fetch_active_item(&mut *conn, &recipe.output_item_id).await?;
    for line in &recipe.lines {
        fetch_active_item(&mut *conn, &line.item_id).await?;
    }
    Ok(())
}

async fn insert_lines(
    conn: &mut SqliteConnection,
    recipe_id: &str,
    lines: &[NewRecipeLine],
) -> DbResult<()> {
    for (position, line) in lines.iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO recipe_lines (id, recipe_id, position, item_id, quantity, unit, wastage_percent)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(recipe_id)
        .bind(position as i64)
        .bind(&line.item_id)
        .bind(line.quantity.to_string())
        .bind(line.unit.trim())
        .bind(line.wastage_percent.as_decimal().to_string())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Repository for recipe (BOM) storage.
#[derive(Debug, Clone)]
pub struct RecipeRepository {
    pool: SqlitePool,
}

impl RecipeRepository {
    /// Creates a new RecipeRepository.
    pub fn new(pool: SqlitePool) -> Self {
        RecipeRepository { pool }
    }

    /// Creates a recipe with its lines.
    ///
    /// ## Errors
    /// * `InvalidArgument` - non-positive quantities, self-consuming line
    /// * `NotFound` - output or input item missing or inactive
    pub async fn create(&self, new: &NewRecipe) -> DbResult<RecipeWithLines> {
        validate_new_recipe(new)?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO recipes (id, name, output_item_id, output_quantity, output_unit,
                                 is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)
            "#,
        )
        .bind(&id)
        .bind(new.name.trim())
        .bind(&new.output_item_id)
        .bind(new.output_quantity.to_string())
        .bind(new.output_unit.trim())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::ForeignKeyViolation { .. } => DbError::not_found("Item", &new.output_item_id),
            other => other,
        })?;

        check_items(&mut tx, new).await?;
        insert_lines(&mut tx, &id, &new.lines).await?;

        let recipe = load_with_lines(&mut tx, &id, false).await?;
        tx.commit().await?;

        info!(recipe_id = %id, lines = recipe.lines.len(), "Recipe created");
        Ok(recipe)
    }

    /// Gets an active recipe with its lines.
    pub async fn get(&self, id: &str) -> DbResult<RecipeWithLines> {
        let mut conn = self.pool.acquire().await?;
        load_with_lines(&mut conn, id, false).await
    }

    /// Replaces the full line set of an active recipe atomically.
    ///
    /// Either every new line is stored or the old set remains.
    pub async fn replace_lines(
        &self,
        id: &str,
        lines: Vec<NewRecipeLine>,
    ) -> DbResult<RecipeWithLines> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query("UPDATE recipes SET updated_at = ?2 WHERE id = ?1 AND is_active = 1")
            .bind(id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        if claimed.rows_affected() == 0 {
            return Err(DbError::not_found("Recipe", id));
        }

        let current = load_with_lines(&mut tx, id, false).await?;
        let candidate = NewRecipe {
            name: current.recipe.name,
            output_item_id: current.recipe.output_item_id,
            output_quantity: current.recipe.output_quantity,
            output_unit: current.recipe.output_unit,
            lines,
        };
        validate_new_recipe(&candidate)?;
        check_items(&mut tx, &candidate).await?;

        sqlx::query("DELETE FROM recipe_lines WHERE recipe_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        insert_lines(&mut tx, id, &candidate.lines).await?;

        let recipe = load_with_lines(&mut tx, id, false).await?;
        tx.commit().await?;

        info!(recipe_id = %id, lines = recipe.lines.len(), "Recipe lines replaced");
        Ok(recipe)
    }

    /// Soft-deletes a recipe. Orders already planned against it keep working.
    pub async fn deactivate(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE recipes SET is_active = 0, updated_at = ?2 WHERE id = ?1 AND is_active = 1",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Recipe", id));
        }

        debug!(recipe_id = %id, "Recipe deactivated");
        Ok(())
    }

    /// Lists active recipes by name, without lines.
    pub async fn list_active(&self) -> DbResult<Vec<Recipe>> {
        let sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE is_active = 1 ORDER BY name");
        let recipes = sqlx::query_as::<_, Recipe>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(recipes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{cookies, finished, raw, setup};
    use kiln_core::{ErrorKind, Percentage, Quantity};

    #[tokio::test]
    async fn test_create_keeps_line_order_and_wastage() {
        let db = setup().await;
        let flour = raw(&db, "FLOUR", 0, 250).await;
        let butter = raw(&db, "BUTTER", 0, 900).await;
        let cookies = finished(&db, "COOKIES").await;

        let recipe = db
            .recipes()
            .create(&NewRecipe {
                name: "Cookies".to_string(),
                output_item_id: cookies.id.clone(),
                output_quantity: Quantity::from(10),
                output_unit: "pack".to_string(),
                lines: vec![
                    NewRecipeLine::new(&flour.id, Quantity::from(2), "kg"),
                    NewRecipeLine::new(&butter.id, Quantity::from_parts(5, 1), "kg")
                        .with_wastage(Percentage::whole(2).unwrap()),
                ],
            })
            .await
            .unwrap();

        assert_eq!(recipe.lines.len(), 2);
        assert_eq!(recipe.lines[0].item_id, flour.id);
        assert_eq!(recipe.lines[1].position, 1);
        assert_eq!(recipe.lines[1].wastage_percent, Percentage::whole(2).unwrap());

        let loaded = db.recipes().get(&recipe.recipe.id).await.unwrap();
        assert_eq!(loaded.lines[1].quantity, Quantity::from_parts(5, 1));
    }

    #[tokio::test]
    async fn test_unknown_line_item_is_not_found_and_nothing_stored() {
        let db = setup().await;
        let cookies = finished(&db, "COOKIES").await;

        let err = db
            .recipes()
            .create(&NewRecipe {
                name: "Cookies".to_string(),
                output_item_id: cookies.id.clone(),
                output_quantity: Quantity::from(10),
                output_unit: "pack".to_string(),
                lines: vec![NewRecipeLine::new("ghost", Quantity::from(2), "kg")],
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(db.recipes().list_active().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_self_consuming_recipe_rejected() {
        let db = setup().await;
        let cookies = finished(&db, "COOKIES").await;

        let err = db
            .recipes()
            .create(&NewRecipe {
                name: "Cookies".to_string(),
                output_item_id: cookies.id.clone(),
                output_quantity: Quantity::from(10),
                output_unit: "pack".to_string(),
                lines: vec![NewRecipeLine::new(&cookies.id, Quantity::from(1), "pack")],
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_replace_lines_is_all_or_nothing() {
        let db = setup().await;
        let (recipe, flour, _) = cookies(&db, 0).await;
        let sugar = raw(&db, "SUGAR", 0, 120).await;

        let replaced = db
            .recipes()
            .replace_lines(
                &recipe.recipe.id,
                vec![
                    NewRecipeLine::new(&flour.id, Quantity::from(3), "kg"),
                    NewRecipeLine::new(&sugar.id, Quantity::from(1), "kg"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(replaced.lines.len(), 2);
        assert_eq!(replaced.lines[0].quantity, Quantity::from(3));

        let err = db
            .recipes()
            .replace_lines(
                &recipe.recipe.id,
                vec![
                    NewRecipeLine::new(&flour.id, Quantity::from(1), "kg"),
                    NewRecipeLine::new("ghost", Quantity::from(1), "kg"),
                ],
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let kept = db.recipes().get(&recipe.recipe.id).await.unwrap();
        assert_eq!(kept.lines.len(), 2);
        assert_eq!(kept.lines[0].quantity, Quantity::from(3));
    }

    #[tokio::test]
    async fn test_deactivated_recipe_is_hidden() {
        let db = setup().await;
        let (recipe, _, _) = cookies(&db, 0).await;

        db.recipes().deactivate(&recipe.recipe.id).await.unwrap();

        let err = db.recipes().get(&recipe.recipe.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(db.recipes().list_active().await.unwrap().is_empty());

        let mut conn = db.pool().acquire().await.unwrap();
        let inactive = load_with_lines(&mut conn, &recipe.recipe.id, true).await.unwrap();
        assert!(!inactive.recipe.is_active);
    }
}
