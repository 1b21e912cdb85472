//! # Item Repository
//!
//! Catalogue operations for stocked items.
//!
//! ## Key Operations
//! - Create, read and edit items
//! - Soft delete via `is_active`
//! - Low-stock listing for reorder reports
//!
//! `current_stock` is never written here. New items start at zero and
//! every change goes through [`super::ledger::LedgerRepository`].

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use kiln_core::validation::{
    validate_cents, validate_new_item, validate_non_negative, validate_optional_text,
    validate_required,
};
use kiln_core::{Item, NewItem, UpdateItem};

/// Column list shared by every query that decodes an [`Item`].
pub(crate) const ITEM_COLUMNS: &str = "id, sku, name, kind, category, unit, current_stock, \
     unit_cost_cents, min_stock, is_active, created_at, updated_at";

/// Loads an item by id on an existing connection (or transaction).
///
/// Inactive items are returned too; callers decide what that means.
pub(crate) async fn fetch_item(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Item>> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1");
    let item = sqlx::query_as::<_, Item>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(item)
}

/// Loads an active item or fails with `NotFound`.
pub(crate) async fn fetch_active_item(conn: &mut SqliteConnection, id: &str) -> DbResult<Item> {
    match fetch_item(conn, id).await? {
        Some(item) if item.is_active => Ok(item),
        _ => Err(DbError::not_found("Item", id)),
    }
}

/// Repository for item database operations.
///
/// ## Usage
/// ```rust,ignore
/// let repo = db.items();
///
/// let flour = repo.insert(&NewItem { sku: "FLOUR".into(), .. }).await?;
/// let low = repo.list_low_stock().await?;
/// ```
#[derive(Debug, Clone)]
pub struct ItemRepository {
    pool: SqlitePool,
}

impl ItemRepository {
    /// Creates a new ItemRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ItemRepository { pool }
    }

    /// Inserts a new item with zero stock.
    ///
    /// ## Errors
    /// * `InvalidArgument` - SKU, name or unit missing, negative cost
    /// * `UniqueViolation` (kind `Conflict`) - SKU already exists
    pub async fn insert(&self, new: &NewItem) -> DbResult<Item> {
        validate_new_item(new)?;
        validate_optional_text("category", new.category.as_deref())?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let sku = new.sku.trim().to_string();

        debug!(sku = %sku, kind = %new.kind, "Inserting item");

        let result = sqlx::query(
            r#"
            INSERT INTO items (
                id, sku, name, kind, category, unit,
                current_stock, unit_cost_cents, min_stock, is_active,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, '0', ?7, ?8, 1, ?9, ?9)
            "#,
        )
        .bind(&id)
        .bind(&sku)
        .bind(new.name.trim())
        .bind(new.kind)
        .bind(&new.category)
        .bind(new.unit.trim())
        .bind(new.unit_cost_cents)
        .bind(new.min_stock.to_string())
        .bind(now)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            return Err(match DbError::from(e) {
                DbError::UniqueViolation { .. } => DbError::duplicate("sku", sku),
                other => other,
            });
        }

        self.get_by_id(&id)
            .await?
            .ok_or_else(|| DbError::Internal(format!("item {id} vanished after insert")))
    }

    /// Gets an item by its ID, active or not.
    ///
    /// ## Returns
    /// * `Ok(Some(Item))` - Item found
    /// * `Ok(None)` - Item not found
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Item>> {
        let mut conn = self.pool.acquire().await?;
        fetch_item(&mut conn, id).await
    }

    /// Gets an active item, failing with `NotFound` otherwise.
    pub async fn get_active(&self, id: &str) -> DbResult<Item> {
        let mut conn = self.pool.acquire().await?;
        fetch_active_item(&mut conn, id).await
    }

    /// Gets an item by SKU.
    pub async fn get_by_sku(&self, sku: &str) -> DbResult<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE sku = ?1");
        let item = sqlx::query_as::<_, Item>(&sql)
            .bind(sku.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    /// Lists active items ordered by SKU, optionally for one category.
    pub async fn list_active(&self, category: Option<&str>) -> DbResult<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items
             WHERE is_active = 1 AND (?1 IS NULL OR category = ?1)
             ORDER BY sku"
        );
        let items = sqlx::query_as::<_, Item>(&sql)
            .bind(category)
            .fetch_all(&self.pool)
            .await?;

        debug!(count = items.len(), category = ?category, "Listed active items");
        Ok(items)
    }

    /// Lists active items at or below their minimum stock.
    ///
    /// Quantities are stored as text, so the threshold comparison happens
    /// on decoded values rather than in SQL.
    pub async fn list_low_stock(&self) -> DbResult<Vec<Item>> {
        let items = self.list_active(None).await?;
        Ok(items.into_iter().filter(Item::is_low_stock).collect())
    }

    /// Applies an edit to an active item.
    ///
    /// Stock is not editable; use an adjustment entry.
    pub async fn update(&self, id: &str, changes: &UpdateItem) -> DbResult<Item> {
        if let Some(name) = &changes.name {
            validate_required("name", name, 200)?;
        }
        if let Some(unit) = &changes.unit {
            validate_required("unit", unit, 20)?;
        }
        if let Some(cents) = changes.unit_cost_cents {
            validate_cents("unit_cost_cents", cents)?;
        }
        if let Some(min) = changes.min_stock {
            validate_non_negative("min_stock", min)?;
        }
        validate_optional_text("category", changes.category.as_deref())?;

        let mut item = self.get_active(id).await?;
        if let Some(name) = &changes.name {
            item.name = name.trim().to_string();
        }
        if let Some(category) = &changes.category {
            item.category = Some(category.clone());
        }
        if let Some(unit) = &changes.unit {
            item.unit = unit.trim().to_string();
        }
        if let Some(cents) = changes.unit_cost_cents {
            item.unit_cost_cents = cents;
        }
        if let Some(min) = changes.min_stock {
            item.min_stock = min;
        }

        debug!(item_id = %id, "Updating item");

        let result = sqlx::query(
            r#"
            UPDATE items SET
                name = ?2,
                category = ?3,
                unit = ?4,
                unit_cost_cents = ?5,
                min_stock = ?6,
                updated_at = ?7
            WHERE id = ?1 AND is_active = 1
            "#,
        )
        .bind(id)
        .bind(&item.name)
        .bind(&item.category)
        .bind(&item.unit)
        .bind(item.unit_cost_cents)
        .bind(item.min_stock.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Item", id));
        }

        self.get_active(id).await
    }

    /// Soft-deletes an item. Its ledger history is kept.
    pub async fn deactivate(&self, id: &str) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE items SET is_active = 0, updated_at = ?2 WHERE id = ?1 AND is_active = 1",
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Item", id));
        }

        debug!(item_id = %id, "Item deactivated");
        Ok(())
    }

    /// Counts active items.
    pub async fn count_active(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE is_active = 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
