//! # Production Repository
//!
//! Production orders: availability-checked planning, incremental output
//! recording that consumes inputs and credits the finished good, and
//! progress reporting.
//!
//! ## Order Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │   create() ──► PLANNED ──record_output()──► IN_PROGRESS ──┐            │
//! │   (availability │  │                          │    ▲      │            │
//! │    checked)     │  │                          └────┘      │            │
//! │                 │  │               record_output()        │            │
//! │       update()◄─┘  │                                      │            │
//! │       delete()     └──cancel()──► CANCELLED               ▼            │
//! │                                                     COMPLETED          │
//! │                                    completed_quantity ≥ quantity        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## record_output (one transaction)
//! ```text
//!  claim order → plan_output() → load recipe → scale inputs to increment
//!       → claim input + output items (ascending id)
//!       → every input covered? no → InsufficientMaterials (all shortfalls)
//!       → insert production record
//!       → production_out per input, production_in for the output item
//!       → update order → COMMIT → notify
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use super::bom::{availability_on, load_inputs};
use super::ledger::{apply_entry, claim_item};
use super::recipe::load_with_lines;
use super::retry_write;
use crate::config::EngineSettings;
use crate::error::{DbError, DbResult};
use crate::notify::{dispatch, Notifier, ProductionEvent};
use kiln_core::bom;
use kiln_core::production::{plan_output, summarize_progress};
use kiln_core::validation::validate_actor;
use kiln_core::{
    CoreError, Money, NewLedgerEntry, NewProductionOrder, OutputRecord, ProductionOrder,
    ProductionProgress, ProductionRecord, ProductionStatus, Quantity, TransactionKind,
    UpdateProductionOrder, PRODUCTION_REFERENCE_PREFIX,
};

const ORDER_COLUMNS: &str = "id, batch_number, recipe_id, quantity, completed_quantity, \
     planned_start, priority, assigned_to, status, notes, created_by, started_at, completed_at, \
     created_at, updated_at";

const RECORD_COLUMNS: &str = "id, order_id, quantity, worker_id, notes, quality_note, recorded_at";

async fn claim_order(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
    let claimed =
        sqlx::query("UPDATE production_orders SET updated_at = updated_at WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

    if claimed.rows_affected() == 0 {
        return Err(DbError::not_found("Production order", id));
    }
    Ok(())
}

async fn fetch_order(conn: &mut SqliteConnection, id: &str) -> DbResult<ProductionOrder> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM production_orders WHERE id = ?1");
    sqlx::query_as::<_, ProductionOrder>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Production order", id))
}

fn production_reference(order_id: &str) -> String {
    format!("{PRODUCTION_REFERENCE_PREFIX}:{order_id}")
}

/// Repository for production orders.
///
/// ## Usage
/// ```rust,ignore
/// let production = db.production();
///
/// let order = production.create(&new_order, "planner").await?;
/// production
///     .record_output(&order.id, &OutputRecord::new(Quantity::from(10), "ana"))
///     .await?;
/// let progress = production.progress(&order.id).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ProductionRepository {
    pool: SqlitePool,
    settings: EngineSettings,
    notifier: Arc<dyn Notifier>,
}

impl ProductionRepository {
    /// Creates a new ProductionRepository.
    pub fn new(pool: SqlitePool, settings: EngineSettings, notifier: Arc<dyn Notifier>) -> Self {
        ProductionRepository {
            pool,
            settings,
            notifier,
        }
    }

    // =========================================================================
    // Planning
    // =========================================================================

    /// Plans a new order after checking that current stock covers it.
    ///
    /// ## Errors
    /// * `NotFound` - recipe missing or inactive
    /// * `InsufficientMaterials` - with every shortage; nothing stored
    /// * `Conflict` - batch number already used
    pub async fn create(&self, new: &NewProductionOrder, actor: &str) -> DbResult<ProductionOrder> {
        new.validate()?;
        validate_actor(actor)?;

        let order = retry_write(self.settings.write_retry, "production.create", move || {
            self.create_once(new, actor)
        })
        .await?;

        info!(
            order_id = %order.id,
            recipe_id = %order.recipe_id,
            quantity = %order.quantity,
            "Production order planned"
        );
        Ok(order)
    }

    async fn create_once(&self, new: &NewProductionOrder, actor: &str) -> DbResult<ProductionOrder> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let batch_number = new.batch_number.as_deref().map(str::trim);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO production_orders (
                id, batch_number, recipe_id, quantity, completed_quantity,
                planned_start, priority, assigned_to, status, notes, created_by,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, '0', ?5, ?6, ?7, 'planned', ?8, ?9, ?10, ?10)
            "#,
        )
        .bind(&id)
        .bind(batch_number)
        .bind(&new.recipe_id)
        .bind(new.quantity.to_string())
        .bind(new.planned_start)
        .bind(new.priority)
        .bind(&new.assigned_to)
        .bind(&new.notes)
        .bind(actor)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::Core(CoreError::Conflict {
                field: "batch_number".to_string(),
                value: batch_number.unwrap_or_default().to_string(),
            }),
            DbError::ForeignKeyViolation { .. } => DbError::not_found("Recipe", &new.recipe_id),
            other => other,
        })?;

        let recipe = load_with_lines(&mut tx, &new.recipe_id, false).await?;
        let availability = availability_on(&mut tx, &recipe, new.quantity).await?;
        if !availability.is_available {
            debug!(
                recipe_id = %new.recipe_id,
                shortages = availability.shortages.len(),
                "Order rejected for missing materials"
            );
            return Err(CoreError::InsufficientMaterials {
                shortages: availability.shortages,
            }
            .into());
        }

        let order = fetch_order(&mut tx, &id).await?;
        tx.commit().await?;
        Ok(order)
    }

    /// Edits a planned order. A quantity change re-runs the availability check.
    pub async fn update(
        &self,
        id: &str,
        changes: &UpdateProductionOrder,
    ) -> DbResult<ProductionOrder> {
        changes.validate()?;

        let order = retry_write(self.settings.write_retry, "production.update", move || {
            self.update_once(id, changes)
        })
        .await?;

        debug!(order_id = %id, "Production order updated");
        Ok(order)
    }

    async fn update_once(
        &self,
        id: &str,
        changes: &UpdateProductionOrder,
    ) -> DbResult<ProductionOrder> {
        let mut tx = self.pool.begin().await?;
        claim_order(&mut tx, id).await?;

        let mut order = fetch_order(&mut tx, id).await?;
        changes.apply_to(&mut order)?;

        if changes.quantity.is_some() {
            let recipe = load_with_lines(&mut tx, &order.recipe_id, true).await?;
            let availability = availability_on(&mut tx, &recipe, order.quantity).await?;
            if !availability.is_available {
                return Err(CoreError::InsufficientMaterials {
                    shortages: availability.shortages,
                }
                .into());
            }
        }

        sqlx::query(
            r#"
            UPDATE production_orders SET
                quantity = ?2,
                planned_start = ?3,
                priority = ?4,
                assigned_to = ?5,
                notes = ?6,
                updated_at = ?7
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(order.quantity.to_string())
        .bind(order.planned_start)
        .bind(order.priority)
        .bind(&order.assigned_to)
        .bind(&order.notes)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let order = fetch_order(&mut tx, id).await?;
        tx.commit().await?;
        Ok(order)
    }

    /// Cancels a planned order. No inventory effects.
    pub async fn cancel(&self, id: &str) -> DbResult<ProductionOrder> {
        let order = retry_write(self.settings.write_retry, "production.cancel", move || {
            self.cancel_once(id)
        })
        .await?;

        info!(order_id = %id, "Production order cancelled");
        Ok(order)
    }

    async fn cancel_once(&self, id: &str) -> DbResult<ProductionOrder> {
        let mut tx = self.pool.begin().await?;
        claim_order(&mut tx, id).await?;

        let order = fetch_order(&mut tx, id).await?;
        if order.status != ProductionStatus::Planned {
            return Err(order.invalid_state("cancel").into());
        }

        sqlx::query("UPDATE production_orders SET status = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id)
            .bind(ProductionStatus::Cancelled)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        let order = fetch_order(&mut tx, id).await?;
        tx.commit().await?;
        Ok(order)
    }

    /// Deletes a planned order.
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        retry_write(self.settings.write_retry, "production.delete", move || {
            self.delete_once(id)
        })
        .await?;

        info!(order_id = %id, "Production order deleted");
        Ok(())
    }

    async fn delete_once(&self, id: &str) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;
        claim_order(&mut tx, id).await?;

        let order = fetch_order(&mut tx, id).await?;
        if order.status != ProductionStatus::Planned {
            return Err(order.invalid_state("delete").into());
        }

        sqlx::query("DELETE FROM production_orders WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // =========================================================================
    // Output
    // =========================================================================

    /// Records an increment of finished output.
    ///
    /// Consumes every recipe input scaled to `output.quantity`, credits the
    /// output item and advances the order, all in one transaction. Events
    /// are sent only after commit.
    ///
    /// ## Errors
    /// * `InvalidState` - order completed or cancelled
    /// * `InvalidArgument` - quantity ≤ 0, or the increment would pass the
    ///   requested quantity plus the configured tolerance
    /// * `InsufficientMaterials` - any input short; nothing is written
    pub async fn record_output(
        &self,
        order_id: &str,
        output: &OutputRecord,
    ) -> DbResult<ProductionOrder> {
        let (order, events) =
            retry_write(self.settings.write_retry, "production.record_output", move || {
                self.record_output_once(order_id, output)
            })
            .await?;

        info!(
            order_id = %order.id,
            quantity = %output.quantity,
            worker_id = %output.worker_id,
            status = %order.status,
            completed = %order.completed_quantity,
            "Production output recorded"
        );

        dispatch(self.notifier.as_ref(), &events);
        Ok(order)
    }

    async fn record_output_once(
        &self,
        order_id: &str,
        output: &OutputRecord,
    ) -> DbResult<(ProductionOrder, Vec<ProductionEvent>)> {
        let mut tx = self.pool.begin().await?;
        claim_order(&mut tx, order_id).await?;

        let order = fetch_order(&mut tx, order_id).await?;
        let transition = plan_output(&order, output, self.settings.overrun_tolerance)?;

        let recipe = load_with_lines(&mut tx, &order.recipe_id, true).await?;
        let requirements = bom::requirements(&recipe, output.quantity)?;
        let totals = bom::totals_by_item(&requirements)?;

        let mut claims: BTreeSet<&str> = totals.keys().map(String::as_str).collect();
        claims.insert(recipe.recipe.output_item_id.as_str());
        for item_id in &claims {
            claim_item(&mut tx, item_id).await?;
        }

        let inputs = load_inputs(&mut tx, &recipe).await?;
        let shortages = bom::shortages(&totals, |id| {
            inputs
                .get(id)
                .map(|item| item.current_stock)
                .unwrap_or(Quantity::ZERO)
        });
        if !shortages.is_empty() {
            debug!(order_id = %order_id, shortages = shortages.len(), "Output rejected");
            return Err(CoreError::InsufficientMaterials { shortages }.into());
        }

        let now = Utc::now();
        let record_id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"
            INSERT INTO production_records (id, order_id, quantity, worker_id, notes, quality_note, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&record_id)
        .bind(order_id)
        .bind(output.quantity.to_string())
        .bind(&output.worker_id)
        .bind(&output.notes)
        .bind(&output.quality_note)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let reference = production_reference(order_id);
        let mut events = Vec::new();
        let mut consumed_cost = Money::zero();

        for (item_id, required) in &totals {
            if required.is_zero() {
                continue;
            }
            let item = inputs
                .get(item_id)
                .ok_or_else(|| DbError::not_found("Item", item_id))?;

            let entry = NewLedgerEntry::new(item_id, TransactionKind::ProductionOut, *required)
                .unit_price_cents(item.unit_cost_cents)
                .reference(&reference);
            let applied = apply_entry(&mut tx, &entry, &output.worker_id).await?;

            consumed_cost += item.unit_cost().multiply_quantity(*required);

            if item.min_stock.is_positive() && applied.balance_after <= item.min_stock {
                events.push(ProductionEvent::LowStock {
                    item_id: item.id.clone(),
                    sku: item.sku.clone(),
                    current_stock: applied.balance_after,
                    min_stock: item.min_stock,
                });
            }
        }

        let unit_price = consumed_cost
            .divide_by_quantity(output.quantity)
            .unwrap_or_default();
        let credit = NewLedgerEntry::new(
            &recipe.recipe.output_item_id,
            TransactionKind::ProductionIn,
            output.quantity,
        )
        .unit_price_cents(unit_price.cents())
        .reference(&reference);
        apply_entry(&mut tx, &credit, &output.worker_id).await?;

        let completed_at = transition.completes.then_some(now);
        sqlx::query(
            r#"
            UPDATE production_orders SET
                status = ?2,
                completed_quantity = ?3,
                started_at = COALESCE(started_at, ?4),
                completed_at = COALESCE(completed_at, ?5),
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(order_id)
        .bind(transition.status)
        .bind(transition.completed_quantity.to_string())
        .bind(now)
        .bind(completed_at)
        .execute(&mut *tx)
        .await?;

        let order = fetch_order(&mut tx, order_id).await?;
        tx.commit().await?;

        let mut notices = vec![ProductionEvent::OutputRecorded {
            order_id: order.id.clone(),
            record_id: record_id.clone(),
            quantity: output.quantity,
            worker_id: output.worker_id.clone(),
        }];
        if let Some(note) = output.quality_note.as_deref().map(str::trim) {
            if !note.is_empty() {
                notices.push(ProductionEvent::QualityIssue {
                    order_id: order.id.clone(),
                    record_id,
                    worker_id: output.worker_id.clone(),
                    note: note.to_string(),
                });
            }
        }
        if transition.completes {
            notices.push(ProductionEvent::OrderCompleted {
                order_id: order.id.clone(),
                recipe_id: order.recipe_id.clone(),
                completed_quantity: order.completed_quantity,
                completed_at: now,
            });
        }
        notices.extend(events);

        Ok((order, notices))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets an order by id.
    pub async fn get(&self, id: &str) -> DbResult<ProductionOrder> {
        let mut conn = self.pool.acquire().await?;
        fetch_order(&mut conn, id).await
    }

    /// Lists orders newest first, optionally by status and recipe.
    pub async fn list(
        &self,
        status: Option<ProductionStatus>,
        recipe_id: Option<&str>,
    ) -> DbResult<Vec<ProductionOrder>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM production_orders
             WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR recipe_id = ?2)
             ORDER BY julianday(created_at) DESC, rowid DESC"
        );
        let orders = sqlx::query_as::<_, ProductionOrder>(&sql)
            .bind(status)
            .bind(recipe_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(orders)
    }

    /// Production records of an order, oldest first.
    pub async fn records(&self, order_id: &str) -> DbResult<Vec<ProductionRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM production_records
             WHERE order_id = ?1
             ORDER BY julianday(recorded_at), rowid"
        );
        let records = sqlx::query_as::<_, ProductionRecord>(&sql)
            .bind(order_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }

    /// Completed quantity, percent complete and per-worker breakdown.
    pub async fn progress(&self, order_id: &str) -> DbResult<ProductionProgress> {
        let order = self.get(order_id).await?;
        let records = self.records(order_id).await?;
        Ok(summarize_progress(&order, &records))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
