//! # Stock Count Repository
//!
//! Physical counting sessions and their reconciliation into the ledger.
//!
//! ## Session Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  create() ──► DRAFT ──► IN_PROGRESS ──► COMPLETED ──reconcile()──►     │
//! │                 │            │                         RECONCILED       │
//! │                 └────────────┴──► CANCELLED                             │
//! │                                                                         │
//! │  record_count() only while DRAFT or IN_PROGRESS                        │
//! │  update_status() never reaches RECONCILED                               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reconcile
//! ```text
//!  for each line not yet reconciled          (one transaction per line)
//!      discrepancy ≠ 0 → adjustment entry = counted actual
//!      mark line reconciled
//!  all lines reconciled → session RECONCILED
//!
//!  A failure part way leaves finished lines marked, so running
//!  reconcile again only touches what is left.
//! ```

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::item::{fetch_active_item, ItemRepository};
use super::ledger::{apply_entry, claim_item};
use super::retry_write;
use crate::config::WriteRetry;
use crate::error::{DbError, DbResult};
use kiln_core::stock_count::{check_transition, discrepancy};
use kiln_core::validation::{validate_actor, validate_non_negative};
use kiln_core::{
    CoreError, CountTemplateLine, LedgerEntry, NewLedgerEntry, NewStockCount, Quantity,
    ReconciliationSummary, StockCount, StockCountLine, StockCountStatus, StockCountWithLines,
    TransactionKind, STOCK_COUNT_REFERENCE_PREFIX,
};

const COUNT_COLUMNS: &str = "id, count_date, status, notes, created_by, created_at, updated_at, \
     completed_at, reconciled_at";

const LINE_COLUMNS: &str = "id, count_id, item_id, expected_quantity, actual_quantity, \
     discrepancy, reconciled, reconciled_at, notes";

async fn claim_count(conn: &mut SqliteConnection, id: &str) -> DbResult<()> {
    let claimed = sqlx::query("UPDATE stock_counts SET updated_at = updated_at WHERE id = ?1")
        .bind(id)
        .execute(&mut *conn)
        .await?;

    if claimed.rows_affected() == 0 {
        return Err(DbError::not_found("Stock count", id));
    }
    Ok(())
}

async fn fetch_count(conn: &mut SqliteConnection, id: &str) -> DbResult<StockCount> {
    let sql = format!("SELECT {COUNT_COLUMNS} FROM stock_counts WHERE id = ?1");
    sqlx::query_as::<_, StockCount>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| DbError::not_found("Stock count", id))
}

async fn fetch_lines(conn: &mut SqliteConnection, count_id: &str) -> DbResult<Vec<StockCountLine>> {
    let sql = format!(
        "SELECT {LINE_COLUMNS} FROM stock_count_lines WHERE count_id = ?1 ORDER BY rowid"
    );
    let lines = sqlx::query_as::<_, StockCountLine>(&sql)
        .bind(count_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(lines)
}

async fn load_with_lines(conn: &mut SqliteConnection, id: &str) -> DbResult<StockCountWithLines> {
    let count = fetch_count(&mut *conn, id).await?;
    let lines = fetch_lines(&mut *conn, id).await?;
    Ok(StockCountWithLines { count, lines })
}

fn count_reference(count_id: &str) -> String {
    format!("{STOCK_COUNT_REFERENCE_PREFIX}:{count_id}")
}

/// What one per-line reconcile transaction did.
enum LineOutcome {
    /// Reconciled by an earlier or concurrent call.
    Skipped,
    Reconciled(Option<LedgerEntry>),
}

/// Repository for stock count sessions.
#[derive(Debug, Clone)]
pub struct StockCountRepository {
    pool: SqlitePool,
    retry: WriteRetry,
}

impl StockCountRepository {
    pub fn new(pool: SqlitePool, retry: WriteRetry) -> Self {
        StockCountRepository { pool, retry }
    }

    // =========================================================================
    // Counting
    // =========================================================================

    /// Active items with their current stock as the expected quantity.
    pub async fn generate_template(
        &self,
        category: Option<&str>,
    ) -> DbResult<Vec<CountTemplateLine>> {
        let items = ItemRepository::new(self.pool.clone())
            .list_active(category)
            .await?;

        Ok(items
            .into_iter()
            .map(|item| CountTemplateLine {
                item_id: item.id,
                sku: item.sku,
                name: item.name,
                category: item.category,
                unit: item.unit,
                expected_quantity: item.current_stock,
            })
            .collect())
    }

    /// Opens a session in draft, snapshotting each item's current stock as
    /// its expected quantity.
    ///
    /// ## Errors
    /// * `NotFound` - a line names an unknown or inactive item
    /// * `InvalidArgument` - duplicate item lines or a negative actual
    pub async fn create(&self, new: &NewStockCount, actor: &str) -> DbResult<StockCountWithLines> {
        new.validate()?;
        validate_actor(actor)?;

        let count = retry_write(self.retry, "stock_count.create", move || {
            self.create_once(new, actor)
        })
        .await?;

        info!(
            count_id = %count.count.id,
            lines = count.lines.len(),
            "Stock count opened"
        );
        Ok(count)
    }

    async fn create_once(&self, new: &NewStockCount, actor: &str) -> DbResult<StockCountWithLines> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO stock_counts (id, count_date, status, notes, created_by, created_at, updated_at)
            VALUES (?1, ?2, 'draft', ?3, ?4, ?5, ?5)
            "#,
        )
        .bind(&id)
        .bind(new.count_date)
        .bind(&new.notes)
        .bind(actor)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for line in &new.lines {
            let item = fetch_active_item(&mut tx, &line.item_id).await?;
            let expected = item.current_stock;

            sqlx::query(
                r#"
                INSERT INTO stock_count_lines (
                    id, count_id, item_id, expected_quantity, actual_quantity,
                    discrepancy, reconciled, notes
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&id)
            .bind(&item.id)
            .bind(expected.to_string())
            .bind(line.actual_quantity.to_string())
            .bind(discrepancy(expected, line.actual_quantity).to_string())
            .bind(&line.notes)
            .execute(&mut *tx)
            .await?;
        }

        let count = load_with_lines(&mut tx, &id).await?;
        tx.commit().await?;
        Ok(count)
    }

    /// Enters the counted quantity for one item of an open session.
    pub async fn record_count(
        &self,
        count_id: &str,
        item_id: &str,
        actual: Quantity,
    ) -> DbResult<StockCountLine> {
        validate_non_negative("actual_quantity", actual)?;

        let line = retry_write(self.retry, "stock_count.record_count", move || {
            self.record_count_once(count_id, item_id, actual)
        })
        .await?;

        debug!(
            count_id = %count_id,
            item_id = %item_id,
            actual = %actual,
            discrepancy = %line.discrepancy,
            "Count recorded"
        );
        Ok(line)
    }

    async fn record_count_once(
        &self,
        count_id: &str,
        item_id: &str,
        actual: Quantity,
    ) -> DbResult<StockCountLine> {
        let mut tx = self.pool.begin().await?;
        claim_count(&mut tx, count_id).await?;

        let count = fetch_count(&mut tx, count_id).await?;
        if !count.status.accepts_counts() {
            return Err(CoreError::invalid_state(
                "Stock count",
                count_id,
                count.status,
                "record count",
            )
            .into());
        }

        let sql = format!(
            "SELECT {LINE_COLUMNS} FROM stock_count_lines WHERE count_id = ?1 AND item_id = ?2"
        );
        let mut line = sqlx::query_as::<_, StockCountLine>(&sql)
            .bind(count_id)
            .bind(item_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("Stock count line", item_id))?;

        line.set_actual(actual);

        sqlx::query(
            "UPDATE stock_count_lines SET actual_quantity = ?2, discrepancy = ?3 WHERE id = ?1",
        )
        .bind(&line.id)
        .bind(line.actual_quantity.to_string())
        .bind(line.discrepancy.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(line)
    }

    /// Moves a session one step along its lifecycle, or cancels it.
    ///
    /// ## Errors
    /// * `InvalidState` - anything outside `draft → in_progress → completed`
    ///   and `draft | in_progress → cancelled`
    pub async fn update_status(
        &self,
        count_id: &str,
        next: StockCountStatus,
        actor: &str,
    ) -> DbResult<StockCount> {
        validate_actor(actor)?;

        let count = retry_write(self.retry, "stock_count.update_status", move || {
            self.update_status_once(count_id, next)
        })
        .await?;

        info!(count_id = %count_id, status = %next, actor = %actor, "Stock count status changed");
        Ok(count)
    }

    async fn update_status_once(
        &self,
        count_id: &str,
        next: StockCountStatus,
    ) -> DbResult<StockCount> {
        let mut tx = self.pool.begin().await?;
        claim_count(&mut tx, count_id).await?;

        let count = fetch_count(&mut tx, count_id).await?;
        check_transition(count_id, count.status, next)?;

        let now = Utc::now();
        let completed_at = (next == StockCountStatus::Completed).then_some(now);
        sqlx::query(
            r#"
            UPDATE stock_counts SET
                status = ?2,
                completed_at = COALESCE(?3, completed_at),
                updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(count_id)
        .bind(next)
        .bind(completed_at)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let count = fetch_count(&mut tx, count_id).await?;
        tx.commit().await?;
        Ok(count)
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Writes an adjustment to the counted actual for every line with a
    /// discrepancy, then marks the session reconciled.
    ///
    /// A session already reconciled returns an empty summary.
    ///
    /// ## Errors
    /// * `InvalidState` - session not completed
    /// * any line failure; lines finished before it stay reconciled
    pub async fn reconcile(&self, count_id: &str, actor: &str) -> DbResult<ReconciliationSummary> {
        validate_actor(actor)?;

        let session = self.get(count_id).await?;
        match session.count.status {
            StockCountStatus::Completed => {}
            StockCountStatus::Reconciled => {
                debug!(count_id = %count_id, "Stock count already reconciled");
                return Ok(ReconciliationSummary {
                    count_id: count_id.to_string(),
                    status: StockCountStatus::Reconciled,
                    adjustments: Vec::new(),
                    lines_reconciled: 0,
                });
            }
            status => {
                return Err(
                    CoreError::invalid_state("Stock count", count_id, status, "reconcile").into(),
                );
            }
        }

        let mut adjustments = Vec::new();
        let mut lines_reconciled = 0;

        for line in session.lines.iter().filter(|l| !l.reconciled) {
            let outcome = retry_write(self.retry, "stock_count.reconcile_line", move || {
                self.reconcile_line_once(count_id, &line.id, actor)
            })
            .await
            .inspect_err(|e| {
                warn!(
                    count_id = %count_id,
                    line_id = %line.id,
                    item_id = %line.item_id,
                    error = %e,
                    "Reconciliation stopped at line"
                );
            })?;

            if let LineOutcome::Reconciled(entry) = outcome {
                lines_reconciled += 1;
                adjustments.extend(entry);
            }
        }

        let status = retry_write(self.retry, "stock_count.finish_reconcile", move || {
            self.finish_reconcile_once(count_id)
        })
        .await?;

        info!(
            count_id = %count_id,
            adjustments = adjustments.len(),
            lines = lines_reconciled,
            status = %status,
            "Stock count reconciled"
        );

        Ok(ReconciliationSummary {
            count_id: count_id.to_string(),
            status,
            adjustments,
            lines_reconciled,
        })
    }

    async fn reconcile_line_once(
        &self,
        count_id: &str,
        line_id: &str,
        actor: &str,
    ) -> DbResult<LineOutcome> {
        let mut tx = self.pool.begin().await?;
        claim_count(&mut tx, count_id).await?;

        let count = fetch_count(&mut tx, count_id).await?;
        if count.status != StockCountStatus::Completed {
            return Ok(LineOutcome::Skipped);
        }

        let sql = format!("SELECT {LINE_COLUMNS} FROM stock_count_lines WHERE id = ?1");
        let line = sqlx::query_as::<_, StockCountLine>(&sql)
            .bind(line_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::not_found("Stock count line", line_id))?;
        if line.reconciled {
            return Ok(LineOutcome::Skipped);
        }

        let entry = if line.discrepancy.is_zero() {
            None
        } else {
            claim_item(&mut tx, &line.item_id).await?;
            let item = fetch_active_item(&mut tx, &line.item_id).await?;
            let adjustment =
                NewLedgerEntry::new(&line.item_id, TransactionKind::Adjustment, line.actual_quantity)
                    .unit_price_cents(item.unit_cost_cents)
                    .reference(count_reference(count_id));
            Some(apply_entry(&mut tx, &adjustment, actor).await?)
        };

        sqlx::query("UPDATE stock_count_lines SET reconciled = 1, reconciled_at = ?2 WHERE id = ?1")
            .bind(line_id)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(LineOutcome::Reconciled(entry))
    }

    async fn finish_reconcile_once(&self, count_id: &str) -> DbResult<StockCountStatus> {
        let mut tx = self.pool.begin().await?;
        claim_count(&mut tx, count_id).await?;

        let open: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM stock_count_lines WHERE count_id = ?1 AND reconciled = 0",
        )
        .bind(count_id)
        .fetch_one(&mut *tx)
        .await?;

        if open == 0 {
            let now = Utc::now();
            sqlx::query(
                r#"
                UPDATE stock_counts SET status = ?2, reconciled_at = ?3, updated_at = ?3
                WHERE id = ?1 AND status = ?4
                "#,
            )
            .bind(count_id)
            .bind(StockCountStatus::Reconciled)
            .bind(now)
            .bind(StockCountStatus::Completed)
            .execute(&mut *tx)
            .await?;
        }

        let count = fetch_count(&mut tx, count_id).await?;
        tx.commit().await?;
        Ok(count.status)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets a session with its lines.
    pub async fn get(&self, id: &str) -> DbResult<StockCountWithLines> {
        let mut conn = self.pool.acquire().await?;
        load_with_lines(&mut conn, id).await
    }

    /// Lists sessions newest first, optionally by status.
    pub async fn list(&self, status: Option<StockCountStatus>) -> DbResult<Vec<StockCount>> {
        let sql = format!(
            "SELECT {COUNT_COLUMNS} FROM stock_counts
             WHERE (?1 IS NULL OR status = ?1)
             ORDER BY count_date DESC, julianday(created_at) DESC, rowid DESC"
        );
        let counts = sqlx::query_as::<_, StockCount>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        Ok(counts)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
