//! # Ledger Repository
//!
//! The append-only inventory ledger and the only code path that writes
//! `items.current_stock`.
//!
//! ## One Write
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 record(FLOUR, sale, 3, actor)                           │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │   │                                                                     │
//! │   ├─ claim_item(FLOUR)           UPDATE items ... WHERE id = FLOUR     │
//! │   │                              (write lock taken, NotFound if none)  │
//! │   ├─ fetch_active_item(FLOUR)    current_stock = 5                     │
//! │   ├─ apply_stock_effect(sale)    5 - 3 = 2   (negative? → rollback)    │
//! │   ├─ UPDATE items SET current_stock = '2'                              │
//! │   └─ INSERT ledger_entries (..., balance_after = '2')   → seq          │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  Production and stock counts call claim_item + apply_entry inside      │
//! │  their own transactions, so every stock change has exactly one entry.  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::item::{fetch_active_item, fetch_item};
use super::retry_write;
use crate::config::WriteRetry;
use crate::error::{DbError, DbResult};
use kiln_core::ledger::{apply_stock_effect, fold_stock};
use kiln_core::validation::validate_actor;
use kiln_core::{LedgerEntry, LedgerFilter, NewLedgerEntry, Quantity, TransactionKind};

const ENTRY_COLUMNS: &str = "id, seq, item_id, kind, quantity, unit_price_cents, balance_after, \
     reference, notes, created_by, created_at";

// =============================================================================
// Transaction Building Blocks
// =============================================================================

/// Takes the write claim on an active item.
///
/// Must be the first write of a transaction that will change the item's
/// stock. A no-op update, so only the lock and the existence check matter.
pub(crate) async fn claim_item(conn: &mut SqliteConnection, item_id: &str) -> DbResult<()> {
    let claimed =
        sqlx::query("UPDATE items SET updated_at = updated_at WHERE id = ?1 AND is_active = 1")
            .bind(item_id)
            .execute(&mut *conn)
            .await?;

    if claimed.rows_affected() == 0 {
        return Err(DbError::not_found("Item", item_id));
    }
    Ok(())
}

/// Applies one entry to a claimed item: checks the kind rule, writes the
/// new stock and appends the entry.
///
/// Runs on the caller's transaction and commits nothing.
pub(crate) async fn apply_entry(
    conn: &mut SqliteConnection,
    entry: &NewLedgerEntry,
    actor: &str,
) -> DbResult<LedgerEntry> {
    entry.validate()?;
    validate_actor(actor)?;

    let item = fetch_active_item(&mut *conn, &entry.item_id).await?;
    let balance_after =
        apply_stock_effect(&item.id, entry.kind, item.current_stock, entry.quantity)?;

    let now = Utc::now();
    let id = Uuid::new_v4().to_string();

    sqlx::query("UPDATE items SET current_stock = ?2, updated_at = ?3 WHERE id = ?1")
        .bind(&item.id)
        .bind(balance_after.to_string())
        .bind(now)
        .execute(&mut *conn)
        .await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO ledger_entries (
            id, item_id, kind, quantity, unit_price_cents, balance_after,
            reference, notes, created_by, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(&id)
    .bind(&item.id)
    .bind(entry.kind)
    .bind(entry.quantity.to_string())
    .bind(entry.unit_price_cents)
    .bind(balance_after.to_string())
    .bind(&entry.reference)
    .bind(&entry.notes)
    .bind(actor)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    debug!(
        item_id = %item.id,
        kind = %entry.kind,
        quantity = %entry.quantity,
        balance_after = %balance_after,
        "Ledger entry applied"
    );

    Ok(LedgerEntry {
        id,
        seq: inserted.last_insert_rowid(),
        item_id: item.id,
        kind: entry.kind,
        quantity: entry.quantity,
        unit_price_cents: entry.unit_price_cents,
        balance_after,
        reference: entry.reference.clone(),
        notes: entry.notes.clone(),
        created_by: actor.to_string(),
        created_at: now,
    })
}

// =============================================================================
// Stock Audit
// =============================================================================

/// Stored stock compared with the fold of the item's entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAudit {
    pub item_id: String,
    pub stored: Quantity,
    pub derived: Quantity,
    pub entry_count: usize,
}

impl StockAudit {
    pub fn is_consistent(&self) -> bool {
        self.stored == self.derived
    }
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for ledger entries.
///
/// ## Usage
/// ```rust,ignore
/// let ledger = db.ledger();
///
/// ledger
///     .record(&NewLedgerEntry::new(&flour.id, TransactionKind::Purchase, qty), "alice")
///     .await?;
///
/// let recent = ledger.history(&LedgerFilter::for_item(&flour.id)).await?;
/// ```
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    pool: SqlitePool,
    retry: WriteRetry,
}

impl LedgerRepository {
    /// Creates a new LedgerRepository.
    pub fn new(pool: SqlitePool, retry: WriteRetry) -> Self {
        LedgerRepository { pool, retry }
    }

    /// Records one entry in its own transaction.
    ///
    /// ## Errors
    /// * `NotFound` - item unknown or inactive
    /// * `InvalidArgument` - quantity ≤ 0 (adjustment: < 0), negative price
    /// * `InsufficientStock` - a consuming kind would take stock below zero
    pub async fn record(&self, entry: &NewLedgerEntry, actor: &str) -> DbResult<LedgerEntry> {
        entry.validate()?;
        validate_actor(actor)?;

        retry_write(self.retry, "ledger.record", move || self.record_once(entry, actor)).await
    }

    async fn record_once(&self, entry: &NewLedgerEntry, actor: &str) -> DbResult<LedgerEntry> {
        let mut tx = self.pool.begin().await?;

        claim_item(&mut tx, &entry.item_id).await?;
        let recorded = apply_entry(&mut tx, entry, actor).await?;

        tx.commit().await?;
        Ok(recorded)
    }

    /// Records each entry in its own transaction.
    ///
    /// Results are in input order; a failure is captured in its slot and
    /// does not stop the remaining entries.
    pub async fn batch_record(
        &self,
        entries: &[NewLedgerEntry],
        actor: &str,
    ) -> Vec<DbResult<LedgerEntry>> {
        let mut results = Vec::with_capacity(entries.len());

        for entry in entries {
            let result = self.record(entry, actor).await;
            if let Err(e) = &result {
                warn!(item_id = %entry.item_id, kind = %entry.kind, error = %e, "Batch entry rejected");
            }
            results.push(result);
        }

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(total = results.len(), failed, "Batch recorded");
        results
    }

    /// Entries matching the filter, newest first.
    ///
    /// Both date bounds are inclusive.
    pub async fn history(&self, filter: &LedgerFilter) -> DbResult<Vec<LedgerEntry>> {
        filter.validate()?;

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE 1 = 1"));

        if let Some(item_id) = &filter.item_id {
            qb.push(" AND item_id = ").push_bind(item_id.as_str());
        }
        if let Some(kind) = filter.kind {
            qb.push(" AND kind = ").push_bind(kind);
        }
        if let Some(reference) = &filter.reference {
            qb.push(" AND reference = ").push_bind(reference.as_str());
        }
        if let Some(from) = filter.from {
            qb.push(" AND julianday(created_at) >= julianday(")
                .push_bind(from.to_rfc3339())
                .push(")");
        }
        if let Some(to) = filter.to {
            qb.push(" AND julianday(created_at) <= julianday(")
                .push_bind(to.to_rfc3339())
                .push(")");
        }

        qb.push(" ORDER BY seq DESC");
        if let Some(limit) = filter.limit {
            qb.push(" LIMIT ").push_bind(i64::from(limit));
        }

        let entries = qb
            .build_query_as::<LedgerEntry>()
            .fetch_all(&self.pool)
            .await?;

        debug!(count = entries.len(), "Ledger history");
        Ok(entries)
    }

    /// Gets one entry by id.
    pub async fn get_entry(&self, id: &str) -> DbResult<Option<LedgerEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE id = ?1");
        let entry = sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    /// Derives an item's stock by folding its entries in sequence order.
    pub async fn recompute_stock(&self, item_id: &str) -> DbResult<Quantity> {
        Ok(self.verify_stock(item_id).await?.derived)
    }

    /// Compares stored stock with the ledger fold.
    ///
    /// Deactivated items are audited too.
    pub async fn verify_stock(&self, item_id: &str) -> DbResult<StockAudit> {
        let mut conn = self.pool.acquire().await?;

        let item = fetch_item(&mut conn, item_id)
            .await?
            .ok_or_else(|| DbError::not_found("Item", item_id))?;

        let rows: Vec<(TransactionKind, String)> = sqlx::query_as(
            "SELECT kind, quantity FROM ledger_entries WHERE item_id = ?1 ORDER BY seq",
        )
        .bind(item_id)
        .fetch_all(&mut *conn)
        .await?;

        let entries = rows
            .into_iter()
            .map(|(kind, qty)| {
                qty.parse::<Quantity>()
                    .map(|q| (kind, q))
                    .map_err(|e| DbError::Decode(format!("ledger quantity '{qty}': {e}")))
            })
            .collect::<DbResult<Vec<_>>>()?;

        let audit = StockAudit {
            item_id: item.id,
            stored: item.current_stock,
            entry_count: entries.len(),
            derived: fold_stock(entries),
        };

        if !audit.is_consistent() {
            warn!(
                item_id = %audit.item_id,
                stored = %audit.stored,
                derived = %audit.derived,
                "Stored stock disagrees with ledger"
            );
        }
        Ok(audit)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{raw, setup, stock_of, ACTOR};
    use crate::{Database, DbConfig};
    use chrono::Duration;
    use kiln_core::{CoreError, ErrorKind};

    fn entry(item_id: &str, kind: TransactionKind, qty: i64) -> NewLedgerEntry {
        NewLedgerEntry::new(item_id, kind, Quantity::from(qty))
    }

    #[tokio::test]
    async fn test_sale_reduces_stock_and_overdraw_is_rejected() {
        let db = setup().await;
        let flour = raw(&db, "FLOUR", 5, 250).await;

        let sale = db
            .ledger()
            .record(&entry(&flour.id, TransactionKind::Sale, 3), ACTOR)
            .await
            .unwrap();
        assert_eq!(sale.balance_after, Quantity::from(2));
        assert_eq!(stock_of(&db, &flour).await, Quantity::from(2));

        let err = db
            .ledger()
            .record(&entry(&flour.id, TransactionKind::Sale, 10), ACTOR)
            .await
            .unwrap_err();
        match err {
            DbError::Core(CoreError::InsufficientStock {
                available,
                requested,
                ..
            }) => {
                assert_eq!(available, Quantity::from(2));
                assert_eq!(requested, Quantity::from(10));
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
        assert_eq!(stock_of(&db, &flour).await, Quantity::from(2));

        let history = db.ledger().history(&LedgerFilter::for_item(&flour.id)).await.unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn test_adjustment_sets_absolute_stock() {
        let db = setup().await;
        let flour = raw(&db, "FLOUR", 5, 250).await;

        let adj = db
            .ledger()
            .record(&entry(&flour.id, TransactionKind::Adjustment, 12), ACTOR)
            .await
            .unwrap();
        assert_eq!(adj.balance_after, Quantity::from(12));

        db.ledger()
            .record(&entry(&flour.id, TransactionKind::Adjustment, 0), ACTOR)
            .await
            .unwrap();
        assert!(stock_of(&db, &flour).await.is_zero());
    }

    #[tokio::test]
    async fn test_invalid_quantities() {
        let db = setup().await;
        let flour = raw(&db, "FLOUR", 5, 250).await;

        for (kind, qty) in [
            (TransactionKind::Purchase, 0),
            (TransactionKind::Waste, -1),
            (TransactionKind::Adjustment, -1),
        ] {
            let err = db
                .ledger()
                .record(&entry(&flour.id, kind, qty), ACTOR)
                .await
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{kind} {qty}");
        }
        assert_eq!(stock_of(&db, &flour).await, Quantity::from(5));
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_items_are_not_found() {
        let db = setup().await;
        let flour = raw(&db, "FLOUR", 5, 250).await;

        let err = db
            .ledger()
            .record(&entry("ghost", TransactionKind::Purchase, 1), ACTOR)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        db.items().deactivate(&flour.id).await.unwrap();
        let err = db
            .ledger()
            .record(&entry(&flour.id, TransactionKind::Purchase, 1), ACTOR)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_batch_record_captures_failures_in_order() {
        let db = setup().await;
        let flour = raw(&db, "FLOUR", 5, 250).await;

        let results = db
            .ledger()
            .batch_record(
                &[
                    entry(&flour.id, TransactionKind::Sale, 2),
                    entry(&flour.id, TransactionKind::Sale, 10),
                    entry("ghost", TransactionKind::Purchase, 1),
                    entry(&flour.id, TransactionKind::Purchase, 4),
                ],
                ACTOR,
            )
            .await;

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap().balance_after, Quantity::from(3));
        assert_eq!(
            results[1].as_ref().unwrap_err().kind(),
            ErrorKind::InsufficientStock
        );
        assert_eq!(results[2].as_ref().unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(results[3].as_ref().unwrap().balance_after, Quantity::from(7));
        assert_eq!(stock_of(&db, &flour).await, Quantity::from(7));
    }

    #[tokio::test]
    async fn test_history_filters_newest_first() {
        let db = setup().await;
        let flour = raw(&db, "FLOUR", 10, 250).await;
        let sugar = raw(&db, "SUGAR", 10, 100).await;

        db.ledger()
            .record(
                &entry(&flour.id, TransactionKind::Sale, 1).reference("order:1"),
                ACTOR,
            )
            .await
            .unwrap();
        db.ledger()
            .record(&entry(&flour.id, TransactionKind::Waste, 2), ACTOR)
            .await
            .unwrap();

        let all = db.ledger().history(&LedgerFilter::default()).await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.windows(2).all(|w| w[0].seq > w[1].seq));

        let flour_only = db.ledger().history(&LedgerFilter::for_item(&flour.id)).await.unwrap();
        assert_eq!(flour_only.len(), 3);
        assert_eq!(flour_only[0].kind, TransactionKind::Waste);

        let sales = db
            .ledger()
            .history(&LedgerFilter {
                kind: Some(TransactionKind::Sale),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0].reference.as_deref(), Some("order:1"));

        let limited = db
            .ledger()
            .history(&LedgerFilter {
                item_id: Some(sugar.id.clone()),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        let now = Utc::now();
        let in_range = db
            .ledger()
            .history(&LedgerFilter {
                from: Some(now - Duration::hours(1)),
                to: Some(now + Duration::hours(1)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(in_range.len(), 4);

        let future = db
            .ledger()
            .history(&LedgerFilter {
                from: Some(now + Duration::hours(1)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(future.is_empty());
    }

    #[tokio::test]
    async fn test_inverted_date_range_is_invalid() {
        let db = setup().await;
        let now = Utc::now();
        let err = db
            .ledger()
            .history(&LedgerFilter {
                from: Some(now),
                to: Some(now - Duration::days(1)),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn test_stock_recomputes_from_entries() {
        let db = setup().await;
        let flour = raw(&db, "FLOUR", 10, 250).await;

        for e in [
            entry(&flour.id, TransactionKind::Sale, 3),
            entry(&flour.id, TransactionKind::Adjustment, 20),
            entry(&flour.id, TransactionKind::Waste, 1),
            entry(&flour.id, TransactionKind::ProductionIn, 5),
        ] {
            db.ledger().record(&e, ACTOR).await.unwrap();
        }

        let audit = db.ledger().verify_stock(&flour.id).await.unwrap();
        assert!(audit.is_consistent());
        assert_eq!(audit.derived, Quantity::from(24));
        assert_eq!(audit.entry_count, 5);
        assert_eq!(db.ledger().recompute_stock(&flour.id).await.unwrap(), Quantity::from(24));

        let err = db.ledger().verify_stock("ghost").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_get_entry_round_trips() {
        let db = setup().await;
        let flour = raw(&db, "FLOUR", 0, 250).await;

        let recorded = db
            .ledger()
            .record(
                &entry(&flour.id, TransactionKind::Purchase, 7)
                    .unit_price_cents(240)
                    .notes("supplier A"),
                ACTOR,
            )
            .await
            .unwrap();

        let loaded = db.ledger().get_entry(&recorded.id).await.unwrap().unwrap();
        assert_eq!(loaded.seq, recorded.seq);
        assert_eq!(loaded.quantity, Quantity::from(7));
        assert_eq!(loaded.unit_price_cents, 240);
        assert_eq!(loaded.notes.as_deref(), Some("supplier A"));
        assert_eq!(loaded.created_by, ACTOR);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sales_never_oversell() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("kiln.db")).max_connections(4))
            .await
            .unwrap();
        let flour = raw(&db, "FLOUR", 10, 250).await;

        let mut handles = Vec::new();
        for _ in 0..20 {
            let ledger = db.ledger();
            let item_id = flour.id.clone();
            handles.push(tokio::spawn(async move {
                ledger
                    .record(&entry(&item_id, TransactionKind::Sale, 1), "till")
                    .await
            }));
        }

        let mut sold = 0;
        let mut refused = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => sold += 1,
                Err(e) => {
                    assert_eq!(e.kind(), ErrorKind::InsufficientStock, "{e}");
                    refused += 1;
                }
            }
        }

        assert_eq!(sold, 10);
        assert_eq!(refused, 10);
        assert!(stock_of(&db, &flour).await.is_zero());
        assert!(db.ledger().verify_stock(&flour.id).await.unwrap().is_consistent());
    }
}
