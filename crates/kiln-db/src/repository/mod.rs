//! # Repository Module
//!
//! Database repository implementations for Kiln.
//!
//! ## Write Transactions
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    How Every Write Runs                                 │
//! │                                                                         │
//! │  retry_write(policy, || once(..))                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN (deferred)                                                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  UPDATE items SET updated_at = updated_at WHERE id = ?   ← claim       │
//! │       │   first statement is a write, so SQLite hands this             │
//! │       │   transaction the database write lock before any read          │
//! │       ▼                                                                 │
//! │  read stock → compute → write stock + append ledger entry              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ──── SQLITE_BUSY? ──► roll back, back off, start again         │
//! │                                                                         │
//! │  Multi-item claims are taken in ascending item-id order.               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`item::ItemRepository`] - Item catalogue (no stock writes)
//! - [`recipe::RecipeRepository`] - Recipe storage and line replacement
//! - [`bom::BomEngine`] - Requirements, cost and availability
//! - [`ledger::LedgerRepository`] - The single stock write path
//! - [`production::ProductionRepository`] - Production order lifecycle
//! - [`stock_count::StockCountRepository`] - Counting and reconciliation

pub mod bom;
pub mod item;
pub mod ledger;
pub mod production;
pub mod recipe;
pub mod stock_count;

#[cfg(test)]
pub(crate) mod test_support;

use std::future::Future;

use backoff::backoff::Backoff;
use tracing::warn;

use crate::config::WriteRetry;
use crate::error::DbResult;

/// Runs a write transaction, starting it again while SQLite reports lock
/// contention.
///
/// `op` must open and commit its own transaction, so a retried attempt
/// never sees half of a previous one. Delays between attempts come from
/// [`WriteRetry::exponential_backoff`]: they grow exponentially with jitter
/// up to `max_backoff`, and at most `attempts` runs are made in total.
pub(crate) async fn retry_write<T, F, Fut>(
    retry: WriteRetry,
    operation: &'static str,
    mut op: F,
) -> DbResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let mut attempt = 1;
    let mut backoff = retry.exponential_backoff();

    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < retry.attempts => {
                let Some(delay) = backoff.next_backoff() else {
                    return Err(e);
                };
                warn!(operation, attempt, ?delay, error = %e, "Write contended, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn policy(attempts: u32) -> WriteRetry {
        WriteRetry {
            attempts,
            backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn test_retries_busy_until_success() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result = retry_write(policy(5), "test", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(DbError::Busy("database is locked".into()))
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: DbResult<()> = retry_write(policy(3), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DbError::Busy("database is locked".into()))
        })
        .await;

        assert!(matches!(result, Err(DbError::Busy(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_business_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let calls = &calls;
        let result: DbResult<()> = retry_write(policy(5), "test", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(DbError::not_found("Item", "x"))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
