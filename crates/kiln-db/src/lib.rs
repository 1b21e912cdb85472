//! # kiln-db: Database Layer for Kiln
//!
//! This crate persists the Kiln engine in SQLite through sqlx: items,
//! recipes, the append-only inventory ledger, production orders and stock
//! counts.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Kiln Data Flow                                 │
//! │                                                                         │
//! │  Caller (HTTP handler, job, seed binary)                               │
//! │       │  actor id from the auth layer                                   │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     kiln-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌──────────────┐   ┌──────────────────┐   ┌──────────────┐   │   │
//! │  │   │  Database    │   │  Repositories    │   │  Migrations  │   │   │
//! │  │   │  (pool.rs)   │   │                  │   │  (embedded)  │   │   │
//! │  │   │              │   │ ProductionRepo ──┼─┐ │              │   │   │
//! │  │   │ SqlitePool   │◄──│ StockCountRepo ──┼─┤ │ 001_init.sql │   │   │
//! │  │   │ Settings     │   │ LedgerRepo  ◄────┼─┘ │              │   │   │
//! │  │   │ Notifier     │   │ BomEngine/Recipe │   │              │   │   │
//! │  │   └──────────────┘   └──────────────────┘   └──────────────┘   │   │
//! │  │        every stock change goes through the ledger write path    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database (WAL)                       │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and the [`Database`] handle
//! - [`config`] - `kiln.toml` and environment configuration
//! - [`migrations`] - Embedded database migrations
//! - [`notify`] - Production event notifications
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations
//!
//! ## Usage
//!
//! ```rust,ignore
//! use kiln_db::{Database, EngineConfig};
//!
//! let config = EngineConfig::load(None)?;
//! let db = Database::with_settings(config.db_config(), config.settings()).await?;
//!
//! let order = db.production().create(&new_order, "planner").await?;
//! let order = db
//!     .production()
//!     .record_output(&order.id, &OutputRecord::new(Quantity::from(10), "ana"))
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;
pub mod migrations;
pub mod notify;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use config::{EngineConfig, EngineSettings, WriteRetry};
pub use error::{DbError, DbResult};
pub use notify::{Notifier, NotifyError, ProductionEvent, TracingNotifier};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::bom::BomEngine;
pub use repository::item::ItemRepository;
pub use repository::ledger::{LedgerRepository, StockAudit};
pub use repository::production::ProductionRepository;
pub use repository::recipe::RecipeRepository;
pub use repository::stock_count::StockCountRepository;
