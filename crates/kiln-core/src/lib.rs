//! # kiln-core: Pure Business Logic for Kiln
//!
//! This crate is the **heart** of Kiln, a small-batch manufacturing and
//! inventory engine. It contains the business rules as pure functions with
//! zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Kiln Architecture                              │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │            Callers (HTTP handlers, jobs, seed binary)           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                 kiln-db (Database Layer)                        │   │
//! │  │     Ledger writes, production orders, stock counts, BOM reads   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ calls into                             │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ kiln-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌───────┐ │   │
//! │  │  │ quantity │ │   bom    │ │  ledger  │ │production│ │ stock │ │   │
//! │  │  │  money   │ │ scaling  │ │ effects  │ │  states  │ │ count │ │   │
//! │  │  └──────────┘ └──────────┘ └──────────┘ └──────────┘ └───────┘ │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`quantity`] - Fixed-precision `Quantity` and `Percentage`
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`types`] - Items and recipes
//! - [`bom`] - Requirement, cost and availability calculations
//! - [`ledger`] - Transaction kinds and their stock effects
//! - [`production`] - Production order state machine and progress
//! - [`stock_count`] - Stock count sessions and discrepancies
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Example Usage
//!
//! ```rust
//! use kiln_core::{Money, Quantity};
//!
//! let flour_per_kg = Money::from_cents(250); // 2.50
//! let needed = Quantity::from(4);
//!
//! assert_eq!(flour_per_kg.multiply_quantity(needed).cents(), 1000);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod bom;
pub mod error;
pub mod ledger;
pub mod money;
pub mod production;
pub mod quantity;
pub mod stock_count;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use bom::{Availability, CostLine, MaterialRequirement, RecipeCost, Shortage};
pub use error::{CoreError, CoreResult, ErrorKind, ValidationError};
pub use ledger::{LedgerEntry, LedgerFilter, NewLedgerEntry, StockEffect, TransactionKind};
pub use money::Money;
pub use production::{
    NewProductionOrder, OutputRecord, Priority, ProductionOrder, ProductionProgress,
    ProductionRecord, ProductionStatus, UpdateProductionOrder, WorkerContribution,
};
pub use quantity::{Percentage, Quantity, QuantityError};
pub use stock_count::{
    CountTemplateLine, NewStockCount, NewStockCountLine, ReconciliationSummary, StockCount,
    StockCountLine, StockCountStatus, StockCountWithLines,
};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Number of decimal places every [`Quantity`] is normalised to.
pub const QUANTITY_DECIMAL_PLACES: u32 = 6;

/// Reference prefix written on ledger entries produced by production orders.
pub const PRODUCTION_REFERENCE_PREFIX: &str = "production";

/// Reference prefix written on adjustment entries produced by stock counts.
pub const STOCK_COUNT_REFERENCE_PREFIX: &str = "stock_count";
