//! # millbook-core: Pure Business Logic for MillBook
//!
//! This crate is the **heart** of MillBook. It contains all business logic
//! as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        MillBook Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              UI / Transport (outside this workspace)            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                millbook-sync (service + orchestrator)           │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ millbook-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │   stock   │  │ mutation  │  │ validation│  │   │
//! │  │   │ Customer  │  │ StockLevel│  │ state     │  │   rules   │  │   │
//! │  │   │ Txn, Mill │  │ movements │  │ machine   │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                  millbook-db (SQLite ledger)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain entities (Customer, InventoryItem, Transaction, ...)
//! - [`stock`] - Stock-ledger arithmetic and movement records
//! - [`mutation`] - MutationRecord state machine and retry/backoff policy
//! - [`error`] - Domain error types
//! - [`validation`] - Business rule validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic - the current time,
//!    when needed, is passed in as an argument
//! 2. **No I/O**: Database, network, file system access is FORBIDDEN here
//! 3. **Explicit Errors**: All errors are typed, never strings or panics
//! 4. **Local First**: Entities carry their sync metadata (`local_id`,
//!    `server_id`, `is_synced`) so the engine never needs side tables to
//!    know what still has to reach the remote

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod mutation;
pub mod stock;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================
// These allow users to do `use millbook_core::Customer` instead of
// `use millbook_core::types::Customer`

pub use error::{CoreError, CoreResult, ValidationError};
pub use mutation::{
    backoff_delay, EntityKind, MutationPayload, MutationRecord, Operation, Priority, SyncStatus,
    TransactionBundle,
};
pub use stock::{MovementKind, StockLevel, StockMovement};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Default number of transmission attempts before a mutation is parked
/// as Failed and requires a manual retry.
pub const DEFAULT_MAX_RETRIES: i64 = 3;

/// Upper bound on the retry backoff window, in minutes.
pub const MAX_BACKOFF_MINUTES: i64 = 60;

/// Maximum line items allowed on a single transaction.
///
/// ## Business Reason
/// Prevents runaway entry mistakes; a mill gate transaction covers one
/// lorry, which never carries more than a handful of distinct lots.
pub const MAX_LINE_ITEMS: usize = 50;
