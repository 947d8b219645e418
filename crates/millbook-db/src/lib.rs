//! # millbook-db: Database Layer for MillBook
//!
//! This crate provides database access for MillBook. It uses SQLite for
//! local storage with sqlx for async operations.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        MillBook Data Flow                               │
//! │                                                                         │
//! │  Domain operation (create_buy_transaction)                             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    millbook-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Database    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │    │ (customer.rs, │    │  (embedded)  │  │   │
//! │  │   │               │    │  queue.rs...) │    │              │  │   │
//! │  │   │ SqlitePool    │◄───│ Entity Ledger │    │ 001_init.sql │  │   │
//! │  │   │ WAL mode      │    │ + Sync Queue  │    │              │  │   │
//! │  │   └───────────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │                                                                 │   │
//! │  │  A domain write (transaction + stock movements + level update  │   │
//! │  │  + queue entries) is ONE SQLite transaction: both sides land   │   │
//! │  │  or neither does. No caller ever observes a half-written       │   │
//! │  │  entity/queue pair.                                            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │                     SQLite database file (WAL)                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Repository implementations (customer, inventory,
//!   transaction, payment, milling, queue, meta)

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::customer::{CustomerRepository, RemoteCustomer};
pub use repository::inventory::{InventoryRepository, RemoteInventoryItem};
pub use repository::milling::{MillingRepository, NewMilling};
pub use repository::payment::{NewPayment, PaymentRepository};
pub use repository::queue::SyncQueueRepository;
pub use repository::sync_meta::SyncMetaRepository;
pub use repository::transaction::{NewTransaction, NewTransactionLine, TransactionRepository};
