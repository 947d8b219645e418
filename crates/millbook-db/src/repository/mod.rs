//! # Repository Module
//!
//! Database repository implementations for MillBook.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repository Pattern Explained                         │
//! │                                                                         │
//! │  The Repository pattern abstracts database access behind a clean API.  │
//! │                                                                         │
//! │  Service / Sync Engine                                                 │
//! │       │                                                                 │
//! │       │  db.transactions().create(new)                                 │
//! │       │  ↓                                                              │
//! │       ▼                                                                 │
//! │  TransactionRepository                                                 │
//! │  ├── create(&self, new)       ← atomic unit of work                    │
//! │  ├── cancel(&self, id)                                                 │
//! │  ├── get_unsynced(&self)                                               │
//! │  └── mark_synced(&self, id, server_id)                                 │
//! │       │                                                                 │
//! │       │  SQL (single transaction per unit of work)                     │
//! │       ▼                                                                 │
//! │  SQLite Database                                                       │
//! │                                                                         │
//! │  Benefits:                                                              │
//! │  • SQL is isolated in one place                                        │
//! │  • Atomicity lives where the writes live                               │
//! │  • The sync engine's write authority is three narrow methods           │
//! │    (mark_synced, apply_remote, purge_tombstone)                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`customer::CustomerRepository`] - Customer ledger
//! - [`inventory::InventoryRepository`] - Inventory ledger + stock movements
//! - [`transaction::TransactionRepository`] - Buy/sell transactions
//! - [`payment::PaymentRepository`] - Payments
//! - [`milling::MillingRepository`] - Milling runs
//! - [`queue::SyncQueueRepository`] - The durable sync queue
//! - [`sync_meta::SyncMetaRepository`] - Pull cursors and engine bookkeeping

pub mod customer;
pub mod inventory;
pub mod milling;
pub mod payment;
pub mod queue;
pub mod sync_meta;
pub mod transaction;
