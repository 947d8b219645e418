//! # millbook-sync: Sync Engine for MillBook
//!
//! Drives convergence between the local-first ledger and the remote
//! system of record without losing, duplicating, or misordering
//! mutations.
//!
//! ## Engine Anatomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      MillBook Sync Engine                               │
//! │                                                                         │
//! │  UI layer (outside this workspace)                                     │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  MillbookService (service.rs)                                   │   │
//! │  │  create_buy_transaction, record_milling, sync_now, counts       │   │
//! │  └───────────────┬─────────────────────────────────────────────────┘   │
//! │                  │                                                      │
//! │  ┌───────────────▼───────────────┐   ┌─────────────────────────────┐   │
//! │  │  SyncOrchestrator             │◄──│  SyncAgent (agent.rs)       │   │
//! │  │  (orchestrator.rs)            │   │  poll timer, connectivity,  │   │
//! │  │  one pass at a time:          │   │  explicit trigger, shutdown │   │
//! │  │  drain → classify → persist   │   └─────────────────────────────┘   │
//! │  └───────┬───────────────┬───────┘                                     │
//! │          │               │                                              │
//! │  ┌───────▼──────┐  ┌─────▼──────────────┐                              │
//! │  │  RemoteApi   │  │  millbook-db       │                              │
//! │  │  (remote.rs, │  │  sync queue +      │                              │
//! │  │   injected)  │  │  Entity Ledger     │                              │
//! │  └──────────────┘  └────────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`service`] - The domain facade consumed by the UI layer
//! - [`orchestrator`] - Sync passes, self-healing, and the pull path
//! - [`agent`] - Background task: when passes run
//! - [`remote`] - The injected remote collaborator trait
//! - [`outcome`] - Remote result classification (the transient/semantic split)
//! - [`config`] - TOML + environment configuration
//! - [`error`] - Engine and facade error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod outcome;
pub mod remote;
pub mod service;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{SyncAgent, SyncAgentHandle};
pub use config::{DeviceConfig, SyncConfig, SyncSettings};
pub use error::{SyncError, SyncServiceResult};
pub use orchestrator::{PullResult, SyncOrchestrator, SyncPassResult};
pub use outcome::{classify_outcome, SyncOutcome};
pub use remote::{BatchSyncResponse, RemoteApi, RemoteFailure, RemoteResponse, SyncedEntity};
pub use service::MillbookService;
