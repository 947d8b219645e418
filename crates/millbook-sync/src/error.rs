//! # Sync Error Types
//!
//! Error types for the sync engine and the domain service facade.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Sync Error Categories                             │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │     Domain      │  │     Persistence         │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  InvalidConfig  │  │  Domain         │  │  Database               │ │
//! │  │  ConfigLoad/    │  │  (wraps         │  │  (wraps DbError)        │ │
//! │  │  SaveFailed     │  │   CoreError)    │  │  Payload                │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  AuthRequired is its own variant: the UI must force                    │
//! │  re-authentication, nothing in the engine can recover it.              │
//! │                                                                         │
//! │  Remote call failures never surface here at all: the orchestrator     │
//! │  converts every one into a mutation state transition (never throws).  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use millbook_core::{CoreError, ValidationError};
use millbook_db::DbError;

/// Result type alias for sync operations.
pub type SyncServiceResult<T> = Result<T, SyncError>;

/// Errors surfaced by the sync engine and the service facade.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid sync configuration.
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Domain Errors
    // =========================================================================
    /// A business rule or input validation rejected the operation before
    /// anything was written or enqueued.
    #[error(transparent)]
    Domain(#[from] CoreError),

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    /// The local store failed.
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// Payload (de)serialization at the queue boundary failed.
    #[error("Payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),

    // =========================================================================
    // Session Errors
    // =========================================================================
    /// The remote rejected the session; the caller must re-authenticate
    /// before any further sync can succeed.
    #[error("Authentication required: {0}")]
    AuthRequired(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<ValidationError> for SyncError {
    fn from(err: ValidationError) -> Self {
        SyncError::Domain(CoreError::Validation(err))
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl SyncError {
    /// True for local precondition failures the user can fix by changing
    /// their input (insufficient stock, bad phone number).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SyncError::Domain(CoreError::Validation(_))
                | SyncError::Domain(CoreError::InsufficientStock { .. })
                | SyncError::Domain(CoreError::EmptyTransaction)
                | SyncError::Domain(CoreError::TooManyLineItems { .. })
                | SyncError::Domain(CoreError::MillingOutputExceedsInput { .. })
        )
    }

    /// True when the UI should force re-authentication.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::AuthRequired(_))
    }
}
