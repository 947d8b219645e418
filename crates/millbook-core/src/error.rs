//! # Error Types
//!
//! Domain-specific error types for millbook-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  millbook-core errors (this file)                                      │
//! │  ├── CoreError        - Business rule violations                       │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  millbook-db errors (separate crate)                                   │
//! │  └── DbError          - Database operation failures                    │
//! │                                                                         │
//! │  millbook-sync errors (separate crate)                                 │
//! │  └── SyncError        - Remote/orchestration failures                  │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError → Caller      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Principles
//! 1. Use `thiserror` for derive macros (not manual impl)
//! 2. Include context in error messages (item name, quantities, etc.)
//! 3. Errors are enum variants, never String
//! 4. Domain validation fails BEFORE anything is written or enqueued

use thiserror::Error;

use crate::mutation::SyncStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Core business logic errors.
///
/// These errors represent business rule violations or domain logic failures.
/// They are raised before any ledger write or queue enqueue happens, so a
/// caller seeing one of these knows local state is untouched.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Insufficient stock to complete a sell transaction.
    ///
    /// ## When This Occurs
    /// - A sell line item requests more kilograms than the item holds
    /// - Raised before any mutation is enqueued; no partial deduction
    ///   across line items ever happens
    #[error("Insufficient stock for {item}: available {available_kg} kg, requested {requested_kg} kg")]
    InsufficientStock {
        item: String,
        available_kg: f64,
        requested_kg: f64,
    },

    /// A transaction has no line items.
    #[error("Transaction must contain at least one line item")]
    EmptyTransaction,

    /// Too many line items on one transaction.
    #[error("Transaction cannot have more than {max} line items")]
    TooManyLineItems { max: usize },

    /// The transaction is not in a state that allows the requested operation.
    ///
    /// ## When This Occurs
    /// - Cancelling a transaction that is already cancelled
    #[error("Transaction {transaction_id} is {current_status}, cannot perform operation")]
    InvalidTransactionStatus {
        transaction_id: i64,
        current_status: String,
    },

    /// Milling output cannot exceed milling input.
    ///
    /// Wastage is defined as `paddy - rice` and must never be negative.
    #[error("Milling output {rice_kg} kg exceeds paddy input {paddy_kg} kg")]
    MillingOutputExceedsInput { paddy_kg: f64, rice_kg: f64 },

    /// A mutation record was driven through an illegal state transition.
    ///
    /// ## When This Occurs
    /// - Completing a record that was never marked Syncing
    /// - Resetting a record that is not in a terminal failure state
    ///
    /// This is an engine bug guard, not a user-facing condition.
    #[error("Cannot {action} a mutation in state {from}")]
    InvalidSyncTransition {
        from: SyncStatus,
        action: &'static str,
    },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// These errors occur when caller input doesn't meet requirements.
/// Used for early validation before business logic runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Value must be strictly positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: String },

    /// Numeric value is not a finite number (NaN or infinity).
    #[error("{field} must be a finite number")]
    NotFinite { field: String },

    /// Invalid format (e.g., malformed phone number).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_stock_message() {
        let err = CoreError::InsufficientStock {
            item: "Basmati Paddy".to_string(),
            available_kg: 500.0,
            requested_kg: 600.0,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient stock for Basmati Paddy: available 500 kg, requested 600 kg"
        );
    }

    #[test]
    fn test_validation_error_messages() {
        let err = ValidationError::Required {
            field: "name".to_string(),
        };
        assert_eq!(err.to_string(), "name is required");

        let err = ValidationError::MustBePositive {
            field: "quantity_kg".to_string(),
        };
        assert_eq!(err.to_string(), "quantity_kg must be positive");
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "name".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
