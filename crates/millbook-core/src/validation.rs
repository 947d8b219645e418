//! # Validation Module
//!
//! Input validation utilities for MillBook.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: UI layer (outside this workspace)                            │
//! │  ├── Basic format checks (empty, length)                               │
//! │  └── Immediate user feedback                                           │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE + stock preconditions                            │
//! │  ├── Runs BEFORE any ledger write or queue enqueue                     │
//! │  └── A failure here means local state is untouched                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Database (SQLite)                                            │
//! │  ├── NOT NULL constraints                                              │
//! │  └── Foreign key constraints                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// String Validators
// =============================================================================

/// Validates a customer or item name.
///
/// ## Rules
/// - Must not be empty after trimming
/// - Must be at most 200 characters
pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.len() > 200 {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: 200,
        });
    }

    Ok(())
}

/// Validates a phone number.
///
/// ## Rules
/// - Optional leading `+`
/// - 7 to 15 digits (spaces and hyphens tolerated, stripped before count)
pub fn validate_phone(phone: &str) -> ValidationResult<()> {
    let trimmed = phone.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: "phone".to_string(),
        });
    }

    let body = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits: String = body.chars().filter(|c| !matches!(c, ' ' | '-')).collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "phone".to_string(),
            reason: "must contain only digits, spaces, and hyphens".to_string(),
        });
    }

    if !(7..=15).contains(&digits.len()) {
        return Err(ValidationError::InvalidFormat {
            field: "phone".to_string(),
            reason: "must be 7 to 15 digits".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a strictly positive, finite quantity in kilograms.
pub fn validate_quantity_kg(field: &str, quantity_kg: f64) -> ValidationResult<()> {
    if !quantity_kg.is_finite() {
        return Err(ValidationError::NotFinite {
            field: field.to_string(),
        });
    }
    if quantity_kg <= 0.0 {
        return Err(ValidationError::MustBePositive {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Validates a finite, non-negative price per kilogram.
pub fn validate_price_per_kg(price_per_kg: f64) -> ValidationResult<()> {
    if !price_per_kg.is_finite() {
        return Err(ValidationError::NotFinite {
            field: "price_per_kg".to_string(),
        });
    }
    if price_per_kg < 0.0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "price_per_kg".to_string(),
        });
    }
    Ok(())
}

/// Validates a non-negative bag count.
pub fn validate_bags(bags: i64) -> ValidationResult<()> {
    if bags < 0 {
        return Err(ValidationError::MustNotBeNegative {
            field: "bags".to_string(),
        });
    }
    Ok(())
}

/// Validates a strictly positive, finite payment amount.
pub fn validate_amount(amount: f64) -> ValidationResult<()> {
    if !amount.is_finite() {
        return Err(ValidationError::NotFinite {
            field: "amount".to_string(),
        });
    }
    if amount <= 0.0 {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
