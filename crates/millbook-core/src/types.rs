//! # Domain Types
//!
//! Core domain entities used throughout MillBook.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Entities                                 │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │    Customer     │   │ InventoryItem   │   │  Transaction    │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  name, phone    │   │  name, grade    │   │  kind (buy/sell)│       │
//! │  │  address        │   │  quantity_kg    │   │  customer_id    │       │
//! │  │                 │   │  bags, avg ₨/kg │   │  + line items   │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐                             │
//! │  │ PaymentRecord   │   │ MillingRecord   │                             │
//! │  │  ─────────────  │   │  ─────────────  │                             │
//! │  │  amount, method │   │  paddy → rice   │                             │
//! │  │  direction      │   │  wastage_kg     │                             │
//! │  └─────────────────┘   └─────────────────┘                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Dual-Key Identity Pattern
//! Every entity has:
//! - `local_id`: i64 - allocated by the local store at insert, stable for
//!   the record's lifetime, never reused
//! - `server_id`: Option<i64> - remote identity, null until the entity's
//!   Create mutation has synced
//!
//! The sync engine's only write authority over these records is to fill
//! `server_id`, flip `is_synced`, and apply server-returned canonical
//! field values after a successful sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Customer
// =============================================================================

/// A customer (farmer, trader, or wholesale buyer) in the local ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Customer {
    /// Device-local identifier, allocated by the store.
    pub local_id: i64,

    /// Remote identifier, null until the Create mutation syncs.
    pub server_id: Option<i64>,

    /// Display name.
    pub name: String,

    /// Phone number. Unique on the remote; a duplicate phone is the
    /// canonical Create conflict.
    pub phone: Option<String>,

    /// Postal/village address.
    pub address: Option<String>,

    /// Free-form notes.
    pub notes: Option<String>,

    /// Whether the most recent mutation for this record reached the remote.
    pub is_synced: bool,

    /// Soft-delete tombstone. Tombstones survive until the Delete
    /// mutation is confirmed Synced.
    pub is_deleted: bool,

    /// When the record was created locally.
    pub created_at: DateTime<Utc>,

    /// Last local modification time, used for last-write-wins comparison.
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Inventory Item
// =============================================================================

/// Grade of an inventory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum ItemGrade {
    /// Unmilled paddy.
    Paddy,
    /// Milled rice.
    Rice,
    /// Bran, husk, broken rice.
    Byproduct,
}

/// An inventory item (a lot of paddy, rice, or byproduct).
///
/// `current_quantity_kg` and `current_bags` are the denormalized sums of
/// the item's stock movements; the movements table is the source of truth
/// and the sums are maintained in the same transaction as every movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct InventoryItem {
    pub local_id: i64,
    pub server_id: Option<i64>,

    /// Display name, e.g. "Basmati Super Paddy".
    pub name: String,

    /// Paddy, rice, or byproduct.
    pub grade: ItemGrade,

    /// Current stock in kilograms.
    pub current_quantity_kg: f64,

    /// Current stock in bags.
    pub current_bags: i64,

    /// Running weighted average purchase price per kilogram.
    /// Recomputed only on stock-increasing priced movements.
    pub average_price_per_kg: f64,

    pub is_synced: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Transaction
// =============================================================================

/// Whether a transaction brings stock in or moves it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Purchase from a customer: stock is added.
    Buy,
    /// Sale to a customer: stock is deducted.
    Sell,
}

/// The lifecycle status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    /// Completed and counted in stock.
    Completed,
    /// Cancelled; its stock effect has been reversed by compensating
    /// movements.
    Cancelled,
}

/// A buy or sell transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Transaction {
    pub local_id: i64,
    pub server_id: Option<i64>,

    pub kind: TransactionKind,
    pub status: TransactionStatus,

    /// Local id of the counterparty customer.
    pub customer_id: i64,

    /// Sum of line totals.
    pub total_amount: f64,

    /// Business date of the transaction (may differ from `created_at`
    /// when entries are backfilled after a market day).
    pub transaction_date: DateTime<Utc>,

    pub notes: Option<String>,

    pub is_synced: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A line item on a transaction.
///
/// Price and quantities are frozen at entry time; later item edits never
/// rewrite transaction history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct TransactionItem {
    pub local_id: i64,

    /// Local id of the owning transaction.
    pub transaction_id: i64,

    /// Local id of the inventory item moved by this line.
    pub item_id: i64,

    /// Quantity in kilograms.
    pub quantity_kg: f64,

    /// Quantity in bags.
    pub bags: i64,

    /// Agreed price per kilogram.
    pub price_per_kg: f64,

    /// `quantity_kg * price_per_kg`, frozen at entry.
    pub line_total: f64,

    pub created_at: DateTime<Utc>,
}

impl TransactionItem {
    /// Computes the line total for a quantity/price pair.
    #[inline]
    pub fn compute_line_total(quantity_kg: f64, price_per_kg: f64) -> f64 {
        quantity_kg * price_per_kg
    }
}

// =============================================================================
// Payment
// =============================================================================

/// Direction of a payment from the mill's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentDirection {
    /// Money received from a customer.
    Received,
    /// Money paid out to a customer.
    Paid,
}

/// How a payment was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Bank,
}

/// A payment against a customer's running balance, optionally tied to a
/// specific transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PaymentRecord {
    pub local_id: i64,
    pub server_id: Option<i64>,

    pub customer_id: i64,

    /// Local id of the settled transaction, if any.
    pub transaction_id: Option<i64>,

    pub amount: f64,
    pub direction: PaymentDirection,
    pub method: PaymentMethod,
    pub notes: Option<String>,

    pub is_synced: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Milling
// =============================================================================

/// A milling run: paddy in, rice out, wastage recorded.
///
/// The three stock effects (paddy deducted, rice added, wastage audited)
/// are applied as one atomic local unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct MillingRecord {
    pub local_id: i64,
    pub server_id: Option<i64>,

    /// Local id of the paddy item consumed.
    pub paddy_item_id: i64,

    /// Local id of the rice item produced.
    pub rice_item_id: i64,

    /// Paddy consumed, in kilograms.
    pub paddy_quantity_kg: f64,

    /// Rice produced, in kilograms.
    pub rice_quantity_kg: f64,

    /// `paddy_quantity_kg - rice_quantity_kg`, stored explicitly as an
    /// audit value rather than derived at read time.
    pub wastage_kg: f64,

    pub milling_date: DateTime<Utc>,
    pub notes: Option<String>,

    pub is_synced: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MillingRecord {
    /// Milling yield as a fraction of input (0.0 - 1.0).
    pub fn yield_ratio(&self) -> f64 {
        if self.paddy_quantity_kg <= 0.0 {
            return 0.0;
        }
        self.rice_quantity_kg / self.paddy_quantity_kg
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_total() {
        assert_eq!(TransactionItem::compute_line_total(500.0, 50.0), 25_000.0);
        assert_eq!(TransactionItem::compute_line_total(0.0, 50.0), 0.0);
    }

    #[test]
    fn test_yield_ratio() {
        let milling = MillingRecord {
            local_id: 1,
            server_id: None,
            paddy_item_id: 1,
            rice_item_id: 2,
            paddy_quantity_kg: 1000.0,
            rice_quantity_kg: 650.0,
            wastage_kg: 350.0,
            milling_date: Utc::now(),
            notes: None,
            is_synced: false,
            is_deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!((milling.yield_ratio() - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_enum_serde_names() {
        // Payloads cross the queue boundary as snake_case JSON
        assert_eq!(
            serde_json::to_string(&TransactionKind::Buy).unwrap(),
            "\"buy\""
        );
        assert_eq!(
            serde_json::to_string(&ItemGrade::Byproduct).unwrap(),
            "\"byproduct\""
        );
    }
}
