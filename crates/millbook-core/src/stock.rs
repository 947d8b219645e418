//! # Stock Ledger
//!
//! Stock-movement records and the arithmetic that derives current stock
//! levels from them.
//!
//! ## Derivation Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Stock Ledger Derivation                              │
//! │                                                                         │
//! │  stock_movements (append-only audit trail)                             │
//! │                                                                         │
//! │   kind            │ Δ quantity_kg │ Δ bags │ price/kg                  │
//! │   ────────────────┼───────────────┼────────┼──────────                 │
//! │   purchase        │   +500.0      │  +10   │  50.00                   │
//! │   sale            │   -200.0      │   -4   │    -                     │
//! │   cancel_reversal │   +200.0      │   +4   │  55.00                   │
//! │   milling_input   │   -300.0      │   -6   │    -                     │
//! │   milling_output  │   +195.0      │   +4   │  77.00                   │
//! │   adjustment      │    -5.0       │    0   │    -                     │
//! │                                                                         │
//! │  current_quantity_kg == Σ Δ quantity_kg   (property P1: no drift)      │
//! │  current_bags        == Σ Δ bags                                       │
//! │                                                                         │
//! │  average_price_per_kg updates ONLY on stock-increasing priced          │
//! │  movements:                                                            │
//! │    new_avg = (old_qty·old_avg + added_qty·added_price)                 │
//! │              ───────────────────────────────────────────               │
//! │                        (old_qty + added_qty)                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The local ledger is the immediate source of truth for in-app stock
//! display; sync failures never revert a movement that was applied here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Movement Kind
// =============================================================================

/// Why a stock movement happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Stock added by a buy transaction.
    Purchase,
    /// Stock deducted by a sell transaction.
    Sale,
    /// Compensating movement for a cancelled transaction.
    CancelReversal,
    /// Paddy consumed by a milling run.
    MillingInput,
    /// Rice produced by a milling run.
    MillingOutput,
    /// Manual correction (stock count, spillage).
    Adjustment,
}

// =============================================================================
// Stock Movement
// =============================================================================

/// A signed quantity/bag delta applied to an inventory item, tied to the
/// transaction or milling run that caused it.
///
/// Movements are append-only: a cancellation appends a reversal, it never
/// edits or removes the original.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct StockMovement {
    pub local_id: i64,

    /// Local id of the affected inventory item.
    pub item_id: i64,

    pub kind: MovementKind,

    /// Signed kilogram delta. Positive adds stock.
    pub quantity_delta_kg: f64,

    /// Signed bag delta.
    pub bags_delta: i64,

    /// Price per kilogram for stock-increasing movements that should
    /// shift the running average. None leaves the average untouched.
    pub price_per_kg: Option<f64>,

    /// Owning transaction, if the movement came from a buy/sell/cancel.
    pub transaction_id: Option<i64>,

    /// Owning milling run, if the movement came from milling.
    pub milling_id: Option<i64>,

    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Movement for a buy transaction line: stock added at the purchase
    /// price, which shifts the running average.
    pub fn purchase(
        item_id: i64,
        transaction_id: i64,
        quantity_kg: f64,
        bags: i64,
        price_per_kg: f64,
        now: DateTime<Utc>,
    ) -> Self {
        StockMovement {
            local_id: 0,
            item_id,
            kind: MovementKind::Purchase,
            quantity_delta_kg: quantity_kg,
            bags_delta: bags,
            price_per_kg: Some(price_per_kg),
            transaction_id: Some(transaction_id),
            milling_id: None,
            created_at: now,
        }
    }

    /// Movement for a sell transaction line: stock deducted, average
    /// untouched.
    pub fn sale(
        item_id: i64,
        transaction_id: i64,
        quantity_kg: f64,
        bags: i64,
        now: DateTime<Utc>,
    ) -> Self {
        StockMovement {
            local_id: 0,
            item_id,
            kind: MovementKind::Sale,
            quantity_delta_kg: -quantity_kg,
            bags_delta: -bags,
            price_per_kg: None,
            transaction_id: Some(transaction_id),
            milling_id: None,
            created_at: now,
        }
    }

    /// Compensating movement for a cancelled transaction: equal in
    /// magnitude and opposite in sign to the original.
    ///
    /// Reversing a sale restores stock at the original line price so the
    /// inventory value the sale removed comes back; reversing a purchase
    /// is a plain deduction (stock-decreasing movements never touch the
    /// average).
    pub fn reversal_of(
        original: &StockMovement,
        restore_price_per_kg: Option<f64>,
        now: DateTime<Utc>,
    ) -> Self {
        let restores_stock = original.quantity_delta_kg < 0.0;
        StockMovement {
            local_id: 0,
            item_id: original.item_id,
            kind: MovementKind::CancelReversal,
            quantity_delta_kg: -original.quantity_delta_kg,
            bags_delta: -original.bags_delta,
            price_per_kg: if restores_stock {
                restore_price_per_kg
            } else {
                None
            },
            transaction_id: original.transaction_id,
            milling_id: original.milling_id,
            created_at: now,
        }
    }

    /// Paddy consumed by a milling run.
    pub fn milling_input(
        item_id: i64,
        milling_id: i64,
        quantity_kg: f64,
        bags: i64,
        now: DateTime<Utc>,
    ) -> Self {
        StockMovement {
            local_id: 0,
            item_id,
            kind: MovementKind::MillingInput,
            quantity_delta_kg: -quantity_kg,
            bags_delta: -bags,
            price_per_kg: None,
            transaction_id: None,
            milling_id: Some(milling_id),
            created_at: now,
        }
    }

    /// Rice produced by a milling run, valued at the given cost so the
    /// produced item's average reflects what the rice actually cost.
    pub fn milling_output(
        item_id: i64,
        milling_id: i64,
        quantity_kg: f64,
        bags: i64,
        cost_per_kg: Option<f64>,
        now: DateTime<Utc>,
    ) -> Self {
        StockMovement {
            local_id: 0,
            item_id,
            kind: MovementKind::MillingOutput,
            quantity_delta_kg: quantity_kg,
            bags_delta: bags,
            price_per_kg: cost_per_kg,
            transaction_id: None,
            milling_id: Some(milling_id),
            created_at: now,
        }
    }

    /// Manual stock correction.
    pub fn adjustment(item_id: i64, quantity_delta_kg: f64, bags_delta: i64, now: DateTime<Utc>) -> Self {
        StockMovement {
            local_id: 0,
            item_id,
            kind: MovementKind::Adjustment,
            quantity_delta_kg,
            bags_delta,
            price_per_kg: None,
            transaction_id: None,
            milling_id: None,
            created_at: now,
        }
    }
}

// =============================================================================
// Stock Level
// =============================================================================

/// The derived stock position of one inventory item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StockLevel {
    pub quantity_kg: f64,
    pub bags: i64,
    pub average_price_per_kg: f64,
}

impl StockLevel {
    /// An empty position.
    pub const fn zero() -> Self {
        StockLevel {
            quantity_kg: 0.0,
            bags: 0,
            average_price_per_kg: 0.0,
        }
    }

    /// Applies one movement and returns the new level.
    ///
    /// The quantity and bag sums are unconditional (property P1: the level
    /// is always the algebraic sum of movement deltas). The average moves
    /// only on stock-increasing priced movements; when the prior quantity
    /// is zero or negative the incoming price replaces the average
    /// outright.
    pub fn apply(self, movement: &StockMovement) -> Self {
        let new_quantity = self.quantity_kg + movement.quantity_delta_kg;
        let new_bags = self.bags + movement.bags_delta;

        let new_average = match movement.price_per_kg {
            Some(price) if movement.quantity_delta_kg > 0.0 => {
                if self.quantity_kg <= 0.0 {
                    price
                } else {
                    (self.quantity_kg * self.average_price_per_kg
                        + movement.quantity_delta_kg * price)
                        / (self.quantity_kg + movement.quantity_delta_kg)
                }
            }
            _ => self.average_price_per_kg,
        };

        StockLevel {
            quantity_kg: new_quantity,
            bags: new_bags,
            average_price_per_kg: new_average,
        }
    }

    /// Replays a full movement history from an empty position.
    pub fn replay<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> Self {
        movements
            .into_iter()
            .fold(StockLevel::zero(), |level, m| level.apply(m))
    }

    /// True if the position covers a requested deduction.
    #[inline]
    pub fn has_at_least(&self, requested_kg: f64) -> bool {
        self.quantity_kg >= requested_kg
    }
}

/// Wastage of a milling run: input minus output.
#[inline]
pub fn milling_wastage(paddy_quantity_kg: f64, rice_quantity_kg: f64) -> f64 {
    paddy_quantity_kg - rice_quantity_kg
}

// =============================================================================
// Unit Tests
// =============================================================================
