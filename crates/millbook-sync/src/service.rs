//! # Domain Service Facade
//!
//! The interface the UI layer consumes. Every operation validates in
//! `millbook-core` first, then executes one atomic unit of work in
//! `millbook-db`; nothing is written or enqueued when validation fails.
//!
//! ## Write Path
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │               create_sell_transaction(customer, lines)                  │
//! │                                                                         │
//! │  1. VALIDATE (millbook-core, synchronous, pure)                        │
//! │     • line shape: quantities, prices, bags, count                      │
//! │     • stock precondition: requested ≤ current for EVERY item,          │
//! │       quantities aggregated per item across lines                      │
//! │     FAIL → SyncError::Domain returned, local state untouched           │
//! │                                                                         │
//! │  2. WRITE (millbook-db, one SQLite transaction)                        │
//! │     transaction + items + movements + levels + queue records           │
//! │                                                                         │
//! │  3. RETURN immediately. The write is visible in the UI even while      │
//! │     offline; syncing happens later and never blocks the caller.        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use millbook_db::{
    Database, NewMilling, NewPayment, NewTransaction, NewTransactionLine,
};
use millbook_core::validation::{
    validate_amount, validate_bags, validate_name, validate_phone, validate_price_per_kg,
    validate_quantity_kg,
};
use millbook_core::{
    CoreError, Customer, InventoryItem, ItemGrade, MillingRecord, PaymentDirection, PaymentMethod,
    PaymentRecord, Transaction, TransactionItem, TransactionKind, TransactionStatus,
    MAX_LINE_ITEMS,
};

use crate::error::SyncServiceResult;
use crate::orchestrator::{SyncOrchestrator, SyncPassResult};

/// The domain service the UI layer talks to.
///
/// Holds the database handle and the orchestrator; cheap to clone.
#[derive(Clone)]
pub struct MillbookService {
    db: Database,
    orchestrator: Arc<SyncOrchestrator>,
}

impl MillbookService {
    /// Creates the service.
    pub fn new(db: Database, orchestrator: Arc<SyncOrchestrator>) -> Self {
        MillbookService { db, orchestrator }
    }

    // =========================================================================
    // Customers
    // =========================================================================

    /// Creates a customer.
    pub async fn create_customer(
        &self,
        name: &str,
        phone: Option<&str>,
        address: Option<&str>,
        notes: Option<&str>,
    ) -> SyncServiceResult<Customer> {
        validate_name("name", name)?;
        if let Some(phone) = phone {
            validate_phone(phone)?;
        }
        Ok(self.db.customers().create(name, phone, address, notes).await?)
    }

    /// Updates a customer's details.
    pub async fn update_customer(
        &self,
        local_id: i64,
        name: &str,
        phone: Option<&str>,
        address: Option<&str>,
        notes: Option<&str>,
    ) -> SyncServiceResult<Customer> {
        validate_name("name", name)?;
        if let Some(phone) = phone {
            validate_phone(phone)?;
        }
        Ok(self
            .db
            .customers()
            .update(local_id, name, phone, address, notes)
            .await?)
    }

    /// Deletes a customer (tombstoned until the deletion syncs).
    pub async fn delete_customer(&self, local_id: i64) -> SyncServiceResult<()> {
        Ok(self.db.customers().delete(local_id).await?)
    }

    /// Lists live customers.
    pub async fn list_customers(&self) -> SyncServiceResult<Vec<Customer>> {
        Ok(self.db.customers().list().await?)
    }

    // =========================================================================
    // Inventory
    // =========================================================================

    /// Creates an inventory item with empty stock.
    pub async fn create_inventory_item(
        &self,
        name: &str,
        grade: ItemGrade,
    ) -> SyncServiceResult<InventoryItem> {
        validate_name("name", name)?;
        Ok(self.db.inventory().create(name, grade).await?)
    }

    /// Applies a manual stock correction. The correction may be negative
    /// but must never drive stock below zero.
    pub async fn adjust_stock(
        &self,
        item_id: i64,
        quantity_delta_kg: f64,
        bags_delta: i64,
    ) -> SyncServiceResult<InventoryItem> {
        if !quantity_delta_kg.is_finite() {
            return Err(millbook_core::ValidationError::NotFinite {
                field: "quantity_delta_kg".to_string(),
            }
            .into());
        }
        let item = self.require_item(item_id).await?;
        if item.current_quantity_kg + quantity_delta_kg < 0.0 {
            return Err(CoreError::InsufficientStock {
                item: item.name,
                available_kg: item.current_quantity_kg,
                requested_kg: -quantity_delta_kg,
            }
            .into());
        }
        Ok(self
            .db
            .inventory()
            .adjust_stock(item_id, quantity_delta_kg, bags_delta)
            .await?)
    }

    /// Lists live inventory items.
    pub async fn list_inventory(&self) -> SyncServiceResult<Vec<InventoryItem>> {
        Ok(self.db.inventory().list().await?)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Creates a buy transaction: stock is added in the same unit of work.
    pub async fn create_buy_transaction(
        &self,
        customer_id: i64,
        transaction_date: DateTime<Utc>,
        notes: Option<String>,
        lines: Vec<NewTransactionLine>,
    ) -> SyncServiceResult<(Transaction, Vec<TransactionItem>)> {
        self.validate_lines(&lines)?;
        let new = NewTransaction {
            kind: TransactionKind::Buy,
            customer_id,
            transaction_date,
            notes,
            lines,
        };
        Ok(self.db.transactions().create(new).await?)
    }

    /// Creates a sell transaction: stock must cover every line before
    /// anything is written, and is deducted in the same unit of work.
    pub async fn create_sell_transaction(
        &self,
        customer_id: i64,
        transaction_date: DateTime<Utc>,
        notes: Option<String>,
        lines: Vec<NewTransactionLine>,
    ) -> SyncServiceResult<(Transaction, Vec<TransactionItem>)> {
        self.validate_lines(&lines)?;
        self.check_stock_covers(&lines).await?;
        let new = NewTransaction {
            kind: TransactionKind::Sell,
            customer_id,
            transaction_date,
            notes,
            lines,
        };
        Ok(self.db.transactions().create(new).await?)
    }

    /// Cancels a transaction, reversing its stock effect. Works even when
    /// the original has not synced yet.
    pub async fn cancel_transaction(&self, transaction_id: i64) -> SyncServiceResult<Transaction> {
        let transaction = self
            .db
            .transactions()
            .get(transaction_id)
            .await?
            .ok_or_else(|| millbook_db::DbError::not_found("Transaction", transaction_id))?;
        if transaction.status == TransactionStatus::Cancelled {
            return Err(CoreError::InvalidTransactionStatus {
                transaction_id,
                current_status: "cancelled".to_string(),
            }
            .into());
        }
        Ok(self.db.transactions().cancel(transaction_id).await?)
    }

    // =========================================================================
    // Payments and Milling
    // =========================================================================

    /// Records a payment against a customer's balance.
    pub async fn record_payment(
        &self,
        customer_id: i64,
        transaction_id: Option<i64>,
        amount: f64,
        direction: PaymentDirection,
        method: PaymentMethod,
        notes: Option<String>,
    ) -> SyncServiceResult<PaymentRecord> {
        validate_amount(amount)?;
        let new = NewPayment {
            customer_id,
            transaction_id,
            amount,
            direction,
            method,
            notes,
        };
        Ok(self.db.payments().create(new).await?)
    }

    /// Records a milling run: paddy out, rice in, wastage audited, all in
    /// one unit of work.
    pub async fn record_milling(
        &self,
        paddy_item_id: i64,
        rice_item_id: i64,
        paddy_quantity_kg: f64,
        paddy_bags: i64,
        rice_quantity_kg: f64,
        rice_bags: i64,
        milling_date: DateTime<Utc>,
        notes: Option<String>,
    ) -> SyncServiceResult<MillingRecord> {
        validate_quantity_kg("paddy_quantity_kg", paddy_quantity_kg)?;
        validate_quantity_kg("rice_quantity_kg", rice_quantity_kg)?;
        validate_bags(paddy_bags)?;
        validate_bags(rice_bags)?;

        if rice_quantity_kg > paddy_quantity_kg {
            return Err(CoreError::MillingOutputExceedsInput {
                paddy_kg: paddy_quantity_kg,
                rice_kg: rice_quantity_kg,
            }
            .into());
        }

        let paddy = self.require_item(paddy_item_id).await?;
        if paddy.current_quantity_kg < paddy_quantity_kg {
            return Err(CoreError::InsufficientStock {
                item: paddy.name,
                available_kg: paddy.current_quantity_kg,
                requested_kg: paddy_quantity_kg,
            }
            .into());
        }
        // The rice item must exist before stock lands on it
        self.require_item(rice_item_id).await?;

        let new = NewMilling {
            paddy_item_id,
            rice_item_id,
            paddy_quantity_kg,
            paddy_bags,
            rice_quantity_kg,
            rice_bags,
            milling_date,
            notes,
        };
        Ok(self.db.millings().record(new).await?)
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Runs one sync pass right now (pull-to-refresh). Push then pull;
    /// pull is skipped when the pass hit an auth failure.
    pub async fn sync_now(&self) -> SyncPassResult {
        info!("Explicit sync requested");
        let result = self.orchestrator.run_sync_pass().await;
        if !result.auth_required {
            self.orchestrator.pull_remote_changes().await;
        }
        result
    }

    /// Number of mutations still on their way to the remote. The UI's
    /// "pending sync" badge.
    pub async fn pending_sync_count(&self) -> SyncServiceResult<i64> {
        Ok(self.db.sync_queue().pending_count().await?)
    }

    /// Number of mutations parked as Failed or Conflict, awaiting manual
    /// resolution.
    pub async fn failed_sync_count(&self) -> SyncServiceResult<i64> {
        Ok(self.db.sync_queue().failed_count().await?)
    }

    /// Returns every Failed/Conflict mutation to Pending with a fresh
    /// retry budget. The "retry failed syncs" button.
    pub async fn reset_failed_mutations(&self) -> SyncServiceResult<u64> {
        Ok(self.db.sync_queue().reset_failed().await?)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn validate_lines(&self, lines: &[NewTransactionLine]) -> SyncServiceResult<()> {
        if lines.is_empty() {
            return Err(CoreError::EmptyTransaction.into());
        }
        if lines.len() > MAX_LINE_ITEMS {
            return Err(CoreError::TooManyLineItems {
                max: MAX_LINE_ITEMS,
            }
            .into());
        }
        for line in lines {
            validate_quantity_kg("quantity_kg", line.quantity_kg)?;
            validate_price_per_kg(line.price_per_kg)?;
            validate_bags(line.bags)?;
        }
        Ok(())
    }

    /// Checks that stock covers every line of a sell, with quantities
    /// aggregated per item so two lines of the same lot cannot slip past
    /// the check individually. Fails before anything is enqueued.
    async fn check_stock_covers(&self, lines: &[NewTransactionLine]) -> SyncServiceResult<()> {
        use std::collections::HashMap;

        let mut requested: HashMap<i64, f64> = HashMap::new();
        for line in lines {
            *requested.entry(line.item_id).or_default() += line.quantity_kg;
        }

        for (item_id, requested_kg) in requested {
            let item = self.require_item(item_id).await?;
            if item.current_quantity_kg < requested_kg {
                return Err(CoreError::InsufficientStock {
                    item: item.name,
                    available_kg: item.current_quantity_kg,
                    requested_kg,
                }
                .into());
            }
        }
        Ok(())
    }

    async fn require_item(&self, item_id: i64) -> SyncServiceResult<InventoryItem> {
        Ok(self
            .db
            .inventory()
            .get(item_id)
            .await?
            .ok_or_else(|| millbook_db::DbError::not_found("InventoryItem", item_id))?)
    }
}

// =============================================================================
// Tests
// =============================================================================
