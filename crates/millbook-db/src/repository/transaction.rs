//! # Transaction Repository
//!
//! Entity Ledger operations for buy/sell transactions, and the atomic
//! domain units that tie a transaction to its stock effect.
//!
//! ## Atomic Unit of Work
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                create() - ONE SQLite transaction                        │
//! │                                                                         │
//! │  1. INSERT INTO transactions                                           │
//! │  2. INSERT INTO transaction_items        (one per line)                │
//! │  3. Per line: stock movement + level update + Inventory mutation       │
//! │     (apply_movement_in, inventory.rs)                                  │
//! │  4. Enqueue Transaction Create mutation  (full bundle payload)         │
//! │                                                                         │
//! │  COMMIT: the caller never observes a transaction without its stock     │
//! │  effect, or a ledger write without its queue records. A failure at     │
//! │  any step rolls the whole unit back.                                   │
//! │                                                                         │
//! │  cancel() appends compensating movements the same way, even when the   │
//! │  original transaction has not synced yet: the reversal queues behind   │
//! │  it and stock never drifts.                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Stock preconditions (sufficient stock for a sell) are validated by the
//! service layer before this repository is called; nothing here is
//! enqueued or written when validation fails.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::repository::{inventory, queue};
use millbook_core::{
    MutationPayload, Operation, Priority, StockMovement, Transaction, TransactionBundle,
    TransactionItem, TransactionKind, TransactionStatus,
};

// =============================================================================
// Input Types
// =============================================================================

/// One line of a new transaction.
#[derive(Debug, Clone)]
pub struct NewTransactionLine {
    /// Local id of the inventory item moved by this line.
    pub item_id: i64,
    pub quantity_kg: f64,
    pub bags: i64,
    pub price_per_kg: f64,
}

/// A new buy or sell transaction, validated by the caller.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub kind: TransactionKind,
    pub customer_id: i64,
    pub transaction_date: DateTime<Utc>,
    pub notes: Option<String>,
    pub lines: Vec<NewTransactionLine>,
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for transaction database operations.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    /// Creates a new TransactionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TransactionRepository { pool }
    }

    /// Creates a transaction with its line items, stock movements, level
    /// updates, and queue records as one unit of work.
    pub async fn create(
        &self,
        new: NewTransaction,
    ) -> DbResult<(Transaction, Vec<TransactionItem>)> {
        let now = Utc::now();
        let total_amount: f64 = new
            .lines
            .iter()
            .map(|l| TransactionItem::compute_line_total(l.quantity_kg, l.price_per_kg))
            .sum();

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO transactions (
                server_id, kind, status, customer_id, total_amount,
                transaction_date, notes, is_synced, is_deleted, created_at, updated_at
            ) VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, FALSE, FALSE, ?7, ?7)
            "#,
        )
        .bind(new.kind)
        .bind(TransactionStatus::Completed)
        .bind(new.customer_id)
        .bind(total_amount)
        .bind(new.transaction_date)
        .bind(&new.notes)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let transaction_id = result.last_insert_rowid();

        let mut items = Vec::with_capacity(new.lines.len());
        for line in &new.lines {
            let line_total =
                TransactionItem::compute_line_total(line.quantity_kg, line.price_per_kg);
            let result = sqlx::query(
                r#"
                INSERT INTO transaction_items (
                    transaction_id, item_id, quantity_kg, bags, price_per_kg,
                    line_total, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(transaction_id)
            .bind(line.item_id)
            .bind(line.quantity_kg)
            .bind(line.bags)
            .bind(line.price_per_kg)
            .bind(line_total)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            items.push(TransactionItem {
                local_id: result.last_insert_rowid(),
                transaction_id,
                item_id: line.item_id,
                quantity_kg: line.quantity_kg,
                bags: line.bags,
                price_per_kg: line.price_per_kg,
                line_total,
                created_at: now,
            });

            let movement = match new.kind {
                TransactionKind::Buy => StockMovement::purchase(
                    line.item_id,
                    transaction_id,
                    line.quantity_kg,
                    line.bags,
                    line.price_per_kg,
                    now,
                ),
                TransactionKind::Sell => StockMovement::sale(
                    line.item_id,
                    transaction_id,
                    line.quantity_kg,
                    line.bags,
                    now,
                ),
            };
            inventory::apply_movement_in(&mut tx, &movement, now).await?;
        }

        let transaction = Transaction {
            local_id: transaction_id,
            server_id: None,
            kind: new.kind,
            status: TransactionStatus::Completed,
            customer_id: new.customer_id,
            total_amount,
            transaction_date: new.transaction_date,
            notes: new.notes,
            is_synced: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        queue::enqueue_in(
            &mut tx,
            Operation::Create,
            Priority::High,
            &MutationPayload::Transaction(TransactionBundle {
                transaction: transaction.clone(),
                items: items.clone(),
            }),
            now,
        )
        .await?;

        tx.commit().await?;

        info!(
            transaction_id,
            kind = ?new.kind,
            total_amount,
            lines = items.len(),
            "Transaction created"
        );
        Ok((transaction, items))
    }

    /// Cancels a transaction, appending a compensating stock movement per
    /// line, as one unit of work.
    ///
    /// The reversal queues even when the original transaction has not
    /// synced yet. Reversing a sale restores stock at the original line
    /// price; reversing a purchase is a plain deduction.
    pub async fn cancel(&self, transaction_id: i64) -> DbResult<Transaction> {
        let (mut transaction, items) = self
            .get_with_items(transaction_id)
            .await?
            .ok_or_else(|| DbError::not_found("Transaction", transaction_id))?;

        let now = Utc::now();
        transaction.status = TransactionStatus::Cancelled;
        transaction.is_synced = false;
        transaction.updated_at = now;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE transactions SET
                status = ?2, is_synced = FALSE, updated_at = ?3
            WHERE local_id = ?1
            "#,
        )
        .bind(transaction_id)
        .bind(TransactionStatus::Cancelled)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for item in &items {
            let original = match transaction.kind {
                TransactionKind::Buy => StockMovement::purchase(
                    item.item_id,
                    transaction_id,
                    item.quantity_kg,
                    item.bags,
                    item.price_per_kg,
                    now,
                ),
                TransactionKind::Sell => StockMovement::sale(
                    item.item_id,
                    transaction_id,
                    item.quantity_kg,
                    item.bags,
                    now,
                ),
            };
            let reversal = StockMovement::reversal_of(&original, Some(item.price_per_kg), now);
            inventory::apply_movement_in(&mut tx, &reversal, now).await?;
        }

        queue::enqueue_in(
            &mut tx,
            Operation::Update,
            Priority::High,
            &MutationPayload::Transaction(TransactionBundle {
                transaction: transaction.clone(),
                items,
            }),
            now,
        )
        .await?;

        tx.commit().await?;

        info!(transaction_id, "Transaction cancelled, stock reversed");
        Ok(transaction)
    }

    /// Gets a transaction by local id.
    pub async fn get(&self, local_id: i64) -> DbResult<Option<Transaction>> {
        let transaction = sqlx::query_as("SELECT * FROM transactions WHERE local_id = ?1")
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(transaction)
    }

    /// Gets a transaction with its line items.
    pub async fn get_with_items(
        &self,
        local_id: i64,
    ) -> DbResult<Option<(Transaction, Vec<TransactionItem>)>> {
        let Some(transaction) = self.get(local_id).await? else {
            return Ok(None);
        };
        let items = self.items_for(local_id).await?;
        Ok(Some((transaction, items)))
    }

    /// The line items of one transaction, in entry order.
    pub async fn items_for(&self, transaction_id: i64) -> DbResult<Vec<TransactionItem>> {
        let items = sqlx::query_as(
            "SELECT * FROM transaction_items WHERE transaction_id = ?1 ORDER BY local_id ASC",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Most recent transactions first.
    pub async fn list_recent(&self, limit: u32) -> DbResult<Vec<Transaction>> {
        let transactions = sqlx::query_as(
            "SELECT * FROM transactions WHERE is_deleted = FALSE ORDER BY created_at DESC, local_id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(transactions)
    }

    /// Transactions whose latest mutation has not reached the remote.
    pub async fn get_unsynced(&self) -> DbResult<Vec<Transaction>> {
        let transactions = sqlx::query_as("SELECT * FROM transactions WHERE is_synced = FALSE")
            .fetch_all(&self.pool)
            .await?;
        Ok(transactions)
    }

    /// Records a confirmed sync; an existing server id is never
    /// overwritten.
    pub async fn mark_synced(&self, local_id: i64, server_id: Option<i64>) -> DbResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE transactions SET
                server_id = COALESCE(server_id, ?2),
                is_synced = TRUE,
                updated_at = ?3
            WHERE local_id = ?1
            "#,
        )
        .bind(local_id)
        .bind(server_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use millbook_core::{EntityKind, ItemGrade, MovementKind, StockLevel};

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    async fn seed(db: &Database) -> (i64, i64) {
        let customer = db
            .customers()
            .create("Akbar Traders", None, None, None)
            .await
            .unwrap();
        let item = db
            .inventory()
            .create("Basmati Paddy", ItemGrade::Paddy)
            .await
            .unwrap();
        (customer.local_id, item.local_id)
    }

    fn buy(customer_id: i64, item_id: i64, kg: f64, bags: i64, price: f64) -> NewTransaction {
        NewTransaction {
            kind: TransactionKind::Buy,
            customer_id,
            transaction_date: Utc::now(),
            notes: None,
            lines: vec![NewTransactionLine {
                item_id,
                quantity_kg: kg,
                bags,
                price_per_kg: price,
            }],
        }
    }

    #[tokio::test]
    async fn test_buy_adds_stock_atomically() {
        let db = test_db().await;
        let (customer_id, item_id) = seed(&db).await;

        let (transaction, items) = db
            .transactions()
            .create(buy(customer_id, item_id, 500.0, 10, 50.0))
            .await
            .unwrap();

        assert_eq!(transaction.total_amount, 25_000.0);
        assert_eq!(items.len(), 1);

        let item = db.inventory().get(item_id).await.unwrap().unwrap();
        assert_eq!(item.current_quantity_kg, 500.0);
        assert_eq!(item.current_bags, 10);
        assert_eq!(item.average_price_per_kg, 50.0);

        // Transaction bundle queued at High priority
        let records = db
            .sync_queue()
            .records_for_entity(EntityKind::Transaction, transaction.local_id)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::Create);
        assert_eq!(records[0].priority, Priority::High);
    }

    #[tokio::test]
    async fn test_sell_deducts_stock() {
        let db = test_db().await;
        let (customer_id, item_id) = seed(&db).await;
        db.transactions()
            .create(buy(customer_id, item_id, 500.0, 10, 50.0))
            .await
            .unwrap();

        let sell = NewTransaction {
            kind: TransactionKind::Sell,
            customer_id,
            transaction_date: Utc::now(),
            notes: None,
            lines: vec![NewTransactionLine {
                item_id,
                quantity_kg: 200.0,
                bags: 4,
                price_per_kg: 62.0,
            }],
        };
        db.transactions().create(sell).await.unwrap();

        let item = db.inventory().get(item_id).await.unwrap().unwrap();
        assert_eq!(item.current_quantity_kg, 300.0);
        assert_eq!(item.current_bags, 6);
        // Selling never moves the purchase average
        assert_eq!(item.average_price_per_kg, 50.0);
    }

    #[tokio::test]
    async fn test_cancel_sell_restores_stock_before_sync() {
        let db = test_db().await;
        let (customer_id, item_id) = seed(&db).await;
        db.transactions()
            .create(buy(customer_id, item_id, 500.0, 10, 50.0))
            .await
            .unwrap();

        let sell = NewTransaction {
            kind: TransactionKind::Sell,
            customer_id,
            transaction_date: Utc::now(),
            notes: None,
            lines: vec![NewTransactionLine {
                item_id,
                quantity_kg: 200.0,
                bags: 4,
                price_per_kg: 62.0,
            }],
        };
        let (sale, _) = db.transactions().create(sell).await.unwrap();

        // Cancel while the sale's own Create is still Pending
        let cancelled = db.transactions().cancel(sale.local_id).await.unwrap();
        assert_eq!(cancelled.status, TransactionStatus::Cancelled);

        let item = db.inventory().get(item_id).await.unwrap().unwrap();
        assert_eq!(item.current_quantity_kg, 500.0);
        assert_eq!(item.current_bags, 10);

        // The reversal shows in the audit trail and the trail still sums
        // to the level (no drift)
        let movements = db.inventory().movements_for_item(item_id).await.unwrap();
        assert!(movements
            .iter()
            .any(|m| m.kind == MovementKind::CancelReversal && m.quantity_delta_kg == 200.0));
        let replayed = StockLevel::replay(&movements);
        assert_eq!(replayed.quantity_kg, item.current_quantity_kg);

        // The cancellation folded into the sale's still-pending Create, so
        // the remote will only ever see the cancelled document
        let records = db
            .sync_queue()
            .records_for_entity(EntityKind::Transaction, sale.local_id)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::Create);
        match records[0].parse_payload().unwrap() {
            MutationPayload::Transaction(bundle) => {
                assert_eq!(bundle.transaction.status, TransactionStatus::Cancelled)
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_buy_deducts_back() {
        let db = test_db().await;
        let (customer_id, item_id) = seed(&db).await;
        let (purchase, _) = db
            .transactions()
            .create(buy(customer_id, item_id, 500.0, 10, 50.0))
            .await
            .unwrap();

        db.transactions().cancel(purchase.local_id).await.unwrap();

        let item = db.inventory().get(item_id).await.unwrap().unwrap();
        assert_eq!(item.current_quantity_kg, 0.0);
        assert_eq!(item.current_bags, 0);
    }

    #[tokio::test]
    async fn test_multi_line_transaction_touches_each_item() {
        let db = test_db().await;
        let (customer_id, paddy_id) = seed(&db).await;
        let rice = db
            .inventory()
            .create("Basmati Rice", ItemGrade::Rice)
            .await
            .unwrap();

        let multi = NewTransaction {
            kind: TransactionKind::Buy,
            customer_id,
            transaction_date: Utc::now(),
            notes: Some("two lots".to_string()),
            lines: vec![
                NewTransactionLine {
                    item_id: paddy_id,
                    quantity_kg: 300.0,
                    bags: 6,
                    price_per_kg: 45.0,
                },
                NewTransactionLine {
                    item_id: rice.local_id,
                    quantity_kg: 100.0,
                    bags: 2,
                    price_per_kg: 95.0,
                },
            ],
        };
        let (transaction, items) = db.transactions().create(multi).await.unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(transaction.total_amount, 300.0 * 45.0 + 100.0 * 95.0);
        assert_eq!(
            db.inventory()
                .get(paddy_id)
                .await
                .unwrap()
                .unwrap()
                .current_quantity_kg,
            300.0
        );
        assert_eq!(
            db.inventory()
                .get(rice.local_id)
                .await
                .unwrap()
                .unwrap()
                .current_quantity_kg,
            100.0
        );
    }
}
