//! # Milling Repository
//!
//! Entity Ledger operations for milling runs.
//!
//! A milling run is a compound stock movement: paddy deducted from one
//! item, rice added to another, wastage recorded as an explicit audit
//! value. All three effects plus the queue record commit as one SQLite
//! transaction.
//!
//! The produced rice is valued at what it actually cost: the consumed
//! paddy's value spread over the rice output
//! (`paddy_kg * paddy_avg / rice_kg`), so the rice item's running average
//! reflects milling cost rather than zero.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::{DbError, DbResult};
use crate::repository::{inventory, queue};
use millbook_core::stock::milling_wastage;
use millbook_core::{InventoryItem, MillingRecord, MutationPayload, Operation, Priority, StockMovement};

/// Input for one milling run, validated by the caller.
#[derive(Debug, Clone)]
pub struct NewMilling {
    pub paddy_item_id: i64,
    pub rice_item_id: i64,
    pub paddy_quantity_kg: f64,
    pub paddy_bags: i64,
    pub rice_quantity_kg: f64,
    pub rice_bags: i64,
    pub milling_date: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Repository for milling database operations.
#[derive(Debug, Clone)]
pub struct MillingRepository {
    pool: SqlitePool,
}

impl MillingRepository {
    /// Creates a new MillingRepository.
    pub fn new(pool: SqlitePool) -> Self {
        MillingRepository { pool }
    }

    /// Records a milling run as one unit of work: the milling record, the
    /// paddy deduction, the rice addition, and the queue records.
    pub async fn record(&self, new: NewMilling) -> DbResult<MillingRecord> {
        let now = Utc::now();
        let wastage_kg = milling_wastage(new.paddy_quantity_kg, new.rice_quantity_kg);

        let mut tx = self.pool.begin().await?;

        // The paddy's pre-deduction average prices the rice output
        let paddy: InventoryItem =
            sqlx::query_as("SELECT * FROM inventory_items WHERE local_id = ?1")
                .bind(new.paddy_item_id)
                .fetch_optional(&mut *tx)
                .await?
                .ok_or_else(|| DbError::not_found("InventoryItem", new.paddy_item_id))?;
        let rice_cost_per_kg = if new.rice_quantity_kg > 0.0 {
            Some(new.paddy_quantity_kg * paddy.average_price_per_kg / new.rice_quantity_kg)
        } else {
            None
        };

        let result = sqlx::query(
            r#"
            INSERT INTO milling_records (
                server_id, paddy_item_id, rice_item_id, paddy_quantity_kg,
                rice_quantity_kg, wastage_kg, milling_date, notes,
                is_synced, is_deleted, created_at, updated_at
            ) VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, ?7, FALSE, FALSE, ?8, ?8)
            "#,
        )
        .bind(new.paddy_item_id)
        .bind(new.rice_item_id)
        .bind(new.paddy_quantity_kg)
        .bind(new.rice_quantity_kg)
        .bind(wastage_kg)
        .bind(new.milling_date)
        .bind(&new.notes)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        let milling_id = result.last_insert_rowid();

        let input = StockMovement::milling_input(
            new.paddy_item_id,
            milling_id,
            new.paddy_quantity_kg,
            new.paddy_bags,
            now,
        );
        inventory::apply_movement_in(&mut tx, &input, now).await?;

        let output = StockMovement::milling_output(
            new.rice_item_id,
            milling_id,
            new.rice_quantity_kg,
            new.rice_bags,
            rice_cost_per_kg,
            now,
        );
        inventory::apply_movement_in(&mut tx, &output, now).await?;

        let milling = MillingRecord {
            local_id: milling_id,
            server_id: None,
            paddy_item_id: new.paddy_item_id,
            rice_item_id: new.rice_item_id,
            paddy_quantity_kg: new.paddy_quantity_kg,
            rice_quantity_kg: new.rice_quantity_kg,
            wastage_kg,
            milling_date: new.milling_date,
            notes: new.notes,
            is_synced: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        queue::enqueue_in(
            &mut tx,
            Operation::Create,
            Priority::Normal,
            &MutationPayload::Milling(milling.clone()),
            now,
        )
        .await?;

        tx.commit().await?;

        info!(
            milling_id,
            paddy_kg = new.paddy_quantity_kg,
            rice_kg = new.rice_quantity_kg,
            wastage_kg,
            "Milling run recorded"
        );
        Ok(milling)
    }

    /// Gets a milling record by local id.
    pub async fn get(&self, local_id: i64) -> DbResult<Option<MillingRecord>> {
        let milling = sqlx::query_as("SELECT * FROM milling_records WHERE local_id = ?1")
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(milling)
    }

    /// Most recent milling runs first.
    pub async fn list_recent(&self, limit: u32) -> DbResult<Vec<MillingRecord>> {
        let millings = sqlx::query_as(
            "SELECT * FROM milling_records ORDER BY milling_date DESC, local_id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(millings)
    }

    /// Milling records whose latest mutation has not reached the remote.
    pub async fn get_unsynced(&self) -> DbResult<Vec<MillingRecord>> {
        let millings = sqlx::query_as("SELECT * FROM milling_records WHERE is_synced = FALSE")
            .fetch_all(&self.pool)
            .await?;
        Ok(millings)
    }

    /// Records a confirmed sync; an existing server id is never
    /// overwritten.
    pub async fn mark_synced(&self, local_id: i64, server_id: Option<i64>) -> DbResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE milling_records SET
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
    use crate::repository::transaction::{NewTransaction, NewTransactionLine};
    use millbook_core::{EntityKind, ItemGrade, TransactionKind};

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_milling_moves_stock_between_items() {
        let db = test_db().await;
        let customer = db
            .customers()
            .create("Akbar Traders", None, None, None)
            .await
            .unwrap();
        let paddy = db
            .inventory()
            .create("Basmati Paddy", ItemGrade::Paddy)
            .await
            .unwrap();
        let rice = db
            .inventory()
            .create("Basmati Rice", ItemGrade::Rice)
            .await
            .unwrap();

        // Stock the paddy at Rs.50/kg
        db.transactions()
            .create(NewTransaction {
                kind: TransactionKind::Buy,
                customer_id: customer.local_id,
                transaction_date: Utc::now(),
                notes: None,
                lines: vec![NewTransactionLine {
                    item_id: paddy.local_id,
                    quantity_kg: 1000.0,
                    bags: 20,
                    price_per_kg: 50.0,
                }],
            })
            .await
            .unwrap();

        let milling = db
            .millings()
            .record(NewMilling {
                paddy_item_id: paddy.local_id,
                rice_item_id: rice.local_id,
                paddy_quantity_kg: 1000.0,
                paddy_bags: 20,
                rice_quantity_kg: 650.0,
                rice_bags: 13,
                milling_date: Utc::now(),
                notes: None,
            })
            .await
            .unwrap();

        assert_eq!(milling.wastage_kg, 350.0);

        let paddy = db.inventory().get(paddy.local_id).await.unwrap().unwrap();
        assert_eq!(paddy.current_quantity_kg, 0.0);
        assert_eq!(paddy.current_bags, 0);

        let rice = db.inventory().get(rice.local_id).await.unwrap().unwrap();
        assert_eq!(rice.current_quantity_kg, 650.0);
        assert_eq!(rice.current_bags, 13);
        // 1000kg at Rs.50 spread over 650kg of rice
        assert!((rice.average_price_per_kg - 50_000.0 / 650.0).abs() < 1e-9);

        // One Milling create queued, plus Inventory mutations for both items
        let records = db
            .sync_queue()
            .records_for_entity(EntityKind::Milling, milling.local_id)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::Create);
    }
}
