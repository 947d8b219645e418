//! # Inventory Repository
//!
//! Entity Ledger operations for inventory items and the append-only stock
//! movement trail.
//!
//! ## Stock Consistency
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                   One Movement, One Transaction                         │
//! │                                                                         │
//! │  apply_movement_in(conn, movement)                                     │
//! │       │                                                                 │
//! │       ├── 1. Read the item's current level                             │
//! │       ├── 2. StockLevel::apply (pure arithmetic, millbook-core)        │
//! │       ├── 3. INSERT INTO stock_movements   (audit trail)               │
//! │       ├── 4. UPDATE inventory_items levels (denormalized sums)         │
//! │       └── 5. Enqueue an Inventory mutation with the fresh snapshot     │
//! │                                                                         │
//! │  All five run on the caller's connection, inside the caller's          │
//! │  transaction. The denormalized level can never disagree with the       │
//! │  movement trail, and sync failures never revert a movement that        │
//! │  committed here: the local ledger stays the source of truth for        │
//! │  in-app stock display.                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::queue;
use millbook_core::{
    InventoryItem, ItemGrade, MutationPayload, Operation, Priority, StockLevel, StockMovement,
};

/// An inventory item change as the remote reports it on the pull path.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteInventoryItem {
    /// Server-assigned identity.
    pub id: i64,
    pub name: String,
    pub grade: ItemGrade,
    #[serde(default)]
    pub is_deleted: bool,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Transaction-Scoped Helpers
// =============================================================================

/// Applies one stock movement on the caller's connection: audit row,
/// level update, and the Inventory mutation enqueue, all in the caller's
/// transaction. Returns the item carrying its new level.
pub(crate) async fn apply_movement_in(
    conn: &mut SqliteConnection,
    movement: &StockMovement,
    now: DateTime<Utc>,
) -> DbResult<InventoryItem> {
    let mut item: InventoryItem =
        sqlx::query_as("SELECT * FROM inventory_items WHERE local_id = ?1")
            .bind(movement.item_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("InventoryItem", movement.item_id))?;

    let level = StockLevel {
        quantity_kg: item.current_quantity_kg,
        bags: item.current_bags,
        average_price_per_kg: item.average_price_per_kg,
    }
    .apply(movement);

    sqlx::query(
        r#"
        INSERT INTO stock_movements (
            item_id, kind, quantity_delta_kg, bags_delta, price_per_kg,
            transaction_id, milling_id, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
    )
    .bind(movement.item_id)
    .bind(movement.kind)
    .bind(movement.quantity_delta_kg)
    .bind(movement.bags_delta)
    .bind(movement.price_per_kg)
    .bind(movement.transaction_id)
    .bind(movement.milling_id)
    .bind(movement.created_at)
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        UPDATE inventory_items SET
            current_quantity_kg = ?2,
            current_bags = ?3,
            average_price_per_kg = ?4,
            is_synced = FALSE,
            updated_at = ?5
        WHERE local_id = ?1
        "#,
    )
    .bind(movement.item_id)
    .bind(level.quantity_kg)
    .bind(level.bags)
    .bind(level.average_price_per_kg)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    item.current_quantity_kg = level.quantity_kg;
    item.current_bags = level.bags;
    item.average_price_per_kg = level.average_price_per_kg;
    item.is_synced = false;
    item.updated_at = now;

    queue::enqueue_in(
        conn,
        Operation::Update,
        Priority::Normal,
        &MutationPayload::Inventory(item.clone()),
        now,
    )
    .await?;

    Ok(item)
}

// =============================================================================
// Repository
// =============================================================================

/// Repository for inventory database operations.
#[derive(Debug, Clone)]
pub struct InventoryRepository {
    pool: SqlitePool,
}

impl InventoryRepository {
    /// Creates a new InventoryRepository.
    pub fn new(pool: SqlitePool) -> Self {
        InventoryRepository { pool }
    }

    /// Creates an inventory item (empty stock) and enqueues its Create
    /// mutation atomically.
    pub async fn create(&self, name: &str, grade: ItemGrade) -> DbResult<InventoryItem> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO inventory_items (
                server_id, name, grade, current_quantity_kg, current_bags,
                average_price_per_kg, is_synced, is_deleted, created_at, updated_at
            ) VALUES (NULL, ?1, ?2, 0, 0, 0, FALSE, FALSE, ?3, ?3)
            "#,
        )
        .bind(name)
        .bind(grade)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let item = InventoryItem {
            local_id: result.last_insert_rowid(),
            server_id: None,
            name: name.to_string(),
            grade,
            current_quantity_kg: 0.0,
            current_bags: 0,
            average_price_per_kg: 0.0,
            is_synced: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        queue::enqueue_in(
            &mut tx,
            Operation::Create,
            Priority::Normal,
            &MutationPayload::Inventory(item.clone()),
            now,
        )
        .await?;

        tx.commit().await?;

        debug!(local_id = item.local_id, name = %name, "Inventory item created");
        Ok(item)
    }

    /// Gets an item by local id.
    pub async fn get(&self, local_id: i64) -> DbResult<Option<InventoryItem>> {
        let item = sqlx::query_as("SELECT * FROM inventory_items WHERE local_id = ?1")
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    /// Lists live items ordered by name.
    pub async fn list(&self) -> DbResult<Vec<InventoryItem>> {
        let items =
            sqlx::query_as("SELECT * FROM inventory_items WHERE is_deleted = FALSE ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        Ok(items)
    }

    /// Applies a manual stock adjustment (count correction, spillage) as
    /// its own atomic unit.
    pub async fn adjust_stock(
        &self,
        item_id: i64,
        quantity_delta_kg: f64,
        bags_delta: i64,
    ) -> DbResult<InventoryItem> {
        let now = Utc::now();
        let movement = StockMovement::adjustment(item_id, quantity_delta_kg, bags_delta, now);

        let mut tx = self.pool.begin().await?;
        let item = apply_movement_in(&mut tx, &movement, now).await?;
        tx.commit().await?;

        debug!(
            item_id,
            quantity_delta_kg, bags_delta, "Stock adjustment applied"
        );
        Ok(item)
    }

    /// The movement trail for one item, oldest first.
    pub async fn movements_for_item(&self, item_id: i64) -> DbResult<Vec<StockMovement>> {
        let movements = sqlx::query_as(
            "SELECT * FROM stock_movements WHERE item_id = ?1 ORDER BY local_id ASC",
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(movements)
    }

    /// Items whose latest mutation has not reached the remote.
    pub async fn get_unsynced(&self) -> DbResult<Vec<InventoryItem>> {
        let items = sqlx::query_as("SELECT * FROM inventory_items WHERE is_synced = FALSE")
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// Items modified after the given instant.
    pub async fn get_updated_after(&self, since: DateTime<Utc>) -> DbResult<Vec<InventoryItem>> {
        let items = sqlx::query_as("SELECT * FROM inventory_items WHERE updated_at > ?1")
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// Records a confirmed sync; an existing server id is never
    /// overwritten.
    pub async fn mark_synced(&self, local_id: i64, server_id: Option<i64>) -> DbResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE inventory_items SET
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

    /// Merges a remote-side item change, last-write-wins on descriptive
    /// fields only.
    ///
    /// Stock levels are deliberately left alone: the local movement trail
    /// is the source of truth for stock, and the remote's view of levels
    /// converges through this device's own pushed movements.
    pub async fn apply_remote(&self, remote: &RemoteInventoryItem) -> DbResult<bool> {
        let local: Option<InventoryItem> =
            sqlx::query_as("SELECT * FROM inventory_items WHERE server_id = ?1")
                .bind(remote.id)
                .fetch_optional(&self.pool)
                .await?;

        match local {
            None => {
                if remote.is_deleted {
                    return Ok(false);
                }
                sqlx::query(
                    r#"
                    INSERT INTO inventory_items (
                        server_id, name, grade, current_quantity_kg, current_bags,
                        average_price_per_kg, is_synced, is_deleted, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, 0, 0, 0, TRUE, FALSE, ?4, ?4)
                    "#,
                )
                .bind(remote.id)
                .bind(&remote.name)
                .bind(remote.grade)
                .bind(remote.updated_at)
                .execute(&self.pool)
                .await?;
                Ok(true)
            }
            Some(local) => {
                if !local.is_synced || remote.updated_at <= local.updated_at {
                    return Ok(false);
                }
                sqlx::query(
                    r#"
                    UPDATE inventory_items SET
                        name = ?2, grade = ?3, is_deleted = ?4, updated_at = ?5
                    WHERE local_id = ?1
                    "#,
                )
                .bind(local.local_id)
                .bind(&remote.name)
                .bind(remote.grade)
                .bind(remote.is_deleted)
                .bind(remote.updated_at)
                .execute(&self.pool)
                .await?;
                Ok(true)
            }
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
