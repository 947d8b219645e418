//! # Sync Queue Repository
//!
//! The durable mutation queue for offline-first synchronization.
//!
//! ## The Outbox Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Durable Queue Implementation                         │
//! │                                                                         │
//! │  LOCAL OPERATION (e.g., create_buy_transaction)                        │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   SINGLE TRANSACTION                            │   │
//! │  │                                                                 │   │
//! │  │  1. INSERT INTO transactions / transaction_items               │   │
//! │  │  2. INSERT INTO stock_movements + UPDATE inventory_items       │   │
//! │  │  3. INSERT INTO sync_queue (entity_type, entity_id, payload)   │   │
//! │  │                                                                 │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  COMMIT ← Both sides land or neither does                              │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │             SYNC ORCHESTRATOR (millbook-sync)                   │   │
//! │  │                                                                 │   │
//! │  │  1. eligible_batch(now, n) - selection order below             │   │
//! │  │  2. Drive each record through the state machine                │   │
//! │  │  3. persist() each transition back to this table               │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Selection Order
//! A record is eligible when it is Pending, its retry window is open, and
//! no earlier record for the same `(entity_type, entity_id)` is in any
//! non-Synced state. The earlier-record rule is the per-entity
//! serialization lock: it also keeps a later record out while one is
//! Syncing, and holds history back behind a Failed or Conflict record so
//! an Update can never overtake its entity's dead Create.
//!
//! Eligible records are ordered by priority descending, then created_at
//! ascending (oldest first, bounding staleness). One consequence worth
//! naming: a batch can never contain two records for the same entity.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use millbook_core::{
    EntityKind, MutationPayload, MutationRecord, Operation, Priority, SyncStatus,
};

/// Repository for the durable sync queue.
#[derive(Debug, Clone)]
pub struct SyncQueueRepository {
    pool: SqlitePool,
}

// =============================================================================
// Transaction-Scoped Helpers
// =============================================================================
// These run against a borrowed connection so entity repositories can enqueue
// inside the same SQLite transaction as their ledger writes.

/// Inserts a fresh queue row and returns the assigned id.
pub(crate) async fn insert_record(
    conn: &mut SqliteConnection,
    record: &MutationRecord,
) -> DbResult<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO sync_queue (
            entity_type, entity_id, entity_server_id, operation, status,
            priority, payload, retry_count, max_retries, last_error,
            last_attempt_at, next_retry_at, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
        "#,
    )
    .bind(record.entity_type)
    .bind(record.entity_id)
    .bind(record.entity_server_id)
    .bind(record.operation)
    .bind(record.status)
    .bind(record.priority)
    .bind(&record.payload)
    .bind(record.retry_count)
    .bind(record.max_retries)
    .bind(&record.last_error)
    .bind(record.last_attempt_at)
    .bind(record.next_retry_at)
    .bind(record.created_at)
    .bind(record.updated_at)
    .execute(conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Enqueues a mutation inside the caller's transaction, coalescing where
/// the ordering rules allow it.
///
/// An Update folds into the entity's most recent record when that record
/// is still Pending and is itself a Create or Update: the remote has not
/// seen the old snapshot yet, so replacing the payload in place keeps one
/// record per effective state. Anything in-flight or terminal gets a new
/// record appended after it instead, preserving per-entity causal order.
pub(crate) async fn enqueue_in(
    conn: &mut SqliteConnection,
    operation: Operation,
    priority: Priority,
    payload: &MutationPayload,
    now: DateTime<Utc>,
) -> DbResult<i64> {
    let record = MutationRecord::new(operation, priority, payload, now)?;

    if operation == Operation::Update {
        let last: Option<MutationRecord> = sqlx::query_as(
            r#"
            SELECT * FROM sync_queue
            WHERE entity_type = ?1 AND entity_id = ?2
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .bind(record.entity_type)
        .bind(record.entity_id)
        .fetch_optional(&mut *conn)
        .await?;

        if let Some(last) = last {
            let coalescible = last.status == SyncStatus::Pending
                && matches!(last.operation, Operation::Create | Operation::Update);
            if coalescible {
                debug!(
                    record_id = last.id,
                    entity_type = %last.entity_type,
                    entity_id = last.entity_id,
                    "Coalescing update into pending record"
                );
                sqlx::query(
                    "UPDATE sync_queue SET payload = ?2, updated_at = ?3 WHERE id = ?1",
                )
                .bind(last.id)
                .bind(&record.payload)
                .bind(now)
                .execute(conn)
                .await?;
                return Ok(last.id);
            }
        }
    }

    insert_record(conn, &record).await
}

/// Deletes every non-Synced queue row for an entity.
///
/// Used when a never-synced entity is deleted locally: the remote has no
/// identity for it, so its queued history is simply cancelled.
pub(crate) async fn cancel_unsynced_for_entity(
    conn: &mut SqliteConnection,
    entity_type: EntityKind,
    entity_id: i64,
) -> DbResult<u64> {
    let result = sqlx::query(
        "DELETE FROM sync_queue WHERE entity_type = ?1 AND entity_id = ?2 AND status != 'synced'",
    )
    .bind(entity_type)
    .bind(entity_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected())
}

// =============================================================================
// Repository
// =============================================================================

impl SyncQueueRepository {
    /// Creates a new SyncQueueRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SyncQueueRepository { pool }
    }

    /// Enqueues a mutation on its own (outside any larger unit of work).
    ///
    /// Domain operations normally enqueue inside their own transaction;
    /// this entry point exists for self-healing re-enqueues and tests.
    pub async fn enqueue(
        &self,
        operation: Operation,
        priority: Priority,
        payload: &MutationPayload,
    ) -> DbResult<MutationRecord> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let id = enqueue_in(&mut tx, operation, priority, payload, now).await?;
        tx.commit().await?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| crate::error::DbError::not_found("MutationRecord", id))
    }

    /// Gets a queue record by id.
    pub async fn get_by_id(&self, id: i64) -> DbResult<Option<MutationRecord>> {
        let record = sqlx::query_as("SELECT * FROM sync_queue WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    /// Selects the next eligible records for transmission.
    ///
    /// Implements the selection order documented at module level: Pending,
    /// retry window open, no earlier non-Synced record for the same
    /// entity; priority descending, then oldest first.
    pub async fn eligible_batch(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> DbResult<Vec<MutationRecord>> {
        let records = sqlx::query_as(
            r#"
            SELECT q.* FROM sync_queue q
            WHERE q.status = 'pending'
              AND (q.next_retry_at IS NULL OR q.next_retry_at <= ?1)
              AND NOT EXISTS (
                  SELECT 1 FROM sync_queue earlier
                  WHERE earlier.entity_type = q.entity_type
                    AND earlier.entity_id = q.entity_id
                    AND earlier.id < q.id
                    AND earlier.status != 'synced'
              )
            ORDER BY q.priority DESC, q.created_at ASC, q.id ASC
            LIMIT ?2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Persists a record's state after a state-machine transition.
    ///
    /// The in-memory transitions live in `millbook_core::mutation`; this
    /// writes the resulting fields back to the durable row.
    pub async fn persist(&self, record: &MutationRecord) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE sync_queue SET
                entity_server_id = ?2,
                status = ?3,
                retry_count = ?4,
                last_error = ?5,
                last_attempt_at = ?6,
                next_retry_at = ?7,
                updated_at = ?8
            WHERE id = ?1
            "#,
        )
        .bind(record.id)
        .bind(record.entity_server_id)
        .bind(record.status)
        .bind(record.retry_count)
        .bind(&record.last_error)
        .bind(record.last_attempt_at)
        .bind(record.next_retry_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns every Syncing record to Pending with no backoff window.
    ///
    /// Run at agent startup (crash recovery) and after a cancelled
    /// in-flight pass, so interrupted attempts retry immediately instead
    /// of waiting out a backoff they never earned.
    pub async fn release_in_flight(&self) -> DbResult<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'pending',
                next_retry_at = NULL,
                updated_at = ?1
            WHERE status = 'syncing'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Resets every Failed and Conflict record to Pending with a zeroed
    /// retry budget. The manual-retry escape hatch surfaced to users.
    pub async fn reset_failed(&self) -> DbResult<u64> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE sync_queue SET
                status = 'pending',
                retry_count = 0,
                last_error = NULL,
                next_retry_at = NULL,
                updated_at = ?1
            WHERE status IN ('failed', 'conflict')
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes Synced records older than the cutoff. Storage hygiene only;
    /// correctness never depends on purging.
    pub async fn purge_synced(&self, older_than: DateTime<Utc>) -> DbResult<u64> {
        let result =
            sqlx::query("DELETE FROM sync_queue WHERE status = 'synced' AND updated_at < ?1")
                .bind(older_than)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected())
    }

    /// Counts records still on their way to the remote (Pending or
    /// Syncing). The "pending sync" indicator number.
    pub async fn pending_count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_queue WHERE status IN ('pending', 'syncing')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Counts records parked in a terminal failure state (Failed or
    /// Conflict) awaiting manual resolution.
    pub async fn failed_count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sync_queue WHERE status IN ('failed', 'conflict')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// All records for one entity in causal (id) order. Diagnostics and
    /// tests.
    pub async fn records_for_entity(
        &self,
        entity_type: EntityKind,
        entity_id: i64,
    ) -> DbResult<Vec<MutationRecord>> {
        let records = sqlx::query_as(
            "SELECT * FROM sync_queue WHERE entity_type = ?1 AND entity_id = ?2 ORDER BY id ASC",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// True when the entity has any record that has not reached Synced.
    ///
    /// Self-healing uses this to spot unsynced ledger rows whose enqueue
    /// was lost: unsynced entity + no live record means re-enqueue.
    pub async fn has_unsynced_record(
        &self,
        entity_type: EntityKind,
        entity_id: i64,
    ) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sync_queue
            WHERE entity_type = ?1 AND entity_id = ?2 AND status != 'synced'
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;
    use millbook_core::{Customer, InventoryItem, ItemGrade};

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    fn customer_payload(local_id: i64, name: &str) -> MutationPayload {
        let now = Utc::now();
        MutationPayload::Customer(Customer {
            local_id,
            server_id: None,
            name: name.to_string(),
            phone: None,
            address: None,
            notes: None,
            is_synced: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        })
    }

    fn item_payload(local_id: i64) -> MutationPayload {
        let now = Utc::now();
        MutationPayload::Inventory(InventoryItem {
            local_id,
            server_id: None,
            name: "Basmati Paddy".to_string(),
            grade: ItemGrade::Paddy,
            current_quantity_kg: 0.0,
            current_bags: 0,
            average_price_per_kg: 0.0,
            is_synced: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        })
    }

    #[tokio::test]
    async fn test_enqueue_round_trip() {
        let db = test_db().await;
        let queue = db.sync_queue();

        let record = queue
            .enqueue(
                Operation::Create,
                Priority::Normal,
                &customer_payload(1, "Akbar Traders"),
            )
            .await
            .unwrap();

        assert!(record.id > 0);
        assert_eq!(record.status, SyncStatus::Pending);
        assert_eq!(record.entity_type, EntityKind::Customer);
        assert_eq!(record.entity_id, 1);

        let fetched = queue.get_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(fetched.payload, record.payload);
    }

    #[tokio::test]
    async fn test_update_coalesces_into_pending_create() {
        let db = test_db().await;
        let queue = db.sync_queue();

        let create = queue
            .enqueue(
                Operation::Create,
                Priority::Normal,
                &customer_payload(1, "Akbar Traders"),
            )
            .await
            .unwrap();
        let update = queue
            .enqueue(
                Operation::Update,
                Priority::Normal,
                &customer_payload(1, "Akbar & Sons"),
            )
            .await
            .unwrap();

        // Folded in place: same record, Create operation, newest payload
        assert_eq!(update.id, create.id);
        assert_eq!(update.operation, Operation::Create);
        assert!(update.payload.contains("Akbar & Sons"));

        let records = queue
            .records_for_entity(EntityKind::Customer, 1)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_update_appends_after_in_flight_record() {
        let db = test_db().await;
        let queue = db.sync_queue();
        let now = Utc::now();

        let mut create = queue
            .enqueue(
                Operation::Create,
                Priority::Normal,
                &customer_payload(1, "Akbar Traders"),
            )
            .await
            .unwrap();
        create.begin_attempt(now).unwrap();
        queue.persist(&create).await.unwrap();

        let update = queue
            .enqueue(
                Operation::Update,
                Priority::Normal,
                &customer_payload(1, "Akbar & Sons"),
            )
            .await
            .unwrap();

        assert_ne!(update.id, create.id);
        assert_eq!(update.operation, Operation::Update);
    }

    #[tokio::test]
    async fn test_per_entity_ordering_blocks_later_records() {
        let db = test_db().await;
        let queue = db.sync_queue();
        let now = Utc::now();

        let mut create = queue
            .enqueue(
                Operation::Create,
                Priority::Normal,
                &customer_payload(1, "Akbar Traders"),
            )
            .await
            .unwrap();
        // Force the create in flight so the delete cannot coalesce past it
        create.begin_attempt(now).unwrap();
        queue.persist(&create).await.unwrap();
        let delete = queue
            .enqueue(
                Operation::Delete,
                Priority::Normal,
                &customer_payload(1, "Akbar Traders"),
            )
            .await
            .unwrap();
        // A second entity's record is unaffected by customer 1's lock
        queue
            .enqueue(Operation::Create, Priority::Normal, &item_payload(9))
            .await
            .unwrap();

        // Customer 1 is locked by its Syncing create; only the item shows
        let batch = queue.eligible_batch(now, 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].entity_type, EntityKind::Inventory);

        // Complete the create; the delete becomes the entity's next record
        create.complete(Some(501), now).unwrap();
        queue.persist(&create).await.unwrap();

        let batch = queue.eligible_batch(now, 10).await.unwrap();
        let ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
        assert!(ids.contains(&delete.id));
    }

    #[tokio::test]
    async fn test_failed_record_blocks_entity_history() {
        let db = test_db().await;
        let queue = db.sync_queue();
        let now = Utc::now();

        let mut create = queue
            .enqueue(Operation::Create, Priority::Normal, &item_payload(3))
            .await
            .unwrap();
        create.begin_attempt(now).unwrap();
        create.record_conflict("duplicate", now).unwrap();
        queue.persist(&create).await.unwrap();

        queue
            .enqueue(Operation::Update, Priority::Critical, &item_payload(3))
            .await
            .unwrap();

        // Even at Critical priority, the update waits behind the conflict
        let batch = queue.eligible_batch(now, 10).await.unwrap();
        assert!(batch.is_empty());

        // Manual reset releases the whole entity history in order
        assert_eq!(queue.reset_failed().await.unwrap(), 1);
        let batch = queue.eligible_batch(now, 10).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, create.id);
    }

    #[tokio::test]
    async fn test_selection_order_priority_then_age() {
        let db = test_db().await;
        let queue = db.sync_queue();

        let low = queue
            .enqueue(Operation::Create, Priority::Low, &customer_payload(1, "a"))
            .await
            .unwrap();
        let normal = queue
            .enqueue(Operation::Create, Priority::Normal, &item_payload(2))
            .await
            .unwrap();
        let critical = queue
            .enqueue(
                Operation::Create,
                Priority::Critical,
                &customer_payload(3, "c"),
            )
            .await
            .unwrap();

        let batch = queue.eligible_batch(Utc::now(), 10).await.unwrap();
        let ids: Vec<i64> = batch.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![critical.id, normal.id, low.id]);
    }

    #[tokio::test]
    async fn test_backoff_window_gates_eligibility() {
        let db = test_db().await;
        let queue = db.sync_queue();
        let now = Utc::now();

        let mut record = queue
            .enqueue(Operation::Create, Priority::Normal, &item_payload(1))
            .await
            .unwrap();
        record.begin_attempt(now).unwrap();
        record.record_transient_failure("timeout", now).unwrap();
        queue.persist(&record).await.unwrap();

        // Inside the window: invisible. After it: selectable again.
        assert!(queue.eligible_batch(now, 10).await.unwrap().is_empty());
        let later = now + Duration::minutes(3);
        assert_eq!(queue.eligible_batch(later, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_release_in_flight() {
        let db = test_db().await;
        let queue = db.sync_queue();
        let now = Utc::now();

        let mut record = queue
            .enqueue(Operation::Create, Priority::Normal, &item_payload(1))
            .await
            .unwrap();
        record.begin_attempt(now).unwrap();
        queue.persist(&record).await.unwrap();

        assert_eq!(queue.release_in_flight().await.unwrap(), 1);

        let released = queue.get_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(released.status, SyncStatus::Pending);
        assert!(released.next_retry_at.is_none());
        // No retry budget consumed by a cancelled attempt
        assert_eq!(released.retry_count, 0);
    }

    #[tokio::test]
    async fn test_counts_and_purge() {
        let db = test_db().await;
        let queue = db.sync_queue();
        let now = Utc::now();

        let mut synced = queue
            .enqueue(Operation::Create, Priority::Normal, &item_payload(1))
            .await
            .unwrap();
        synced.begin_attempt(now).unwrap();
        synced.complete(Some(11), now).unwrap();
        queue.persist(&synced).await.unwrap();

        let mut failed = queue
            .enqueue(Operation::Create, Priority::Normal, &customer_payload(2, "b"))
            .await
            .unwrap();
        failed.begin_attempt(now).unwrap();
        failed.record_conflict("duplicate phone", now).unwrap();
        queue.persist(&failed).await.unwrap();

        queue
            .enqueue(Operation::Create, Priority::Normal, &customer_payload(3, "c"))
            .await
            .unwrap();

        assert_eq!(queue.pending_count().await.unwrap(), 1);
        assert_eq!(queue.failed_count().await.unwrap(), 1);

        // Purge removes only the synced row
        let purged = queue.purge_synced(now + Duration::minutes(1)).await.unwrap();
        assert_eq!(purged, 1);
        assert!(queue.get_by_id(synced.id).await.unwrap().is_none());
        assert!(queue.get_by_id(failed.id).await.unwrap().is_some());
    }
}
