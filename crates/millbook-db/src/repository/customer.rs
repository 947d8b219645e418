//! # Customer Repository
//!
//! Entity Ledger operations for customers.
//!
//! ## Local-First Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Customer Record Lifecycle                           │
//! │                                                                         │
//! │  create()  ──► row inserted (server_id NULL, is_synced false)          │
//! │                + Create mutation enqueued in the same transaction      │
//! │                                                                         │
//! │  update()  ──► row updated, updated_at bumped, is_synced false         │
//! │                + Update mutation enqueued (coalesces into a pending    │
//! │                  record when the old snapshot never left the device)   │
//! │                                                                         │
//! │  delete()  ──► server_id known:   soft-delete tombstone + Delete       │
//! │                  mutation; the row survives until that mutation syncs  │
//! │                server_id unknown: queued history cancelled and the     │
//! │                  row removed outright (nothing remote to reconcile)    │
//! │                                                                         │
//! │  mark_synced() ──► sync engine's only write: fills server_id,          │
//! │                    flips is_synced                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use crate::repository::queue;
use millbook_core::{Customer, EntityKind, MutationPayload, Operation, Priority};

/// A customer change as the remote reports it on the pull path.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCustomer {
    /// Server-assigned identity.
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
    pub updated_at: DateTime<Utc>,
}

/// Repository for customer database operations.
#[derive(Debug, Clone)]
pub struct CustomerRepository {
    pool: SqlitePool,
}

impl CustomerRepository {
    /// Creates a new CustomerRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CustomerRepository { pool }
    }

    /// Creates a customer and enqueues its Create mutation atomically.
    pub async fn create(
        &self,
        name: &str,
        phone: Option<&str>,
        address: Option<&str>,
        notes: Option<&str>,
    ) -> DbResult<Customer> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO customers (
                server_id, name, phone, address, notes,
                is_synced, is_deleted, created_at, updated_at
            ) VALUES (NULL, ?1, ?2, ?3, ?4, FALSE, FALSE, ?5, ?5)
            "#,
        )
        .bind(name)
        .bind(phone)
        .bind(address)
        .bind(notes)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let customer = Customer {
            local_id: result.last_insert_rowid(),
            server_id: None,
            name: name.to_string(),
            phone: phone.map(String::from),
            address: address.map(String::from),
            notes: notes.map(String::from),
            is_synced: false,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        queue::enqueue_in(
            &mut tx,
            Operation::Create,
            Priority::Normal,
            &MutationPayload::Customer(customer.clone()),
            now,
        )
        .await?;

        tx.commit().await?;

        debug!(local_id = customer.local_id, name = %name, "Customer created");
        Ok(customer)
    }

    /// Gets a customer by local id (tombstones included).
    pub async fn get(&self, local_id: i64) -> DbResult<Option<Customer>> {
        let customer = sqlx::query_as("SELECT * FROM customers WHERE local_id = ?1")
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(customer)
    }

    /// Lists live (non-deleted) customers ordered by name.
    pub async fn list(&self) -> DbResult<Vec<Customer>> {
        let customers =
            sqlx::query_as("SELECT * FROM customers WHERE is_deleted = FALSE ORDER BY name")
                .fetch_all(&self.pool)
                .await?;
        Ok(customers)
    }

    /// Updates a customer's fields and enqueues the Update mutation
    /// atomically.
    pub async fn update(
        &self,
        local_id: i64,
        name: &str,
        phone: Option<&str>,
        address: Option<&str>,
        notes: Option<&str>,
    ) -> DbResult<Customer> {
        let mut customer = self
            .get(local_id)
            .await?
            .ok_or_else(|| DbError::not_found("Customer", local_id))?;

        let now = Utc::now();
        customer.name = name.to_string();
        customer.phone = phone.map(String::from);
        customer.address = address.map(String::from);
        customer.notes = notes.map(String::from);
        customer.is_synced = false;
        customer.updated_at = now;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE customers SET
                name = ?2, phone = ?3, address = ?4, notes = ?5,
                is_synced = FALSE, updated_at = ?6
            WHERE local_id = ?1
            "#,
        )
        .bind(local_id)
        .bind(name)
        .bind(phone)
        .bind(address)
        .bind(notes)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        queue::enqueue_in(
            &mut tx,
            Operation::Update,
            Priority::Normal,
            &MutationPayload::Customer(customer.clone()),
            now,
        )
        .await?;

        tx.commit().await?;
        Ok(customer)
    }

    /// Deletes a customer.
    ///
    /// With a server identity the row becomes a soft-delete tombstone and
    /// a Delete mutation is enqueued; without one the queued history is
    /// cancelled and the row removed outright.
    pub async fn delete(&self, local_id: i64) -> DbResult<()> {
        let mut customer = self
            .get(local_id)
            .await?
            .ok_or_else(|| DbError::not_found("Customer", local_id))?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        if customer.server_id.is_none() {
            queue::cancel_unsynced_for_entity(&mut tx, EntityKind::Customer, local_id).await?;
            sqlx::query("DELETE FROM customers WHERE local_id = ?1")
                .bind(local_id)
                .execute(&mut *tx)
                .await?;
        } else {
            customer.is_deleted = true;
            customer.is_synced = false;
            customer.updated_at = now;

            sqlx::query(
                "UPDATE customers SET is_deleted = TRUE, is_synced = FALSE, updated_at = ?2 WHERE local_id = ?1",
            )
            .bind(local_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            queue::enqueue_in(
                &mut tx,
                Operation::Delete,
                Priority::Normal,
                &MutationPayload::Customer(customer),
                now,
            )
            .await?;
        }

        tx.commit().await?;
        debug!(local_id, "Customer deleted");
        Ok(())
    }

    /// Customers whose latest mutation has not reached the remote.
    pub async fn get_unsynced(&self) -> DbResult<Vec<Customer>> {
        let customers = sqlx::query_as("SELECT * FROM customers WHERE is_synced = FALSE")
            .fetch_all(&self.pool)
            .await?;
        Ok(customers)
    }

    /// Customers modified after the given instant (pull-cursor queries).
    pub async fn get_updated_after(&self, since: DateTime<Utc>) -> DbResult<Vec<Customer>> {
        let customers = sqlx::query_as("SELECT * FROM customers WHERE updated_at > ?1")
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(customers)
    }

    /// Records a confirmed sync: fills `server_id` (never overwriting an
    /// existing one, so replayed confirmations are harmless) and flips
    /// `is_synced`.
    pub async fn mark_synced(&self, local_id: i64, server_id: Option<i64>) -> DbResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE customers SET
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

    /// Hard-removes a tombstone once its Delete mutation is Synced.
    pub async fn purge_tombstone(&self, local_id: i64) -> DbResult<()> {
        sqlx::query("DELETE FROM customers WHERE local_id = ?1 AND is_deleted = TRUE")
            .bind(local_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Merges a remote-side change, last-write-wins.
    ///
    /// The remote copy is applied only when it is strictly newer AND the
    /// local row has no outstanding unsynced mutation; otherwise local
    /// intent stands and the next push overwrites the remote. Unknown
    /// server ids insert as new, already-synced rows.
    ///
    /// Returns true when the remote change was applied.
    pub async fn apply_remote(&self, remote: &RemoteCustomer) -> DbResult<bool> {
        let local: Option<Customer> =
            sqlx::query_as("SELECT * FROM customers WHERE server_id = ?1")
                .bind(remote.id)
                .fetch_optional(&self.pool)
                .await?;

        match local {
            None => {
                if remote.is_deleted {
                    // Never seen locally and already gone remotely
                    return Ok(false);
                }
                sqlx::query(
                    r#"
                    INSERT INTO customers (
                        server_id, name, phone, address, notes,
                        is_synced, is_deleted, created_at, updated_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, TRUE, FALSE, ?6, ?6)
                    "#,
                )
                .bind(remote.id)
                .bind(&remote.name)
                .bind(&remote.phone)
                .bind(&remote.address)
                .bind(&remote.notes)
                .bind(remote.updated_at)
                .execute(&self.pool)
                .await?;
                Ok(true)
            }
            Some(local) => {
                if !local.is_synced || remote.updated_at <= local.updated_at {
                    debug!(
                        local_id = local.local_id,
                        "Local copy wins, remote change skipped"
                    );
                    return Ok(false);
                }
                if remote.is_deleted {
                    sqlx::query("DELETE FROM customers WHERE local_id = ?1")
                        .bind(local.local_id)
                        .execute(&self.pool)
                        .await?;
                    return Ok(true);
                }
                sqlx::query(
                    r#"
                    UPDATE customers SET
                        name = ?2, phone = ?3, address = ?4, notes = ?5,
                        updated_at = ?6
                    WHERE local_id = ?1
                    "#,
                )
                .bind(local.local_id)
                .bind(&remote.name)
                .bind(&remote.phone)
                .bind(&remote.address)
                .bind(&remote.notes)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Duration;
    use millbook_core::SyncStatus;

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_enqueues_mutation_atomically() {
        let db = test_db().await;
        let customer = db
            .customers()
            .create("Akbar Traders", Some("+92 300 1234567"), None, None)
            .await
            .unwrap();

        assert!(!customer.is_synced);
        assert!(customer.server_id.is_none());

        let records = db
            .sync_queue()
            .records_for_entity(EntityKind::Customer, customer.local_id)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::Create);
        assert_eq!(records[0].status, SyncStatus::Pending);
    }

    #[tokio::test]
    async fn test_update_coalesces_before_first_sync() {
        let db = test_db().await;
        let repo = db.customers();
        let customer = repo.create("Akbar Traders", None, None, None).await.unwrap();
        repo.update(customer.local_id, "Akbar & Sons", None, None, None)
            .await
            .unwrap();

        let records = db
            .sync_queue()
            .records_for_entity(EntityKind::Customer, customer.local_id)
            .await
            .unwrap();
        // Still one Create record, carrying the newest snapshot
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::Create);
        assert!(records[0].payload.contains("Akbar & Sons"));
    }

    #[tokio::test]
    async fn test_delete_of_never_synced_customer_is_hard() {
        let db = test_db().await;
        let repo = db.customers();
        let customer = repo.create("Akbar Traders", None, None, None).await.unwrap();
        repo.delete(customer.local_id).await.unwrap();

        assert!(repo.get(customer.local_id).await.unwrap().is_none());
        let records = db
            .sync_queue()
            .records_for_entity(EntityKind::Customer, customer.local_id)
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_delete_of_synced_customer_leaves_tombstone() {
        let db = test_db().await;
        let repo = db.customers();
        let customer = repo.create("Akbar Traders", None, None, None).await.unwrap();
        repo.mark_synced(customer.local_id, Some(900)).await.unwrap();

        repo.delete(customer.local_id).await.unwrap();

        let row = repo.get(customer.local_id).await.unwrap().unwrap();
        assert!(row.is_deleted);
        assert_eq!(row.server_id, Some(900));

        let records = db
            .sync_queue()
            .records_for_entity(EntityKind::Customer, customer.local_id)
            .await
            .unwrap();
        assert_eq!(records.last().unwrap().operation, Operation::Delete);

        repo.purge_tombstone(customer.local_id).await.unwrap();
        assert!(repo.get(customer.local_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_synced_never_overwrites_server_id() {
        // P5: replaying a confirmation must not change identity
        let db = test_db().await;
        let repo = db.customers();
        let customer = repo.create("Akbar Traders", None, None, None).await.unwrap();

        repo.mark_synced(customer.local_id, Some(900)).await.unwrap();
        repo.mark_synced(customer.local_id, Some(901)).await.unwrap();

        let row = repo.get(customer.local_id).await.unwrap().unwrap();
        assert_eq!(row.server_id, Some(900));
        assert!(row.is_synced);
    }

    #[tokio::test]
    async fn test_apply_remote_lww() {
        let db = test_db().await;
        let repo = db.customers();

        // Unknown server id inserts as a synced row
        let remote = RemoteCustomer {
            id: 31,
            name: "Remote Farmer".to_string(),
            phone: None,
            address: None,
            notes: None,
            is_deleted: false,
            updated_at: Utc::now(),
        };
        assert!(repo.apply_remote(&remote).await.unwrap());
        let rows = repo.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_synced);

        // Older remote change loses
        let stale = RemoteCustomer {
            name: "Stale Name".to_string(),
            updated_at: remote.updated_at - Duration::hours(1),
            ..remote.clone()
        };
        assert!(!repo.apply_remote(&stale).await.unwrap());

        // Newer remote change wins while the row is clean
        let newer = RemoteCustomer {
            name: "Renamed Remotely".to_string(),
            updated_at: remote.updated_at + Duration::hours(1),
            ..remote.clone()
        };
        assert!(repo.apply_remote(&newer).await.unwrap());
        assert_eq!(repo.list().await.unwrap()[0].name, "Renamed Remotely");
    }

    #[tokio::test]
    async fn test_apply_remote_defers_to_unsynced_local_edit() {
        let db = test_db().await;
        let repo = db.customers();

        let remote = RemoteCustomer {
            id: 31,
            name: "Remote Farmer".to_string(),
            phone: None,
            address: None,
            notes: None,
            is_deleted: false,
            updated_at: Utc::now(),
        };
        repo.apply_remote(&remote).await.unwrap();
        let local_id = repo.list().await.unwrap()[0].local_id;

        // A local edit leaves the row unsynced; even a newer remote copy
        // must not clobber it
        repo.update(local_id, "Edited Offline", None, None, None)
            .await
            .unwrap();
        let newer = RemoteCustomer {
            name: "Remote Wins?".to_string(),
            updated_at: Utc::now() + Duration::hours(2),
            ..remote
        };
        assert!(!repo.apply_remote(&newer).await.unwrap());
        assert_eq!(repo.get(local_id).await.unwrap().unwrap().name, "Edited Offline");
    }
}
