//! # Payment Repository
//!
//! Entity Ledger operations for payments against a customer's running
//! balance. A payment commits together with its Create mutation, same as
//! every other domain write.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::DbResult;
use crate::repository::queue;
use millbook_core::{
    MutationPayload, Operation, PaymentDirection, PaymentMethod, PaymentRecord, Priority,
};

/// Input for one payment, validated by the caller.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub customer_id: i64,
    /// Local id of the settled transaction, if any.
    pub transaction_id: Option<i64>,
    pub amount: f64,
    pub direction: PaymentDirection,
    pub method: PaymentMethod,
    pub notes: Option<String>,
}

/// Repository for payment database operations.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    /// Records a payment and enqueues its Create mutation atomically.
    pub async fn create(&self, new: NewPayment) -> DbResult<PaymentRecord> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO payments (
                server_id, customer_id, transaction_id, amount, direction,
                method, notes, is_synced, is_deleted, created_at, updated_at
            ) VALUES (NULL, ?1, ?2, ?3, ?4, ?5, ?6, FALSE, FALSE, ?7, ?7)
            "#,
        )
        .bind(new.customer_id)
        .bind(new.transaction_id)
        .bind(new.amount)
        .bind(new.direction)
        .bind(new.method)
        .bind(&new.notes)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let payment = PaymentRecord {
            local_id: result.last_insert_rowid(),
            server_id: None,
            customer_id: new.customer_id,
            transaction_id: new.transaction_id,
            amount: new.amount,
            direction: new.direction,
            method: new.method,
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
            &MutationPayload::Payment(payment.clone()),
            now,
        )
        .await?;

        tx.commit().await?;

        debug!(
            local_id = payment.local_id,
            customer_id = new.customer_id,
            amount = new.amount,
            "Payment recorded"
        );
        Ok(payment)
    }

    /// Gets a payment by local id.
    pub async fn get(&self, local_id: i64) -> DbResult<Option<PaymentRecord>> {
        let payment = sqlx::query_as("SELECT * FROM payments WHERE local_id = ?1")
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    /// A customer's payments, newest first.
    pub async fn list_for_customer(&self, customer_id: i64) -> DbResult<Vec<PaymentRecord>> {
        let payments = sqlx::query_as(
            r#"
            SELECT * FROM payments
            WHERE customer_id = ?1 AND is_deleted = FALSE
            ORDER BY created_at DESC, local_id DESC
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    /// Payments whose latest mutation has not reached the remote.
    pub async fn get_unsynced(&self) -> DbResult<Vec<PaymentRecord>> {
        let payments = sqlx::query_as("SELECT * FROM payments WHERE is_synced = FALSE")
            .fetch_all(&self.pool)
            .await?;
        Ok(payments)
    }

    /// Records a confirmed sync; an existing server id is never
    /// overwritten.
    pub async fn mark_synced(&self, local_id: i64, server_id: Option<i64>) -> DbResult<()> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE payments SET
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
