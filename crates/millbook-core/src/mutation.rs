//! # Mutation Records
//!
//! The durable description of one pending create/update/delete against one
//! entity, and the state machine that drives it through sync.
//!
//! ## State Machine
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     MutationRecord Lifecycle                            │
//! │                                                                         │
//! │                 begin_attempt                                           │
//! │   ┌─────────┐ ───────────────► ┌─────────┐                             │
//! │   │ Pending │                  │ Syncing │                             │
//! │   └─────────┘ ◄─────────────── └────┬────┘                             │
//! │        ▲       transient retry      │                                   │
//! │        │       (backoff window)     │ complete                         │
//! │        │                            ▼                                   │
//! │        │                       ┌─────────┐                             │
//! │        │                       │ Synced  │ ◄── terminal                │
//! │        │                       └─────────┘                             │
//! │        │                                                                │
//! │        │  reset_for_retry      ┌─────────┐                             │
//! │        ├────────────────────── │ Failed  │ ◄── retry budget exhausted  │
//! │        │                       └─────────┘     (terminal)              │
//! │        │                       ┌─────────┐                             │
//! │        └────────────────────── │Conflict │ ◄── semantic disagreement   │
//! │           reset_for_retry      └─────────┘     (terminal, no budget    │
//! │                                                 consumed)              │
//! │                                                                         │
//! │  release: Syncing → Pending with no backoff window, for in-flight      │
//! │  calls cancelled at shutdown.                                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Terminal states are sticky: nothing but an explicit `reset_for_retry`
//! ever moves a record out of Synced, Failed, or Conflict.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::types::{Customer, InventoryItem, MillingRecord, PaymentRecord, Transaction, TransactionItem};
use crate::{DEFAULT_MAX_RETRIES, MAX_BACKOFF_MINUTES};

// =============================================================================
// Enums
// =============================================================================

/// The kind of entity a mutation targets.
///
/// `User` exists for wire compatibility with the remote's collection
/// naming; no domain operation in this workspace produces User mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Customer,
    Inventory,
    Transaction,
    Payment,
    Milling,
    User,
}

impl EntityKind {
    /// The remote collection name for this entity kind.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customers",
            EntityKind::Inventory => "inventory",
            EntityKind::Transaction => "transactions",
            EntityKind::Payment => "payments",
            EntityKind::Milling => "millings",
            EntityKind::User => "users",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.collection())
    }
}

/// What the mutation does to its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// Where the mutation is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Awaiting transmission (or awaiting its retry window).
    Pending,
    /// Currently being transmitted; holds the per-entity lock.
    Syncing,
    /// Confirmed by the remote. Terminal.
    Synced,
    /// Retry budget exhausted on transient failures. Terminal until
    /// `reset_for_retry`.
    Failed,
    /// Semantic disagreement with the remote. Terminal until a human
    /// resolves it; never auto-retried with an unchanged payload.
    Conflict,
}

impl SyncStatus {
    /// True for states the engine will never leave on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Synced | SyncStatus::Failed | SyncStatus::Conflict)
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
            SyncStatus::Conflict => "conflict",
        };
        f.write_str(s)
    }
}

/// Drain-order hint. Influences selection order only, never correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[repr(i32)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

// =============================================================================
// Mutation Payload
// =============================================================================

/// A transaction snapshot with its line items, carried as one payload so
/// the remote receives the full document in a single create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionBundle {
    pub transaction: Transaction,
    pub items: Vec<TransactionItem>,
}

/// The entity snapshot carried by a mutation, captured by value at
/// enqueue time.
///
/// A tagged union keeps the queue ignorant of entity schemas while the
/// rest of the engine stays strongly typed; JSON serialization happens
/// only at the queue boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum MutationPayload {
    Customer(Customer),
    Inventory(InventoryItem),
    Transaction(TransactionBundle),
    Payment(PaymentRecord),
    Milling(MillingRecord),
}

impl MutationPayload {
    /// The entity kind this payload belongs to.
    pub fn kind(&self) -> EntityKind {
        match self {
            MutationPayload::Customer(_) => EntityKind::Customer,
            MutationPayload::Inventory(_) => EntityKind::Inventory,
            MutationPayload::Transaction(_) => EntityKind::Transaction,
            MutationPayload::Payment(_) => EntityKind::Payment,
            MutationPayload::Milling(_) => EntityKind::Milling,
        }
    }

    /// The local id of the entity inside the payload.
    pub fn entity_local_id(&self) -> i64 {
        match self {
            MutationPayload::Customer(c) => c.local_id,
            MutationPayload::Inventory(i) => i.local_id,
            MutationPayload::Transaction(b) => b.transaction.local_id,
            MutationPayload::Payment(p) => p.local_id,
            MutationPayload::Milling(m) => m.local_id,
        }
    }
}

// =============================================================================
// Backoff Policy
// =============================================================================

/// Retry backoff: `clamp(2^retry_count, 1, 60)` minutes.
///
/// Monotonically non-decreasing until the cap; a negative or huge
/// `retry_count` saturates instead of overflowing.
pub fn backoff_delay(retry_count: i64) -> Duration {
    let minutes = if retry_count <= 0 {
        1
    } else if retry_count >= 6 {
        // 2^6 = 64 already exceeds the 60-minute cap
        MAX_BACKOFF_MINUTES
    } else {
        (1i64 << retry_count).clamp(1, MAX_BACKOFF_MINUTES)
    };
    Duration::minutes(minutes)
}

// =============================================================================
// Mutation Record
// =============================================================================

/// A durable, queued description of one pending change to one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct MutationRecord {
    /// Stable record identity, assigned by the store at enqueue time.
    /// Monotonic with `created_at`, so it doubles as the per-entity
    /// causal order.
    pub id: i64,

    pub entity_type: EntityKind,

    /// Local id of the affected entity.
    pub entity_id: i64,

    /// Remote id of the affected entity; filled once the entity's own
    /// Create mutation has synced, and re-resolved from the ledger at
    /// send time.
    pub entity_server_id: Option<i64>,

    pub operation: Operation,
    pub status: SyncStatus,
    pub priority: Priority,

    /// JSON of the [`MutationPayload`] captured at enqueue time. Never a
    /// live reference to the entity row.
    pub payload: String,

    pub retry_count: i64,
    pub max_retries: i64,

    /// Message from the most recent failed or conflicted attempt.
    pub last_error: Option<String>,

    pub last_attempt_at: Option<DateTime<Utc>>,

    /// The record is not eligible for selection before this instant.
    pub next_retry_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MutationRecord {
    /// Builds a fresh Pending record for enqueueing. The store assigns
    /// the real `id` on insert.
    pub fn new(
        operation: Operation,
        priority: Priority,
        payload: &MutationPayload,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Ok(MutationRecord {
            id: 0,
            entity_type: payload.kind(),
            entity_id: payload.entity_local_id(),
            entity_server_id: None,
            operation,
            status: SyncStatus::Pending,
            priority,
            payload: serde_json::to_string(payload)?,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            last_attempt_at: None,
            next_retry_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Deserializes the stored payload snapshot.
    pub fn parse_payload(&self) -> Result<MutationPayload, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    /// True when the record may be selected for transmission: Pending and
    /// outside any backoff window. Per-entity ordering is enforced by the
    /// queue, not here.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == SyncStatus::Pending
            && self.next_retry_at.map_or(true, |at| now >= at)
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// Pending → Syncing. The caller must hold the per-entity lock for
    /// the duration of the attempt.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status != SyncStatus::Pending {
            return Err(CoreError::InvalidSyncTransition {
                from: self.status,
                action: "begin an attempt on",
            });
        }
        self.status = SyncStatus::Syncing;
        self.last_attempt_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Syncing → Synced. Records the server-assigned entity id when the
    /// remote returned one.
    pub fn complete(&mut self, server_id: Option<i64>, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status != SyncStatus::Syncing {
            return Err(CoreError::InvalidSyncTransition {
                from: self.status,
                action: "complete",
            });
        }
        self.status = SyncStatus::Synced;
        if server_id.is_some() {
            self.entity_server_id = server_id;
        }
        self.last_error = None;
        self.next_retry_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Syncing → Pending (with a backoff window) or → Failed once the
    /// retry budget is exhausted after incrementing.
    pub fn record_transient_failure(
        &mut self,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        if self.status != SyncStatus::Syncing {
            return Err(CoreError::InvalidSyncTransition {
                from: self.status,
                action: "fail",
            });
        }
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.updated_at = now;

        if self.retry_count >= self.max_retries {
            self.status = SyncStatus::Failed;
            self.next_retry_at = None;
        } else {
            self.status = SyncStatus::Pending;
            self.next_retry_at = Some(now + backoff_delay(self.retry_count));
        }
        Ok(())
    }

    /// Syncing → Conflict. Consumes no retry budget: retrying an
    /// unchanged payload would conflict forever.
    pub fn record_conflict(&mut self, error: impl Into<String>, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status != SyncStatus::Syncing {
            return Err(CoreError::InvalidSyncTransition {
                from: self.status,
                action: "conflict",
            });
        }
        self.status = SyncStatus::Conflict;
        self.last_error = Some(error.into());
        self.next_retry_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Syncing → Pending with no backoff window. For in-flight calls
    /// cancelled at shutdown: the next pass retries immediately.
    pub fn release(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if self.status != SyncStatus::Syncing {
            return Err(CoreError::InvalidSyncTransition {
                from: self.status,
                action: "release",
            });
        }
        self.status = SyncStatus::Pending;
        self.next_retry_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// Failed/Conflict → Pending with a zeroed retry budget and cleared
    /// error. The only way out of a terminal failure state, and always an
    /// explicit user action.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) -> CoreResult<()> {
        if !matches!(self.status, SyncStatus::Failed | SyncStatus::Conflict) {
            return Err(CoreError::InvalidSyncTransition {
                from: self.status,
                action: "reset",
            });
        }
        self.status = SyncStatus::Pending;
        self.retry_count = 0;
        self.last_error = None;
        self.next_retry_at = None;
        self.updated_at = now;
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemGrade;

    fn sample_item() -> InventoryItem {
        InventoryItem {
            local_id: 7,
            server_id: None,
            name: "Basmati Paddy".to_string(),
            grade: ItemGrade::Paddy,
            current_quantity_kg: 0.0,
            current_bags: 0,
            average_price_per_kg: 0.0,
            is_synced: false,
            is_deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_record() -> MutationRecord {
        let payload = MutationPayload::Inventory(sample_item());
        MutationRecord::new(Operation::Create, Priority::Normal, &payload, Utc::now()).unwrap()
    }

    #[test]
    fn test_backoff_table() {
        // P3: clamp(2^n, 1, 60) minutes, monotonically non-decreasing
        let expected = [1, 2, 4, 8, 16, 32, 60, 60, 60, 60, 60];
        for (count, minutes) in expected.iter().enumerate() {
            assert_eq!(
                backoff_delay(count as i64),
                Duration::minutes(*minutes),
                "retry_count={count}"
            );
        }
        let mut last = Duration::zero();
        for count in 0..=10 {
            let delay = backoff_delay(count);
            assert!(delay >= last);
            last = delay;
        }
        // saturation guards
        assert_eq!(backoff_delay(-3), Duration::minutes(1));
        assert_eq!(backoff_delay(i64::MAX), Duration::minutes(60));
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut record = sample_record();
        let now = Utc::now();

        assert!(record.is_eligible(now));
        record.begin_attempt(now).unwrap();
        assert_eq!(record.status, SyncStatus::Syncing);
        assert!(!record.is_eligible(now));

        record.complete(Some(4242), now).unwrap();
        assert_eq!(record.status, SyncStatus::Synced);
        assert_eq!(record.entity_server_id, Some(4242));
        assert!(record.last_error.is_none());
    }

    #[test]
    fn test_transient_failure_schedules_backoff() {
        let mut record = sample_record();
        let now = Utc::now();

        record.begin_attempt(now).unwrap();
        record.record_transient_failure("connection refused", now).unwrap();

        assert_eq!(record.status, SyncStatus::Pending);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.next_retry_at, Some(now + Duration::minutes(2)));
        assert!(!record.is_eligible(now));
        assert!(record.is_eligible(now + Duration::minutes(2)));
    }

    #[test]
    fn test_retry_budget_exhaustion_becomes_failed() {
        let mut record = sample_record();
        let now = Utc::now();

        for _ in 0..2 {
            record.begin_attempt(now).unwrap();
            record.record_transient_failure("timeout", now).unwrap();
            assert_eq!(record.status, SyncStatus::Pending);
            record.next_retry_at = None; // open the window for the test
        }

        record.begin_attempt(now).unwrap();
        record.record_transient_failure("timeout", now).unwrap();
        assert_eq!(record.status, SyncStatus::Failed);
        assert_eq!(record.retry_count, 3);
    }

    #[test]
    fn test_conflict_consumes_no_retry_budget() {
        let mut record = sample_record();
        let now = Utc::now();

        record.begin_attempt(now).unwrap();
        record.record_conflict("duplicate phone", now).unwrap();

        assert_eq!(record.status, SyncStatus::Conflict);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.last_error.as_deref(), Some("duplicate phone"));
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        // P6: no transition out of a terminal state except reset_for_retry
        let now = Utc::now();

        let mut synced = sample_record();
        synced.begin_attempt(now).unwrap();
        synced.complete(Some(1), now).unwrap();
        assert!(synced.begin_attempt(now).is_err());
        assert!(synced.record_transient_failure("x", now).is_err());
        assert!(synced.reset_for_retry(now).is_err());
        assert_eq!(synced.status, SyncStatus::Synced);

        let mut conflicted = sample_record();
        conflicted.begin_attempt(now).unwrap();
        conflicted.record_conflict("stale version", now).unwrap();
        assert!(conflicted.begin_attempt(now).is_err());
        assert_eq!(conflicted.status, SyncStatus::Conflict);

        conflicted.reset_for_retry(now).unwrap();
        assert_eq!(conflicted.status, SyncStatus::Pending);
        assert_eq!(conflicted.retry_count, 0);
        assert!(conflicted.last_error.is_none());
    }

    #[test]
    fn test_release_reopens_immediately() {
        let mut record = sample_record();
        let now = Utc::now();

        record.begin_attempt(now).unwrap();
        record.release(now).unwrap();

        assert_eq!(record.status, SyncStatus::Pending);
        assert!(record.next_retry_at.is_none());
        assert!(record.is_eligible(now));
    }

    #[test]
    fn test_payload_round_trip_at_queue_boundary() {
        let record = sample_record();
        let payload = record.parse_payload().unwrap();
        assert_eq!(payload.kind(), EntityKind::Inventory);
        assert_eq!(payload.entity_local_id(), 7);
        assert_eq!(record.entity_type, EntityKind::Inventory);
        assert_eq!(record.entity_id, 7);
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(EntityKind::Customer.collection(), "customers");
        assert_eq!(EntityKind::Milling.collection(), "millings");
    }
}
