//! # Sync Orchestrator
//!
//! Drives one sync pass to completion: drains the eligible queue records,
//! calls the remote, classifies every outcome into a state transition, and
//! reconciles server-confirmed identities back into the Entity Ledger.
//!
//! ## One Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        run_sync_pass()                                  │
//! │                                                                         │
//! │  1. eligible_batch(now, batch_size)   ← §selection order, queue.rs     │
//! │       │                                                                 │
//! │       ├── Creates, grouped by entity type                              │
//! │       │     Customer → Inventory → Transaction → Payment → Milling     │
//! │       │     (parents before the documents that reference them)         │
//! │       │                                                                 │
//! │       │     POST sync/<collection> {"<collection>": [...]}             │
//! │       │       → {"synced": [{"local_id", "id"}]}                       │
//! │       │     complete + mark_synced per acknowledged entity             │
//! │       │                                                                 │
//! │       └── Updates/Deletes, one call each                               │
//! │             server id resolved from the ledger at send time;           │
//! │             still unresolved → DEFERRED, not sent, no attempt          │
//! │                                                                         │
//! │  2. Every outcome becomes a state transition:                          │
//! │       Success   → Synced   (+ ledger reconciliation)                   │
//! │       Transient → Pending with backoff, or Failed at budget            │
//! │       Conflict  → Conflict (terminal, no budget consumed)              │
//! │       Auth      → record released untouched, PASS ABORTS               │
//! │                                                                         │
//! │  run_sync_pass never returns Err: a local store failure logs and       │
//! │  ends the pass early, and the released/Syncing rows recover through    │
//! │  release_in_flight on the next agent start.                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A `tokio::sync::Mutex` serializes passes: the background agent and an
//! explicit `sync_now` can never overlap.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use millbook_db::{Database, RemoteCustomer, RemoteInventoryItem};
use millbook_core::{
    EntityKind, MutationPayload, MutationRecord, Operation, Priority, TransactionBundle,
};

use crate::error::SyncServiceResult;
use crate::outcome::{classify_outcome, SyncOutcome};
use crate::remote::{batch_create_path, entity_path, pull_path, BatchSyncResponse, RemoteApi};

/// Creates are transmitted in this order so referenced entities gain
/// their server ids before the documents that point at them.
const KIND_ORDER: [EntityKind; 6] = [
    EntityKind::Customer,
    EntityKind::Inventory,
    EntityKind::Transaction,
    EntityKind::Payment,
    EntityKind::Milling,
    EntityKind::User,
];

/// Collections this device also pulls changes for. Transactions,
/// payments, and millings are single-writer documents owned by this
/// device; only shared master data flows back.
const PULL_KINDS: [EntityKind; 2] = [EntityKind::Customer, EntityKind::Inventory];

// =============================================================================
// Results
// =============================================================================

/// Outcome summary of one sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncPassResult {
    /// Records actually transmitted (or attempted) this pass.
    pub attempted: usize,
    /// Records that reached Synced.
    pub succeeded: usize,
    /// Records that failed transiently (retrying) or exhausted their
    /// budget (Failed).
    pub failed: usize,
    /// Records parked as Conflict.
    pub conflicted: usize,
    /// Eligible records skipped because a referenced entity has no server
    /// id yet. Not attempts; they stay Pending untouched.
    pub deferred: usize,
    /// Set when the remote rejected the session; the rest of the pass was
    /// abandoned and the caller should force re-authentication.
    pub auth_required: bool,
}

/// Outcome summary of one pull cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullResult {
    /// Remote changes merged into the ledger.
    pub applied: usize,
    /// Remote changes skipped because local state won.
    pub skipped: usize,
    pub auth_required: bool,
}

/// Whether the pass keeps going after a group of sends.
#[derive(Debug, PartialEq, Eq)]
enum PassControl {
    Continue,
    Abort,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Drives sync passes against an injected remote.
pub struct SyncOrchestrator {
    db: Database,
    remote: Arc<dyn RemoteApi>,
    batch_size: usize,
    /// Serializes passes; no two can overlap.
    pass_lock: Mutex<()>,
}

impl SyncOrchestrator {
    /// Creates a new orchestrator.
    pub fn new(db: Database, remote: Arc<dyn RemoteApi>, batch_size: usize) -> Self {
        SyncOrchestrator {
            db,
            remote,
            batch_size,
            pass_lock: Mutex::new(()),
        }
    }

    /// Runs one sync pass. Never returns an error: every per-record
    /// failure becomes a state transition, and a local store failure ends
    /// the pass early with what was counted so far.
    pub async fn run_sync_pass(&self) -> SyncPassResult {
        let _guard = self.pass_lock.lock().await;

        let mut result = SyncPassResult::default();
        if let Err(e) = self.drive_pass(&mut result).await {
            error!(error = %e, "Sync pass ended early on local store failure");
        }

        info!(
            attempted = result.attempted,
            succeeded = result.succeeded,
            failed = result.failed,
            conflicted = result.conflicted,
            deferred = result.deferred,
            auth_required = result.auth_required,
            "Sync pass finished"
        );
        result
    }

    async fn drive_pass(&self, result: &mut SyncPassResult) -> SyncServiceResult<()> {
        let now = Utc::now();
        let records = self
            .db
            .sync_queue()
            .eligible_batch(now, self.batch_size as u32)
            .await?;

        if records.is_empty() {
            debug!("No eligible records, nothing to sync");
            return Ok(());
        }

        info!(count = records.len(), "Starting sync pass");

        // The queue guarantees at most one record per entity, so creates
        // batch freely and updates/deletes are independent of each other.
        let mut creates: HashMap<EntityKind, Vec<MutationRecord>> = HashMap::new();
        let mut singles: Vec<MutationRecord> = Vec::new();
        for record in records {
            if record.operation == Operation::Create {
                creates.entry(record.entity_type).or_default().push(record);
            } else {
                singles.push(record);
            }
        }

        for kind in KIND_ORDER {
            let Some(group) = creates.remove(&kind) else {
                continue;
            };
            if self.send_create_batch(kind, group, result).await? == PassControl::Abort {
                return Ok(());
            }
        }

        for record in singles {
            if self.send_single(record, result).await? == PassControl::Abort {
                return Ok(());
            }
        }

        Ok(())
    }

    // =========================================================================
    // Push: Batched Creates
    // =========================================================================

    async fn send_create_batch(
        &self,
        kind: EntityKind,
        records: Vec<MutationRecord>,
        result: &mut SyncPassResult,
    ) -> SyncServiceResult<PassControl> {
        let queue = self.db.sync_queue();

        // Resolve request bodies first; unresolved references defer the
        // record without recording an attempt.
        let mut ready: Vec<MutationRecord> = Vec::new();
        let mut bodies: Vec<serde_json::Value> = Vec::new();
        for record in records {
            match self.build_entity_body(&record).await? {
                Some(body) => {
                    ready.push(record);
                    bodies.push(body);
                }
                None => {
                    debug!(
                        record_id = record.id,
                        entity_type = %record.entity_type,
                        entity_id = record.entity_id,
                        "Deferred: referenced entity has no server id yet"
                    );
                    result.deferred += 1;
                }
            }
        }
        if ready.is_empty() {
            return Ok(PassControl::Continue);
        }

        let now = Utc::now();
        for record in &mut ready {
            record.begin_attempt(now)?;
            queue.persist(record).await?;
        }
        result.attempted += ready.len();

        let body = json!({ kind.collection(): bodies });
        let outcome = classify_outcome(self.remote.post(&batch_create_path(kind), body).await);

        match outcome {
            SyncOutcome::Success(response) => {
                let ack: BatchSyncResponse =
                    serde_json::from_value(response.data).unwrap_or_default();
                let by_local: HashMap<i64, i64> =
                    ack.synced.iter().map(|s| (s.local_id, s.id)).collect();

                for mut record in ready {
                    let now = Utc::now();
                    match by_local.get(&record.entity_id) {
                        Some(&server_id) => {
                            record.complete(Some(server_id), now)?;
                            queue.persist(&record).await?;
                            self.mark_entity_synced(kind, record.entity_id, Some(server_id))
                                .await?;
                            result.succeeded += 1;
                        }
                        None => {
                            // The remote accepted the batch but skipped
                            // this entity: a semantic disagreement, and
                            // resending the same payload cannot fix it
                            record.record_conflict("create not acknowledged by remote", now)?;
                            queue.persist(&record).await?;
                            result.conflicted += 1;
                        }
                    }
                }
            }
            SyncOutcome::Transient(message) => {
                warn!(kind = %kind, error = %message, "Batch create failed transiently");
                for mut record in ready {
                    record.record_transient_failure(&message, Utc::now())?;
                    queue.persist(&record).await?;
                    result.failed += 1;
                }
            }
            SyncOutcome::Conflict(message) => {
                warn!(kind = %kind, error = %message, "Batch create rejected by remote");
                for mut record in ready {
                    record.record_conflict(&message, Utc::now())?;
                    queue.persist(&record).await?;
                    result.conflicted += 1;
                }
            }
            SyncOutcome::Auth(message) => {
                warn!(error = %message, "Session rejected, aborting sync pass");
                for mut record in ready {
                    record.release(Utc::now())?;
                    queue.persist(&record).await?;
                }
                result.auth_required = true;
                return Ok(PassControl::Abort);
            }
        }

        Ok(PassControl::Continue)
    }

    // =========================================================================
    // Push: Individual Updates / Deletes
    // =========================================================================

    async fn send_single(
        &self,
        mut record: MutationRecord,
        result: &mut SyncPassResult,
    ) -> SyncServiceResult<PassControl> {
        let queue = self.db.sync_queue();

        // Resolve the entity's server id from the ledger at send time.
        // Legitimately still null when the entity's own Create has not
        // synced: defer, do not send.
        let server_id = match record.entity_server_id {
            Some(id) => Some(id),
            None => {
                self.entity_server_id(record.entity_type, record.entity_id)
                    .await?
            }
        };
        let Some(server_id) = server_id else {
            debug!(
                record_id = record.id,
                entity_type = %record.entity_type,
                entity_id = record.entity_id,
                "Deferred: entity has no server id yet"
            );
            result.deferred += 1;
            return Ok(PassControl::Continue);
        };
        record.entity_server_id = Some(server_id);

        let body = if record.operation == Operation::Update {
            match self.build_entity_body(&record).await? {
                Some(body) => Some(body),
                None => {
                    result.deferred += 1;
                    return Ok(PassControl::Continue);
                }
            }
        } else {
            None
        };

        let now = Utc::now();
        record.begin_attempt(now)?;
        queue.persist(&record).await?;
        result.attempted += 1;

        let path = entity_path(record.entity_type, server_id);
        let outcome = match body {
            Some(body) => classify_outcome(self.remote.put(&path, body).await),
            None => classify_outcome(self.remote.delete(&path).await),
        };

        match outcome {
            SyncOutcome::Success(_) => {
                let now = Utc::now();
                record.complete(None, now)?;
                queue.persist(&record).await?;
                if record.operation == Operation::Delete {
                    self.purge_entity(record.entity_type, record.entity_id).await?;
                } else {
                    self.mark_entity_synced(record.entity_type, record.entity_id, None)
                        .await?;
                }
                result.succeeded += 1;
            }
            SyncOutcome::Transient(message) => {
                warn!(record_id = record.id, error = %message, "Mutation failed transiently");
                record.record_transient_failure(&message, Utc::now())?;
                queue.persist(&record).await?;
                result.failed += 1;
            }
            SyncOutcome::Conflict(message) => {
                warn!(record_id = record.id, error = %message, "Mutation rejected by remote");
                record.record_conflict(&message, Utc::now())?;
                queue.persist(&record).await?;
                result.conflicted += 1;
            }
            SyncOutcome::Auth(message) => {
                warn!(error = %message, "Session rejected, aborting sync pass");
                record.release(Utc::now())?;
                queue.persist(&record).await?;
                result.auth_required = true;
                return Ok(PassControl::Abort);
            }
        }

        Ok(PassControl::Continue)
    }

    // =========================================================================
    // Request Bodies
    // =========================================================================

    /// Builds the wire body for a record's payload snapshot. `None` means
    /// a referenced entity has no server id yet and the record must be
    /// deferred.
    async fn build_entity_body(
        &self,
        record: &MutationRecord,
    ) -> SyncServiceResult<Option<serde_json::Value>> {
        let payload = record.parse_payload()?;

        let body = match payload {
            MutationPayload::Customer(c) => Some(json!({
                "local_id": c.local_id,
                "name": c.name,
                "phone": c.phone,
                "address": c.address,
                "notes": c.notes,
                "updated_at": c.updated_at,
            })),
            MutationPayload::Inventory(i) => Some(json!({
                "local_id": i.local_id,
                "name": i.name,
                "grade": i.grade,
                "current_quantity_kg": i.current_quantity_kg,
                "current_bags": i.current_bags,
                "average_price_per_kg": i.average_price_per_kg,
                "updated_at": i.updated_at,
            })),
            MutationPayload::Transaction(bundle) => {
                self.build_transaction_body(&bundle).await?
            }
            MutationPayload::Payment(p) => {
                let Some(customer_id) = self
                    .entity_server_id(EntityKind::Customer, p.customer_id)
                    .await?
                else {
                    return Ok(None);
                };
                let transaction_id = match p.transaction_id {
                    Some(local) => {
                        match self
                            .entity_server_id(EntityKind::Transaction, local)
                            .await?
                        {
                            Some(id) => Some(id),
                            None => return Ok(None),
                        }
                    }
                    None => None,
                };
                Some(json!({
                    "local_id": p.local_id,
                    "customer_id": customer_id,
                    "transaction_id": transaction_id,
                    "amount": p.amount,
                    "direction": p.direction,
                    "method": p.method,
                    "notes": p.notes,
                    "updated_at": p.updated_at,
                }))
            }
            MutationPayload::Milling(m) => {
                let Some(paddy_id) = self
                    .entity_server_id(EntityKind::Inventory, m.paddy_item_id)
                    .await?
                else {
                    return Ok(None);
                };
                let Some(rice_id) = self
                    .entity_server_id(EntityKind::Inventory, m.rice_item_id)
                    .await?
                else {
                    return Ok(None);
                };
                Some(json!({
                    "local_id": m.local_id,
                    "paddy_item_id": paddy_id,
                    "rice_item_id": rice_id,
                    "paddy_quantity_kg": m.paddy_quantity_kg,
                    "rice_quantity_kg": m.rice_quantity_kg,
                    "wastage_kg": m.wastage_kg,
                    "milling_date": m.milling_date,
                    "notes": m.notes,
                    "updated_at": m.updated_at,
                }))
            }
        };

        Ok(body)
    }

    async fn build_transaction_body(
        &self,
        bundle: &TransactionBundle,
    ) -> SyncServiceResult<Option<serde_json::Value>> {
        let Some(customer_id) = self
            .entity_server_id(EntityKind::Customer, bundle.transaction.customer_id)
            .await?
        else {
            return Ok(None);
        };

        let mut items = Vec::with_capacity(bundle.items.len());
        for item in &bundle.items {
            let Some(item_id) = self
                .entity_server_id(EntityKind::Inventory, item.item_id)
                .await?
            else {
                return Ok(None);
            };
            items.push(json!({
                "item_id": item_id,
                "quantity_kg": item.quantity_kg,
                "bags": item.bags,
                "price_per_kg": item.price_per_kg,
                "line_total": item.line_total,
            }));
        }

        Ok(Some(json!({
            "local_id": bundle.transaction.local_id,
            "kind": bundle.transaction.kind,
            "status": bundle.transaction.status,
            "customer_id": customer_id,
            "total_amount": bundle.transaction.total_amount,
            "transaction_date": bundle.transaction.transaction_date,
            "notes": bundle.transaction.notes,
            "items": items,
        })))
    }

    // =========================================================================
    // Ledger Reconciliation
    // =========================================================================

    async fn entity_server_id(
        &self,
        kind: EntityKind,
        local_id: i64,
    ) -> SyncServiceResult<Option<i64>> {
        let server_id = match kind {
            EntityKind::Customer => self
                .db
                .customers()
                .get(local_id)
                .await?
                .and_then(|c| c.server_id),
            EntityKind::Inventory => self
                .db
                .inventory()
                .get(local_id)
                .await?
                .and_then(|i| i.server_id),
            EntityKind::Transaction => self
                .db
                .transactions()
                .get(local_id)
                .await?
                .and_then(|t| t.server_id),
            EntityKind::Payment => self
                .db
                .payments()
                .get(local_id)
                .await?
                .and_then(|p| p.server_id),
            EntityKind::Milling => self
                .db
                .millings()
                .get(local_id)
                .await?
                .and_then(|m| m.server_id),
            EntityKind::User => None,
        };
        Ok(server_id)
    }

    async fn mark_entity_synced(
        &self,
        kind: EntityKind,
        local_id: i64,
        server_id: Option<i64>,
    ) -> SyncServiceResult<()> {
        match kind {
            EntityKind::Customer => self.db.customers().mark_synced(local_id, server_id).await?,
            EntityKind::Inventory => self.db.inventory().mark_synced(local_id, server_id).await?,
            EntityKind::Transaction => {
                self.db.transactions().mark_synced(local_id, server_id).await?
            }
            EntityKind::Payment => self.db.payments().mark_synced(local_id, server_id).await?,
            EntityKind::Milling => self.db.millings().mark_synced(local_id, server_id).await?,
            EntityKind::User => {
                warn!(local_id, "No ledger for User mutations, nothing to reconcile")
            }
        }
        Ok(())
    }

    /// Hard-removes a tombstone once its Delete reached the remote. Only
    /// customers are deletable through the service facade.
    async fn purge_entity(&self, kind: EntityKind, local_id: i64) -> SyncServiceResult<()> {
        if kind == EntityKind::Customer {
            self.db.customers().purge_tombstone(local_id).await?;
        }
        Ok(())
    }

    // =========================================================================
    // Self-Healing
    // =========================================================================

    /// Re-enqueues unsynced ledger rows that have no live queue record.
    ///
    /// A lost enqueue (crash between intent and write in some earlier
    /// version, manual surgery, restored backup) would otherwise strand an
    /// entity unsynced forever. Rows behind a Failed/Conflict record are
    /// left alone: they are waiting on manual resolution, not lost.
    pub async fn repair_queue(&self) -> SyncServiceResult<usize> {
        let queue = self.db.sync_queue();
        let mut repaired = 0;

        for customer in self.db.customers().get_unsynced().await? {
            if queue
                .has_unsynced_record(EntityKind::Customer, customer.local_id)
                .await?
            {
                continue;
            }
            let operation = repair_operation(customer.server_id, customer.is_deleted);
            queue
                .enqueue(
                    operation,
                    Priority::Normal,
                    &MutationPayload::Customer(customer),
                )
                .await?;
            repaired += 1;
        }

        for item in self.db.inventory().get_unsynced().await? {
            if queue
                .has_unsynced_record(EntityKind::Inventory, item.local_id)
                .await?
            {
                continue;
            }
            let operation = repair_operation(item.server_id, item.is_deleted);
            queue
                .enqueue(operation, Priority::Normal, &MutationPayload::Inventory(item))
                .await?;
            repaired += 1;
        }

        for transaction in self.db.transactions().get_unsynced().await? {
            if queue
                .has_unsynced_record(EntityKind::Transaction, transaction.local_id)
                .await?
            {
                continue;
            }
            let items = self.db.transactions().items_for(transaction.local_id).await?;
            let operation = repair_operation(transaction.server_id, transaction.is_deleted);
            queue
                .enqueue(
                    operation,
                    Priority::High,
                    &MutationPayload::Transaction(TransactionBundle { transaction, items }),
                )
                .await?;
            repaired += 1;
        }

        for payment in self.db.payments().get_unsynced().await? {
            if queue
                .has_unsynced_record(EntityKind::Payment, payment.local_id)
                .await?
            {
                continue;
            }
            let operation = repair_operation(payment.server_id, payment.is_deleted);
            queue
                .enqueue(operation, Priority::High, &MutationPayload::Payment(payment))
                .await?;
            repaired += 1;
        }

        for milling in self.db.millings().get_unsynced().await? {
            if queue
                .has_unsynced_record(EntityKind::Milling, milling.local_id)
                .await?
            {
                continue;
            }
            let operation = repair_operation(milling.server_id, milling.is_deleted);
            queue
                .enqueue(operation, Priority::Normal, &MutationPayload::Milling(milling))
                .await?;
            repaired += 1;
        }

        if repaired > 0 {
            info!(repaired, "Re-enqueued unsynced entities with no queue record");
        }
        Ok(repaired)
    }

    // =========================================================================
    // Pull
    // =========================================================================

    /// Fetches remote-side changes for the shared collections and merges
    /// them last-write-wins. Never returns an error; transport trouble is
    /// logged and retried on the next cycle.
    pub async fn pull_remote_changes(&self) -> PullResult {
        let mut result = PullResult::default();
        if let Err(e) = self.drive_pull(&mut result).await {
            error!(error = %e, "Pull cycle ended early on local store failure");
        }
        result
    }

    async fn drive_pull(&self, result: &mut PullResult) -> SyncServiceResult<()> {
        let meta = self.db.sync_meta();

        for kind in PULL_KINDS {
            let cursor = meta.get_pull_cursor(kind).await?;
            let path = pull_path(kind, &cursor.to_rfc3339());

            let response = match classify_outcome(self.remote.get(&path).await) {
                SyncOutcome::Success(response) => response,
                SyncOutcome::Auth(message) => {
                    warn!(error = %message, "Session rejected during pull");
                    result.auth_required = true;
                    return Ok(());
                }
                SyncOutcome::Transient(message) | SyncOutcome::Conflict(message) => {
                    warn!(kind = %kind, error = %message, "Pull skipped for collection");
                    continue;
                }
            };

            let changes = response
                .data
                .get(kind.collection())
                .cloned()
                .unwrap_or(serde_json::Value::Array(Vec::new()));

            let mut newest: Option<DateTime<Utc>> = None;
            match kind {
                EntityKind::Customer => {
                    let changes: Vec<RemoteCustomer> = serde_json::from_value(changes)?;
                    for change in changes {
                        newest = newest.max(Some(change.updated_at));
                        if self.db.customers().apply_remote(&change).await? {
                            result.applied += 1;
                        } else {
                            result.skipped += 1;
                        }
                    }
                }
                EntityKind::Inventory => {
                    let changes: Vec<RemoteInventoryItem> = serde_json::from_value(changes)?;
                    for change in changes {
                        newest = newest.max(Some(change.updated_at));
                        if self.db.inventory().apply_remote(&change).await? {
                            result.applied += 1;
                        } else {
                            result.skipped += 1;
                        }
                    }
                }
                _ => unreachable!("only master data is pulled"),
            }

            if let Some(newest) = newest {
                meta.set_pull_cursor(kind, newest).await?;
            }
        }

        Ok(())
    }
}

fn repair_operation(server_id: Option<i64>, is_deleted: bool) -> Operation {
    if is_deleted {
        Operation::Delete
    } else if server_id.is_none() {
        Operation::Create
    } else {
        Operation::Update
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use serde_json::Value;

    use millbook_db::{DbConfig, NewTransaction, NewTransactionLine};
    use millbook_core::{ItemGrade, SyncStatus, TransactionKind};

    use crate::remote::{RemoteFailure, RemoteResponse};

    // =========================================================================
    // Scripted Remote
    // =========================================================================

    /// A scripted remote: responses are consumed in call order, and every
    /// call is logged as (method, path).
    struct MockRemote {
        responses: StdMutex<VecDeque<Result<RemoteResponse, RemoteFailure>>>,
        calls: StdMutex<Vec<(String, String)>>,
    }

    impl MockRemote {
        fn scripted(
            responses: Vec<Result<RemoteResponse, RemoteFailure>>,
        ) -> Arc<Self> {
            Arc::new(MockRemote {
                responses: StdMutex::new(responses.into()),
                calls: StdMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn next(&self, method: &str, path: &str) -> Result<RemoteResponse, RemoteFailure> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), path.to_string()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RemoteFailure::Network("script exhausted".into())))
        }
    }

    #[async_trait]
    impl RemoteApi for MockRemote {
        async fn post(&self, path: &str, _body: Value) -> Result<RemoteResponse, RemoteFailure> {
            self.next("POST", path)
        }
        async fn put(&self, path: &str, _body: Value) -> Result<RemoteResponse, RemoteFailure> {
            self.next("PUT", path)
        }
        async fn delete(&self, path: &str) -> Result<RemoteResponse, RemoteFailure> {
            self.next("DELETE", path)
        }
        async fn get(&self, path: &str) -> Result<RemoteResponse, RemoteFailure> {
            self.next("GET", path)
        }
    }

    fn synced(entries: &[(i64, i64)]) -> Result<RemoteResponse, RemoteFailure> {
        let synced: Vec<Value> = entries
            .iter()
            .map(|(local_id, id)| json!({"local_id": local_id, "id": id}))
            .collect();
        Ok(RemoteResponse::ok_with(json!({ "synced": synced })))
    }

    async fn test_db() -> Database {
        Database::new(DbConfig::in_memory()).await.unwrap()
    }

    async fn seed_buy(db: &Database) -> (i64, i64, i64) {
        let customer = db
            .customers()
            .create("Akbar Traders", Some("+92 300 1234567"), None, None)
            .await
            .unwrap();
        let item = db
            .inventory()
            .create("Basmati Paddy", ItemGrade::Paddy)
            .await
            .unwrap();
        let (transaction, _) = db
            .transactions()
            .create(NewTransaction {
                kind: TransactionKind::Buy,
                customer_id: customer.local_id,
                transaction_date: Utc::now(),
                notes: None,
                lines: vec![NewTransactionLine {
                    item_id: item.local_id,
                    quantity_kg: 500.0,
                    bags: 10,
                    price_per_kg: 50.0,
                }],
            })
            .await
            .unwrap();
        (customer.local_id, item.local_id, transaction.local_id)
    }

    // =========================================================================
    // Pass Behavior
    // =========================================================================

    #[tokio::test]
    async fn test_pass_syncs_creates_in_dependency_order() {
        let db = test_db().await;
        let (customer_id, item_id, transaction_id) = seed_buy(&db).await;

        let remote = MockRemote::scripted(vec![
            synced(&[(customer_id, 101)]),
            synced(&[(item_id, 201)]),
            synced(&[(transaction_id, 301)]),
        ]);
        let orchestrator = SyncOrchestrator::new(db.clone(), remote.clone(), 50);

        let result = orchestrator.run_sync_pass().await;
        assert_eq!(result.attempted, 3);
        assert_eq!(result.succeeded, 3);
        assert_eq!(result.failed, 0);
        assert!(!result.auth_required);

        // Parents first: the transaction body needs both server ids
        let calls = remote.calls();
        assert_eq!(
            calls,
            vec![
                ("POST".to_string(), "sync/customers".to_string()),
                ("POST".to_string(), "sync/inventory".to_string()),
                ("POST".to_string(), "sync/transactions".to_string()),
            ]
        );

        // Server ids reconciled into the ledger
        let customer = db.customers().get(customer_id).await.unwrap().unwrap();
        assert_eq!(customer.server_id, Some(101));
        assert!(customer.is_synced);
        let transaction = db.transactions().get(transaction_id).await.unwrap().unwrap();
        assert_eq!(transaction.server_id, Some(301));

        // Stock untouched by syncing
        let item = db.inventory().get(item_id).await.unwrap().unwrap();
        assert_eq!(item.current_quantity_kg, 500.0);
        assert_eq!(item.current_bags, 10);

        assert_eq!(db.sync_queue().pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transaction_deferred_while_parent_unsynced() {
        // P4 at the orchestrator level: the transaction create is not even
        // transmitted while its customer has no server id
        let db = test_db().await;
        let (_, item_id, transaction_id) = seed_buy(&db).await;

        let remote = MockRemote::scripted(vec![
            Err(RemoteFailure::Network("connection refused".into())),
            synced(&[(item_id, 201)]),
        ]);
        let orchestrator = SyncOrchestrator::new(db.clone(), remote.clone(), 50);

        let result = orchestrator.run_sync_pass().await;
        // Customer attempt failed; the item synced; the transaction was
        // deferred without an attempt
        assert_eq!(result.attempted, 2);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.deferred, 1);

        // Only customers and inventory were called
        assert_eq!(remote.calls().len(), 2);

        let records = db
            .sync_queue()
            .records_for_entity(EntityKind::Transaction, transaction_id)
            .await
            .unwrap();
        assert_eq!(records[0].status, SyncStatus::Pending);
        // Deferral is not an attempt: no retry budget consumed
        assert_eq!(records[0].retry_count, 0);
        assert!(records[0].last_attempt_at.is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_backs_off_then_fails_at_budget() {
        let db = test_db().await;
        let customer = db
            .customers()
            .create("Akbar Traders", None, None, None)
            .await
            .unwrap();

        let remote = MockRemote::scripted(vec![
            Err(RemoteFailure::Timeout("30s".into())),
            Err(RemoteFailure::Timeout("30s".into())),
            Err(RemoteFailure::Timeout("30s".into())),
        ]);
        let orchestrator = SyncOrchestrator::new(db.clone(), remote.clone(), 50);
        let queue = db.sync_queue();

        orchestrator.run_sync_pass().await;
        let record = &queue
            .records_for_entity(EntityKind::Customer, customer.local_id)
            .await
            .unwrap()[0];
        assert_eq!(record.status, SyncStatus::Pending);
        assert_eq!(record.retry_count, 1);
        assert!(record.next_retry_at.is_some());

        // Inside the backoff window the next pass finds nothing
        let idle = orchestrator.run_sync_pass().await;
        assert_eq!(idle.attempted, 0);
        assert_eq!(remote.calls().len(), 1);

        // Force the window open twice more; the third failure exhausts the
        // budget and parks the record as Failed
        for _ in 0..2 {
            let mut record = queue
                .records_for_entity(EntityKind::Customer, customer.local_id)
                .await
                .unwrap()
                .remove(0);
            record.next_retry_at = None;
            queue.persist(&record).await.unwrap();
            orchestrator.run_sync_pass().await;
        }

        let record = &queue
            .records_for_entity(EntityKind::Customer, customer.local_id)
            .await
            .unwrap()[0];
        assert_eq!(record.status, SyncStatus::Failed);
        assert_eq!(record.retry_count, 3);
        assert_eq!(queue.failed_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_conflict_is_terminal_and_never_retried() {
        // P6: a conflicted create never goes out again on its own
        let db = test_db().await;
        let customer = db
            .customers()
            .create("Akbar Traders", Some("+92 300 1234567"), None, None)
            .await
            .unwrap();

        let remote = MockRemote::scripted(vec![Ok(RemoteResponse::rejected(
            409,
            "duplicate phone number",
        ))]);
        let orchestrator = SyncOrchestrator::new(db.clone(), remote.clone(), 50);

        let result = orchestrator.run_sync_pass().await;
        assert_eq!(result.conflicted, 1);

        let record = &db
            .sync_queue()
            .records_for_entity(EntityKind::Customer, customer.local_id)
            .await
            .unwrap()[0];
        assert_eq!(record.status, SyncStatus::Conflict);
        assert_eq!(record.last_error.as_deref(), Some("duplicate phone number"));
        // No retry budget consumed
        assert_eq!(record.retry_count, 0);

        // Further passes leave it alone
        let idle = orchestrator.run_sync_pass().await;
        assert_eq!(idle.attempted, 0);
        assert_eq!(remote.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_pass_and_releases_records() {
        let db = test_db().await;
        let customer = db
            .customers()
            .create("Akbar Traders", None, None, None)
            .await
            .unwrap();
        db.inventory()
            .create("Basmati Paddy", ItemGrade::Paddy)
            .await
            .unwrap();

        let remote = MockRemote::scripted(vec![Err(RemoteFailure::Auth("session expired".into()))]);
        let orchestrator = SyncOrchestrator::new(db.clone(), remote.clone(), 50);

        let result = orchestrator.run_sync_pass().await;
        assert!(result.auth_required);
        assert_eq!(result.succeeded, 0);

        // The inventory batch was never attempted
        assert_eq!(remote.calls().len(), 1);

        // The released record consumed no retry budget and is immediately
        // eligible again
        let record = &db
            .sync_queue()
            .records_for_entity(EntityKind::Customer, customer.local_id)
            .await
            .unwrap()[0];
        assert_eq!(record.status, SyncStatus::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(record.next_retry_at.is_none());
    }

    #[tokio::test]
    async fn test_unacknowledged_create_conflicts() {
        let db = test_db().await;
        let customer = db
            .customers()
            .create("Akbar Traders", None, None, None)
            .await
            .unwrap();

        // Remote answers success but acknowledges nothing
        let remote = MockRemote::scripted(vec![synced(&[])]);
        let orchestrator = SyncOrchestrator::new(db.clone(), remote, 50);

        let result = orchestrator.run_sync_pass().await;
        assert_eq!(result.conflicted, 1);

        let record = &db
            .sync_queue()
            .records_for_entity(EntityKind::Customer, customer.local_id)
            .await
            .unwrap()[0];
        assert_eq!(record.status, SyncStatus::Conflict);
    }

    #[tokio::test]
    async fn test_replayed_pass_is_idempotent() {
        // P5: once everything is Synced, further passes transmit nothing
        // and identities never change
        let db = test_db().await;
        let (customer_id, item_id, transaction_id) = seed_buy(&db).await;

        let remote = MockRemote::scripted(vec![
            synced(&[(customer_id, 101)]),
            synced(&[(item_id, 201)]),
            synced(&[(transaction_id, 301)]),
        ]);
        let orchestrator = SyncOrchestrator::new(db.clone(), remote.clone(), 50);

        orchestrator.run_sync_pass().await;
        let replay = orchestrator.run_sync_pass().await;

        assert_eq!(replay.attempted, 0);
        assert_eq!(remote.calls().len(), 3);
        let customer = db.customers().get(customer_id).await.unwrap().unwrap();
        assert_eq!(customer.server_id, Some(101));
        let item = db.inventory().get(item_id).await.unwrap().unwrap();
        assert_eq!(item.current_quantity_kg, 500.0);
    }

    #[tokio::test]
    async fn test_delete_syncs_and_purges_tombstone() {
        let db = test_db().await;
        let customer = db
            .customers()
            .create("Akbar Traders", None, None, None)
            .await
            .unwrap();

        let remote = MockRemote::scripted(vec![
            synced(&[(customer.local_id, 101)]),
            Ok(RemoteResponse::ok()),
        ]);
        let orchestrator = SyncOrchestrator::new(db.clone(), remote.clone(), 50);

        orchestrator.run_sync_pass().await;
        db.customers().delete(customer.local_id).await.unwrap();

        let result = orchestrator.run_sync_pass().await;
        assert_eq!(result.succeeded, 1);
        assert_eq!(
            remote.calls().last().unwrap(),
            &("DELETE".to_string(), "customers/101".to_string())
        );
        // Tombstone hard-removed once the Delete is confirmed
        assert!(db.customers().get(customer.local_id).await.unwrap().is_none());
    }

    // =========================================================================
    // Self-Healing and Pull
    // =========================================================================

    #[tokio::test]
    async fn test_repair_queue_restores_lost_enqueue() {
        let db = test_db().await;
        let customer = db
            .customers()
            .create("Akbar Traders", None, None, None)
            .await
            .unwrap();

        // Simulate a lost enqueue
        sqlx::query("DELETE FROM sync_queue")
            .execute(db.pool())
            .await
            .unwrap();
        assert_eq!(db.sync_queue().pending_count().await.unwrap(), 0);

        let remote = MockRemote::scripted(vec![]);
        let orchestrator = SyncOrchestrator::new(db.clone(), remote, 50);

        let repaired = orchestrator.repair_queue().await.unwrap();
        assert_eq!(repaired, 1);

        let records = db
            .sync_queue()
            .records_for_entity(EntityKind::Customer, customer.local_id)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].operation, Operation::Create);

        // A second repair finds nothing to do
        assert_eq!(orchestrator.repair_queue().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pull_merges_and_advances_cursor() {
        let db = test_db().await;
        let remote_updated = Utc::now();

        let remote = MockRemote::scripted(vec![
            Ok(RemoteResponse::ok_with(json!({
                "customers": [{
                    "id": 77,
                    "name": "Remote Farmer",
                    "phone": null,
                    "address": null,
                    "notes": null,
                    "is_deleted": false,
                    "updated_at": remote_updated,
                }]
            }))),
            Ok(RemoteResponse::ok_with(json!({ "inventory": [] }))),
        ]);
        let orchestrator = SyncOrchestrator::new(db.clone(), remote.clone(), 50);

        let result = orchestrator.pull_remote_changes().await;
        assert_eq!(result.applied, 1);
        assert!(!result.auth_required);

        let customers = db.customers().list().await.unwrap();
        assert_eq!(customers.len(), 1);
        assert_eq!(customers[0].server_id, Some(77));
        assert!(customers[0].is_synced);

        let cursor = db
            .sync_meta()
            .get_pull_cursor(EntityKind::Customer)
            .await
            .unwrap();
        assert_eq!(cursor, remote_updated);

        // Both collections were queried, with the cursor in the path
        let calls = remote.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].1.starts_with("customers?updated_after="));
        assert!(calls[1].1.starts_with("inventory?updated_after="));
    }
}
