//! # Sync Agent
//!
//! The background task that decides *when* passes run; the orchestrator
//! decides *what* a pass does.
//!
//! ## Agent Loop
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SyncAgent::run()                                │
//! │                                                                         │
//! │  startup: release_in_flight()  ← crash recovery: rows left Syncing     │
//! │       │                          by a dead process retry immediately   │
//! │       ▼                                                                 │
//! │  ┌──────────────────── select! ─────────────────────┐                  │
//! │  │                                                   │                  │
//! │  │  interval.tick()        → pass (if online)        │                  │
//! │  │  connectivity changed   → pass on regain          │                  │
//! │  │  sync_now received      → pass + pull             │                  │
//! │  │  shutdown received      → break                   │                  │
//! │  └───────────────────────────────────────────────────┘                  │
//! │       │                                                                 │
//! │       │  Each pass itself races against shutdown: dropping the pass    │
//! │       │  future cancels the in-flight remote call, and                 │
//! │       ▼  release_in_flight() returns its record to Pending with no     │
//! │  shutdown: release_in_flight()   backoff window.                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Passes are already serialized by the orchestrator's internal lock, so
//! an explicit `sync_now` racing the poll timer degrades to two
//! back-to-back passes, never two overlapping ones.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use millbook_db::Database;

use crate::config::SyncConfig;
use crate::orchestrator::SyncOrchestrator;

// =============================================================================
// Handle
// =============================================================================

/// Handle for controlling a running [`SyncAgent`].
#[derive(Clone)]
pub struct SyncAgentHandle {
    connectivity_tx: watch::Sender<bool>,
    sync_now_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl SyncAgentHandle {
    /// Reports a connectivity change. Regaining connectivity triggers a
    /// pass.
    pub fn set_online(&self, online: bool) {
        // Receiver gone means the agent already stopped; nothing to do
        let _ = self.connectivity_tx.send(online);
    }

    /// Requests an immediate sync pass (pull-to-refresh, app resume).
    pub async fn sync_now(&self) {
        if self.sync_now_tx.send(()).await.is_err() {
            warn!("Sync agent is not running, sync_now ignored");
        }
    }

    /// Triggers graceful shutdown. An in-flight remote call is cancelled
    /// and its record released back to Pending.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

// =============================================================================
// Agent
// =============================================================================

/// Background driver for the sync engine.
pub struct SyncAgent {
    db: Database,
    orchestrator: Arc<SyncOrchestrator>,
    poll_interval: Duration,
    purge_after_days: u32,
    pull_enabled: bool,
    connectivity_rx: watch::Receiver<bool>,
    sync_now_rx: mpsc::Receiver<()>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl SyncAgent {
    /// Creates an agent and its control handle. The device starts
    /// presumed online; the embedder reports changes through the handle.
    pub fn new(
        db: Database,
        orchestrator: Arc<SyncOrchestrator>,
        config: &SyncConfig,
    ) -> (Self, SyncAgentHandle) {
        let (connectivity_tx, connectivity_rx) = watch::channel(true);
        let (sync_now_tx, sync_now_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let agent = SyncAgent {
            db,
            orchestrator,
            poll_interval: Duration::from_secs(config.sync.poll_interval_secs),
            purge_after_days: config.sync.purge_synced_after_days,
            pull_enabled: config.sync.pull_enabled,
            connectivity_rx,
            sync_now_rx,
            shutdown_rx,
        };

        let handle = SyncAgentHandle {
            connectivity_tx,
            sync_now_tx,
            shutdown_tx,
        };

        (agent, handle)
    }

    /// Runs the agent loop. Spawn this as a background task.
    pub async fn run(mut self) {
        info!("Sync agent starting");

        // Crash recovery: rows a dead process left Syncing
        match self.db.sync_queue().release_in_flight().await {
            Ok(0) => {}
            Ok(released) => warn!(released, "Released in-flight records from a previous run"),
            Err(e) => error!(error = %e, "Failed to release in-flight records"),
        }

        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let trigger = tokio::select! {
                _ = interval.tick() => {
                    if !*self.connectivity_rx.borrow() {
                        debug!("Offline, skipping scheduled pass");
                        continue;
                    }
                    Trigger::Poll
                }

                changed = self.connectivity_rx.changed() => {
                    if changed.is_err() {
                        // Handle dropped entirely; keep polling
                        continue;
                    }
                    if !*self.connectivity_rx.borrow() {
                        debug!("Connectivity lost");
                        continue;
                    }
                    info!("Connectivity regained, starting sync pass");
                    Trigger::Connectivity
                }

                Some(()) = self.sync_now_rx.recv() => Trigger::Explicit,

                _ = self.shutdown_rx.recv() => break,
            };

            // The pass races shutdown so an in-flight remote call can be
            // cancelled. Its record is left Syncing in the store and
            // released below.
            let cancelled = tokio::select! {
                _ = run_cycle(
                    &self.db,
                    &self.orchestrator,
                    self.pull_enabled,
                    self.purge_after_days,
                    trigger,
                ) => false,
                _ = self.shutdown_rx.recv() => true,
            };
            if cancelled {
                break;
            }
        }

        if let Err(e) = self.db.sync_queue().release_in_flight().await {
            error!(error = %e, "Failed to release in-flight records at shutdown");
        }
        info!("Sync agent stopped");
    }
}

/// One full cycle: repair, push, pull, purge. A free function so the
/// agent loop can race it against shutdown without borrowing the whole
/// agent.
async fn run_cycle(
    db: &Database,
    orchestrator: &SyncOrchestrator,
    pull_enabled: bool,
    purge_after_days: u32,
    trigger: Trigger,
) {
    // Self-healing before the pass so stranded entities join it
    if let Err(e) = orchestrator.repair_queue().await {
        error!(error = %e, "Queue repair failed");
    }

    let result = orchestrator.run_sync_pass().await;
    if result.auth_required {
        warn!("Sync pass requires re-authentication, skipping pull");
        return;
    }

    if pull_enabled {
        orchestrator.pull_remote_changes().await;
    }

    // Storage hygiene on explicit syncs and the poll timer alike
    let cutoff = Utc::now() - chrono::Duration::days(purge_after_days as i64);
    match db.sync_queue().purge_synced(cutoff).await {
        Ok(0) => {}
        Ok(purged) => debug!(purged, "Purged old synced queue rows"),
        Err(e) => error!(error = %e, "Failed to purge synced queue rows"),
    }

    debug!(?trigger, "Sync cycle complete");
}

/// Why a cycle ran.
#[derive(Debug, Clone, Copy)]
enum Trigger {
    Poll,
    Connectivity,
    Explicit,
}

// =============================================================================
// Tests
// =============================================================================
