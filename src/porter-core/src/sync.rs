//! Background synchronization with the organization backend.
//!
//! One sync cycle pushes queued events, then pulls the revocation delta.
//! The two halves are independent best-effort operations: a failed push
//! never blocks the pull, and a transport failure leaves local state
//! untouched for the next cycle.
//!
//! Cycles are triggered by the offline-to-online connectivity edge, by a
//! fixed interval while online, and by an explicit [`SyncOrchestrator::sync_now`]
//! call. Overlapping triggers are skipped, never queued.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::queue::EventQueue;
use crate::revocation::RevocationCache;
use crate::transport::BackendTransport;

/// Whether a sync cycle is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No cycle in flight.
    Idle,
    /// A cycle is in flight; new triggers are skipped.
    Syncing,
}

/// What one sync cycle accomplished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Events sent to the backend this cycle.
    pub pushed: usize,
    /// Events the backend acknowledged and the queue dropped.
    pub acked: usize,
    /// Revocation records applied this cycle.
    pub pulled: usize,
    /// Error from the push half, if any.
    pub push_error: Option<String>,
    /// Error from the pull half, if any.
    pub pull_error: Option<String>,
}

impl SyncReport {
    /// Whether both halves completed without error.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.push_error.is_none() && self.pull_error.is_none()
    }
}

/// Drives periodic and connectivity-triggered sync cycles.
///
/// All collaborators are injected; the orchestrator holds no global state.
pub struct SyncOrchestrator {
    inner: Arc<SyncInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// State shared between the handle and the background task.
struct SyncInner {
    queue: Arc<dyn EventQueue>,
    revocations: Arc<dyn RevocationCache>,
    transport: Arc<dyn BackendTransport>,
    connectivity: watch::Receiver<bool>,
    sync_interval: std::time::Duration,
    /// Re-entrancy guard: held for the duration of a cycle.
    cycle_lock: Mutex<()>,
}

impl SyncOrchestrator {
    /// Create an orchestrator over the given collaborators.
    ///
    /// `connectivity` carries `true` while the device believes it is
    /// online; the shell owns the sender side.
    #[must_use]
    pub fn new(
        queue: Arc<dyn EventQueue>,
        revocations: Arc<dyn RevocationCache>,
        transport: Arc<dyn BackendTransport>,
        connectivity: watch::Receiver<bool>,
        sync_interval: std::time::Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                queue,
                revocations,
                transport,
                connectivity,
                sync_interval,
                cycle_lock: Mutex::new(()),
            }),
            task: Mutex::new(None),
        }
    }

    /// Current state, as seen through the re-entrancy guard.
    #[must_use]
    pub fn state(&self) -> SyncState {
        if self.inner.cycle_lock.try_lock().is_ok() {
            SyncState::Idle
        } else {
            SyncState::Syncing
        }
    }

    /// Start the background task.
    ///
    /// Runs an immediate cycle when already online, then reacts to
    /// offline-to-online transitions and to the fixed interval while
    /// online. Calling this twice replaces the previous task.
    pub async fn initialize(&self) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.run().await;
        });

        let mut task = self.task.lock().await;
        if let Some(old) = task.replace(handle) {
            old.abort();
        }
        info!("Sync orchestrator started");
    }

    /// Stop the background task so no callbacks outlive the host.
    pub async fn shutdown(&self) {
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
            info!("Sync orchestrator stopped");
        }
    }

    /// Run one cycle now, honoring the re-entrancy guard.
    ///
    /// Returns `None` when a cycle was already in flight.
    pub async fn sync_now(&self) -> Option<SyncReport> {
        self.inner.try_cycle().await
    }
}

impl SyncInner {
    async fn run(self: Arc<Self>) {
        let mut connectivity = self.connectivity.clone();
        let mut interval = tokio::time::interval(self.sync_interval);
        // The first tick fires immediately; the online check below decides
        // whether it turns into a cycle.
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        debug!("Connectivity sender dropped, sync task exiting");
                        return;
                    }
                    if *connectivity.borrow() {
                        debug!("Connectivity restored, starting sync cycle");
                        self.try_cycle().await;
                    }
                }
                _ = interval.tick() => {
                    if *connectivity.borrow() {
                        self.try_cycle().await;
                    }
                }
            }
        }
    }

    /// Run a cycle unless one is already in flight.
    async fn try_cycle(&self) -> Option<SyncReport> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            debug!("Sync cycle already in flight, skipping trigger");
            return None;
        };

        Some(self.run_cycle().await)
    }

    /// Push then pull. Caller holds the cycle lock.
    #[instrument(skip(self))]
    async fn run_cycle(&self) -> SyncReport {
        let mut report = SyncReport::default();

        // Push half: upload pending events, drop what the backend acked.
        let pending = self.queue.pending().await;
        if pending.is_empty() {
            debug!("No pending events to push");
        } else {
            report.pushed = pending.len();
            match self.transport.push_events(&pending).await {
                Ok(acked) => {
                    report.acked = acked.len();
                    if let Err(e) = self.queue.mark_synced(&acked).await {
                        warn!(error = %e, "Failed to drop acknowledged events");
                        report.push_error = Some(e.to_string());
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Event push failed, events stay queued");
                    report.push_error = Some(e.to_string());
                }
            }
        }

        // Pull half: fetch the delta since the checkpoint and apply it.
        let since = self.revocations.last_sync_timestamp().await;
        match self.transport.fetch_revocations_since(since).await {
            Ok(delta) => {
                report.pulled = delta.revoked.len();
                // Fall back to the local clock when the server sends no
                // watermark; the checkpoint itself never moves backward.
                let watermark = delta.watermark.unwrap_or_else(Utc::now);
                if let Err(e) = self
                    .revocations
                    .update_from_server(&delta.revoked, watermark)
                    .await
                {
                    warn!(error = %e, "Failed to apply revocation delta");
                    report.pull_error = Some(e.to_string());
                }
            }
            Err(e) => {
                warn!(error = %e, "Revocation fetch failed, checkpoint unchanged");
                report.pull_error = Some(e.to_string());
            }
        }

        info!(
            pushed = report.pushed,
            acked = report.acked,
            pulled = report.pulled,
            clean = report.is_clean(),
            "Sync cycle finished"
        );
        report
    }
}
