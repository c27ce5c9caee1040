//! Durable queue of access events awaiting upload.
//!
//! Every scan produces an [`AccessEvent`], recorded locally before any
//! network activity. The queue is an append-only JSON-lines log: `enqueue`
//! appends and syncs one line, `mark_synced` compacts the log through a
//! temp file plus rename. Events survive process restarts and are removed
//! only after the backend acknowledges them (at-least-once delivery; the
//! backend deduplicates on `event_uid`).

use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::error::CoreError;

/// Name of the JSON-lines event log inside the `queue/` namespace.
const LOG_FILE: &str = "events.log";

/// Outcome of a single scan, as shown to the porter and reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    /// Signature, validity window and revocation all passed.
    Allowed,
    /// Signature did not verify against the organization key.
    DeniedSignature,
    /// Scan happened outside the authorization's validity window.
    DeniedExpired,
    /// Authorization was revoked.
    DeniedRevoked,
    /// No verification key enrolled; every scan denies.
    DeniedNoKey,
}

/// A recorded scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessEvent {
    /// Stable unique id, used by the backend to deduplicate re-deliveries.
    pub event_uid: String,
    /// The authorization that was scanned.
    pub auth_id: String,
    /// When the scan happened.
    pub scanned_at: DateTime<Utc>,
    /// What the device decided.
    pub outcome: ScanOutcome,
    /// Device that recorded the scan.
    pub device_id: String,
    /// Porter operating the device.
    pub porter_id: String,
}

impl AccessEvent {
    /// Record a scan that just happened.
    #[must_use]
    pub fn new(
        auth_id: impl Into<String>,
        outcome: ScanOutcome,
        device_id: impl Into<String>,
        porter_id: impl Into<String>,
    ) -> Self {
        let uid_bytes: [u8; 16] = rand::thread_rng().gen();
        Self {
            event_uid: hex::encode(uid_bytes),
            auth_id: auth_id.into(),
            scanned_at: Utc::now(),
            outcome,
            device_id: device_id.into(),
            porter_id: porter_id.into(),
        }
    }
}

/// An event with its storage-assigned position in the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEvent {
    /// Monotonically increasing id assigned at enqueue time.
    pub local_id: u64,
    /// The recorded scan.
    pub event: AccessEvent,
}

/// Durable store of events awaiting upload.
#[async_trait]
pub trait EventQueue: Send + Sync {
    /// Append an event.
    ///
    /// The event is durable before this returns. Returns the assigned
    /// local id.
    ///
    /// # Errors
    ///
    /// `Queue` when the append cannot be made durable; the event is not
    /// enqueued in that case.
    async fn enqueue(&self, event: AccessEvent) -> Result<u64, CoreError>;

    /// All pending events in insertion order, without removing them.
    async fn pending(&self) -> Vec<PendingEvent>;

    /// Remove the events with the given local ids.
    ///
    /// One storage transaction. Idempotent: unknown ids are ignored, so a
    /// repeated acknowledgment is harmless.
    ///
    /// # Errors
    ///
    /// `Queue` when the compacted log cannot be written; the queue is
    /// unchanged in that case.
    async fn mark_synced(&self, local_ids: &[u64]) -> Result<(), CoreError>;

    /// Observe the pending-event count.
    fn pending_count(&self) -> watch::Receiver<usize>;

    /// Drop all pending events.
    ///
    /// # Errors
    ///
    /// `Queue` when the emptied log cannot be written.
    async fn clear_all(&self) -> Result<(), CoreError>;
}

struct FileQueueInner {
    events: Vec<PendingEvent>,
    next_id: u64,
    log: fs::File,
}

/// File-backed event queue.
pub struct FileEventQueue {
    queue_dir: PathBuf,
    inner: Mutex<FileQueueInner>,
    count_tx: watch::Sender<usize>,
}

impl FileEventQueue {
    /// Open the queue rooted at `data_dir`, replaying any existing log.
    ///
    /// Lines that fail to parse (for example a partial line from an
    /// interrupted append) are skipped with a warning; every intact event
    /// is recovered.
    ///
    /// # Errors
    ///
    /// `Queue` when the log file cannot be created or opened.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let queue_dir = data_dir.into().join("queue");
        fs::create_dir_all(&queue_dir).map_err(|e| {
            CoreError::queue(format!("failed to create queue directory: {e}"))
        })?;

        let log_path = queue_dir.join(LOG_FILE);
        let events = load_log(&log_path);
        let next_id = events.iter().map(|e| e.local_id).max().unwrap_or(0) + 1;

        let log = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| CoreError::queue(format!("failed to open event log: {e}")))?;

        debug!(
            pending = events.len(),
            next_id, "Queue: opened event log"
        );

        let (count_tx, _) = watch::channel(events.len());

        Ok(Self {
            queue_dir,
            inner: Mutex::new(FileQueueInner {
                events,
                next_id,
                log,
            }),
            count_tx,
        })
    }

    fn log_path(&self) -> PathBuf {
        self.queue_dir.join(LOG_FILE)
    }

    /// Rewrite the log with the given events and reopen the append handle.
    fn rewrite_log(&self, events: &[PendingEvent]) -> Result<fs::File, CoreError> {
        let path = self.log_path();
        let tmp = path.with_extension("tmp");

        {
            let mut file = fs::File::create(&tmp)
                .map_err(|e| CoreError::queue(format!("failed to create temp log: {e}")))?;
            for event in events {
                let line = serde_json::to_string(event)
                    .map_err(|e| CoreError::queue(format!("failed to serialize event: {e}")))?;
                file.write_all(line.as_bytes())
                    .and_then(|()| file.write_all(b"\n"))
                    .map_err(|e| CoreError::queue(format!("failed to write temp log: {e}")))?;
            }
            file.sync_all()
                .map_err(|e| CoreError::queue(format!("failed to sync temp log: {e}")))?;
        }

        fs::rename(&tmp, &path)
            .map_err(|e| CoreError::queue(format!("failed to replace event log: {e}")))?;

        fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| CoreError::queue(format!("failed to reopen event log: {e}")))
    }
}

#[async_trait]
impl EventQueue for FileEventQueue {
    async fn enqueue(&self, event: AccessEvent) -> Result<u64, CoreError> {
        let mut inner = self.inner.lock().await;

        let local_id = inner.next_id;
        let pending = PendingEvent {
            local_id,
            event,
        };

        let line = serde_json::to_string(&pending)
            .map_err(|e| CoreError::queue(format!("failed to serialize event: {e}")))?;

        inner
            .log
            .write_all(line.as_bytes())
            .and_then(|()| inner.log.write_all(b"\n"))
            .and_then(|()| inner.log.sync_data())
            .map_err(|e| CoreError::queue(format!("failed to append event: {e}")))?;

        inner.next_id += 1;
        inner.events.push(pending);
        let count = inner.events.len();
        drop(inner);

        let _ = self.count_tx.send(count);
        Ok(local_id)
    }

    async fn pending(&self) -> Vec<PendingEvent> {
        self.inner.lock().await.events.clone()
    }

    async fn mark_synced(&self, local_ids: &[u64]) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;

        let remove: HashSet<u64> = local_ids.iter().copied().collect();
        let remaining: Vec<PendingEvent> = inner
            .events
            .iter()
            .filter(|e| !remove.contains(&e.local_id))
            .cloned()
            .collect();

        if remaining.len() == inner.events.len() {
            return Ok(());
        }

        let log = self.rewrite_log(&remaining)?;
        let removed = inner.events.len() - remaining.len();
        inner.log = log;
        inner.events = remaining;
        let count = inner.events.len();
        drop(inner);

        debug!(removed, pending = count, "Queue: compacted after sync");
        let _ = self.count_tx.send(count);
        Ok(())
    }

    fn pending_count(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }

    async fn clear_all(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;

        let log = self.rewrite_log(&[])?;
        inner.log = log;
        inner.events.clear();
        drop(inner);

        let _ = self.count_tx.send(0);
        Ok(())
    }
}

/// Replay a JSON-lines event log, skipping unparseable lines.
fn load_log(path: &Path) -> Vec<PendingEvent> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            debug!("Queue: no existing event log ({})", e);
            return Vec::new();
        }
    };

    let mut events = Vec::new();
    let mut skipped = 0usize;

    for line in BufReader::new(file).lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("Queue: unreadable log line: {}", e);
                skipped += 1;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PendingEvent>(&line) {
            Ok(event) => events.push(event),
            Err(e) => {
                warn!("Queue: skipping corrupt log line: {}", e);
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        warn!(
            recovered = events.len(),
            skipped, "Queue: event log replayed with corrupt lines"
        );
    }

    events
}

struct MemoryQueueInner {
    events: Vec<PendingEvent>,
    next_id: u64,
}

/// In-memory event queue for tests and collaborators.
pub struct MemoryEventQueue {
    inner: Mutex<MemoryQueueInner>,
    count_tx: watch::Sender<usize>,
}

impl MemoryEventQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            inner: Mutex::new(MemoryQueueInner {
                events: Vec::new(),
                next_id: 1,
            }),
            count_tx,
        }
    }
}

impl Default for MemoryEventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventQueue for MemoryEventQueue {
    async fn enqueue(&self, event: AccessEvent) -> Result<u64, CoreError> {
        let mut inner = self.inner.lock().await;
        let local_id = inner.next_id;
        inner.next_id += 1;
        inner.events.push(PendingEvent { local_id, event });
        let count = inner.events.len();
        drop(inner);

        let _ = self.count_tx.send(count);
        Ok(local_id)
    }

    async fn pending(&self) -> Vec<PendingEvent> {
        self.inner.lock().await.events.clone()
    }

    async fn mark_synced(&self, local_ids: &[u64]) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        let remove: HashSet<u64> = local_ids.iter().copied().collect();
        inner.events.retain(|e| !remove.contains(&e.local_id));
        let count = inner.events.len();
        drop(inner);

        let _ = self.count_tx.send(count);
        Ok(())
    }

    fn pending_count(&self) -> watch::Receiver<usize> {
        self.count_tx.subscribe()
    }

    async fn clear_all(&self) -> Result<(), CoreError> {
        let mut inner = self.inner.lock().await;
        inner.events.clear();
        drop(inner);

        let _ = self.count_tx.send(0);
        Ok(())
    }
}
