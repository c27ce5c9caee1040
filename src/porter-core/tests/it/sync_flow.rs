//! End-to-end flows: offline scanning, reconnect sync, restart recovery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey};
use tokio::sync::{watch, Mutex};

use porter_core::{
    AccessDecision, AccessEvent, BackendTransport, DenialReason, EventQueue, FileEventQueue,
    FileRevocationCache, PayloadVerifier, PendingEvent, RevocationCache, RevocationDelta,
    RevocationRecord, ScanOutcome, SyncOrchestrator, TransportError,
};
use porter_keystore::{FileKeyStore, KeyMetadata, KeyStore};

const DEVICE_ID: &str = "device-t1";

fn signing_key() -> SigningKey {
    SigningKey::from_bytes(&[7u8; 32])
}

fn metadata(skew_minutes: u32) -> KeyMetadata {
    KeyMetadata {
        key_id: "key-1".into(),
        organization_name: "Acme Events".into(),
        porter_display_name: "Gate A".into(),
        enrolled_at: Utc::now(),
        max_clock_skew_minutes: skew_minutes,
    }
}

fn event(auth_id: &str) -> AccessEvent {
    AccessEvent::new(auth_id, ScanOutcome::Allowed, DEVICE_ID, "porter-1")
}

/// Transport double that acks a configurable prefix of each batch.
struct PartialAckTransport {
    ack_limit: usize,
    push_calls: AtomicUsize,
    revoked: Mutex<Vec<RevocationRecord>>,
    delay: Option<Duration>,
}

impl PartialAckTransport {
    fn new(ack_limit: usize) -> Self {
        Self {
            ack_limit,
            push_calls: AtomicUsize::new(0),
            revoked: Mutex::new(Vec::new()),
            delay: None,
        }
    }
}

#[async_trait]
impl BackendTransport for PartialAckTransport {
    async fn push_events(&self, events: &[PendingEvent]) -> Result<Vec<u64>, TransportError> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(events
            .iter()
            .take(self.ack_limit)
            .map(|p| p.local_id)
            .collect())
    }

    async fn fetch_revocations_since(
        &self,
        _since: Option<DateTime<Utc>>,
    ) -> Result<RevocationDelta, TransportError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(RevocationDelta {
            revoked: self.revoked.lock().await.clone(),
            watermark: Some(Utc::now()),
        })
    }
}

fn orchestrator(
    queue: Arc<dyn EventQueue>,
    revocations: Arc<dyn RevocationCache>,
    transport: Arc<dyn BackendTransport>,
) -> Arc<SyncOrchestrator> {
    let (_tx, rx) = watch::channel(true);
    Arc::new(SyncOrchestrator::new(
        queue,
        revocations,
        transport,
        rx,
        Duration::from_secs(300),
    ))
}

#[tokio::test]
async fn offline_scans_then_partial_ack_then_drain() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(FileEventQueue::open(dir.path()).unwrap());

    // Five scans recorded while offline.
    for i in 0..5 {
        queue.enqueue(event(&format!("auth-{i}"))).await.unwrap();
    }
    assert_eq!(queue.pending().await.len(), 5);

    // Backend acks only three of the batch.
    let transport = Arc::new(PartialAckTransport::new(3));
    let revocations = Arc::new(FileRevocationCache::open(dir.path(), DEVICE_ID));
    let orchestrator = orchestrator(queue.clone(), revocations, transport.clone());

    let report = orchestrator.sync_now().await.unwrap();
    assert_eq!(report.pushed, 5);
    assert_eq!(report.acked, 3);
    assert_eq!(queue.pending().await.len(), 2);

    // The next cycle re-sends the survivors and drains the queue.
    let report = orchestrator.sync_now().await.unwrap();
    assert_eq!(report.pushed, 2);
    assert_eq!(report.acked, 2);
    assert!(queue.pending().await.is_empty());
    assert_eq!(transport.push_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn overlapping_triggers_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(FileEventQueue::open(dir.path()).unwrap());
    queue.enqueue(event("auth-1")).await.unwrap();

    let mut transport = PartialAckTransport::new(10);
    transport.delay = Some(Duration::from_millis(200));
    let transport = Arc::new(transport);
    let revocations = Arc::new(FileRevocationCache::open(dir.path(), DEVICE_ID));
    let orchestrator = orchestrator(queue, revocations, transport.clone());

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.sync_now().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Second trigger while the first cycle is mid-flight.
    assert!(orchestrator.sync_now().await.is_none());

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.acked, 1);
    assert_eq!(transport.push_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scan_allow_then_revoke_after_sync() {
    let dir = tempfile::tempdir().unwrap();
    let sk = signing_key();

    let key_store = Arc::new(FileKeyStore::new(dir.path(), DEVICE_ID));
    key_store.initialize().await;
    key_store
        .store_verification_key(&sk.verifying_key().to_bytes(), metadata(5))
        .await
        .unwrap();

    let queue = Arc::new(FileEventQueue::open(dir.path()).unwrap());
    let revocations = Arc::new(FileRevocationCache::open(dir.path(), DEVICE_ID));
    let verifier = PayloadVerifier::new(key_store.clone());

    let payload = b"auth-1|gate-a";
    let sig = sk.sign(payload).to_bytes();
    let now = Utc::now();
    let from = now - chrono::Duration::hours(1);
    let to = now + chrono::Duration::hours(3);

    // First scan admits.
    let decision = verifier
        .check_access(payload, &sig, from, to, "auth-1", revocations.as_ref())
        .await;
    assert_eq!(decision, AccessDecision::Allowed);
    queue
        .enqueue(AccessEvent::new(
            "auth-1",
            decision.outcome(),
            DEVICE_ID,
            "porter-1",
        ))
        .await
        .unwrap();

    // The backend revokes the authorization; a sync cycle picks it up.
    let transport = Arc::new(PartialAckTransport::new(10));
    transport.revoked.lock().await.push(RevocationRecord {
        auth_id: "auth-1".into(),
        revoked_at: now,
    });
    let orchestrator = orchestrator(queue.clone(), revocations.clone(), transport);
    let report = orchestrator.sync_now().await.unwrap();
    assert_eq!(report.acked, 1);
    assert_eq!(report.pulled, 1);
    assert!(queue.pending().await.is_empty());

    // The same pass now denies as revoked.
    let decision = verifier
        .check_access(payload, &sig, from, to, "auth-1", revocations.as_ref())
        .await;
    assert_eq!(decision, AccessDecision::Denied(DenialReason::Revoked));

    // A scan outside the window denies regardless of revocation.
    let stale_to = now - chrono::Duration::hours(2);
    let decision = verifier
        .check_access(payload, &sig, from, stale_to, "auth-2", revocations.as_ref())
        .await;
    assert_eq!(decision, AccessDecision::Denied(DenialReason::OutOfDateRange));
}

#[tokio::test]
async fn restart_recovers_queue_and_revocations() {
    let dir = tempfile::tempdir().unwrap();

    {
        let queue = FileEventQueue::open(dir.path()).unwrap();
        queue.enqueue(event("auth-1")).await.unwrap();
        queue.enqueue(event("auth-2")).await.unwrap();

        let revocations = FileRevocationCache::open(dir.path(), DEVICE_ID);
        revocations
            .update_from_server(
                &[RevocationRecord {
                    auth_id: "auth-1".into(),
                    revoked_at: Utc::now(),
                }],
                Utc::now(),
            )
            .await
            .unwrap();
    }

    // Fresh handles over the same directory see the same state.
    let queue = FileEventQueue::open(dir.path()).unwrap();
    assert_eq!(queue.pending().await.len(), 2);

    let revocations = FileRevocationCache::open(dir.path(), DEVICE_ID);
    assert!(revocations.is_revoked("auth-1").await);
    assert!(revocations.last_sync_timestamp().await.is_some());
}
