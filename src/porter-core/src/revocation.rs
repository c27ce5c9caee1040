//! Additive-only revocation cache with a sync checkpoint.
//!
//! The backend is the source of truth for revocations; the device keeps a
//! local mirror so revoked authorizations deny while offline. Incremental
//! updates only ever add entries, and the checkpoint only ever moves
//! forward, so a replayed or reordered delta cannot un-revoke anything.
//!
//! ## Fail-open decision
//!
//! `is_revoked` answers `false` when local state is unavailable. Revocation
//! is one of three independent gates (signature, validity window,
//! revocation); a local storage fault must not brick the gate offline. The
//! degraded state is logged at `warn` when it is entered.

// Allow deprecated from_slice until chacha20poly1305 upgrades to generic-array 1.x
#![allow(deprecated)]

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    XChaCha20Poly1305, XNonce,
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::CoreError;

/// XChaCha20-Poly1305 nonce size (24 bytes)
const NONCE_SIZE: usize = 24;

/// Name of the encrypted snapshot inside the `revocations/` namespace.
const SNAPSHOT_FILE: &str = "revocations.enc";

/// A revoked authorization as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    /// The revoked authorization.
    pub auth_id: String,
    /// When it was revoked.
    pub revoked_at: DateTime<Utc>,
}

/// Local mirror of the backend's revocation set.
#[async_trait]
pub trait RevocationCache: Send + Sync {
    /// Whether the authorization is known to be revoked.
    ///
    /// Fail-open: unavailable local state answers `false`.
    async fn is_revoked(&self, auth_id: &str) -> bool;

    /// Apply a server delta: upsert the records and advance the checkpoint.
    ///
    /// One atomic persisted write; the in-memory view changes only after
    /// the write is durable. The checkpoint never moves backward.
    ///
    /// # Errors
    ///
    /// `Revocation` when the snapshot cannot be persisted; neither the set
    /// nor the checkpoint changes in that case.
    async fn update_from_server(
        &self,
        revoked: &[RevocationRecord],
        watermark: DateTime<Utc>,
    ) -> Result<(), CoreError>;

    /// The checkpoint to use as the `since` parameter of the next fetch.
    async fn last_sync_timestamp(&self) -> Option<DateTime<Utc>>;

    /// Advance the checkpoint without changing the revocation set.
    ///
    /// A timestamp older than the current checkpoint is ignored.
    ///
    /// # Errors
    ///
    /// `Revocation` when the snapshot cannot be persisted.
    async fn set_last_sync_timestamp(&self, ts: DateTime<Utc>) -> Result<(), CoreError>;

    /// Number of revoked authorizations currently mirrored.
    async fn revoked_count(&self) -> usize;

    /// Full reset: empty the set and drop the checkpoint.
    ///
    /// This is the only operation that removes entries.
    ///
    /// # Errors
    ///
    /// `Revocation` when the snapshot cannot be removed.
    async fn clear(&self) -> Result<(), CoreError>;
}

#[derive(Debug, Clone, Default)]
struct CacheState {
    revoked: HashMap<String, DateTime<Utc>>,
    last_sync: Option<DateTime<Utc>>,
}

/// Serializable snapshot for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedRevocations {
    revoked: Vec<RevocationRecord>,
    last_sync: Option<DateTime<Utc>>,
}

/// File-backed revocation cache with an encrypted snapshot.
pub struct FileRevocationCache {
    cache_dir: PathBuf,
    encryption_key: [u8; 32],
    state: RwLock<CacheState>,
}

impl FileRevocationCache {
    /// Open the cache rooted at `data_dir`, loading any existing snapshot.
    ///
    /// `device_id` salts the at-rest encryption key. A snapshot that fails
    /// to load degrades to an empty mirror with a warning (fail-open).
    pub fn open(data_dir: impl Into<PathBuf>, device_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"porter-revocations:");
        hasher.update(device_id.as_bytes());
        let encryption_key: [u8; 32] = hasher.finalize().into();

        let cache_dir = data_dir.into().join("revocations");
        let state = Self::load_snapshot(&cache_dir, &encryption_key);

        Self {
            cache_dir,
            encryption_key,
            state: RwLock::new(state),
        }
    }

    fn snapshot_path(cache_dir: &PathBuf) -> PathBuf {
        cache_dir.join(SNAPSHOT_FILE)
    }

    fn load_snapshot(cache_dir: &PathBuf, encryption_key: &[u8; 32]) -> CacheState {
        let path = Self::snapshot_path(cache_dir);
        let encrypted = match fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                debug!("Revocations: no snapshot ({})", e);
                return CacheState::default();
            }
        };

        let decrypted = match decrypt(encryption_key, &encrypted) {
            Some(d) => d,
            None => {
                warn!("Revocations: snapshot failed to decrypt; starting empty (fail-open)");
                return CacheState::default();
            }
        };

        match serde_json::from_slice::<PersistedRevocations>(&decrypted) {
            Ok(snapshot) => {
                debug!(
                    revoked = snapshot.revoked.len(),
                    last_sync = ?snapshot.last_sync,
                    "Revocations: loaded snapshot"
                );
                CacheState {
                    revoked: snapshot
                        .revoked
                        .into_iter()
                        .map(|r| (r.auth_id, r.revoked_at))
                        .collect(),
                    last_sync: snapshot.last_sync,
                }
            }
            Err(e) => {
                warn!(
                    "Revocations: snapshot failed to parse; starting empty (fail-open): {}",
                    e
                );
                CacheState::default()
            }
        }
    }

    /// Encrypt and atomically write the snapshot.
    fn persist(&self, state: &CacheState) -> Result<(), CoreError> {
        fs::create_dir_all(&self.cache_dir).map_err(|e| {
            CoreError::revocation(format!("failed to create revocations directory: {e}"))
        })?;

        let snapshot = PersistedRevocations {
            revoked: state
                .revoked
                .iter()
                .map(|(auth_id, revoked_at)| RevocationRecord {
                    auth_id: auth_id.clone(),
                    revoked_at: *revoked_at,
                })
                .collect(),
            last_sync: state.last_sync,
        };

        let data = serde_json::to_vec(&snapshot)
            .map_err(|e| CoreError::revocation(format!("failed to serialize snapshot: {e}")))?;

        let encrypted = encrypt(&self.encryption_key, &data)
            .ok_or_else(|| CoreError::revocation("failed to encrypt snapshot"))?;

        let path = Self::snapshot_path(&self.cache_dir);
        let tmp = path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(|e| {
                CoreError::revocation(format!("failed to create temp snapshot: {e}"))
            })?;
            file.write_all(&encrypted)
                .and_then(|()| file.sync_all())
                .map_err(|e| {
                    CoreError::revocation(format!("failed to write snapshot: {e}"))
                })?;
        }
        fs::rename(&tmp, &path)
            .map_err(|e| CoreError::revocation(format!("failed to replace snapshot: {e}")))
    }
}

#[async_trait]
impl RevocationCache for FileRevocationCache {
    async fn is_revoked(&self, auth_id: &str) -> bool {
        self.state.read().await.revoked.contains_key(auth_id)
    }

    async fn update_from_server(
        &self,
        revoked: &[RevocationRecord],
        watermark: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let mut state = self.state.write().await;

        let mut next = state.clone();
        for record in revoked {
            next.revoked
                .insert(record.auth_id.clone(), record.revoked_at);
        }
        next.last_sync = Some(match next.last_sync {
            Some(current) => current.max(watermark),
            None => watermark,
        });

        // Durable first; memory only reflects applied state
        self.persist(&next)?;

        debug!(
            added = revoked.len(),
            total = next.revoked.len(),
            checkpoint = %next.last_sync.map(|t| t.to_rfc3339()).unwrap_or_default(),
            "Revocations: applied server delta"
        );
        *state = next;
        Ok(())
    }

    async fn last_sync_timestamp(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_sync
    }

    async fn set_last_sync_timestamp(&self, ts: DateTime<Utc>) -> Result<(), CoreError> {
        let mut state = self.state.write().await;

        if state.last_sync.is_some_and(|current| ts <= current) {
            return Ok(());
        }

        let mut next = state.clone();
        next.last_sync = Some(ts);
        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    async fn revoked_count(&self) -> usize {
        self.state.read().await.revoked.len()
    }

    async fn clear(&self) -> Result<(), CoreError> {
        let mut state = self.state.write().await;

        match fs::remove_file(Self::snapshot_path(&self.cache_dir)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CoreError::revocation(format!(
                    "failed to remove snapshot: {e}"
                )));
            }
        }

        *state = CacheState::default();
        debug!("Revocations: cache cleared");
        Ok(())
    }
}

/// In-memory revocation cache for tests and collaborators.
#[derive(Default)]
pub struct MemoryRevocationCache {
    state: RwLock<CacheState>,
}

impl MemoryRevocationCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RevocationCache for MemoryRevocationCache {
    async fn is_revoked(&self, auth_id: &str) -> bool {
        self.state.read().await.revoked.contains_key(auth_id)
    }

    async fn update_from_server(
        &self,
        revoked: &[RevocationRecord],
        watermark: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        for record in revoked {
            state
                .revoked
                .insert(record.auth_id.clone(), record.revoked_at);
        }
        state.last_sync = Some(match state.last_sync {
            Some(current) => current.max(watermark),
            None => watermark,
        });
        Ok(())
    }

    async fn last_sync_timestamp(&self) -> Option<DateTime<Utc>> {
        self.state.read().await.last_sync
    }

    async fn set_last_sync_timestamp(&self, ts: DateTime<Utc>) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        if !state.last_sync.is_some_and(|current| ts <= current) {
            state.last_sync = Some(ts);
        }
        Ok(())
    }

    async fn revoked_count(&self) -> usize {
        self.state.read().await.revoked.len()
    }

    async fn clear(&self) -> Result<(), CoreError> {
        let mut state = self.state.write().await;
        *state = CacheState::default();
        Ok(())
    }
}

/// Encrypt with XChaCha20-Poly1305; returns nonce || ciphertext.
fn encrypt(key: &[u8; 32], plaintext: &[u8]) -> Option<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(key).ok()?;
    let ciphertext = cipher.encrypt(nonce, plaintext).ok()?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Some(result)
}

/// Decrypt nonce || ciphertext written by `encrypt`.
fn decrypt(key: &[u8; 32], data: &[u8]) -> Option<Vec<u8>> {
    if data.len() < NONCE_SIZE {
        warn!(
            data_len = data.len(),
            "Revocations: snapshot too short to contain nonce"
        );
        return None;
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new_from_slice(key).ok()?;
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| {
            warn!("Revocations: decryption failed (possible tampering): {}", e);
            e
        })
        .ok()
}
