//! File-backed keystore with encrypted at-rest storage.
//!
//! The key record is a single encrypted file under the `key/` namespace of
//! the configured data directory. Writes go through a temp file plus rename
//! so a partial write is never observable. Uses XChaCha20-Poly1305 AEAD for
//! authenticated encryption.

// Allow deprecated from_slice until chacha20poly1305 upgrades to generic-array 1.x
#![allow(deprecated)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use porter_crypto::key_fingerprint;

use crate::error::KeyStoreError;
use crate::store::KeyStore;
use crate::types::{import_verifying_key, KeyHandle, KeyMetadata};

/// XChaCha20-Poly1305 nonce size (24 bytes)
const NONCE_SIZE: usize = 24;

/// Name of the singleton key record inside the `key/` namespace.
const RECORD_FILE: &str = "key_record.enc";

/// Serializable key record for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedKeyRecord {
    /// Hex-encoded verification key.
    key: String,
    /// Enrollment metadata.
    metadata: KeyMetadata,
}

/// In-memory view of the enrolled key.
struct StoredState {
    handle: KeyHandle,
    metadata: KeyMetadata,
}

/// File-backed keystore.
///
/// Holds at most one verification key, encrypted at rest and mirrored in
/// memory after `initialize`.
pub struct FileKeyStore {
    /// Directory holding the key record (`<data_dir>/key`).
    key_dir: PathBuf,
    /// Encryption key (derived from the device ID).
    encryption_key: [u8; 32],
    /// Current enrollment state.
    state: RwLock<Option<StoredState>>,
    /// Publishes enrollment changes.
    watch_tx: watch::Sender<Option<KeyMetadata>>,
}

impl FileKeyStore {
    /// Create a keystore rooted at `data_dir`.
    ///
    /// `device_id` salts the at-rest encryption key so records are not
    /// portable between devices.
    pub fn new(data_dir: impl Into<PathBuf>, device_id: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"porter-key-record:");
        hasher.update(device_id.as_bytes());
        let encryption_key: [u8; 32] = hasher.finalize().into();

        let (watch_tx, _) = watch::channel(None);

        Self {
            key_dir: data_dir.into().join("key"),
            encryption_key,
            state: RwLock::new(None),
            watch_tx,
        }
    }

    fn record_path(&self) -> PathBuf {
        self.key_dir.join(RECORD_FILE)
    }

    /// Read and decrypt the persisted record, if any.
    fn load_record(&self) -> Option<PersistedKeyRecord> {
        let path = self.record_path();
        let encrypted = match fs::read(&path) {
            Ok(data) => data,
            Err(e) => {
                debug!("Keystore: no key record ({})", e);
                return None;
            }
        };

        let decrypted = self.decrypt(&encrypted)?;

        match serde_json::from_slice::<PersistedKeyRecord>(&decrypted) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Keystore: failed to parse key record: {}", e);
                None
            }
        }
    }

    /// Encrypt, then write the record through a temp file plus rename.
    fn persist_record(&self, record: &PersistedKeyRecord) -> Result<(), KeyStoreError> {
        fs::create_dir_all(&self.key_dir).map_err(|e| {
            KeyStoreError::storage(format!("failed to create key directory: {e}"))
        })?;

        let data = serde_json::to_vec(record)
            .map_err(|e| KeyStoreError::Serialization(e.to_string()))?;

        let encrypted = self.encrypt(&data)?;

        write_atomic(&self.record_path(), &encrypted)
            .map_err(|e| KeyStoreError::storage(format!("failed to write key record: {e}")))
    }

    /// Encrypt data using XChaCha20-Poly1305 authenticated encryption.
    ///
    /// Returns nonce || ciphertext (24 bytes nonce prepended to ciphertext).
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, KeyStoreError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let cipher = XChaCha20Poly1305::new_from_slice(&self.encryption_key)
            .map_err(|e| KeyStoreError::storage(format!("cipher init failed: {e}")))?;

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| KeyStoreError::storage(format!("encryption failed: {e}")))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt data using XChaCha20-Poly1305 authenticated encryption.
    ///
    /// Expects nonce || ciphertext format.
    fn decrypt(&self, data: &[u8]) -> Option<Vec<u8>> {
        if data.len() < NONCE_SIZE {
            warn!(
                data_len = data.len(),
                "Keystore: record too short to contain nonce"
            );
            return None;
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = XNonce::from_slice(nonce_bytes);

        let cipher = XChaCha20Poly1305::new_from_slice(&self.encryption_key).ok()?;

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| {
                warn!("Keystore: decryption failed (possible tampering): {}", e);
                e
            })
            .ok()
    }

    fn publish(&self, metadata: Option<KeyMetadata>) {
        let _ = self.watch_tx.send(metadata);
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn initialize(&self) {
        let record = match self.load_record() {
            Some(r) => r,
            None => {
                self.publish(None);
                return;
            }
        };

        let encoded = match hex::decode(&record.key) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Keystore: key record holds invalid hex: {}", e);
                self.publish(None);
                return;
            }
        };

        debug!(
            key_id = %record.metadata.key_id,
            fingerprint = %key_fingerprint(&encoded),
            "Keystore: loaded key record"
        );

        let mut state = self.state.write().await;
        *state = Some(StoredState {
            handle: KeyHandle::needs_reimport(encoded),
            metadata: record.metadata.clone(),
        });
        drop(state);

        self.publish(Some(record.metadata));
    }

    async fn store_verification_key(
        &self,
        material: &[u8],
        metadata: KeyMetadata,
    ) -> Result<(), KeyStoreError> {
        // Import first so malformed material never reaches disk
        let key = import_verifying_key(material)?;

        let record = PersistedKeyRecord {
            key: hex::encode(material),
            metadata: metadata.clone(),
        };
        self.persist_record(&record)?;

        let mut state = self.state.write().await;
        *state = Some(StoredState {
            handle: KeyHandle::active(key),
            metadata: metadata.clone(),
        });
        drop(state);

        debug!(
            key_id = %metadata.key_id,
            fingerprint = %key_fingerprint(material),
            "Keystore: verification key stored"
        );
        self.publish(Some(metadata));
        Ok(())
    }

    async fn verification_key(&self) -> Option<KeyHandle> {
        {
            let state = self.state.read().await;
            match state.as_ref() {
                Some(stored) if stored.handle.is_active() => {
                    return Some(stored.handle.clone());
                }
                None => return None,
                _ => {}
            }
        }

        // Recovered handle: re-import and rewrite the record
        let mut state = self.state.write().await;
        let stored = state.as_mut()?;
        if stored.handle.is_active() {
            return Some(stored.handle.clone());
        }

        let mut handle = stored.handle.clone();
        match handle.reconcile() {
            Ok(reimported) => {
                if reimported {
                    let record = PersistedKeyRecord {
                        key: hex::encode(handle.encoded()),
                        metadata: stored.metadata.clone(),
                    };
                    if let Err(e) = self.persist_record(&record) {
                        warn!("Keystore: failed to rewrite key record after re-import: {e}");
                    }
                }
                stored.handle = handle.clone();
                Some(handle)
            }
            Err(e) => {
                warn!("Keystore: stored key material no longer imports: {e}");
                None
            }
        }
    }

    async fn key_id(&self) -> Option<String> {
        let state = self.state.read().await;
        state.as_ref().map(|s| s.metadata.key_id.clone())
    }

    async fn metadata(&self) -> Option<KeyMetadata> {
        let state = self.state.read().await;
        state.as_ref().map(|s| s.metadata.clone())
    }

    async fn has_key(&self) -> bool {
        self.state.read().await.is_some()
    }

    fn watch(&self) -> watch::Receiver<Option<KeyMetadata>> {
        self.watch_tx.subscribe()
    }

    async fn clear_keys(&self) -> Result<(), KeyStoreError> {
        match fs::remove_file(self.record_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(KeyStoreError::storage(format!(
                    "failed to remove key record: {e}"
                )));
            }
        }

        let mut state = self.state.write().await;
        *state = None;
        drop(state);

        debug!("Keystore: keys cleared");
        self.publish(None);
        Ok(())
    }
}

/// Write `bytes` to `path` through a temp file plus rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}
