//! The `KeyStore` trait: the seam between verification logic and key storage.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::KeyStoreError;
use crate::types::{KeyHandle, KeyMetadata};

/// Durable storage for the single organization verification key.
///
/// A porter device is enrolled with exactly one organization, so the store
/// holds at most one key; storing a new key replaces the previous one.
///
/// Read paths are fail-closed: any storage fault presents as "no key", and
/// verification against a missing key denies.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Load persisted state, if any.
    ///
    /// Storage failures degrade to the no-key state and are logged; they
    /// never surface to the caller.
    async fn initialize(&self);

    /// Validate and persist a verification key with its metadata.
    ///
    /// The key becomes observable only after the record is durable; a
    /// failed write leaves the previous state intact.
    ///
    /// # Errors
    ///
    /// `InvalidKeyMaterial` when the material cannot be imported;
    /// `Storage`/`Serialization` when persisting fails.
    async fn store_verification_key(
        &self,
        material: &[u8],
        metadata: KeyMetadata,
    ) -> Result<(), KeyStoreError>;

    /// The active key handle, or `None` when no key is enrolled.
    ///
    /// Self-heals a recovered handle by re-importing and rewriting the
    /// record; a record whose key material no longer imports presents as
    /// `None`.
    async fn verification_key(&self) -> Option<KeyHandle>;

    /// Identifier of the enrolled key, without touching key material.
    async fn key_id(&self) -> Option<String>;

    /// Full enrollment metadata.
    async fn metadata(&self) -> Option<KeyMetadata>;

    /// Whether a key is currently enrolled.
    async fn has_key(&self) -> bool;

    /// Observe enrollment changes.
    ///
    /// The channel carries the current metadata (`None` when no key is
    /// enrolled) and updates on every store or clear.
    fn watch(&self) -> watch::Receiver<Option<KeyMetadata>>;

    /// Remove the key and its persisted record.
    ///
    /// Succeeds when nothing was stored.
    ///
    /// # Errors
    ///
    /// `Storage` when the record exists but cannot be removed.
    async fn clear_keys(&self) -> Result<(), KeyStoreError>;
}
