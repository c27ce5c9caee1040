//! In-memory keystore for tests and non-durable deployments.

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};

use crate::error::KeyStoreError;
use crate::store::KeyStore;
use crate::types::{import_verifying_key, KeyHandle, KeyMetadata};

/// Keystore that holds the key in memory only.
///
/// Same observable behavior as `FileKeyStore` minus durability. Used in
/// tests and by collaborators that inject pre-enrolled state.
pub struct MemoryKeyStore {
    state: RwLock<Option<(KeyHandle, KeyMetadata)>>,
    watch_tx: watch::Sender<Option<KeyMetadata>>,
}

impl MemoryKeyStore {
    /// Create an empty keystore.
    #[must_use]
    pub fn new() -> Self {
        let (watch_tx, _) = watch::channel(None);
        Self {
            state: RwLock::new(None),
            watch_tx,
        }
    }
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    async fn initialize(&self) {
        let state = self.state.read().await;
        let _ = self
            .watch_tx
            .send(state.as_ref().map(|(_, m)| m.clone()));
    }

    async fn store_verification_key(
        &self,
        material: &[u8],
        metadata: KeyMetadata,
    ) -> Result<(), KeyStoreError> {
        let key = import_verifying_key(material)?;

        let mut state = self.state.write().await;
        *state = Some((KeyHandle::active(key), metadata.clone()));
        drop(state);

        let _ = self.watch_tx.send(Some(metadata));
        Ok(())
    }

    async fn verification_key(&self) -> Option<KeyHandle> {
        let state = self.state.read().await;
        state.as_ref().map(|(h, _)| h.clone())
    }

    async fn key_id(&self) -> Option<String> {
        let state = self.state.read().await;
        state.as_ref().map(|(_, m)| m.key_id.clone())
    }

    async fn metadata(&self) -> Option<KeyMetadata> {
        let state = self.state.read().await;
        state.as_ref().map(|(_, m)| m.clone())
    }

    async fn has_key(&self) -> bool {
        self.state.read().await.is_some()
    }

    fn watch(&self) -> watch::Receiver<Option<KeyMetadata>> {
        self.watch_tx.subscribe()
    }

    async fn clear_keys(&self) -> Result<(), KeyStoreError> {
        let mut state = self.state.write().await;
        *state = None;
        drop(state);

        let _ = self.watch_tx.send(None);
        Ok(())
    }
}
