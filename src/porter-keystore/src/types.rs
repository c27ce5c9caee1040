//! Key metadata and handle types.

use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use porter_crypto::{Ed25519Verifier, SignatureVerifier};

use crate::error::KeyStoreError;

/// Metadata stored alongside the verification key at enrollment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMetadata {
    /// Identifier of the key pair, assigned by the backend.
    pub key_id: String,
    /// Organization the porter device is enrolled with.
    pub organization_name: String,
    /// Display name for this porter device.
    pub porter_display_name: String,
    /// When enrollment completed.
    pub enrolled_at: DateTime<Utc>,
    /// Clock-skew tolerance applied to authorization validity windows.
    pub max_clock_skew_minutes: u32,
}

/// Handle to the stored verification key.
///
/// A handle is either resident (the key is parsed and ready) or recovered
/// (only the encoded form was loaded from storage). `reconcile` collapses
/// both states into a resident key; it is idempotent.
///
/// The handle offers verification only. Raw key bytes stay inside the
/// store and its persisted record.
#[derive(Debug, Clone)]
pub struct KeyHandle {
    state: HandleState,
}

#[derive(Debug, Clone)]
enum HandleState {
    /// Key imported and ready for verification.
    Active(VerifyingKey),
    /// Encoded key form recovered from storage, not yet re-imported.
    NeedsReimport(Vec<u8>),
}

impl KeyHandle {
    /// Create a handle around an imported key.
    #[must_use]
    pub fn active(key: VerifyingKey) -> Self {
        Self {
            state: HandleState::Active(key),
        }
    }

    /// Create a handle around an encoded key form recovered from storage.
    #[must_use]
    pub fn needs_reimport(encoded: Vec<u8>) -> Self {
        Self {
            state: HandleState::NeedsReimport(encoded),
        }
    }

    /// Whether the key is resident and ready for verification.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, HandleState::Active(_))
    }

    /// Collapse the handle into the resident state.
    ///
    /// Returns `true` when a re-import happened, `false` when the key was
    /// already resident. Malformed encoded forms are
    /// `KeyStoreError::InvalidKeyMaterial`.
    pub fn reconcile(&mut self) -> Result<bool, KeyStoreError> {
        match &self.state {
            HandleState::Active(_) => Ok(false),
            HandleState::NeedsReimport(encoded) => {
                let key = import_verifying_key(encoded)?;
                self.state = HandleState::Active(key);
                Ok(true)
            }
        }
    }

    /// Verify `signature` over `data` with the held key.
    ///
    /// A handle that still needs re-import verifies against a reconciled
    /// copy; a handle whose encoded form is malformed returns `false`.
    #[must_use]
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let key = match &self.state {
            HandleState::Active(key) => *key,
            HandleState::NeedsReimport(encoded) => match import_verifying_key(encoded) {
                Ok(key) => key,
                Err(_) => return false,
            },
        };

        Ed25519Verifier::new()
            .verify(&key.to_bytes(), data, signature)
            .unwrap_or(false)
    }

    /// Encoded form for persistence. Only the store calls this.
    pub(crate) fn encoded(&self) -> Vec<u8> {
        match &self.state {
            HandleState::Active(key) => key.to_bytes().to_vec(),
            HandleState::NeedsReimport(encoded) => encoded.clone(),
        }
    }
}

/// Import an Ed25519 verifying key from its 32-byte encoded form.
pub(crate) fn import_verifying_key(material: &[u8]) -> Result<VerifyingKey, KeyStoreError> {
    if material.len() != 32 {
        return Err(KeyStoreError::invalid_key_material(format!(
            "verification key must be 32 bytes, got {}",
            material.len()
        )));
    }

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(material);

    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| KeyStoreError::invalid_key_material(e.to_string()))
}
