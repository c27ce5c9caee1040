//! Error types for keystore operations.

use thiserror::Error;

/// Errors that can occur during keystore operations.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// Key material could not be imported.
    #[error("Invalid key material: {reason}")]
    InvalidKeyMaterial {
        /// Reason the material is invalid.
        reason: String,
    },

    /// Storage operation failed.
    #[error("Storage failed: {reason}")]
    Storage {
        /// Reason for the failure.
        reason: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl KeyStoreError {
    /// Create an invalid key material error.
    #[must_use]
    pub fn invalid_key_material(reason: impl Into<String>) -> Self {
        Self::InvalidKeyMaterial {
            reason: reason.into(),
        }
    }

    /// Create a storage error.
    #[must_use]
    pub fn storage(reason: impl Into<String>) -> Self {
        Self::Storage {
            reason: reason.into(),
        }
    }
}
