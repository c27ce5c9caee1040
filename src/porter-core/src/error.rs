//! Error types for core operations.

use thiserror::Error;

/// Errors from talking to the organization backend.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Request failed at the HTTP layer.
    #[error("HTTP error: {message}")]
    Http {
        /// Error message.
        message: String,
    },

    /// The backend answered with something we cannot use.
    #[error("Invalid response: {message}")]
    InvalidResponse {
        /// Error message.
        message: String,
    },
}

impl TransportError {
    /// Create an HTTP-layer error.
    #[must_use]
    pub fn http(message: impl Into<String>) -> Self {
        Self::Http {
            message: message.into(),
        }
    }

    /// Create an invalid-response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }
}

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Event queue operation failed.
    #[error("Queue error: {reason}")]
    Queue {
        /// Reason for the failure.
        reason: String,
    },

    /// Revocation cache operation failed.
    #[error("Revocation error: {reason}")]
    Revocation {
        /// Reason for the failure.
        reason: String,
    },

    /// Backend transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Keystore operation failed.
    #[error("Keystore error: {0}")]
    KeyStore(#[from] porter_keystore::KeyStoreError),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config {
        /// Error message.
        message: String,
    },
}

impl CoreError {
    /// Create a queue error.
    #[must_use]
    pub fn queue(reason: impl Into<String>) -> Self {
        Self::Queue {
            reason: reason.into(),
        }
    }

    /// Create a revocation error.
    #[must_use]
    pub fn revocation(reason: impl Into<String>) -> Self {
        Self::Revocation {
            reason: reason.into(),
        }
    }

    /// Check if this error came from the network rather than local state.
    ///
    /// Network errors are retried on the next sync cycle and never surface
    /// to the scanning UI.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
