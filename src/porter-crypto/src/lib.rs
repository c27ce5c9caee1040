//! # porter-crypto
//!
//! Signature verification primitives for the porter trust core.
//!
//! The porter client holds only public material: it verifies authorization
//! payloads signed by the organization's backend and never signs anything
//! itself. This crate provides the Ed25519 verifier, constant-time byte
//! comparison, and key fingerprinting for log output.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod ed25519;

pub use error::CryptoError;
pub use ed25519::{Ed25519Verifier, SignatureVerifier};

use sha2::{Digest, Sha256};

/// Constant-time byte comparison.
///
/// Compares two byte slices in constant time to prevent timing attacks.
/// Returns `true` if the slices are equal, `false` otherwise.
///
/// # Security
///
/// This function MUST be used for all cryptographic comparisons
/// (signatures, fingerprints, key identifiers) to prevent timing
/// side-channels.
///
/// Uses the `subtle` crate's `ConstantTimeEq` trait for the comparison.
/// The length check still returns early, but length is typically not secret.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    use subtle::ConstantTimeEq;

    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// SHA-256 fingerprint of key material, hex-encoded.
///
/// Log this instead of raw key bytes; raw public keys never appear in
/// log output.
#[must_use]
pub fn key_fingerprint(key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hex::encode(&hasher.finalize()[..16])
}
