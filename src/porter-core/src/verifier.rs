//! Authorization verification against the enrolled organization key.
//!
//! Every gate in [`PayloadVerifier::check_access`] answers with a plain
//! boolean or an [`AccessDecision`]; crypto and storage failures map to a
//! denial, never to an error the scanning UI has to handle.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use porter_keystore::KeyStore;

use crate::queue::ScanOutcome;
use crate::revocation::RevocationCache;

/// Why a scan was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// No verification key enrolled on this device.
    NoKey,
    /// Signature did not verify against the organization key.
    BadSignature,
    /// Scan happened outside the skew-expanded validity window.
    OutOfDateRange,
    /// The authorization was revoked.
    Revoked,
}

/// What the device decided about a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    /// Signature, validity window and revocation all passed.
    Allowed,
    /// Entry denied.
    Denied(DenialReason),
}

impl AccessDecision {
    /// The outcome recorded in the event queue for this decision.
    #[must_use]
    pub fn outcome(&self) -> ScanOutcome {
        match self {
            Self::Allowed => ScanOutcome::Allowed,
            Self::Denied(DenialReason::NoKey) => ScanOutcome::DeniedNoKey,
            Self::Denied(DenialReason::BadSignature) => ScanOutcome::DeniedSignature,
            Self::Denied(DenialReason::OutOfDateRange) => ScanOutcome::DeniedExpired,
            Self::Denied(DenialReason::Revoked) => ScanOutcome::DeniedRevoked,
        }
    }

    /// Whether entry was granted.
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Verifies scanned authorization payloads with the stored key.
///
/// Holds the key store it was constructed with; no global state.
pub struct PayloadVerifier {
    key_store: Arc<dyn KeyStore>,
}

impl PayloadVerifier {
    /// Create a verifier over the given key store.
    #[must_use]
    pub fn new(key_store: Arc<dyn KeyStore>) -> Self {
        Self { key_store }
    }

    /// Verify `signature` over `payload` with the enrolled key.
    ///
    /// `false` when no key is enrolled or the signature does not check out.
    pub async fn verify(&self, payload: &[u8], signature: &[u8]) -> bool {
        let Some(handle) = self.key_store.verification_key().await else {
            debug!("No verification key enrolled, denying");
            return false;
        };

        handle.verify(payload, signature)
    }

    /// Verify a payload that claims the key id it was signed with.
    ///
    /// A claimed id that does not match the enrolled key is rejected
    /// before any crypto work.
    pub async fn verify_with_key_id(
        &self,
        claimed_key_id: &str,
        payload: &[u8],
        signature: &[u8],
    ) -> bool {
        match self.key_store.key_id().await {
            Some(key_id) if key_id == claimed_key_id => {}
            Some(key_id) => {
                debug!(
                    claimed = %claimed_key_id,
                    enrolled = %key_id,
                    "Key id mismatch, denying without signature check"
                );
                return false;
            }
            None => {
                debug!("No verification key enrolled, denying");
                return false;
            }
        }

        self.verify(payload, signature).await
    }

    /// Whether the current time falls inside the validity window, expanded
    /// by the clock-skew tolerance on both ends.
    #[must_use]
    pub fn is_date_in_range(
        &self,
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
        max_clock_skew_minutes: u32,
    ) -> bool {
        is_date_in_range_at(Utc::now(), valid_from, valid_to, max_clock_skew_minutes)
    }

    /// Evaluate all gates for one scan.
    ///
    /// Gate order is fixed: key presence, signature, validity window,
    /// revocation. The first failing gate names the denial.
    pub async fn check_access(
        &self,
        payload: &[u8],
        signature: &[u8],
        valid_from: DateTime<Utc>,
        valid_to: DateTime<Utc>,
        auth_id: &str,
        revocations: &dyn RevocationCache,
    ) -> AccessDecision {
        if !self.key_store.has_key().await {
            warn!(auth_id = %auth_id, "Scan denied: no verification key enrolled");
            return AccessDecision::Denied(DenialReason::NoKey);
        }

        if !self.verify(payload, signature).await {
            warn!(auth_id = %auth_id, "Scan denied: signature check failed");
            return AccessDecision::Denied(DenialReason::BadSignature);
        }

        let skew = self
            .key_store
            .metadata()
            .await
            .map_or(0, |m| m.max_clock_skew_minutes);
        if !self.is_date_in_range(valid_from, valid_to, skew) {
            debug!(auth_id = %auth_id, "Scan denied: outside validity window");
            return AccessDecision::Denied(DenialReason::OutOfDateRange);
        }

        if revocations.is_revoked(auth_id).await {
            warn!(auth_id = %auth_id, "Scan denied: authorization revoked");
            return AccessDecision::Denied(DenialReason::Revoked);
        }

        debug!(auth_id = %auth_id, "Scan allowed");
        AccessDecision::Allowed
    }
}

/// Window check against an explicit clock, inclusive at both expanded bounds.
pub(crate) fn is_date_in_range_at(
    now: DateTime<Utc>,
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
    max_clock_skew_minutes: u32,
) -> bool {
    let skew = Duration::minutes(i64::from(max_clock_skew_minutes));
    now >= valid_from - skew && now <= valid_to + skew
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ed25519_dalek::{Signer, SigningKey};

    use porter_keystore::{KeyMetadata, MemoryKeyStore};

    use crate::revocation::MemoryRevocationCache;
    use crate::revocation::RevocationRecord;

    fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[42u8; 32])
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

    async fn enrolled_store(skew_minutes: u32) -> Arc<MemoryKeyStore> {
        let store = Arc::new(MemoryKeyStore::new());
        store
            .store_verification_key(
                &signing_key().verifying_key().to_bytes(),
                metadata(skew_minutes),
            )
            .await
            .unwrap();
        store
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[tokio::test]
    async fn test_verify_without_key() {
        let verifier = PayloadVerifier::new(Arc::new(MemoryKeyStore::new()));
        assert!(!verifier.verify(b"payload", &[0u8; 64]).await);
    }

    #[tokio::test]
    async fn test_verify_valid_signature() {
        let sk = signing_key();
        let verifier = PayloadVerifier::new(enrolled_store(0).await);

        let payload = b"auth-7|2026-08-01|2026-08-02";
        let sig = sk.sign(payload).to_bytes();

        assert!(verifier.verify(payload, &sig).await);
        assert!(!verifier.verify(b"tampered", &sig).await);
    }

    #[tokio::test]
    async fn test_verify_with_key_id_mismatch() {
        let sk = signing_key();
        let verifier = PayloadVerifier::new(enrolled_store(0).await);

        let payload = b"payload";
        let sig = sk.sign(payload).to_bytes();

        assert!(verifier.verify_with_key_id("key-1", payload, &sig).await);
        assert!(!verifier.verify_with_key_id("key-2", payload, &sig).await);
    }

    #[test]
    fn test_date_range_inclusive_bounds() {
        let from = at(2026, 8, 1, 12, 0);
        let to = at(2026, 8, 1, 16, 0);

        // Exactly at the skew-expanded edges
        assert!(is_date_in_range_at(at(2026, 8, 1, 11, 55), from, to, 5));
        assert!(is_date_in_range_at(at(2026, 8, 1, 16, 5), from, to, 5));

        // One minute past either edge
        assert!(!is_date_in_range_at(at(2026, 8, 1, 11, 54), from, to, 5));
        assert!(!is_date_in_range_at(at(2026, 8, 1, 16, 6), from, to, 5));
    }

    #[test]
    fn test_date_range_zero_skew() {
        let from = at(2026, 8, 1, 12, 0);
        let to = at(2026, 8, 1, 16, 0);

        assert!(is_date_in_range_at(from, from, to, 0));
        assert!(is_date_in_range_at(to, from, to, 0));
        assert!(!is_date_in_range_at(at(2026, 8, 1, 16, 1), from, to, 0));
    }

    #[tokio::test]
    async fn test_check_access_gate_order() {
        let sk = signing_key();
        let revocations = MemoryRevocationCache::new();

        // No key: everything denies with NoKey
        let bare = PayloadVerifier::new(Arc::new(MemoryKeyStore::new()));
        let decision = bare
            .check_access(
                b"payload",
                &[0u8; 64],
                at(2026, 8, 1, 0, 0),
                at(2026, 8, 2, 0, 0),
                "auth-1",
                &revocations,
            )
            .await;
        assert_eq!(decision, AccessDecision::Denied(DenialReason::NoKey));
        assert_eq!(decision.outcome(), ScanOutcome::DeniedNoKey);

        let verifier = PayloadVerifier::new(enrolled_store(5).await);
        let payload = b"auth-1";
        let sig = sk.sign(payload).to_bytes();

        // Bad signature beats everything else
        let decision = verifier
            .check_access(
                payload,
                &[0u8; 64],
                at(2026, 8, 1, 0, 0),
                at(2026, 8, 2, 0, 0),
                "auth-1",
                &revocations,
            )
            .await;
        assert_eq!(decision, AccessDecision::Denied(DenialReason::BadSignature));

        // Valid signature but stale window
        let decision = verifier
            .check_access(
                payload,
                &sig,
                at(2020, 1, 1, 0, 0),
                at(2020, 1, 2, 0, 0),
                "auth-1",
                &revocations,
            )
            .await;
        assert_eq!(
            decision,
            AccessDecision::Denied(DenialReason::OutOfDateRange)
        );

        // Everything fine
        let now = Utc::now();
        let decision = verifier
            .check_access(
                payload,
                &sig,
                now - Duration::hours(1),
                now + Duration::hours(1),
                "auth-1",
                &revocations,
            )
            .await;
        assert_eq!(decision, AccessDecision::Allowed);
        assert!(decision.is_allowed());

        // Revoked comes last
        revocations
            .update_from_server(
                &[RevocationRecord {
                    auth_id: "auth-1".into(),
                    revoked_at: now,
                }],
                now,
            )
            .await
            .unwrap();
        let decision = verifier
            .check_access(
                payload,
                &sig,
                now - Duration::hours(1),
                now + Duration::hours(1),
                "auth-1",
                &revocations,
            )
            .await;
        assert_eq!(decision, AccessDecision::Denied(DenialReason::Revoked));
        assert_eq!(decision.outcome(), ScanOutcome::DeniedRevoked);
    }
}
