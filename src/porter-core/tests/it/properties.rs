//! Property-based tests for the trust core.
//!
//! These tests verify validity-window arithmetic, queue acknowledgment
//! set semantics, and revocation-cache monotonicity.

use std::sync::Arc;

use chrono::{Duration, Utc};
use proptest::prelude::*;

use porter_core::{
    AccessEvent, EventQueue, MemoryEventQueue, MemoryRevocationCache, PayloadVerifier,
    RevocationCache, RevocationRecord, ScanOutcome,
};
use porter_keystore::MemoryKeyStore;

fn verifier() -> PayloadVerifier {
    PayloadVerifier::new(Arc::new(MemoryKeyStore::new()))
}

/// Single-threaded runtime for driving async storage from proptest.
fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn event(auth_id: &str) -> AccessEvent {
    AccessEvent::new(auth_id, ScanOutcome::Allowed, "device-1", "porter-1")
}

proptest! {
    // Reduced from 256 to keep storage-backed cases fast
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 500,
        ..ProptestConfig::default()
    })]

    // ========================================================================
    // Validity Window Properties
    // ========================================================================

    /// A window that contains the current time passes at any skew.
    #[test]
    fn window_containing_now_passes(
        before_minutes in 1i64..10_000,
        after_minutes in 1i64..10_000,
        skew in 0u32..120,
    ) {
        let now = Utc::now();
        let from = now - Duration::minutes(before_minutes);
        let to = now + Duration::minutes(after_minutes);
        prop_assert!(verifier().is_date_in_range(from, to, skew));
    }

    /// Growing the skew tolerance never flips a pass into a fail.
    #[test]
    fn skew_expansion_is_monotone(
        from_offset in -10_000i64..10_000,
        length in 0i64..10_000,
        skew in 0u32..60,
        extra in 0u32..60,
    ) {
        let now = Utc::now();
        let from = now + Duration::minutes(from_offset);
        let to = from + Duration::minutes(length);

        let v = verifier();
        if v.is_date_in_range(from, to, skew) {
            prop_assert!(v.is_date_in_range(from, to, skew + extra));
        }
    }

    /// A window that ended further in the past than the skew covers fails.
    #[test]
    fn stale_window_fails(
        ended_minutes_ago in 1i64..10_000,
        length in 0i64..10_000,
        skew in 0u32..60,
    ) {
        let now = Utc::now();
        // End the window strictly beyond the skew tolerance, with a minute
        // of slack so the clock reading inside the check cannot flip it.
        let to = now - Duration::minutes(i64::from(skew) + ended_minutes_ago + 1);
        let from = to - Duration::minutes(length);
        prop_assert!(!verifier().is_date_in_range(from, to, skew));
    }

    // ========================================================================
    // Queue Acknowledgment Set Semantics
    // ========================================================================

    /// Acknowledging any subset leaves exactly the complement pending,
    /// and re-acknowledging the same subset changes nothing.
    #[test]
    fn mark_synced_removes_exactly_the_subset(
        total in 1usize..20,
        picks in prop::collection::vec(any::<prop::sample::Index>(), 0..20),
    ) {
        runtime().block_on(async {
            let queue = MemoryEventQueue::new();
            let mut ids = Vec::new();
            for i in 0..total {
                ids.push(queue.enqueue(event(&format!("auth-{i}"))).await.unwrap());
            }

            let mut subset: Vec<u64> =
                picks.iter().map(|ix| ids[ix.index(total)]).collect();
            subset.sort_unstable();
            subset.dedup();

            queue.mark_synced(&subset).await.unwrap();
            let remaining: Vec<u64> =
                queue.pending().await.iter().map(|p| p.local_id).collect();

            let expected: Vec<u64> = ids
                .iter()
                .copied()
                .filter(|id| !subset.contains(id))
                .collect();
            prop_assert_eq!(&remaining, &expected);

            // Idempotent: repeating the acknowledgment is harmless.
            queue.mark_synced(&subset).await.unwrap();
            let after: Vec<u64> =
                queue.pending().await.iter().map(|p| p.local_id).collect();
            prop_assert_eq!(after, expected);
            Ok(())
        })?;
    }

    /// Unknown ids in an acknowledgment are ignored.
    #[test]
    fn mark_synced_ignores_unknown_ids(
        total in 1usize..10,
        bogus in prop::collection::vec(1_000u64..2_000, 1..5),
    ) {
        runtime().block_on(async {
            let queue = MemoryEventQueue::new();
            for i in 0..total {
                queue.enqueue(event(&format!("auth-{i}"))).await.unwrap();
            }

            queue.mark_synced(&bogus).await.unwrap();
            prop_assert_eq!(queue.pending().await.len(), total);
            Ok(())
        })?;
    }

    // ========================================================================
    // Revocation Monotonicity
    // ========================================================================

    /// Applying deltas in any order never un-revokes and never shrinks
    /// the set; the checkpoint never moves backward.
    #[test]
    fn revocation_updates_are_additive(
        batches in prop::collection::vec(
            prop::collection::vec(0u8..50, 0..8),
            1..6,
        ),
        watermark_offsets in prop::collection::vec(-100i64..100, 1..6),
    ) {
        runtime().block_on(async {
            let cache = MemoryRevocationCache::new();
            let base = Utc::now();
            let mut seen: Vec<String> = Vec::new();
            let mut last_count = 0usize;
            let mut last_checkpoint = None;

            for (batch, offset) in batches.iter().zip(watermark_offsets.iter().cycle()) {
                let records: Vec<RevocationRecord> = batch
                    .iter()
                    .map(|n| RevocationRecord {
                        auth_id: format!("auth-{n}"),
                        revoked_at: base,
                    })
                    .collect();
                let watermark = base + Duration::minutes(*offset);
                cache.update_from_server(&records, watermark).await.unwrap();

                for r in &records {
                    if !seen.contains(&r.auth_id) {
                        seen.push(r.auth_id.clone());
                    }
                }

                // Everything ever revoked stays revoked.
                for auth_id in &seen {
                    prop_assert!(cache.is_revoked(auth_id).await);
                }

                let count = cache.revoked_count().await;
                prop_assert!(count >= last_count);
                prop_assert_eq!(count, seen.len());
                last_count = count;

                let checkpoint = cache.last_sync_timestamp().await;
                prop_assert!(checkpoint >= last_checkpoint);
                last_checkpoint = checkpoint;
            }
            Ok(())
        })?;
    }
}
