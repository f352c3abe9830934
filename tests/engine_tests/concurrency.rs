//! Concurrency stories
//!
//! Workers, write conflicts with other writers, and cancellation. Whatever
//! interleaving happens, every discovered object ends with exactly one
//! outcome.

use std::collections::HashSet;

use tokio_util::sync::CancellationToken;

use sealed_reencrypt::config::RunConfig;
use sealed_reencrypt::model::{OutcomeStatus, SkipReason, SuccessKind};
use sealed_reencrypt::{EXIT_CANCELLED, EXIT_ITEM_FAILURES, KEY_FINGERPRINT_ANNOTATION};

use super::fakes::{config, sref, Harness, CURRENT_KEY, OLD_KEY};

// =============================================================================
// Fixtures
// =============================================================================

/// `n` stale objects named `s00`, `s01`, ... in namespace `bulk`
fn stale_objects(n: usize) -> Harness {
    let harness = Harness::new();
    for i in 0..n {
        harness
            .cluster
            .seed(&sref("bulk", &format!("s{i:02}")), OLD_KEY, &[("v", b"x")]);
    }
    harness
}

// =============================================================================
// Story: Racing other writers
// =============================================================================

/// Story: A GitOps controller rewrites an object twice while we are sealing it.
///
/// Each conflict restarts the pipeline from a fresh read; the third attempt
/// lands.
#[tokio::test]
async fn story_conflicts_retry_from_a_fresh_read() {
    let harness = stale_objects(1);
    let target = sref("bulk", "s00");
    harness.cluster.inject_conflicts(&target, 2);

    let summary = harness.run(&config()).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    assert_eq!(
        summary.items[0].status,
        OutcomeStatus::Succeeded(SuccessKind::Applied)
    );
    assert_eq!(harness.cluster.applies(), vec![target.clone()]);
    assert_eq!(
        harness
            .cluster
            .annotation(&target, KEY_FINGERPRINT_ANNOTATION)
            .as_deref(),
        Some(CURRENT_KEY)
    );
}

/// Story: Another writer never stops touching an object.
///
/// The item fails with a conflict once attempts run out. The object keeps
/// its old ciphertext and the other objects are unaffected.
#[tokio::test]
async fn story_persistent_conflict_fails_the_item() {
    let harness = stale_objects(2);
    let contested = sref("bulk", "s00");
    harness.cluster.inject_conflicts(&contested, u32::MAX);

    let summary = harness.run(&config()).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.exit_code(), EXIT_ITEM_FAILURES);
    assert!(summary.items[0]
        .error_detail
        .as_deref()
        .unwrap()
        .contains("conflict"));
    assert_eq!(harness.cluster.applies(), vec![sref("bulk", "s01")]);
    assert!(harness
        .open_fields(&contested)
        .values()
        .all(|o| o.key == OLD_KEY));
}

// =============================================================================
// Story: Parallel workers
// =============================================================================

/// Story: A large cluster is processed with four workers.
///
/// Every object gets exactly one outcome and exactly one write, and the
/// summary lists items in discovery order regardless of completion order.
#[tokio::test]
async fn story_parallel_workers_record_each_object_once() {
    let harness = stale_objects(20);
    let parallel = RunConfig {
        workers: 4,
        ..config()
    };

    let summary = harness.run(&parallel).await.unwrap();

    assert_eq!(summary.total, 20);
    assert_eq!(summary.items.len(), 20);
    assert_eq!(summary.succeeded, 20);

    let subjects: HashSet<String> = summary.items.iter().map(|o| o.subject.to_string()).collect();
    assert_eq!(subjects.len(), 20);
    for (i, item) in summary.items.iter().enumerate() {
        assert_eq!(item.subject.to_string(), format!("bulk/s{i:02}"));
    }

    let applies = harness.cluster.applies();
    assert_eq!(applies.len(), 20);
    let unique: HashSet<_> = applies.into_iter().collect();
    assert_eq!(unique.len(), 20);
}

// =============================================================================
// Story: Cancellation
// =============================================================================

/// Story: The operator hits Ctrl-C before anything starts.
///
/// No object is touched and every object is reported as cancelled.
#[tokio::test]
async fn story_cancelled_before_dispatch_skips_everything() {
    let harness = stale_objects(3);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = harness.run_with(&config(), &cancel).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.total, 3);
    assert_eq!(summary.skipped, 3);
    assert!(summary
        .items
        .iter()
        .all(|o| o.status == OutcomeStatus::Skipped(SkipReason::Cancelled)));
    assert_eq!(summary.exit_code(), EXIT_CANCELLED);
    assert!(harness.cluster.applies().is_empty());
}

/// Story: The timeout fires partway through a sequential run.
///
/// Items already written stay written, no new item starts, and the rest are
/// accounted for as cancelled.
#[tokio::test]
async fn story_cancellation_mid_run_finishes_in_flight_work_only() {
    let harness = stale_objects(5);
    let cancel = CancellationToken::new();
    harness.cluster.cancel_after_applies(2, cancel.clone());

    let summary = harness.run_with(&config(), &cancel).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.total, 5);
    assert_eq!(harness.cluster.applies().len(), 2);
    assert_eq!(summary.exit_code(), EXIT_CANCELLED);
}

/// Story: A run with a failed item is also cancelled.
///
/// The failure decides the exit code.
#[tokio::test]
async fn story_failures_outrank_cancellation() {
    let harness = stale_objects(4);
    harness.relay.purge_key_for(&sref("bulk", "s00"));
    let cancel = CancellationToken::new();
    harness.cluster.cancel_after_applies(1, cancel.clone());

    let summary = harness.run_with(&config(), &cancel).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.exit_code(), EXIT_ITEM_FAILURES);
}
