//! Re-encryption stories
//!
//! After a key rotation, every SealedSecret still carries ciphertext for the
//! old key. These stories follow the engine moving them onto the current key
//! without changing what the controller would decrypt.

use sealed_reencrypt::config::{NamespaceScope, RunConfig};
use sealed_reencrypt::model::{OutcomeStatus, SuccessKind};
use sealed_reencrypt::reseal::SealingScope;
use sealed_reencrypt::{EXIT_OK, KEY_FINGERPRINT_ANNOTATION};

use super::fakes::{config, sref, Harness, CURRENT_KEY, OLD_KEY};

// =============================================================================
// Fixtures
// =============================================================================

/// A cluster with three stale objects across two namespaces
fn rotated_cluster() -> Harness {
    let harness = Harness::new();
    harness.cluster.seed(
        &sref("team-a", "db"),
        OLD_KEY,
        &[("username", b"admin"), ("password", b"hunter2")],
    );
    harness
        .cluster
        .seed(&sref("team-a", "api-token"), OLD_KEY, &[("token", b"t0k3n")]);
    harness
        .cluster
        .seed(&sref("team-b", "tls"), OLD_KEY, &[("tls.key", b"-----KEY-----")]);
    harness
}

// =============================================================================
// Story: Rotating onto the current key
// =============================================================================

/// Story: An operator rotates the sealing key and runs the tool once.
///
/// Every object is rewritten under the current key, and the controller still
/// recovers exactly the plaintext it did before.
#[tokio::test]
async fn story_stale_objects_are_resealed_under_the_current_key() {
    let harness = rotated_cluster();
    let db = sref("team-a", "db");
    let before = harness.recover(&db).await;

    let summary = harness.run(&config()).await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.exit_code(), EXIT_OK);
    assert_eq!(summary.key_fingerprint.as_ref().unwrap().as_str(), CURRENT_KEY);
    assert!(summary
        .items
        .iter()
        .all(|o| o.status == OutcomeStatus::Succeeded(SuccessKind::Applied)));
    assert_eq!(harness.cluster.applies().len(), 3);

    // Same plaintext, new key
    let after = harness.recover(&db).await;
    assert_eq!(after, before);
    assert_eq!(after.get("password"), Some(&b"hunter2"[..]));
    for opened in harness.open_fields(&db).values() {
        assert_eq!(opened.key, CURRENT_KEY);
    }
    assert_eq!(
        harness.cluster.annotation(&db, KEY_FINGERPRINT_ANNOTATION).as_deref(),
        Some(CURRENT_KEY)
    );
}

/// Story: The operator runs the tool a second time to be sure.
///
/// Nothing is rewritten; every object reports already-current and the counts
/// match the first run.
#[tokio::test]
async fn story_second_run_leaves_everything_alone() {
    let harness = rotated_cluster();

    let first = harness.run(&config()).await.unwrap();
    let applies_after_first = harness.cluster.applies().len();
    let second = harness.run(&config()).await.unwrap();

    assert_eq!(second.total, first.total);
    assert_eq!(second.succeeded, first.succeeded);
    assert_eq!(second.failed, first.failed);
    assert_eq!(second.skipped, first.skipped);
    assert!(second
        .items
        .iter()
        .all(|o| o.status == OutcomeStatus::Succeeded(SuccessKind::AlreadyCurrent)));
    assert_eq!(harness.cluster.applies().len(), applies_after_first);
}

/// Story: The operator suspects an object was hand-edited and forces a reseal.
///
/// With force, objects already under the current key are rewritten anyway.
/// The ciphertext changes but the plaintext does not.
#[tokio::test]
async fn story_force_reseals_current_objects() {
    let harness = rotated_cluster();
    let db = sref("team-a", "db");
    harness.run(&config()).await.unwrap();
    let ciphertext_before = harness.cluster.encrypted_data(&db);
    let plaintext_before = harness.recover(&db).await;

    let forced = RunConfig {
        force: true,
        ..config()
    };
    let summary = harness.run(&forced).await.unwrap();

    assert_eq!(summary.succeeded, 3);
    assert!(summary
        .items
        .iter()
        .all(|o| o.status == OutcomeStatus::Succeeded(SuccessKind::Applied)));
    assert_eq!(harness.cluster.applies().len(), 6);
    assert_ne!(harness.cluster.encrypted_data(&db), ciphertext_before);
    assert_eq!(harness.recover(&db).await, plaintext_before);
}

// =============================================================================
// Story: Scope and selection
// =============================================================================

/// Story: A team sealed a secret namespace-wide so it can be renamed.
///
/// The reseal keeps the namespace-wide binding instead of tightening it to
/// strict, so the team can still rename it afterwards.
#[tokio::test]
async fn story_namespace_wide_binding_survives_the_reseal() {
    let harness = Harness::new();
    let shared = sref("team-a", "shared");
    harness.cluster.seed_scoped(
        &shared,
        OLD_KEY,
        SealingScope::NamespaceWide,
        &[("value", b"v")],
    );

    harness.run(&config()).await.unwrap();

    let opened = harness.open_fields(&shared);
    assert_eq!(opened["value"].scope, "namespace-wide");
    assert_eq!(opened["value"].key, CURRENT_KEY);
}

/// Story: A SealedSecret carries plain config in its template next to the
/// sealed fields.
///
/// The controller's unsealed Secret contains both. Only the fields that were
/// sealed before are sealed again; the template data is not promoted into
/// encryptedData.
#[tokio::test]
async fn story_template_data_is_not_promoted_into_encrypted_data() {
    let harness = Harness::new();
    let app = sref("team-a", "app");
    harness.cluster.seed(&app, OLD_KEY, &[("token", b"t0k3n")]);
    harness
        .relay
        .add_template_field(&app, "app.conf", b"log_level=debug");

    let summary = harness.run(&config()).await.unwrap();

    assert_eq!(summary.succeeded, 1);
    let stored = harness.cluster.encrypted_data(&app);
    assert_eq!(stored.keys().collect::<Vec<_>>(), vec!["token"]);
    assert_eq!(harness.open_fields(&app)["token"].value, b"t0k3n".to_vec());
}

/// Story: The operator limits the run to one namespace.
///
/// Objects in other namespaces are neither listed nor touched.
#[tokio::test]
async fn story_namespace_scope_only_touches_that_namespace() {
    let harness = rotated_cluster();
    let scoped = RunConfig {
        scope: NamespaceScope::Namespace("team-b".to_string()),
        ..config()
    };

    let summary = harness.run(&scoped).await.unwrap();

    assert_eq!(summary.total, 1);
    assert_eq!(harness.cluster.applies(), vec![sref("team-b", "tls")]);
    let untouched = harness.open_fields(&sref("team-a", "db"));
    assert!(untouched.values().all(|o| o.key == OLD_KEY));
}

/// Story: The operator previews the rotation with a dry run.
///
/// Every object goes through recovery and sealing, but nothing is written.
#[tokio::test]
async fn story_dry_run_validates_without_writing() {
    let harness = rotated_cluster();
    let db = sref("team-a", "db");
    let before = harness.cluster.encrypted_data(&db);
    let version_before = harness.cluster.resource_version(&db);

    let dry = RunConfig {
        dry_run: true,
        ..config()
    };
    let summary = harness.run(&dry).await.unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.succeeded, 3);
    assert!(summary
        .items
        .iter()
        .all(|o| o.status == OutcomeStatus::Succeeded(SuccessKind::DryRun)));
    assert!(harness.cluster.applies().is_empty());
    assert_eq!(harness.cluster.encrypted_data(&db), before);
    assert_eq!(harness.cluster.resource_version(&db), version_before);
}

/// Story: The cluster has no SealedSecrets yet.
#[tokio::test]
async fn story_empty_cluster_is_a_clean_run() {
    let harness = Harness::new();

    let summary = harness.run(&config()).await.unwrap();

    assert_eq!(summary.total, 0);
    assert!(!summary.cancelled);
    assert_eq!(summary.exit_code(), EXIT_OK);
}
