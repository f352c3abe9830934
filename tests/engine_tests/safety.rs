//! Safety stories
//!
//! What the engine refuses to do: write anything without the current key,
//! let plaintext reach a log line or report, or let one bad object take the
//! rest of the run down with it.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use sealed_reencrypt::config::OutputFormat;
use sealed_reencrypt::model::{OutcomeStatus, SkipReason, Subject, SuccessKind};
use sealed_reencrypt::report::{Reporter, Severity};
use sealed_reencrypt::{Error, EXIT_ITEM_FAILURES};

use super::fakes::{config, sref, FakeKeys, Harness, OLD_KEY};

// =============================================================================
// Fixtures
// =============================================================================

const SECRET_VALUE: &str = "correct-horse-battery-staple";

fn three_stale_objects() -> Harness {
    let harness = Harness::new();
    for name in ["a", "b", "c"] {
        harness.cluster.seed(
            &sref("apps", name),
            OLD_KEY,
            &[("password", SECRET_VALUE.as_bytes())],
        );
    }
    harness
}

/// Log sink shared with the test body
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

// =============================================================================
// Story: No writes without the current key
// =============================================================================

/// Story: The controller is up but its certificate endpoint is failing.
///
/// The run stops before the first item is read. Nothing is written.
#[tokio::test]
async fn story_key_fetch_failure_aborts_before_any_write() {
    let harness = three_stale_objects().with_keys(FakeKeys::unavailable());

    let result = harness.run(&config()).await;

    assert!(matches!(result, Err(Error::KeyFetch { .. })));
    assert!(harness.cluster.applies().is_empty());
}

/// Story: The operator points the tool at the wrong controller name.
#[tokio::test]
async fn story_missing_controller_aborts_the_run() {
    let harness = three_stale_objects();
    harness.cluster.remove_controller();

    let result = harness.run(&config()).await;

    assert!(matches!(result, Err(Error::ControllerNotFound { .. })));
    assert!(harness.cluster.applies().is_empty());
}

// =============================================================================
// Story: One bad object does not sink the run
// =============================================================================

/// Story: Discovery returns a malformed key and a duplicate.
///
/// The malformed key is skipped as an invalid ref, the duplicate is skipped,
/// and every real object is still re-sealed. Every discovered key is counted.
#[tokio::test]
async fn story_malformed_and_duplicate_keys_are_skipped() {
    let harness = three_stale_objects();
    harness.cluster.list_extra("no-slash-here");
    harness.cluster.list_extra("apps/a");

    let summary = harness.run(&config()).await.unwrap();

    assert_eq!(summary.total, 5);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.skipped, 2);
    assert_eq!(summary.failed, 0);
    assert_eq!(
        summary.succeeded + summary.failed + summary.skipped,
        summary.total
    );

    let invalid = summary
        .items
        .iter()
        .find(|o| o.subject == Subject::Invalid("no-slash-here".to_string()))
        .unwrap();
    assert_eq!(invalid.status, OutcomeStatus::Skipped(SkipReason::InvalidRef));
    assert!(invalid.error_detail.is_some());

    let duplicates = summary
        .items
        .iter()
        .filter(|o| o.status == OutcomeStatus::Skipped(SkipReason::Duplicate))
        .count();
    assert_eq!(duplicates, 1);
    assert_eq!(harness.cluster.applies().len(), 3);
}

/// Story: The controller no longer holds the key one object was sealed with.
///
/// That object fails and keeps its old ciphertext; the others are re-sealed
/// and the run exits with the item-failure code.
#[tokio::test]
async fn story_unrecoverable_object_fails_alone() {
    let harness = three_stale_objects();
    let orphan = sref("apps", "b");
    harness.relay.purge_key_for(&orphan);
    let before = harness.cluster.encrypted_data(&orphan);

    let summary = harness.run(&config()).await.unwrap();

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.exit_code(), EXIT_ITEM_FAILURES);
    let failed = summary
        .items
        .iter()
        .find(|o| o.status == OutcomeStatus::Failed)
        .unwrap();
    assert_eq!(failed.subject, Subject::Ref(orphan.clone()));
    assert!(failed
        .error_detail
        .as_deref()
        .unwrap()
        .contains("plaintext recovery failed"));
    assert_eq!(harness.cluster.encrypted_data(&orphan), before);
}

/// Story: The controller unseals an object but leaves one field out.
///
/// Writing back what came out of the controller would silently delete the
/// missing field. The item fails instead and every field keeps its old
/// ciphertext.
#[tokio::test]
async fn story_partially_recovered_object_is_not_written() {
    let harness = Harness::new();
    let db = sref("apps", "db");
    harness.cluster.seed(
        &db,
        OLD_KEY,
        &[("password", SECRET_VALUE.as_bytes()), ("username", b"admin")],
    );
    harness.relay.drop_field_for(&db, "username");
    let before = harness.cluster.encrypted_data(&db);

    let summary = harness.run(&config()).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.exit_code(), EXIT_ITEM_FAILURES);
    let detail = summary.items[0].error_detail.as_deref().unwrap();
    assert!(detail.contains("'username'"));
    assert!(!detail.contains(SECRET_VALUE));
    assert!(harness.cluster.applies().is_empty());
    assert_eq!(harness.cluster.encrypted_data(&db), before);
}

/// Story: An object is deleted between listing and reading.
#[tokio::test]
async fn story_object_deleted_mid_run_fails_as_not_found() {
    let harness = three_stale_objects();
    harness.cluster.vanish(&sref("apps", "c"));

    let summary = harness.run(&config()).await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.succeeded, 2);
    let failed = summary
        .items
        .iter()
        .find(|o| o.status == OutcomeStatus::Failed)
        .unwrap();
    assert!(failed.error_detail.as_deref().unwrap().contains("not found"));
}

// =============================================================================
// Story: Plaintext stays out of logs and reports
// =============================================================================

/// Story: A security reviewer greps the run's logs and report for a known
/// secret value after a run with debug logging and one failing object.
#[tokio::test]
async fn story_plaintext_never_reaches_logs_or_reports() {
    let harness = three_stale_objects();
    harness.relay.purge_key_for(&sref("apps", "b"));

    let logs = CapturedLogs::default();
    let sink = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || sink.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let summary = harness.run(&config()).await.unwrap();

    let reporter = Reporter::new(Severity::Debug);
    let text_report = reporter.summarize(&summary).render(OutputFormat::Text);
    let json_report = reporter.summarize(&summary).render(OutputFormat::Json);
    let logged = logs.text();

    // Sanity: the sinks saw the run
    assert!(logged.contains("apps/a"));
    assert!(text_report.contains("apps/a"));
    assert!(json_report.contains("apps/a"));

    for output in [&logged, &text_report, &json_report] {
        assert!(!output.contains(SECRET_VALUE));
    }
}

/// Story: Applied items report which key they are now sealed under.
#[tokio::test]
async fn story_report_names_the_run_key() {
    let harness = three_stale_objects();

    let summary = harness.run(&config()).await.unwrap();
    let report = Reporter::new(Severity::Info)
        .summarize(&summary)
        .render(OutputFormat::Text);

    assert!(summary
        .items
        .iter()
        .all(|o| o.status == OutcomeStatus::Succeeded(SuccessKind::Applied)));
    assert!(report.contains("key=c0ffee00c0ff"));
    assert!(report.contains("total=3 succeeded=3 failed=0 skipped=0"));
}
