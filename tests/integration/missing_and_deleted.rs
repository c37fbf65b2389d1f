//! Integration test: files disappearing from pillars.

use std::time::Duration;

use tally_engine::AlertKind;
use tally_integration_tests::{DAY, IntegrationHarness, read_report};
use tally_types::FileState;

const PILLARS: [&str; 3] = ["a", "b", "c"];

/// A file lost at one pillar is first seen as deleted there, and reported
/// missing once the grace period has passed.
#[tokio::test]
async fn test_lost_copy_reported_after_grace() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(3).await;
    h.full_check().await.unwrap();

    h.federation.remove_file("c", "file-001").await;
    h.advance(Duration::from_secs(3600));

    let outcome = h.full_check().await.unwrap();
    assert!(!outcome.issues_found, "deletion alone is not an integrity issue");
    assert!(h.record("file-001", "c").is_none());
    assert!(h.record("file-001", "a").is_some());
    let report = read_report(&outcome.report_path);
    assert!(report.contains("== Deleted files =="));
    assert!(report.contains("file-001"));
    assert!(report.contains("No missing files detected"));

    h.advance(8 * DAY);
    let outcome = h.full_check().await.unwrap();
    assert!(outcome.issues_found);
    assert!(outcome.summary.contains("c is missing 1 file."));
    let placeholder = h.record("file-001", "c").unwrap();
    assert_eq!(placeholder.file_state, FileState::Missing);
    assert!(placeholder.missing_since.is_some());
    assert_eq!(h.alerts(AlertKind::IntegrityFailed), 1);
}

/// A file gone from every pillar leaves the collection.
#[tokio::test]
async fn test_file_deleted_everywhere() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(2).await;
    h.full_check().await.unwrap();
    assert_eq!(h.stored_files(), 2);

    for pillar in PILLARS {
        h.federation.remove_file(pillar, "file-000").await;
    }
    h.advance(Duration::from_secs(3600));

    let outcome = h.full_check().await.unwrap();
    assert!(!outcome.issues_found);
    assert_eq!(outcome.summary, "No integrity issues found");
    assert_eq!(h.stored_files(), 1);
    for pillar in PILLARS {
        assert!(h.record("file-000", pillar).is_none());
    }
}

/// Only complete listings can prove a deletion.
#[tokio::test]
async fn test_incremental_check_keeps_records() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(2).await;
    h.full_check().await.unwrap();

    h.federation.remove_file("b", "file-000").await;
    h.advance(Duration::from_secs(3600));

    let outcome = h.incremental_check().await.unwrap();
    assert!(!outcome.issues_found);
    let record = h.record("file-000", "b").unwrap();
    assert_eq!(record.file_state, FileState::Existing);
}
