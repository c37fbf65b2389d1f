//! Integration test: collection, checking and reporting end to end.
//!
//! Three pillars holding the same files, checked through the real workflow.

use std::time::Duration;

use tally_engine::{AlertKind, FileAction};
use tally_integration_tests::{IntegrationHarness, fid, read_report};
use tally_types::{ChecksumState, FileState};

const PILLARS: [&str; 3] = ["a", "b", "c"];

/// A healthy federation yields a clean report and VALID records everywhere.
#[tokio::test]
async fn test_healthy_collection_has_no_issues() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(5).await;

    let outcome = h.full_check().await.unwrap();
    assert!(!outcome.issues_found);
    assert_eq!(outcome.summary, "No integrity issues found");
    assert!(outcome.failed_pillars.is_empty());
    assert_eq!(h.stored_files(), 5);
    assert_eq!(h.alerts(AlertKind::IntegrityFailed), 0);

    for i in 0..5 {
        for pillar in PILLARS {
            let record = h.record(&format!("file-{i:03}"), pillar).unwrap();
            assert_eq!(record.file_state, FileState::Existing);
            assert_eq!(record.checksum_state, ChecksumState::Valid);
            assert!(record.checksum.is_some());
        }
    }

    let report = read_report(&outcome.report_path);
    assert!(report.contains("No inconsistent checksums detected"));
    assert!(report.contains("No missing files detected"));
}

/// A copy that changes at one pillar puts every copy of the file in error.
#[tokio::test]
async fn test_corrupted_copy_marks_every_pillar() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(3).await;
    assert!(!h.full_check().await.unwrap().issues_found);

    h.advance(Duration::from_secs(3600));
    h.federation.corrupt("c", "file-001").await;

    let outcome = h.incremental_check().await.unwrap();
    assert!(outcome.issues_found);
    assert!(outcome.summary.contains("c has 1 potentially corrupt file."));
    assert!(outcome.summary.contains("a has 1 potentially corrupt file."));
    assert_eq!(h.alerts(AlertKind::IntegrityFailed), 1);

    for pillar in PILLARS {
        assert_eq!(
            h.record("file-001", pillar).unwrap().checksum_state,
            ChecksumState::Error
        );
        assert_eq!(
            h.record("file-000", pillar).unwrap().checksum_state,
            ChecksumState::Valid
        );
    }

    let inconsistencies: Vec<_> = h
        .audit
        .events()
        .into_iter()
        .filter(|e| e.action == FileAction::Inconsistency)
        .collect();
    assert_eq!(inconsistencies.len(), 1);
    assert_eq!(inconsistencies[0].file_id, Some(fid("file-001")));
    assert!(inconsistencies[0].long_description.contains("Only c differs"));

    let report = read_report(&outcome.report_path);
    assert!(report.contains("file-001"));
}

/// Small pages still bring in every file.
#[tokio::test]
async fn test_small_pages_collect_everything() {
    let h = IntegrationHarness::with_settings(&PILLARS, |s| s.max_page_size = 2);
    h.populate(7).await;

    let outcome = h.full_check().await.unwrap();
    assert!(!outcome.issues_found);
    assert_eq!(h.stored_files(), 7);

    let requests = h.federation.requests();
    assert!(requests.len() > 2, "expected several rounds, got {}", requests.len());
    assert!(
        requests
            .iter()
            .flat_map(|r| r.queries.iter())
            .all(|q| q.max_results == 2)
    );
    for pillar in PILLARS {
        assert_eq!(
            h.record("file-006", pillar).unwrap().checksum_state,
            ChecksumState::Valid
        );
    }
}

/// Pages of a single entry still walk past every file.
#[tokio::test]
async fn test_single_entry_pages_terminate() {
    let h = IntegrationHarness::with_settings(&PILLARS, |s| s.max_page_size = 1);
    h.populate(3).await;

    let outcome = tokio::time::timeout(Duration::from_secs(30), h.full_check())
        .await
        .expect("collection did not terminate")
        .unwrap();
    assert!(!outcome.issues_found);
    assert_eq!(h.stored_files(), 3);
    for pillar in PILLARS {
        assert_eq!(
            h.record("file-002", pillar).unwrap().checksum_state,
            ChecksumState::Valid
        );
    }
}

/// More files sharing one timestamp than fit on a page are all collected.
#[tokio::test]
async fn test_tied_timestamps_overflowing_a_page() {
    let h = IntegrationHarness::with_settings(&PILLARS, |s| s.max_page_size = 2);
    for i in 0..3 {
        for pillar in PILLARS {
            h.federation
                .store_file(pillar, &format!("file-{i:03}"), format!("tied {i}").as_bytes())
                .await;
        }
    }
    h.advance(Duration::from_secs(1));

    let outcome = tokio::time::timeout(Duration::from_secs(30), h.full_check())
        .await
        .expect("collection did not terminate")
        .unwrap();
    assert!(!outcome.issues_found);
    assert_eq!(h.stored_files(), 3);
    assert!(
        h.federation
            .requests()
            .iter()
            .flat_map(|r| r.queries.iter())
            .any(|q| q.max_results > 2)
    );
}

/// An incremental run resumes from the stored cursors and picks up new files.
#[tokio::test]
async fn test_incremental_check_resumes_from_cursors() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(3).await;
    h.full_check().await.unwrap();

    let first_run = h.federation.requests();
    assert!(first_run[0].queries.iter().all(|q| q.min_timestamp.is_none()));

    h.advance(Duration::from_secs(60));
    h.add_file("late", b"arrived after the first check").await;
    let outcome = h.incremental_check().await.unwrap();
    assert!(!outcome.issues_found);

    let second_run = &h.federation.requests()[first_run.len()..];
    assert!(!second_run.is_empty());
    assert!(
        second_run
            .iter()
            .flat_map(|r| r.queries.iter())
            .all(|q| q.min_timestamp.is_some())
    );
    assert_eq!(h.stored_files(), 4);
    assert_eq!(
        h.record("late", "b").unwrap().checksum_state,
        ChecksumState::Valid
    );
}

/// Combined file-info collection reaches the same verdict.
#[tokio::test]
async fn test_file_info_collection() {
    let h = IntegrationHarness::with_settings(&PILLARS, |s| s.use_file_infos = true);
    h.populate(4).await;

    let outcome = h.full_check().await.unwrap();
    assert!(!outcome.issues_found);
    assert_eq!(h.stored_files(), 4);
    for pillar in PILLARS {
        let record = h.record("file-003", pillar).unwrap();
        assert_eq!(record.checksum_state, ChecksumState::Valid);
        assert!(record.file_size.is_some());
    }
}
