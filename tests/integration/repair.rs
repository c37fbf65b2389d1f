//! Integration test: restoring lost copies from healthy pillars.

use std::time::Duration;

use tally_engine::{AlertKind, FileAction};
use tally_integration_tests::{DAY, IntegrationHarness, fid};
use tally_types::{ChecksumState, FileState};

const PILLARS: [&str; 3] = ["a", "b", "c"];

/// Check, lose a copy, wait out the grace period, check again.
async fn lose_copy(h: &IntegrationHarness, pillar: &str, file: &str) {
    h.full_check().await.unwrap();
    h.federation.remove_file(pillar, file).await;
    h.advance(8 * DAY);
    let outcome = h.full_check().await.unwrap();
    assert!(outcome.issues_found);
}

#[tokio::test]
async fn test_repair_restores_lost_copy() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(3).await;
    lose_copy(&h, "c", "file-002").await;

    let summary = h.repair().await.unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.repaired, 1);
    assert!(summary.failed.is_empty());

    let original = h.federation.content("a", "file-002").await.unwrap();
    assert_eq!(h.federation.content("c", "file-002").await, Some(original));
    assert_eq!(h.federation.staged(), 0, "staged copy should be removed");
    assert!(
        h.audit
            .events()
            .iter()
            .any(|e| e.action == FileAction::PutFile && e.file_id == Some(fid("file-002")))
    );

    h.advance(Duration::from_secs(3600));
    let outcome = h.full_check().await.unwrap();
    assert!(!outcome.issues_found, "{}", outcome.summary);
    let record = h.record("file-002", "c").unwrap();
    assert_eq!(record.file_state, FileState::Existing);
    assert_eq!(record.checksum_state, ChecksumState::Valid);
}

/// Copies lost recently are left alone.
#[tokio::test]
async fn test_repair_waits_for_grace() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(2).await;
    h.full_check().await.unwrap();
    h.federation.remove_file("c", "file-000").await;
    h.advance(Duration::from_secs(3600));
    h.full_check().await.unwrap();

    let summary = h.repair().await.unwrap();
    assert_eq!(summary.attempted, 0);
    assert_eq!(summary.skipped, 1);
    assert!(h.federation.content("c", "file-000").await.is_none());
}

/// Without agreement on the content there is nothing to copy from.
#[tokio::test]
async fn test_repair_refuses_disputed_file() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(2).await;
    h.full_check().await.unwrap();
    h.federation.corrupt("b", "file-001").await;
    lose_copy(&h, "c", "file-001").await;

    let summary = h.repair().await.unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.repaired, 0);
    assert_eq!(summary.skipped, 1);
    assert!(h.federation.content("c", "file-001").await.is_none());
}

/// An unreachable source fails the repair of that file only.
#[tokio::test]
async fn test_repair_with_source_down() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(2).await;
    lose_copy(&h, "c", "file-000").await;
    h.federation.take_down("a").await;

    let summary = h.repair().await.unwrap();
    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.failed, vec![fid("file-000")]);
    assert_eq!(h.alerts(AlertKind::OperationFailed), 1);
    assert!(h.federation.content("c", "file-000").await.is_none());
}
