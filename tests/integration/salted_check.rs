//! Integration test: salted spot checks against live pillars.

use std::collections::BTreeSet;

use tally_engine::{AlertKind, EngineError, SaltedCheckOutcome, SaltedChecksumCheck};
use tally_integration_tests::{IntegrationHarness, content_checksum, fid, pid};

const PILLARS: [&str; 3] = ["a", "b", "c"];

#[tokio::test]
async fn test_consistent_file() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(2).await;

    let outcome = h.salted_check("file-000").await.unwrap();
    let SaltedCheckOutcome::Consistent { file_id, checksum } = outcome else {
        panic!("expected a consistent outcome, got {outcome:?}");
    };
    assert_eq!(file_id, fid("file-000"));
    let content = h.federation.content("a", "file-000").await.unwrap();
    assert_ne!(checksum, content_checksum(&content, None), "checksum must be salted");
    assert_eq!(h.alerts(AlertKind::IntegrityFailed), 0);
}

#[tokio::test]
async fn test_corrupted_copy_is_inconsistent() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(2).await;
    h.federation.corrupt("b", "file-001").await;

    let outcome = h.salted_check("file-001").await.unwrap();
    let SaltedCheckOutcome::Inconsistent { checksums, .. } = outcome else {
        panic!("expected an inconsistent outcome, got {outcome:?}");
    };
    assert_eq!(checksums.len(), 3);
    assert_ne!(checksums[&pid("a")], checksums[&pid("b")]);
    assert_eq!(checksums[&pid("a")], checksums[&pid("c")]);
    assert_eq!(h.alerts(AlertKind::IntegrityFailed), 1);
}

#[tokio::test]
async fn test_unanswered_pillars_make_check_incomplete() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(1).await;
    h.federation.take_down("b").await;
    h.federation.remove_file("c", "file-000").await;

    let outcome = h.salted_check("file-000").await.unwrap();
    let SaltedCheckOutcome::Incomplete { missing, .. } = outcome else {
        panic!("expected an incomplete outcome, got {outcome:?}");
    };
    assert_eq!(missing, BTreeSet::from([pid("b"), pid("c")]));
    assert_eq!(h.alerts(AlertKind::IntegrityFailed), 1);
}

/// Without a chosen file a random stored file is checked.
#[tokio::test]
async fn test_random_file_from_store() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(3).await;
    h.full_check().await.unwrap();

    let outcome = SaltedChecksumCheck::new(h.ctx.clone()).run().await.unwrap();
    assert!(outcome.is_consistent());
    assert!(h.record(outcome.file_id().as_str(), "a").is_some());
}

#[tokio::test]
async fn test_empty_collection_cannot_be_spot_checked() {
    let h = IntegrationHarness::new(&PILLARS);

    let err = SaltedChecksumCheck::new(h.ctx.clone()).run().await.unwrap_err();
    assert!(matches!(err, EngineError::StepFailed { .. }));
}
