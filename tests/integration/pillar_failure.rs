//! Integration test: unreachable pillars during collection.

use std::collections::BTreeSet;
use std::time::Duration;

use tally_engine::AlertKind;
use tally_integration_tests::{IntegrationHarness, pid};
use tally_types::ChecksumState;

const PILLARS: [&str; 3] = ["a", "b", "c"];

/// With the default policy a failing pillar aborts the run.
#[tokio::test]
async fn test_down_pillar_aborts_run() {
    let h = IntegrationHarness::new(&PILLARS);
    h.populate(2).await;
    h.federation.take_down("c").await;

    let err = h.full_check().await.unwrap_err();
    assert!(err.is_abort(), "expected abort, got {err}");
    assert_eq!(h.alerts(AlertKind::IntegrityFailed), 1);
    assert_eq!(h.alerts(AlertKind::OperationFailed), 0);
}

/// When failures are tolerated the run finishes without the failed pillar,
/// and a later run picks it up again.
#[tokio::test]
async fn test_tolerated_failure_continues_without_pillar() {
    let h = IntegrationHarness::with_settings(&PILLARS, |s| s.abort_on_failed_contributor = false);
    h.populate(3).await;
    h.federation.take_down("c").await;

    let outcome = h.full_check().await.unwrap();
    assert_eq!(outcome.failed_pillars, BTreeSet::from([pid("c")]));
    assert!(!outcome.issues_found, "absence at c is still within grace");
    assert_eq!(h.alerts(AlertKind::OperationFailed), 1);
    assert!(h.record("file-000", "c").is_none());
    assert_eq!(
        h.record("file-000", "a").unwrap().checksum_state,
        ChecksumState::Valid
    );

    h.federation.bring_up("c").await;
    h.advance(Duration::from_secs(3600));
    let outcome = h.full_check().await.unwrap();
    assert!(outcome.failed_pillars.is_empty());
    assert!(!outcome.issues_found);
    assert_eq!(
        h.record("file-000", "c").unwrap().checksum_state,
        ChecksumState::Valid
    );
}
