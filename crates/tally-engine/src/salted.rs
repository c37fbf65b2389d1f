//! Salted spot check of a single file.
//!
//! Asks every pillar to recompute the checksum of one file with a fresh
//! random salt, so that no pillar can answer from a cached value, and
//! compares the answers. Nothing is written to the metadata store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::Rng;
use tally_types::{Checksum, ChecksumSpec, FileId, PillarId};
use tracing::{info, warn};

use crate::alert::{AuditEvent, FileAction};
use crate::collection::{CollectionKind, RoundPlan, collect_rounds};
use crate::collector::ResultPage;
use crate::context::WorkflowContext;
use crate::contributors::ContributorSet;
use crate::error::EngineError;
use crate::workflow::WorkflowStep;

const STEP_NAME: &str = "salted-checksum-check";
const SALT_LEN: usize = 16;

/// Classification of the answers to a salted checksum request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaltedCheckOutcome {
    /// Every pillar answered with the same checksum.
    Consistent { file_id: FileId, checksum: Checksum },
    /// At least two pillars answered differently.
    Inconsistent {
        file_id: FileId,
        checksums: BTreeMap<PillarId, Checksum>,
    },
    /// The answering pillars agree, but some pillars gave no answer.
    Incomplete {
        file_id: FileId,
        checksum: Checksum,
        missing: BTreeSet<PillarId>,
    },
    /// No pillar answered.
    NoResults { file_id: FileId },
}

impl SaltedCheckOutcome {
    /// The checked file.
    pub fn file_id(&self) -> &FileId {
        match self {
            SaltedCheckOutcome::Consistent { file_id, .. }
            | SaltedCheckOutcome::Inconsistent { file_id, .. }
            | SaltedCheckOutcome::Incomplete { file_id, .. }
            | SaltedCheckOutcome::NoResults { file_id } => file_id,
        }
    }

    pub fn is_consistent(&self) -> bool {
        matches!(self, SaltedCheckOutcome::Consistent { .. })
    }

    fn describe(&self) -> String {
        match self {
            SaltedCheckOutcome::Consistent { file_id, checksum } => {
                format!("all pillars agree on the salted checksum of {file_id} ({checksum})")
            }
            SaltedCheckOutcome::Inconsistent { file_id, checksums } => {
                let listing = checksums
                    .iter()
                    .map(|(pillar, checksum)| format!("{pillar}: {checksum}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("pillars disagree on the salted checksum of {file_id} ({listing})")
            }
            SaltedCheckOutcome::Incomplete {
                file_id, missing, ..
            } => {
                let missing = missing
                    .iter()
                    .map(PillarId::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("no salted checksum of {file_id} from {missing}")
            }
            SaltedCheckOutcome::NoResults { file_id } => {
                format!("no pillar delivered a salted checksum of {file_id}")
            }
        }
    }
}

/// Classify the answers of the addressed `pillars`.
fn classify(
    file_id: FileId,
    pillars: &BTreeSet<PillarId>,
    answers: BTreeMap<PillarId, Checksum>,
) -> SaltedCheckOutcome {
    let Some(first) = answers.values().next().cloned() else {
        return SaltedCheckOutcome::NoResults { file_id };
    };
    if answers.values().any(|c| *c != first) {
        return SaltedCheckOutcome::Inconsistent {
            file_id,
            checksums: answers,
        };
    }
    let missing: BTreeSet<PillarId> = pillars
        .iter()
        .filter(|p| !answers.contains_key(*p))
        .cloned()
        .collect();
    if missing.is_empty() {
        SaltedCheckOutcome::Consistent {
            file_id,
            checksum: first,
        }
    } else {
        SaltedCheckOutcome::Incomplete {
            file_id,
            checksum: first,
            missing,
        }
    }
}

/// Spot check of one file, chosen at random unless given.
pub struct SaltedChecksumCheck {
    ctx: Arc<WorkflowContext>,
    file: Option<FileId>,
    outcome: Option<SaltedCheckOutcome>,
}

impl SaltedChecksumCheck {
    /// Check a random file of the collection.
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self {
            ctx,
            file: None,
            outcome: None,
        }
    }

    /// Check `file` instead of a random one.
    pub fn with_file(mut self, file: FileId) -> Self {
        self.file = Some(file);
        self
    }

    /// Outcome of the last run.
    pub fn outcome(&self) -> Option<&SaltedCheckOutcome> {
        self.outcome.as_ref()
    }

    fn pick_file(&self) -> Result<FileId, EngineError> {
        if let Some(file) = &self.file {
            return Ok(file.clone());
        }
        let collection = self.ctx.collection_id();
        let count = self.ctx.store.number_of_files_in_collection(collection)?;
        if count == 0 {
            return Err(EngineError::StepFailed {
                step: STEP_NAME.to_string(),
                reason: format!("collection {collection} has no files"),
            });
        }
        let position = rand::rng().random_range(0..count);
        self.ctx
            .store
            .file_id_at_position(collection, position)?
            .ok_or_else(|| EngineError::StepFailed {
                step: STEP_NAME.to_string(),
                reason: format!("no file at position {position}"),
            })
    }

    /// Request, compare and record the salted checksums.
    #[tracing::instrument(skip(self), fields(collection = %self.ctx.collection_id()))]
    pub async fn run(&mut self) -> Result<SaltedCheckOutcome, EngineError> {
        let ctx = self.ctx.clone();
        let collection = ctx.collection_id().clone();
        let file = self.pick_file()?;
        let salt: [u8; SALT_LEN] = rand::rng().random();
        info!(%file, "salted checksum check");

        let plan = RoundPlan {
            kind: CollectionKind::Checksums,
            file_id: Some(file.clone()),
            checksum_spec: Some(ChecksumSpec::salted(
                ctx.settings.checksum_algorithm,
                salt.to_vec(),
            )),
            stored_cursors: false,
            abort_on_failure: false,
            audit: format!("Salted checksum check of {file} in {collection}"),
        };
        let mut contributors = ContributorSet::new(ctx.settings.pillars.iter().cloned());
        let pillars = contributors.universe().clone();

        let mut answers: BTreeMap<PillarId, Checksum> = BTreeMap::new();
        let mut sink = |pillar: &PillarId, page: ResultPage| -> Result<(), EngineError> {
            if let ResultPage::Checksums(items) = page {
                if let Some(item) = items.into_iter().find(|i| i.file_id == file) {
                    answers.insert(pillar.clone(), item.checksum);
                }
            }
            Ok(())
        };
        collect_rounds(&ctx, STEP_NAME, &mut contributors, &plan, &mut sink).await?;

        let outcome = classify(file.clone(), &pillars, answers);
        let description = outcome.describe();
        let action = if outcome.is_consistent() {
            info!(%file, "{description}");
            FileAction::IntegrityCheck
        } else {
            warn!(%file, "{description}");
            ctx.alerter
                .integrity_failed(&format!("Salted checksum check: {description}"), &collection);
            FileAction::Inconsistency
        };
        ctx.audit.add_audit_event(AuditEvent::new(
            collection,
            Some(file),
            "Salted checksum check",
            description,
            action,
        ));

        self.outcome = Some(outcome.clone());
        Ok(outcome)
    }
}

#[async_trait::async_trait]
impl WorkflowStep for SaltedChecksumCheck {
    fn name(&self) -> &str {
        STEP_NAME
    }

    async fn perform_step(&mut self) -> Result<(), EngineError> {
        self.run().await.map(drop)
    }
}
