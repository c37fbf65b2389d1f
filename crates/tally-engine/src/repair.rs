//! Repair of files missing at a pillar.
//!
//! A missing file is copied from a healthy pillar through the staging area:
//! the source uploads it to a staging URL, the target stores it from there
//! and verifies it against the agreed checksum. A failed leg abandons that
//! file for the run; there is no retry within a run. The store is not
//! updated here: the next collection sees the repaired file.

use std::collections::BTreeSet;
use std::sync::Arc;

use tally_types::events::FileRepaired;
use tally_types::{Checksum, ChecksumState, FileId, PillarId};
use tracing::{debug, info, warn};

use crate::alert::{AuditEvent, FileAction};
use crate::context::WorkflowContext;
use crate::error::EngineError;

/// Outcome of repairing every candidate at one or more pillars.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RepairSummary {
    /// Files for which a transfer was attempted or ruled out.
    pub attempted: usize,
    /// Files copied to the target.
    pub repaired: usize,
    /// Files whose transfer failed.
    pub failed: Vec<FileId>,
    /// Candidates left alone: within the grace period, or without a usable
    /// source.
    pub skipped: usize,
}

impl RepairSummary {
    /// Fold another summary into this one.
    pub fn merge(&mut self, other: RepairSummary) {
        self.attempted += other.attempted;
        self.repaired += other.repaired;
        self.failed.extend(other.failed);
        self.skipped += other.skipped;
    }
}

/// Result of one file repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// The file was copied from `source`.
    Repaired { source: PillarId },
    /// No pillar holds a copy that can be trusted.
    Unrepairable { reason: String },
    /// A transfer leg failed.
    Failed { reason: String },
}

/// Copies missing files between pillars.
pub struct RepairDriver {
    ctx: Arc<WorkflowContext>,
}

impl RepairDriver {
    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    /// Repair up to `budget` files missing at `pillar`.
    ///
    /// Only files past the missing-file grace period are candidates. With
    /// no candidate, no transfer is requested.
    #[tracing::instrument(skip(self), fields(collection = %self.ctx.collection_id()))]
    pub async fn repair_pillar(
        &self,
        pillar: &PillarId,
        budget: usize,
    ) -> Result<RepairSummary, EngineError> {
        let mut summary = RepairSummary::default();
        let candidates = self.candidates(pillar, budget, &mut summary)?;
        debug!(%pillar, candidates = candidates.len(), "repair candidates");

        for file in candidates {
            summary.attempted += 1;
            match self.repair_file(&file, pillar).await? {
                RepairOutcome::Repaired { .. } => summary.repaired += 1,
                RepairOutcome::Unrepairable { reason } => {
                    debug!(%file, %pillar, reason, "file not repairable");
                    summary.skipped += 1;
                }
                RepairOutcome::Failed { .. } => summary.failed.push(file),
            }
        }

        info!(
            %pillar,
            repaired = summary.repaired,
            failed = summary.failed.len(),
            skipped = summary.skipped,
            "repair finished"
        );
        Ok(summary)
    }

    fn candidates(
        &self,
        pillar: &PillarId,
        budget: usize,
        summary: &mut RepairSummary,
    ) -> Result<Vec<FileId>, EngineError> {
        let ctx = &*self.ctx;
        let collection = ctx.collection_id();
        let cutoff = ctx.clock.now().saturating_sub(ctx.settings.missing_file_grace);
        let page_size = ctx.settings.max_page_size.max(1) as usize;
        let mut candidates = Vec::new();
        let mut after: Option<FileId> = None;

        while candidates.len() < budget {
            let page = ctx
                .store
                .missing_files_at_pillar(pillar, after.as_ref(), page_size, collection)
                .collect::<Result<Vec<_>, _>>()?;
            for file in &page {
                if candidates.len() == budget {
                    break;
                }
                let earliest = ctx.store.earliest_file_date(collection, file)?;
                if earliest.is_some_and(|t| t < cutoff) {
                    candidates.push(file.clone());
                } else {
                    summary.skipped += 1;
                }
            }
            if page.len() < page_size {
                break;
            }
            after = page.last().cloned();
        }
        Ok(candidates)
    }

    /// Copy `file` to `target` from a pillar holding it.
    ///
    /// Every EXISTING copy elsewhere must carry the same checksum; a VALID
    /// record is preferred as source.
    #[tracing::instrument(skip(self), fields(collection = %self.ctx.collection_id()))]
    pub async fn repair_file(
        &self,
        file: &FileId,
        target: &PillarId,
    ) -> Result<RepairOutcome, EngineError> {
        let ctx = &*self.ctx;
        let collection = ctx.collection_id();

        let records = ctx.store.get_file_infos(file, collection)?;
        let holders: Vec<_> = records
            .iter()
            .filter(|r| &r.pillar_id != target && r.is_existing() && r.checksum.is_some())
            .collect();
        let checksums: BTreeSet<&Checksum> = holders.iter().filter_map(|r| r.checksum.as_ref()).collect();
        if checksums.len() != 1 {
            let reason = if checksums.is_empty() {
                format!("no pillar holds {file} with a known checksum")
            } else {
                format!("pillars holding {file} disagree on its checksum")
            };
            return Ok(RepairOutcome::Unrepairable { reason });
        }
        let Some(source) = holders
            .iter()
            .find(|r| r.checksum_state == ChecksumState::Valid)
            .or_else(|| holders.first())
        else {
            return Ok(RepairOutcome::Unrepairable {
                reason: format!("no source for {file}"),
            });
        };
        let Some(checksum) = source.checksum.clone() else {
            return Ok(RepairOutcome::Unrepairable {
                reason: format!("no checksum for {file}"),
            });
        };

        let exchange = ctx.exchange.as_ref().ok_or_else(|| EngineError::StepFailed {
            step: "repair".to_string(),
            reason: "no file exchange configured".to_string(),
        })?;
        let url = exchange.staging_url(collection, file);
        let source_pillar = &source.pillar_id;

        if let Err(e) = ctx.collector.get_file(collection, file, source_pillar, &url).await {
            let reason = format!("fetching {file} from {source_pillar} failed: {e}");
            self.leg_failed(file, target, &reason);
            return Ok(RepairOutcome::Failed { reason });
        }
        self.audit(file, format!("Fetched {file} from {source_pillar} to {url}"), FileAction::GetFile);

        let stored = ctx
            .collector
            .put_file(collection, file, target, &url, &checksum, source.file_size)
            .await;
        if let Err(e) = exchange.delete_staged(&url).await {
            warn!(%file, url, error = %e, "failed to remove staged copy");
        }
        if let Err(e) = stored {
            let reason = format!("storing {file} at {target} failed: {e}");
            self.leg_failed(file, target, &reason);
            return Ok(RepairOutcome::Failed { reason });
        }

        self.audit(file, format!("Stored {file} at {target} from {url}"), FileAction::PutFile);
        ctx.events.emit(FileRepaired {
            collection_id: collection.clone(),
            file_id: file.clone(),
            pillar_id: target.clone(),
        });
        info!(%file, source = %source_pillar, %target, "file repaired");
        Ok(RepairOutcome::Repaired {
            source: source_pillar.clone(),
        })
    }

    fn leg_failed(&self, file: &FileId, target: &PillarId, reason: &str) {
        warn!(%file, %target, reason, "repair failed");
        let collection = self.ctx.collection_id();
        self.ctx
            .alerter
            .operation_failed(&format!("Repair of {file} at {target}: {reason}"), collection);
        self.audit(file, format!("Repair of {file} at {target} failed: {reason}"), FileAction::Failure);
    }

    fn audit(&self, file: &FileId, description: String, action: FileAction) {
        self.ctx.audit.add_audit_event(AuditEvent::new(
            self.ctx.collection_id().clone(),
            Some(file.clone()),
            description.clone(),
            description,
            action,
        ));
    }
}
