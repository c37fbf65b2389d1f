//! Checking steps: derive findings from the stored metadata.
//!
//! None of these talk to pillars. They read the [`MetadataStore`], update
//! checksum and file state flags, and hand every finding to the run's
//! [`IntegrityReporter`].
//!
//! [`MetadataStore`]: tally_store::MetadataStore

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tally_report::IntegrityReporter;
use tally_types::events::FindingReported;
use tally_types::{ChecksumState, FileId, Finding, FindingKind, PillarId, Timestamp};
use tracing::{debug, info, warn};

use crate::alert::{AuditEvent, FileAction};
use crate::checker::{ChecksumResolution, evaluate_checksums, odd_one_out};
use crate::context::WorkflowContext;
use crate::error::EngineError;
use crate::workflow::WorkflowStep;

/// Report one finding and announce it on the bus.
fn report_finding(
    ctx: &WorkflowContext,
    reporter: &IntegrityReporter,
    finding: Finding,
) -> Result<(), EngineError> {
    debug!(%finding, "finding");
    reporter.report(&finding)?;
    ctx.events.emit(FindingReported {
        collection_id: ctx.collection_id().clone(),
        finding,
    });
    Ok(())
}

/// Log the per-pillar count of one finding kind.
fn log_counts(ctx: &WorkflowContext, reporter: &IntegrityReporter, kind: FindingKind) {
    for pillar in &ctx.settings.pillars {
        let count = reporter.count(kind, pillar);
        if count > 0 {
            warn!(%pillar, count, kind = kind.slug(), "findings at pillar");
        } else {
            info!(%pillar, kind = kind.slug(), "no findings at pillar");
        }
    }
}

// ---------------------------------------------------------------------------
// Checksum validation
// ---------------------------------------------------------------------------

/// Outcome of a [`ChecksumValidationStep`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValidationSummary {
    /// Files examined.
    pub files_checked: u64,
    /// Records marked VALID.
    pub valid_records: u64,
    /// Records marked ERROR.
    pub error_records: u64,
    /// Files whose pillars disagree.
    pub inconsistent_files: u64,
    /// `MissingChecksum` findings reported.
    pub missing_checksums: u64,
}

/// Compares the stored checksums of every file across its pillars.
pub struct ChecksumValidationStep {
    ctx: Arc<WorkflowContext>,
    reporter: Arc<IntegrityReporter>,
    summary: ValidationSummary,
}

impl ChecksumValidationStep {
    pub fn new(ctx: Arc<WorkflowContext>, reporter: Arc<IntegrityReporter>) -> Self {
        Self {
            ctx,
            reporter,
            summary: ValidationSummary::default(),
        }
    }

    /// Counts from the last run.
    pub fn summary(&self) -> &ValidationSummary {
        &self.summary
    }

    /// Resolve every file of the collection.
    #[tracing::instrument(skip(self), fields(collection = %self.ctx.collection_id()))]
    pub fn run(&mut self) -> Result<ValidationSummary, EngineError> {
        let ctx = &*self.ctx;
        let collection = ctx.collection_id();
        let grace_cutoff = ctx.clock.now().saturating_sub(ctx.settings.missing_file_grace);
        let mut summary = ValidationSummary::default();

        for group in ctx.store.files(collection) {
            let records = group?;
            let Some(file) = records.first().map(|r| r.file_id.clone()) else {
                continue;
            };
            summary.files_checked += 1;
            let evaluation = evaluate_checksums(&records);

            let report_lacking = match evaluation.resolution {
                ChecksumResolution::Agreed { pillars, .. } => {
                    for pillar in &pillars {
                        ctx.store
                            .set_checksum_state(collection, &file, pillar, ChecksumState::Valid)?;
                    }
                    summary.valid_records += pillars.len() as u64;
                    true
                }
                ChecksumResolution::Disagreed { checksums } => {
                    summary.inconsistent_files += 1;
                    for (pillar, observed) in &checksums {
                        ctx.store
                            .set_checksum_state(collection, &file, pillar, ChecksumState::Error)?;
                        report_finding(
                            ctx,
                            &self.reporter,
                            Finding::ChecksumError {
                                file_id: file.clone(),
                                pillar_id: pillar.clone(),
                                observed: observed.clone(),
                            },
                        )?;
                    }
                    summary.error_records += checksums.len() as u64;
                    self.audit_inconsistency(&file, &checksums);
                    true
                }
                ChecksumResolution::Unresolvable => {
                    let earliest = records.iter().map(|r| r.first_seen).min();
                    earliest.is_some_and(|t| t < grace_cutoff)
                }
            };

            if report_lacking {
                for pillar in &evaluation.lacking {
                    report_finding(
                        ctx,
                        &self.reporter,
                        Finding::MissingChecksum {
                            file_id: file.clone(),
                            pillar_id: pillar.clone(),
                        },
                    )?;
                    summary.missing_checksums += 1;
                }
            }
        }

        log_counts(ctx, &self.reporter, FindingKind::ChecksumError);
        log_counts(ctx, &self.reporter, FindingKind::MissingChecksum);
        info!(
            files = summary.files_checked,
            inconsistent = summary.inconsistent_files,
            "checksum validation finished"
        );
        self.summary = summary.clone();
        Ok(summary)
    }

    fn audit_inconsistency(&self, file: &FileId, checksums: &BTreeMap<PillarId, tally_types::Checksum>) {
        let listing = checksums
            .iter()
            .map(|(pillar, checksum)| format!("{pillar}: {checksum}"))
            .collect::<Vec<_>>()
            .join(", ");
        let hint = match odd_one_out(checksums) {
            Some(pillar) => format!(" Only {pillar} differs from the other pillars."),
            None => String::new(),
        };
        self.ctx.audit.add_audit_event(AuditEvent::new(
            self.ctx.collection_id().clone(),
            Some(file.clone()),
            format!("Inconsistent checksums for {file}"),
            format!("Pillars disagree about the checksum of {file} ({listing}).{hint}"),
            FileAction::Inconsistency,
        ));
    }
}

#[async_trait::async_trait]
impl WorkflowStep for ChecksumValidationStep {
    fn name(&self) -> &str {
        "checksum-validation"
    }

    async fn perform_step(&mut self) -> Result<(), EngineError> {
        self.run().map(drop)
    }
}

// ---------------------------------------------------------------------------
// Missing files
// ---------------------------------------------------------------------------

/// Outcome of a [`MissingFilesStep`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MissingFilesSummary {
    /// `MissingFile` findings reported.
    pub reported: u64,
    /// Absent files still within the grace period.
    pub within_grace: u64,
}

/// Finds files some pillars hold and others lack.
pub struct MissingFilesStep {
    ctx: Arc<WorkflowContext>,
    reporter: Arc<IntegrityReporter>,
    summary: MissingFilesSummary,
}

impl MissingFilesStep {
    pub fn new(ctx: Arc<WorkflowContext>, reporter: Arc<IntegrityReporter>) -> Self {
        Self {
            ctx,
            reporter,
            summary: MissingFilesSummary::default(),
        }
    }

    /// Counts from the last run.
    pub fn summary(&self) -> &MissingFilesSummary {
        &self.summary
    }

    /// Check every nominal pillar for files held elsewhere.
    ///
    /// A file is reported only once its earliest observation anywhere is
    /// older than the grace period; it is then recorded as MISSING at the
    /// pillar.
    #[tracing::instrument(skip(self), fields(collection = %self.ctx.collection_id()))]
    pub fn run(&mut self) -> Result<MissingFilesSummary, EngineError> {
        let ctx = &*self.ctx;
        let collection = ctx.collection_id();
        let cutoff = ctx.clock.now().saturating_sub(ctx.settings.missing_file_grace);
        let page_size = ctx.settings.max_page_size.max(1) as usize;
        let mut summary = MissingFilesSummary::default();

        for pillar in &ctx.settings.pillars {
            let mut after: Option<FileId> = None;
            loop {
                let page = ctx
                    .store
                    .missing_files_at_pillar(pillar, after.as_ref(), page_size, collection)
                    .collect::<Result<Vec<_>, _>>()?;

                for file in &page {
                    let earliest = ctx.store.earliest_file_date(collection, file)?;
                    if !earliest.is_some_and(|t| t < cutoff) {
                        debug!(%file, %pillar, "absent file within grace period");
                        summary.within_grace += 1;
                        continue;
                    }
                    report_finding(
                        ctx,
                        &self.reporter,
                        Finding::MissingFile {
                            file_id: file.clone(),
                            pillar_id: pillar.clone(),
                        },
                    )?;
                    ctx.store.set_file_missing(collection, file, pillar)?;
                    summary.reported += 1;
                }

                if page.len() < page_size {
                    break;
                }
                after = page.last().cloned();
            }
        }

        log_counts(ctx, &self.reporter, FindingKind::MissingFile);
        self.summary = summary.clone();
        Ok(summary)
    }
}

#[async_trait::async_trait]
impl WorkflowStep for MissingFilesStep {
    fn name(&self) -> &str {
        "missing-files"
    }

    async fn perform_step(&mut self) -> Result<(), EngineError> {
        self.run().map(drop)
    }
}

// ---------------------------------------------------------------------------
// Obsolete checksums
// ---------------------------------------------------------------------------

/// Finds checksums that have not been recomputed for too long.
pub struct ObsoleteChecksumsStep {
    ctx: Arc<WorkflowContext>,
    reporter: Arc<IntegrityReporter>,
    reported: u64,
}

impl ObsoleteChecksumsStep {
    pub fn new(ctx: Arc<WorkflowContext>, reporter: Arc<IntegrityReporter>) -> Self {
        Self {
            ctx,
            reporter,
            reported: 0,
        }
    }

    /// Findings reported by the last run.
    pub fn reported(&self) -> u64 {
        self.reported
    }

    /// Report every EXISTING record whose checksum is older than the pillar's
    /// maximum checksum age. Returns the number of findings.
    #[tracing::instrument(skip(self), fields(collection = %self.ctx.collection_id()))]
    pub fn run(&mut self) -> Result<u64, EngineError> {
        let ctx = &*self.ctx;
        let collection = ctx.collection_id();
        let now = ctx.clock.now();
        let mut reported = 0;

        for pillar in &ctx.settings.pillars {
            let cutoff = now.saturating_sub(ctx.settings.obsolete_checksum_age_for(pillar));
            let stale = ctx
                .store
                .find_obsolete_checksums(collection, pillar, cutoff)
                .collect::<Result<Vec<_>, _>>()?;
            for file in stale {
                report_finding(
                    ctx,
                    &self.reporter,
                    Finding::ObsoleteChecksum {
                        file_id: file,
                        pillar_id: pillar.clone(),
                    },
                )?;
                reported += 1;
            }
        }

        log_counts(ctx, &self.reporter, FindingKind::ObsoleteChecksum);
        self.reported = reported;
        Ok(reported)
    }
}

#[async_trait::async_trait]
impl WorkflowStep for ObsoleteChecksumsStep {
    fn name(&self) -> &str {
        "obsolete-checksums"
    }

    async fn perform_step(&mut self) -> Result<(), EngineError> {
        self.run().map(drop)
    }
}

// ---------------------------------------------------------------------------
// Deleted files
// ---------------------------------------------------------------------------

/// Removes records of files that pillars stopped listing.
///
/// Only meaningful right after a full file listing: `since` is the time that
/// listing started and `pillars` the pillars that completed it.
pub struct DeletedFilesStep {
    ctx: Arc<WorkflowContext>,
    reporter: Arc<IntegrityReporter>,
    since: Timestamp,
    pillars: BTreeSet<PillarId>,
    deleted: u64,
}

impl DeletedFilesStep {
    pub fn new(
        ctx: Arc<WorkflowContext>,
        reporter: Arc<IntegrityReporter>,
        since: Timestamp,
        pillars: BTreeSet<PillarId>,
    ) -> Self {
        Self {
            ctx,
            reporter,
            since,
            pillars,
            deleted: 0,
        }
    }

    /// Records deleted by the last run.
    pub fn deleted(&self) -> u64 {
        self.deleted
    }

    /// Delete and report every orphan record. Returns the number deleted.
    #[tracing::instrument(skip(self), fields(collection = %self.ctx.collection_id(), since = %self.since.as_millis()))]
    pub fn run(&mut self) -> Result<u64, EngineError> {
        let ctx = &*self.ctx;
        let collection = ctx.collection_id();
        let mut deleted = 0;

        for pillar in &self.pillars {
            let orphans = ctx
                .store
                .find_orphan_files(collection, pillar, self.since)
                .collect::<Result<Vec<_>, _>>()?;
            for file in orphans {
                ctx.store.delete_file_record(collection, &file, pillar)?;
                report_finding(
                    ctx,
                    &self.reporter,
                    Finding::DeletedFile {
                        file_id: file.clone(),
                        pillar_id: pillar.clone(),
                    },
                )?;
                deleted += 1;

                let remaining = ctx.store.get_file_infos(&file, collection)?;
                if !remaining.iter().any(|r| r.is_existing()) {
                    ctx.store.delete_file_id_entry(&file, collection)?;
                    info!(%file, "file no longer held by any pillar, entry removed");
                }
            }
        }

        for pillar in &self.pillars {
            info!(%pillar, count = self.reporter.count(FindingKind::DeletedFile, pillar), "deleted files at pillar");
        }
        self.deleted = deleted;
        Ok(deleted)
    }
}

#[async_trait::async_trait]
impl WorkflowStep for DeletedFilesStep {
    fn name(&self) -> &str {
        "deleted-files"
    }

    async fn perform_step(&mut self) -> Result<(), EngineError> {
        self.run().map(drop)
    }
}
