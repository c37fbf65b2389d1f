//! Workflows: ordered runs of steps over one collection.
//!
//! Steps run strictly one after another. An error from any step, including
//! the policy abort of a collection step, ends the run; metadata ingested
//! before that stays in the store.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use tally_report::IntegrityReporter;
use tally_types::PillarId;
use tally_types::events::{StepFinished, StepStarted, WorkflowFinished, WorkflowStarted};
use tracing::{debug, info, warn};

use crate::collection::{CollectionKind, CollectionStep, CursorPolicy};
use crate::context::WorkflowContext;
use crate::error::EngineError;
use crate::repair::{RepairDriver, RepairSummary};
use crate::steps::{ChecksumValidationStep, DeletedFilesStep, MissingFilesStep, ObsoleteChecksumsStep};

/// One unit of a workflow.
#[async_trait::async_trait]
pub trait WorkflowStep: Send {
    /// Name used in logs and events.
    fn name(&self) -> &str;

    /// Run the step. [`EngineError::Aborted`] ends the whole workflow.
    async fn perform_step(&mut self) -> Result<(), EngineError>;
}

/// Run one step, announcing its start and end on the event bus.
pub async fn run_step(ctx: &WorkflowContext, step: &mut dyn WorkflowStep) -> Result<(), EngineError> {
    let name = step.name().to_string();
    let collection = ctx.collection_id().clone();
    ctx.events.emit(StepStarted {
        collection_id: collection.clone(),
        step: name.clone(),
    });
    debug!(step = %name, "step started");

    let result = step.perform_step().await;

    ctx.events.emit(StepFinished {
        collection_id: collection,
        step: name.clone(),
        ok: result.is_ok(),
    });
    match &result {
        Ok(()) => debug!(step = %name, "step finished"),
        Err(e) => warn!(step = %name, error = %e, "step failed"),
    }
    result
}

// ---------------------------------------------------------------------------
// Integrity check
// ---------------------------------------------------------------------------

/// How much an integrity check recollects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowKind {
    /// Recollect everything, then detect deleted files.
    Full,
    /// Collect only what changed since the last run.
    Incremental,
}

/// Result of a completed integrity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowOutcome {
    /// Human readable summary of the findings.
    pub summary: String,
    /// Whether any integrity issue was found.
    pub issues_found: bool,
    /// The final report file.
    pub report_path: PathBuf,
    /// Pillars that failed during collection.
    pub failed_pillars: BTreeSet<PillarId>,
}

/// Collects metadata from every pillar, checks it and writes the report.
pub struct IntegrityWorkflow {
    ctx: Arc<WorkflowContext>,
    kind: WorkflowKind,
}

impl IntegrityWorkflow {
    pub fn new(ctx: Arc<WorkflowContext>, kind: WorkflowKind) -> Self {
        Self { ctx, kind }
    }

    /// Name used in logs and events.
    pub fn name(&self) -> &'static str {
        match self.kind {
            WorkflowKind::Full => "complete-integrity-check",
            WorkflowKind::Incremental => "incremental-integrity-check",
        }
    }

    /// Run collection, checking and reporting.
    pub async fn run(&self) -> Result<WorkflowOutcome, EngineError> {
        self.announced(async {
            let reporter = self.reporter()?;
            let failed = self.collect(&reporter).await?;
            self.check_and_report(&reporter, failed).await
        })
        .await
    }

    /// Check the metadata already in the store, without contacting pillars.
    pub async fn run_offline_checks(&self) -> Result<WorkflowOutcome, EngineError> {
        self.announced(async {
            let reporter = self.reporter()?;
            self.check_and_report(&reporter, BTreeSet::new()).await
        })
        .await
    }

    async fn announced(
        &self,
        run: impl std::future::Future<Output = Result<WorkflowOutcome, EngineError>>,
    ) -> Result<WorkflowOutcome, EngineError> {
        let collection = self.ctx.collection_id().clone();
        self.ctx.events.emit(WorkflowStarted {
            collection_id: collection.clone(),
            workflow: self.name().to_string(),
        });
        info!(%collection, workflow = self.name(), "workflow started");

        let result = run.await;

        self.ctx.events.emit(WorkflowFinished {
            collection_id: collection.clone(),
            workflow: self.name().to_string(),
            completed: result.is_ok(),
            issues_found: result.as_ref().is_ok_and(|o| o.issues_found),
        });
        match &result {
            Ok(outcome) => info!(
                %collection,
                workflow = self.name(),
                issues_found = outcome.issues_found,
                "workflow finished"
            ),
            Err(e) => warn!(%collection, workflow = self.name(), error = %e, "workflow failed"),
        }
        result
    }

    fn reporter(&self) -> Result<Arc<IntegrityReporter>, EngineError> {
        let reporter = IntegrityReporter::created_at(
            self.ctx.collection_id().clone(),
            &self.ctx.reports_dir,
            self.ctx.settings.max_report_details,
            self.ctx.clock.now(),
        )?;
        Ok(Arc::new(reporter))
    }

    /// The collection phase. Returns the pillars that failed.
    async fn collect(&self, reporter: &Arc<IntegrityReporter>) -> Result<BTreeSet<PillarId>, EngineError> {
        let ctx = &self.ctx;
        let policy = match self.kind {
            WorkflowKind::Full => CursorPolicy::Full,
            WorkflowKind::Incremental => CursorPolicy::Incremental,
        };

        let (listing_started, listed, failed) = if ctx.settings.use_file_infos {
            let mut step = CollectionStep::for_collection(ctx.clone(), CollectionKind::FileInfos, policy);
            run_step(ctx, &mut step).await?;
            let contributors = step.contributors();
            (
                step.started_at(),
                contributors.finished_contributors().clone(),
                contributors.failed_contributors().clone(),
            )
        } else {
            let mut files = CollectionStep::for_collection(ctx.clone(), CollectionKind::FileIds, policy);
            run_step(ctx, &mut files).await?;
            let started = files.started_at();
            let listed = files.contributors().finished_contributors().clone();

            let mut contributors = files.into_contributors();
            contributors.reload();
            let mut checksums = CollectionStep::new(ctx.clone(), CollectionKind::Checksums, policy, contributors);
            run_step(ctx, &mut checksums).await?;
            (
                started,
                listed,
                checksums.contributors().failed_contributors().clone(),
            )
        };

        if self.kind == WorkflowKind::Full {
            if let Some(since) = listing_started {
                let mut step = DeletedFilesStep::new(ctx.clone(), reporter.clone(), since, listed);
                run_step(ctx, &mut step).await?;
            }
        }
        Ok(failed)
    }

    async fn check_and_report(
        &self,
        reporter: &Arc<IntegrityReporter>,
        failed_pillars: BTreeSet<PillarId>,
    ) -> Result<WorkflowOutcome, EngineError> {
        let ctx = &self.ctx;
        run_step(ctx, &mut ChecksumValidationStep::new(ctx.clone(), reporter.clone())).await?;
        run_step(ctx, &mut MissingFilesStep::new(ctx.clone(), reporter.clone())).await?;
        run_step(ctx, &mut ObsoleteChecksumsStep::new(ctx.clone(), reporter.clone())).await?;

        let report_path = reporter.generate_report()?;
        let summary = reporter.generate_summary_of_report();
        let issues_found = reporter.has_integrity_issues();
        if issues_found {
            ctx.alerter.integrity_failed(&summary, ctx.collection_id());
        }
        info!(report = %report_path.display(), "integrity report written");

        Ok(WorkflowOutcome {
            summary,
            issues_found,
            report_path,
            failed_pillars,
        })
    }
}

// ---------------------------------------------------------------------------
// Repair
// ---------------------------------------------------------------------------

/// Repairs missing files at every nominal pillar.
pub struct RepairWorkflow {
    ctx: Arc<WorkflowContext>,
}

impl RepairWorkflow {
    const NAME: &'static str = "repair-missing-files";

    pub fn new(ctx: Arc<WorkflowContext>) -> Self {
        Self { ctx }
    }

    /// Repair pillars in configuration order until `max_repairs_per_run`
    /// files have been attempted.
    pub async fn run(&self) -> Result<RepairSummary, EngineError> {
        let collection = self.ctx.collection_id().clone();
        self.ctx.events.emit(WorkflowStarted {
            collection_id: collection.clone(),
            workflow: Self::NAME.to_string(),
        });

        let driver = RepairDriver::new(self.ctx.clone());
        let mut budget = self.ctx.settings.max_repairs_per_run;
        let mut result: Result<RepairSummary, EngineError> = Ok(RepairSummary::default());
        for pillar in &self.ctx.settings.pillars {
            if budget == 0 {
                info!(%collection, "repair budget exhausted");
                break;
            }
            match driver.repair_pillar(pillar, budget).await {
                Ok(summary) => {
                    budget = budget.saturating_sub(summary.attempted);
                    if let Ok(total) = &mut result {
                        total.merge(summary);
                    }
                }
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        self.ctx.events.emit(WorkflowFinished {
            collection_id: collection,
            workflow: Self::NAME.to_string(),
            completed: result.is_ok(),
            issues_found: result.as_ref().is_ok_and(|s| !s.failed.is_empty()),
        });
        result
    }
}
