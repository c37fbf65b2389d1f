//! Paginated, failure-tolerant metadata collection.
//!
//! A collection pass runs in rounds. Each round sends one request to every
//! active pillar, then consumes [`OperationEvent`]s until the operation's
//! final event or the operation deadline:
//!
//! - a page from an active pillar is handed to the sink right away; a final
//!   page finishes the pillar, otherwise it stays active for the next round;
//! - a failing pillar is failed, which aborts the pass when the policy says so;
//! - pillars that delivered nothing by the end of a round are failed.
//!
//! Cursors are inclusive, so a page whose entries all share the timestamp it
//! was requested from leaves the cursor where it was. The pillar's next page
//! is then requested with a doubled limit, up to [`MAX_PAGE_WIDENING`] times
//! the configured page size; a pillar still stuck at that limit is failed.
//!
//! The pass ends when no pillar is active.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tally_types::events::ContributorFailed;
use tally_types::{ChecksumSpec, FileId, PillarId, Timestamp};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::collector::{CollectionRequest, EventHandler, OperationEvent, ResultPage};
use crate::context::WorkflowContext;
use crate::contributors::ContributorSet;
use crate::error::EngineError;
use crate::workflow::WorkflowStep;

/// What a collection step asks pillars for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    /// File listings.
    FileIds,
    /// Checksums.
    Checksums,
    /// Listings and checksums in one request.
    FileInfos,
}

impl CollectionKind {
    fn label(self) -> &'static str {
        match self {
            CollectionKind::FileIds => "file-id",
            CollectionKind::Checksums => "checksum",
            CollectionKind::FileInfos => "file-info",
        }
    }
}

/// Where a collection step starts reading each pillar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CursorPolicy {
    /// Clear the stored cursors first and collect everything from the epoch.
    Full,
    /// Resume from the newest timestamp already ingested per pillar.
    Incremental,
}

/// Largest page limit used for a stuck pillar, as a multiple of the
/// configured page size.
pub const MAX_PAGE_WIDENING: u32 = 16;

/// Parameters of a collection pass.
pub(crate) struct RoundPlan {
    pub(crate) kind: CollectionKind,
    pub(crate) file_id: Option<FileId>,
    pub(crate) checksum_spec: Option<ChecksumSpec>,
    /// Resume each pillar from its stored cursor instead of the epoch.
    pub(crate) stored_cursors: bool,
    pub(crate) abort_on_failure: bool,
    pub(crate) audit: String,
}

/// Receives every accepted page.
pub(crate) type PageSink<'s> =
    dyn FnMut(&PillarId, ResultPage) -> Result<(), EngineError> + Send + 's;

/// Run rounds until no contributor is active.
///
/// Returns the pillars failed during the pass with their reasons.
pub(crate) async fn collect_rounds(
    ctx: &WorkflowContext,
    step: &str,
    contributors: &mut ContributorSet,
    plan: &RoundPlan,
    sink: &mut PageSink<'_>,
) -> Result<Vec<(PillarId, String)>, EngineError> {
    let mut failures = Vec::new();
    let mut round = 0u32;
    let page_size = ctx.settings.max_page_size.max(1);
    let widest = page_size.saturating_mul(MAX_PAGE_WIDENING);
    let mut limits: BTreeMap<PillarId, u32> = BTreeMap::new();

    while !contributors.is_done() {
        round += 1;
        let pillars: Vec<PillarId> = contributors.active_contributors().iter().cloned().collect();
        let request = build_request(ctx, plan, &pillars, |p| {
            limits.get(p).copied().unwrap_or(page_size)
        })?;
        let requested: BTreeMap<PillarId, (Option<Timestamp>, u32)> = request
            .queries
            .iter()
            .map(|q| (q.pillar_id.clone(), (q.min_timestamp, q.max_results)))
            .collect();
        let (tx, mut rx) = mpsc::unbounded_channel();
        debug!(step, round, pillars = pillars.len(), "dispatching collection round");
        dispatch(ctx, plan.kind, request, EventHandler::new(tx)).await;

        let deadline = Instant::now() + ctx.settings.operation_deadline();
        let mut delivered: BTreeSet<PillarId> = BTreeSet::new();

        loop {
            let event = match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => OperationEvent::Failed {
                    reason: "event stream closed before completion".to_string(),
                },
                Err(_) => OperationEvent::Failed {
                    reason: format!(
                        "no completion within {:?}",
                        ctx.settings.operation_deadline()
                    ),
                },
            };

            match event {
                OperationEvent::ComponentComplete {
                    pillar,
                    page,
                    more_pages,
                } => {
                    if !contributors.is_active(&pillar) {
                        debug!(step, %pillar, "ignoring page from inactive pillar");
                        continue;
                    }
                    debug!(step, %pillar, items = page.len(), more_pages, "page received");
                    sink(&pillar, page)?;
                    delivered.insert(pillar.clone());
                    if !more_pages {
                        contributors.finish_contributor(&pillar);
                        continue;
                    }
                    let (from, limit) = requested.get(&pillar).copied().unwrap_or((None, page_size));
                    if cursor_for(ctx, plan, &pillar)? != from {
                        limits.remove(&pillar);
                    } else if limit >= widest {
                        let reason = format!("no progress with pages of {limit} entries");
                        fail_pillar(ctx, step, plan, contributors, &mut failures, &pillar, &reason)?;
                    } else {
                        let widened = limit.saturating_mul(2).min(widest);
                        debug!(step, %pillar, widened, "page did not advance the cursor, widening");
                        limits.insert(pillar, widened);
                    }
                }
                OperationEvent::ComponentFailed { pillar, reason } => {
                    if !contributors.is_active(&pillar) {
                        debug!(step, %pillar, "ignoring failure from inactive pillar");
                        continue;
                    }
                    fail_pillar(ctx, step, plan, contributors, &mut failures, &pillar, &reason)?;
                }
                OperationEvent::Progress { pillar, info } => {
                    debug!(step, %pillar, info, "progress");
                }
                OperationEvent::Complete => {
                    fail_silent(ctx, step, plan, contributors, &mut failures, &pillars, &delivered, "no result delivered")?;
                    break;
                }
                OperationEvent::Failed { reason } => {
                    fail_silent(ctx, step, plan, contributors, &mut failures, &pillars, &delivered, &reason)?;
                    break;
                }
            }
        }
    }

    Ok(failures)
}

fn build_request(
    ctx: &WorkflowContext,
    plan: &RoundPlan,
    pillars: &[PillarId],
    limit: impl Fn(&PillarId) -> u32,
) -> Result<CollectionRequest, EngineError> {
    let collection = ctx.collection_id();
    let mut queries = Vec::with_capacity(pillars.len());
    for pillar in pillars {
        queries.push(tally_types::ContributorQuery {
            pillar_id: pillar.clone(),
            min_timestamp: cursor_for(ctx, plan, pillar)?,
            max_timestamp: None,
            max_results: limit(pillar),
        });
    }
    Ok(CollectionRequest {
        collection_id: collection.clone(),
        queries,
        file_id: plan.file_id.clone(),
        checksum_spec: plan.checksum_spec.clone(),
        audit: plan.audit.clone(),
    })
}

/// Where the next query to `pillar` starts.
fn cursor_for(
    ctx: &WorkflowContext,
    plan: &RoundPlan,
    pillar: &PillarId,
) -> Result<Option<Timestamp>, EngineError> {
    if !plan.stored_cursors {
        return Ok(None);
    }
    let collection = ctx.collection_id();
    let cursor = match plan.kind {
        CollectionKind::FileIds | CollectionKind::FileInfos => ctx
            .store
            .date_for_newest_file_entry_for_pillar(pillar, collection)?,
        CollectionKind::Checksums => ctx
            .store
            .date_for_newest_checksum_entry_for_pillar(pillar, collection)?,
    };
    Ok(cursor)
}

async fn dispatch(
    ctx: &WorkflowContext,
    kind: CollectionKind,
    request: CollectionRequest,
    handler: EventHandler,
) {
    match kind {
        CollectionKind::FileIds => ctx.collector.get_file_ids(request, handler).await,
        CollectionKind::Checksums => ctx.collector.get_checksums(request, handler).await,
        CollectionKind::FileInfos => ctx.collector.get_file_infos(request, handler).await,
    }
}

/// Fail every pillar of the round that delivered nothing and is still active.
#[allow(clippy::too_many_arguments)]
fn fail_silent(
    ctx: &WorkflowContext,
    step: &str,
    plan: &RoundPlan,
    contributors: &mut ContributorSet,
    failures: &mut Vec<(PillarId, String)>,
    pillars: &[PillarId],
    delivered: &BTreeSet<PillarId>,
    reason: &str,
) -> Result<(), EngineError> {
    for pillar in pillars {
        if contributors.is_active(pillar) && !delivered.contains(pillar) {
            fail_pillar(ctx, step, plan, contributors, failures, pillar, reason)?;
        }
    }
    Ok(())
}

fn fail_pillar(
    ctx: &WorkflowContext,
    step: &str,
    plan: &RoundPlan,
    contributors: &mut ContributorSet,
    failures: &mut Vec<(PillarId, String)>,
    pillar: &PillarId,
    reason: &str,
) -> Result<(), EngineError> {
    if !contributors.fail_contributor(pillar) {
        return Ok(());
    }
    let collection = ctx.collection_id();
    warn!(step, %collection, %pillar, reason, "contributor failed");
    failures.push((pillar.clone(), reason.to_string()));
    ctx.events.emit(ContributorFailed {
        collection_id: collection.clone(),
        pillar_id: pillar.clone(),
        reason: reason.to_string(),
    });

    let message = format!("{step}: pillar {pillar} failed: {reason}");
    if plan.abort_on_failure {
        ctx.alerter.integrity_failed(&message, collection);
        return Err(EngineError::Aborted {
            step: step.to_string(),
            reason: message,
        });
    }
    ctx.alerter.operation_failed(&message, collection);
    Ok(())
}

// ---------------------------------------------------------------------------
// CollectionStep
// ---------------------------------------------------------------------------

/// Collects one kind of metadata from the collection's pillars into the store.
pub struct CollectionStep {
    ctx: Arc<WorkflowContext>,
    kind: CollectionKind,
    policy: CursorPolicy,
    name: String,
    contributors: ContributorSet,
    started_at: Option<Timestamp>,
    failures: Vec<(PillarId, String)>,
    items_ingested: u64,
}

impl CollectionStep {
    /// A step over the given contributor set.
    pub fn new(
        ctx: Arc<WorkflowContext>,
        kind: CollectionKind,
        policy: CursorPolicy,
        contributors: ContributorSet,
    ) -> Self {
        let prefix = match policy {
            CursorPolicy::Full => "full",
            CursorPolicy::Incremental => "incremental",
        };
        Self {
            name: format!("{prefix}-{}-collection", kind.label()),
            ctx,
            kind,
            policy,
            contributors,
            started_at: None,
            failures: Vec::new(),
            items_ingested: 0,
        }
    }

    /// A step over every configured pillar of the collection.
    pub fn for_collection(ctx: Arc<WorkflowContext>, kind: CollectionKind, policy: CursorPolicy) -> Self {
        let contributors = ContributorSet::new(ctx.settings.pillars.iter().cloned());
        Self::new(ctx, kind, policy, contributors)
    }

    /// Clock time just before the first round.
    pub fn started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    /// Pillars failed during this step, with reasons.
    pub fn failures(&self) -> &[(PillarId, String)] {
        &self.failures
    }

    /// Items ingested during this step.
    pub fn items_ingested(&self) -> u64 {
        self.items_ingested
    }

    /// The contributor set as left by the step.
    pub fn contributors(&self) -> &ContributorSet {
        &self.contributors
    }

    /// Hand the contributor set on to the next step.
    pub fn into_contributors(self) -> ContributorSet {
        self.contributors
    }

    /// Run the step.
    #[tracing::instrument(skip(self), fields(collection = %self.ctx.collection_id(), step = %self.name))]
    pub async fn run(&mut self) -> Result<(), EngineError> {
        let collection = self.ctx.collection_id().clone();
        self.started_at = Some(self.ctx.clock.now());

        if self.policy == CursorPolicy::Full {
            let store = &self.ctx.store;
            match self.kind {
                CollectionKind::FileIds => store.reset_file_collection_progress(&collection)?,
                CollectionKind::Checksums => store.reset_checksum_collection_progress(&collection)?,
                CollectionKind::FileInfos => {
                    store.reset_file_collection_progress(&collection)?;
                    store.reset_checksum_collection_progress(&collection)?;
                }
            }
        }

        let checksum_spec = match self.kind {
            CollectionKind::FileIds => None,
            CollectionKind::Checksums | CollectionKind::FileInfos => {
                Some(ChecksumSpec::plain(self.ctx.settings.checksum_algorithm))
            }
        };
        let plan = RoundPlan {
            kind: self.kind,
            file_id: None,
            checksum_spec,
            stored_cursors: true,
            abort_on_failure: self.ctx.settings.abort_on_failed_contributor,
            audit: format!("Integrity check: {} for collection {collection}", self.name),
        };

        let store = self.ctx.store.clone();
        let mut ingested = 0u64;
        let mut sink = |pillar: &PillarId, page: ResultPage| -> Result<(), EngineError> {
            ingested += page.len() as u64;
            let stored = match page {
                ResultPage::FileIds(items) => store.add_file_ids(&items, pillar, &collection),
                ResultPage::Checksums(items) => store.add_checksums(&items, pillar, &collection),
                ResultPage::FileInfos(items) => store.add_file_infos(&items, pillar, &collection),
            };
            if let Err(e) = &stored {
                error!(%pillar, error = %e, "failed to ingest page");
            }
            Ok(stored?)
        };

        let result = collect_rounds(
            &self.ctx,
            &self.name,
            &mut self.contributors,
            &plan,
            &mut sink,
        )
        .await;
        self.items_ingested = ingested;

        let failures = result?;
        info!(
            items = self.items_ingested,
            finished = self.contributors.finished_contributors().len(),
            failed = failures.len(),
            "collection finished"
        );
        self.failures = failures;
        Ok(())
    }
}

#[async_trait::async_trait]
impl WorkflowStep for CollectionStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn perform_step(&mut self) -> Result<(), EngineError> {
        self.run().await
    }
}
