//! [`WorkflowContext`]: everything a workflow run depends on.

use std::path::PathBuf;
use std::sync::Arc;

use tally_store::MetadataStore;
use tally_types::events::EventBus;
use tally_types::{Clock, CollectionId, CollectionSettings, SystemClock};

use crate::alert::{Alerter, AuditTrailManager, LoggingAlerter, LoggingAuditTrail};
use crate::collector::{Collector, FileExchange};

/// Collaborators and policy for workflows over one collection.
///
/// Built once and shared (`Arc`) by every step of a run.
#[derive(Clone)]
pub struct WorkflowContext {
    /// Policy for the collection.
    pub settings: CollectionSettings,
    /// Integrity metadata.
    pub store: Arc<MetadataStore>,
    /// Pillar federation client.
    pub collector: Arc<dyn Collector>,
    /// Staging area for repairs; repairs are unavailable without one.
    pub exchange: Option<Arc<dyn FileExchange>>,
    /// Alert sink.
    pub alerter: Arc<dyn Alerter>,
    /// Audit sink.
    pub audit: Arc<dyn AuditTrailManager>,
    /// Source of "now".
    pub clock: Arc<dyn Clock>,
    /// Progress events.
    pub events: EventBus,
    /// Root directory for integrity reports.
    pub reports_dir: PathBuf,
}

impl WorkflowContext {
    /// A context logging its alerts and audit events, on the wall clock.
    pub fn new(
        settings: CollectionSettings,
        store: Arc<MetadataStore>,
        collector: Arc<dyn Collector>,
        reports_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            settings,
            store,
            collector,
            exchange: None,
            alerter: Arc::new(LoggingAlerter),
            audit: Arc::new(LoggingAuditTrail),
            clock: Arc::new(SystemClock),
            events: EventBus::new(),
            reports_dir: reports_dir.into(),
        }
    }

    /// Set the staging area used by repairs.
    pub fn with_file_exchange(mut self, exchange: Arc<dyn FileExchange>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Set the alert sink.
    pub fn with_alerter(mut self, alerter: Arc<dyn Alerter>) -> Self {
        self.alerter = alerter;
        self
    }

    /// Set the audit sink.
    pub fn with_audit_trail(mut self, audit: Arc<dyn AuditTrailManager>) -> Self {
        self.audit = audit;
        self
    }

    /// Set the clock. The store should be opened on the same clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set a shared event bus.
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// The collection the context serves.
    pub fn collection_id(&self) -> &CollectionId {
        &self.settings.collection_id
    }
}

impl std::fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("collection_id", &self.settings.collection_id)
            .field("pillars", &self.settings.pillars)
            .field("reports_dir", &self.reports_dir)
            .finish()
    }
}
