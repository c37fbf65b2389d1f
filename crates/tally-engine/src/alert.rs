//! Alerting and audit trail sinks.
//!
//! Both are fire-and-forget: the engine never waits on, or fails because of,
//! a notification. [`LoggingAlerter`] and [`LoggingAuditTrail`] write to the
//! tracing log; [`MemoryAlerter`] and [`MemoryAuditTrail`] keep everything in
//! memory for inspection.

use std::sync::Mutex;

use tally_types::{CollectionId, FileId};
use tracing::{info, warn};

/// Actor name used in audit events raised by the engine.
pub const AUDIT_ACTOR: &str = "integrity-service";

/// Receives operator-facing alerts.
pub trait Alerter: Send + Sync {
    /// Integrity problems were found, or a check was aborted.
    fn integrity_failed(&self, message: &str, collection: &CollectionId);

    /// An operation (collection from a pillar, a repair) failed.
    fn operation_failed(&self, message: &str, collection: &CollectionId);
}

/// What an audit event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// A routine integrity check.
    IntegrityCheck,
    /// Pillars disagree about a file.
    Inconsistency,
    /// An operation failed.
    Failure,
    /// A file was fetched from a pillar.
    GetFile,
    /// A file was stored at a pillar.
    PutFile,
}

/// One audit trail entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEvent {
    /// Collection concerned.
    pub collection_id: CollectionId,
    /// File concerned, if any.
    pub file_id: Option<FileId>,
    /// Who performed the action.
    pub actor: String,
    /// One-line description.
    pub short_description: String,
    /// Full description.
    pub long_description: String,
    /// The recorded action.
    pub action: FileAction,
}

impl AuditEvent {
    /// An event attributed to the engine.
    pub fn new(
        collection_id: CollectionId,
        file_id: Option<FileId>,
        short_description: impl Into<String>,
        long_description: impl Into<String>,
        action: FileAction,
    ) -> Self {
        Self {
            collection_id,
            file_id,
            actor: AUDIT_ACTOR.to_string(),
            short_description: short_description.into(),
            long_description: long_description.into(),
            action,
        }
    }
}

/// Receives audit trail entries.
pub trait AuditTrailManager: Send + Sync {
    /// Record one event.
    fn add_audit_event(&self, event: AuditEvent);
}

// ---------------------------------------------------------------------------
// Logging sinks
// ---------------------------------------------------------------------------

/// Alerter that writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingAlerter;

impl Alerter for LoggingAlerter {
    fn integrity_failed(&self, message: &str, collection: &CollectionId) {
        warn!(%collection, "integrity alert: {message}");
    }

    fn operation_failed(&self, message: &str, collection: &CollectionId) {
        warn!(%collection, "operation failure alert: {message}");
    }
}

/// Audit trail that writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingAuditTrail;

impl AuditTrailManager for LoggingAuditTrail {
    fn add_audit_event(&self, event: AuditEvent) {
        info!(
            collection = %event.collection_id,
            file = ?event.file_id.as_ref().map(FileId::as_str),
            actor = %event.actor,
            action = ?event.action,
            "audit: {}",
            event.short_description
        );
    }
}

// ---------------------------------------------------------------------------
// In-memory sinks
// ---------------------------------------------------------------------------

/// Kind of a recorded alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    IntegrityFailed,
    OperationFailed,
}

/// One recorded alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub kind: AlertKind,
    pub collection_id: CollectionId,
    pub message: String,
}

/// Alerter that records every alert.
#[derive(Debug, Default)]
pub struct MemoryAlerter {
    alerts: Mutex<Vec<Alert>>,
}

impl MemoryAlerter {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every alert so far, oldest first.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().expect("alerter lock poisoned").clone()
    }

    /// Alerts of one kind.
    pub fn of_kind(&self, kind: AlertKind) -> Vec<Alert> {
        self.alerts()
            .into_iter()
            .filter(|a| a.kind == kind)
            .collect()
    }

    fn push(&self, kind: AlertKind, message: &str, collection: &CollectionId) {
        self.alerts.lock().expect("alerter lock poisoned").push(Alert {
            kind,
            collection_id: collection.clone(),
            message: message.to_string(),
        });
    }
}

impl Alerter for MemoryAlerter {
    fn integrity_failed(&self, message: &str, collection: &CollectionId) {
        self.push(AlertKind::IntegrityFailed, message, collection);
    }

    fn operation_failed(&self, message: &str, collection: &CollectionId) {
        self.push(AlertKind::OperationFailed, message, collection);
    }
}

/// Audit trail that records every event.
#[derive(Debug, Default)]
pub struct MemoryAuditTrail {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditTrail {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event so far, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().expect("audit lock poisoned").clone()
    }
}

impl AuditTrailManager for MemoryAuditTrail {
    fn add_audit_event(&self, event: AuditEvent) {
        self.events.lock().expect("audit lock poisoned").push(event);
    }
}
