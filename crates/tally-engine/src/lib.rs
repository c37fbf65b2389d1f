//! Integrity checking across the pillars of a collection.
//!
//! This crate provides:
//!
//! - [`ContributorSet`]: active / finished / failed bookkeeping for one
//!   collective operation.
//! - [`CollectionStep`]: paginated collection of file listings and checksums
//!   from every pillar into the [`MetadataStore`](tally_store::MetadataStore).
//! - [`checker`]: cross-pillar checksum resolution, and the checking steps in
//!   [`steps`] that turn stored metadata into findings.
//! - [`SaltedChecksumCheck`]: a live spot check of one file with a fresh salt.
//! - [`RepairDriver`]: copies missing files from a healthy pillar.
//! - [`IntegrityWorkflow`] and [`RepairWorkflow`]: the ordered runs of steps.
//!
//! Pillars are reached only through the [`Collector`] and [`FileExchange`]
//! traits; alerts and audit events go to the [`Alerter`] and
//! [`AuditTrailManager`] sinks held by the [`WorkflowContext`].

pub mod alert;
pub mod checker;
pub mod collection;
pub mod collector;
pub mod context;
pub mod contributors;
pub mod error;
pub mod repair;
pub mod salted;
pub mod steps;
pub mod workflow;

pub use alert::{
    Alert, AlertKind, Alerter, AuditEvent, AuditTrailManager, FileAction, LoggingAlerter,
    LoggingAuditTrail, MemoryAlerter, MemoryAuditTrail,
};
pub use checker::{ChecksumEvaluation, ChecksumResolution, evaluate_checksums};
pub use collection::{CollectionKind, CollectionStep, CursorPolicy};
pub use collector::{
    CollectionRequest, Collector, CollectorError, EventHandler, FileExchange, OperationEvent,
    ResultPage,
};
pub use context::WorkflowContext;
pub use contributors::ContributorSet;
pub use error::EngineError;
pub use repair::{RepairDriver, RepairOutcome, RepairSummary};
pub use salted::{SaltedCheckOutcome, SaltedChecksumCheck};
pub use steps::{
    ChecksumValidationStep, DeletedFilesStep, MissingFilesStep, MissingFilesSummary,
    ObsoleteChecksumsStep, ValidationSummary,
};
pub use workflow::{
    IntegrityWorkflow, RepairWorkflow, WorkflowKind, WorkflowOutcome, WorkflowStep, run_step,
};
