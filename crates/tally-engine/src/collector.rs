//! Interfaces to the pillar federation.
//!
//! The engine talks to pillars only through these traits. Metadata requests
//! are fire-and-collect: a [`Collector`] method dispatches one request per
//! pillar and returns; results arrive later, possibly from other tasks, as a
//! stream of [`OperationEvent`]s delivered through the [`EventHandler`]. The
//! stream ends with exactly one [`OperationEvent::Complete`] or
//! [`OperationEvent::Failed`].

use tally_types::{
    Checksum, ChecksumItem, ChecksumSpec, CollectionId, ContributorQuery, FileId, FileIdItem,
    FileInfoItem, PillarId,
};
use tokio::sync::mpsc;

/// One page of results from one pillar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultPage {
    FileIds(Vec<FileIdItem>),
    Checksums(Vec<ChecksumItem>),
    FileInfos(Vec<FileInfoItem>),
}

impl ResultPage {
    /// Number of items in the page.
    pub fn len(&self) -> usize {
        match self {
            ResultPage::FileIds(items) => items.len(),
            ResultPage::Checksums(items) => items.len(),
            ResultPage::FileInfos(items) => items.len(),
        }
    }

    /// Whether the page carries no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Events raised while a collective operation is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationEvent {
    /// A pillar delivered a page. `more_pages` is set when the pillar holds
    /// further results beyond this page.
    ComponentComplete {
        pillar: PillarId,
        page: ResultPage,
        more_pages: bool,
    },
    /// A pillar could not serve the request.
    ComponentFailed { pillar: PillarId, reason: String },
    /// Informational progress from a pillar.
    Progress { pillar: PillarId, info: String },
    /// The operation finished.
    Complete,
    /// The operation as a whole failed.
    Failed { reason: String },
}

/// Sink for [`OperationEvent`]s, handed to the [`Collector`] with each request.
#[derive(Debug, Clone)]
pub struct EventHandler {
    tx: mpsc::UnboundedSender<OperationEvent>,
}

impl EventHandler {
    /// Wrap the sending half of an event channel.
    pub fn new(tx: mpsc::UnboundedSender<OperationEvent>) -> Self {
        Self { tx }
    }

    /// Deliver an event. Events sent after the requester stopped listening
    /// are dropped.
    pub fn handle(&self, event: OperationEvent) {
        let _ = self.tx.send(event);
    }
}

/// A metadata request fanned out to several pillars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRequest {
    /// The collection to query.
    pub collection_id: CollectionId,
    /// One query per addressed pillar.
    pub queries: Vec<ContributorQuery>,
    /// Restrict the request to one file.
    pub file_id: Option<FileId>,
    /// Checksum to compute, for checksum and file-info requests.
    pub checksum_spec: Option<ChecksumSpec>,
    /// Audit trail text for the request.
    pub audit: String,
}

impl CollectionRequest {
    /// The addressed pillars.
    pub fn pillars(&self) -> impl Iterator<Item = &PillarId> {
        self.queries.iter().map(|q| &q.pillar_id)
    }

    /// The query addressed to `pillar`, if any.
    pub fn query_for(&self, pillar: &PillarId) -> Option<&ContributorQuery> {
        self.queries.iter().find(|q| &q.pillar_id == pillar)
    }
}

/// Failure of a single file transfer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectorError {
    /// The pillar refused or failed the operation.
    #[error("pillar {pillar} failed: {reason}")]
    Pillar { pillar: PillarId, reason: String },

    /// The operation did not complete in time.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The transport is not available.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Client side of the pillar federation.
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    /// Ask each addressed pillar for a page of its file listing.
    async fn get_file_ids(&self, request: CollectionRequest, handler: EventHandler);

    /// Ask each addressed pillar for a page of checksums.
    async fn get_checksums(&self, request: CollectionRequest, handler: EventHandler);

    /// Ask each addressed pillar for a page of combined file information.
    async fn get_file_infos(&self, request: CollectionRequest, handler: EventHandler);

    /// Have `source` upload its copy of `file` to `staging_url`.
    async fn get_file(
        &self,
        collection: &CollectionId,
        file: &FileId,
        source: &PillarId,
        staging_url: &str,
    ) -> Result<(), CollectorError>;

    /// Have `target` store `file` from `staging_url`, verified against `checksum`.
    async fn put_file(
        &self,
        collection: &CollectionId,
        file: &FileId,
        target: &PillarId,
        staging_url: &str,
        checksum: &Checksum,
        size: Option<u64>,
    ) -> Result<(), CollectorError>;
}

/// Staging area used to move file content between pillars during repair.
#[async_trait::async_trait]
pub trait FileExchange: Send + Sync {
    /// Location where a copy of `file` can be staged.
    fn staging_url(&self, collection: &CollectionId, file: &FileId) -> String;

    /// Remove a staged copy.
    async fn delete_staged(&self, url: &str) -> Result<(), CollectorError>;
}
