//! Shared test harness for tally integration tests.
//!
//! Provides [`MockFederation`], a set of in-memory pillars that answer
//! collection requests the way real pillars do (timestamp-cursor pagination,
//! per-pillar failures, staged file transfers), and [`IntegrationHarness`],
//! which wires a federation to a temporary metadata store and a
//! [`WorkflowContext`] running on a manual clock.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tally_engine::{
    AlertKind, CollectionRequest, Collector, CollectorError, EngineError, EventHandler,
    FileExchange, IntegrityWorkflow, MemoryAlerter, MemoryAuditTrail, OperationEvent,
    RepairSummary, RepairWorkflow, ResultPage, SaltedCheckOutcome, SaltedChecksumCheck,
    WorkflowContext, WorkflowKind, WorkflowOutcome,
};
use tally_store::MetadataStore;
use tally_types::*;
use tempfile::TempDir;
use tokio::sync::RwLock;

/// Start of every harness clock.
pub const START: Timestamp = Timestamp::from_secs(1_700_000_000);

/// Collection checked by the harness.
pub const COLLECTION: &str = "books";

pub const DAY: Duration = Duration::from_secs(86_400);

pub fn fid(s: &str) -> FileId {
    FileId::from(s)
}

pub fn pid(s: &str) -> PillarId {
    PillarId::from(s)
}

/// Checksum a mock pillar computes over `content`, keyed by `salt` when given.
pub fn content_checksum(content: &[u8], salt: Option<&[u8]>) -> Checksum {
    let mut hasher = blake3::Hasher::new();
    if let Some(salt) = salt {
        hasher.update(salt);
    }
    hasher.update(content);
    Checksum::new(hasher.finalize().as_bytes().to_vec())
}

// =========================================================================
// Mock federation
// =========================================================================

/// One copy of a file held by a mock pillar.
#[derive(Debug, Clone)]
struct StoredCopy {
    content: Vec<u8>,
    modified: Timestamp,
    checksum_time: Timestamp,
}

#[derive(Clone, Copy)]
enum Listing {
    FileIds,
    Checksums,
    FileInfos,
}

/// Files held by one mock pillar.
#[derive(Debug, Default)]
pub struct MockPillar {
    files: BTreeMap<FileId, StoredCopy>,
}

impl MockPillar {
    /// Whether the pillar holds `file`.
    pub fn holds(&self, file: &FileId) -> bool {
        self.files.contains_key(file)
    }

    /// Answer one query: the page inside the query window and whether more
    /// entries follow it.
    fn page(
        &self,
        listing: Listing,
        query: &ContributorQuery,
        only: Option<&FileId>,
        salt: Option<&[u8]>,
    ) -> (ResultPage, bool) {
        let copies = self
            .files
            .iter()
            .filter(|(id, _)| only.is_none_or(|f| f == *id));
        match listing {
            Listing::FileIds => {
                let entries = copies.map(|(id, c)| {
                    let item = FileIdItem {
                        file_id: id.clone(),
                        file_size: Some(c.content.len() as u64),
                        last_modification_time: c.modified,
                    };
                    (c.modified, item)
                });
                let (items, more) = paginate(entries, query);
                (ResultPage::FileIds(items), more)
            }
            Listing::Checksums => {
                let entries = copies.map(|(id, c)| {
                    let item = ChecksumItem {
                        file_id: id.clone(),
                        checksum: content_checksum(&c.content, salt),
                        calculation_time: c.checksum_time,
                    };
                    (c.checksum_time, item)
                });
                let (items, more) = paginate(entries, query);
                (ResultPage::Checksums(items), more)
            }
            Listing::FileInfos => {
                let entries = copies.map(|(id, c)| {
                    let item = FileInfoItem {
                        file_id: id.clone(),
                        file_size: Some(c.content.len() as u64),
                        last_modification_time: c.modified,
                        checksum: Some(content_checksum(&c.content, salt)),
                        calculation_time: Some(c.checksum_time),
                    };
                    (c.modified, item)
                });
                let (items, more) = paginate(entries, query);
                (ResultPage::FileInfos(items), more)
            }
        }
    }
}

/// In-memory pillars behind the [`Collector`] and [`FileExchange`] traits.
///
/// Supports failure injection: pillars in `down` answer every request with a
/// component failure and refuse transfers.
pub struct MockFederation {
    clock: Arc<ManualClock>,
    pillars: RwLock<BTreeMap<PillarId, MockPillar>>,
    down: RwLock<BTreeSet<PillarId>>,
    staging: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<CollectionRequest>>,
}

impl MockFederation {
    pub fn new(pillars: &[&str], clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            pillars: RwLock::new(pillars.iter().map(|p| (pid(p), MockPillar::default())).collect()),
            down: RwLock::new(BTreeSet::new()),
            staging: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Store `content` as `file` at `pillar`, stamped with the current time.
    pub async fn store_file(&self, pillar: &str, file: &str, content: &[u8]) {
        let now = self.clock.now();
        let mut pillars = self.pillars.write().await;
        pillars.entry(pid(pillar)).or_default().files.insert(
            fid(file),
            StoredCopy {
                content: content.to_vec(),
                modified: now,
                checksum_time: now,
            },
        );
    }

    /// Drop `file` from `pillar`.
    pub async fn remove_file(&self, pillar: &str, file: &str) {
        if let Some(p) = self.pillars.write().await.get_mut(&pid(pillar)) {
            p.files.remove(&fid(file));
        }
    }

    /// Flip the first byte of `file` at `pillar`. The pillar recalculates
    /// its checksum, so the damage shows in the next collection.
    pub async fn corrupt(&self, pillar: &str, file: &str) {
        let now = self.clock.now();
        let mut pillars = self.pillars.write().await;
        let copy = pillars
            .get_mut(&pid(pillar))
            .and_then(|p| p.files.get_mut(&fid(file)))
            .expect("corrupting a file the pillar does not hold");
        match copy.content.first_mut() {
            Some(b) => *b ^= 0xff,
            None => copy.content.push(0xff),
        }
        copy.checksum_time = now;
    }

    /// Content of `file` at `pillar`, if held.
    pub async fn content(&self, pillar: &str, file: &str) -> Option<Vec<u8>> {
        let pillars = self.pillars.read().await;
        pillars
            .get(&pid(pillar))
            .and_then(|p| p.files.get(&fid(file)))
            .map(|copy| copy.content.clone())
    }

    /// Make `pillar` unreachable.
    pub async fn take_down(&self, pillar: &str) {
        self.down.write().await.insert(pid(pillar));
    }

    /// Make `pillar` reachable again.
    pub async fn bring_up(&self, pillar: &str) {
        self.down.write().await.remove(&pid(pillar));
    }

    /// Every collection request received so far.
    pub fn requests(&self) -> Vec<CollectionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of copies currently staged.
    pub fn staged(&self) -> usize {
        self.staging.lock().unwrap().len()
    }

    async fn answer(&self, request: CollectionRequest, handler: EventHandler, listing: Listing) {
        self.requests.lock().unwrap().push(request.clone());
        let down = self.down.read().await.clone();
        let pillars = self.pillars.read().await;
        let salt = request.checksum_spec.as_ref().and_then(|s| s.salt.as_deref());

        for query in &request.queries {
            let pillar = &query.pillar_id;
            let failure = if down.contains(pillar) {
                Some("pillar is down")
            } else if !pillars.contains_key(pillar) {
                Some("unknown pillar")
            } else if request
                .file_id
                .as_ref()
                .is_some_and(|f| !pillars[pillar].holds(f))
            {
                Some("file not found")
            } else {
                None
            };
            if let Some(reason) = failure {
                handler.handle(OperationEvent::ComponentFailed {
                    pillar: pillar.clone(),
                    reason: reason.to_string(),
                });
                continue;
            }

            let (page, more_pages) =
                pillars[pillar].page(listing, query, request.file_id.as_ref(), salt);
            handler.handle(OperationEvent::ComponentComplete {
                pillar: pillar.clone(),
                page,
                more_pages,
            });
        }
        handler.handle(OperationEvent::Complete);
    }

    async fn ensure_up(&self, pillar: &PillarId) -> Result<(), CollectorError> {
        if self.down.read().await.contains(pillar) {
            return Err(CollectorError::Pillar {
                pillar: pillar.clone(),
                reason: "pillar is down".to_string(),
            });
        }
        Ok(())
    }
}

/// Oldest-first page of the entries inside the query's time window.
///
/// Entries are ordered by timestamp; iteration order breaks ties.
fn paginate<T>(
    entries: impl Iterator<Item = (Timestamp, T)>,
    query: &ContributorQuery,
) -> (Vec<T>, bool) {
    let mut window: Vec<(Timestamp, T)> = entries
        .filter(|(t, _)| query.min_timestamp.is_none_or(|min| *t >= min))
        .filter(|(t, _)| query.max_timestamp.is_none_or(|max| *t <= max))
        .collect();
    window.sort_by_key(|(t, _)| *t);
    let limit = query.max_results as usize;
    let more = window.len() > limit;
    let items = window.into_iter().take(limit).map(|(_, item)| item).collect();
    (items, more)
}

#[async_trait]
impl Collector for MockFederation {
    async fn get_file_ids(&self, request: CollectionRequest, handler: EventHandler) {
        self.answer(request, handler, Listing::FileIds).await;
    }

    async fn get_checksums(&self, request: CollectionRequest, handler: EventHandler) {
        self.answer(request, handler, Listing::Checksums).await;
    }

    async fn get_file_infos(&self, request: CollectionRequest, handler: EventHandler) {
        self.answer(request, handler, Listing::FileInfos).await;
    }

    async fn get_file(
        &self,
        _collection: &CollectionId,
        file: &FileId,
        source: &PillarId,
        staging_url: &str,
    ) -> Result<(), CollectorError> {
        self.ensure_up(source).await?;
        let content = {
            let pillars = self.pillars.read().await;
            pillars
                .get(source)
                .and_then(|p| p.files.get(file))
                .map(|copy| copy.content.clone())
        };
        let content = content.ok_or_else(|| CollectorError::Pillar {
            pillar: source.clone(),
            reason: format!("{file} not found"),
        })?;
        self.staging
            .lock()
            .unwrap()
            .insert(staging_url.to_string(), content);
        Ok(())
    }

    async fn put_file(
        &self,
        _collection: &CollectionId,
        file: &FileId,
        target: &PillarId,
        staging_url: &str,
        checksum: &Checksum,
        _size: Option<u64>,
    ) -> Result<(), CollectorError> {
        self.ensure_up(target).await?;
        let staged = self.staging.lock().unwrap().get(staging_url).cloned();
        let content = staged.ok_or_else(|| CollectorError::Pillar {
            pillar: target.clone(),
            reason: format!("nothing staged at {staging_url}"),
        })?;
        if &content_checksum(&content, None) != checksum {
            return Err(CollectorError::Pillar {
                pillar: target.clone(),
                reason: format!("checksum mismatch for {file}"),
            });
        }

        let now = self.clock.now();
        let mut pillars = self.pillars.write().await;
        pillars.entry(target.clone()).or_default().files.insert(
            file.clone(),
            StoredCopy {
                content,
                modified: now,
                checksum_time: now,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl FileExchange for MockFederation {
    fn staging_url(&self, collection: &CollectionId, file: &FileId) -> String {
        format!("mem://{collection}/{file}")
    }

    async fn delete_staged(&self, url: &str) -> Result<(), CollectorError> {
        self.staging.lock().unwrap().remove(url);
        Ok(())
    }
}

// =========================================================================
// Harness
// =========================================================================

/// A collection spread over a mock federation, checked by the real engine.
pub struct IntegrationHarness {
    pub clock: Arc<ManualClock>,
    pub federation: Arc<MockFederation>,
    pub store: Arc<MetadataStore>,
    pub alerter: Arc<MemoryAlerter>,
    pub audit: Arc<MemoryAuditTrail>,
    pub ctx: Arc<WorkflowContext>,
    _reports: TempDir,
}

impl IntegrationHarness {
    /// A harness with default collection settings.
    pub fn new(pillars: &[&str]) -> Self {
        Self::with_settings(pillars, |_| {})
    }

    /// A harness whose collection settings are adjusted by `configure`.
    pub fn with_settings(pillars: &[&str], configure: impl FnOnce(&mut CollectionSettings)) -> Self {
        let clock = Arc::new(ManualClock::new(START));
        let federation = Arc::new(MockFederation::new(pillars, clock.clone()));
        let store = Arc::new(
            MetadataStore::open_temporary()
                .unwrap()
                .with_clock(clock.clone()),
        );
        let alerter = Arc::new(MemoryAlerter::new());
        let audit = Arc::new(MemoryAuditTrail::new());
        let reports = tempfile::tempdir().unwrap();

        let mut settings = CollectionSettings::new(COLLECTION, pillars.iter().map(|p| pid(p)).collect());
        configure(&mut settings);

        let ctx = WorkflowContext::new(settings, store.clone(), federation.clone(), reports.path())
            .with_file_exchange(federation.clone())
            .with_alerter(alerter.clone())
            .with_audit_trail(audit.clone())
            .with_clock(clock.clone());

        Self {
            clock,
            federation,
            store,
            alerter,
            audit,
            ctx: Arc::new(ctx),
            _reports: reports,
        }
    }

    /// Store `content` as `file` at every pillar, then move the clock one
    /// second so files get distinct timestamps.
    pub async fn add_file(&self, file: &str, content: &[u8]) {
        for pillar in &self.ctx.settings.pillars {
            self.federation.store_file(pillar.as_str(), file, content).await;
        }
        self.advance(Duration::from_secs(1));
    }

    /// Add `n` files named `file-000`, `file-001`, ... with distinct content.
    pub async fn populate(&self, n: usize) {
        for i in 0..n {
            let content = format!("content of file {i}").into_bytes();
            self.add_file(&format!("file-{i:03}"), &content).await;
        }
    }

    pub fn advance(&self, d: Duration) {
        self.clock.advance(d);
    }

    pub async fn full_check(&self) -> Result<WorkflowOutcome, EngineError> {
        IntegrityWorkflow::new(self.ctx.clone(), WorkflowKind::Full)
            .run()
            .await
    }

    pub async fn incremental_check(&self) -> Result<WorkflowOutcome, EngineError> {
        IntegrityWorkflow::new(self.ctx.clone(), WorkflowKind::Incremental)
            .run()
            .await
    }

    pub async fn repair(&self) -> Result<RepairSummary, EngineError> {
        RepairWorkflow::new(self.ctx.clone()).run().await
    }

    pub async fn salted_check(&self, file: &str) -> Result<SaltedCheckOutcome, EngineError> {
        SaltedChecksumCheck::new(self.ctx.clone())
            .with_file(fid(file))
            .run()
            .await
    }

    /// The stored record of `file` at `pillar`.
    pub fn record(&self, file: &str, pillar: &str) -> Option<FileRecord> {
        self.store
            .get_record(self.ctx.collection_id(), &fid(file), &pid(pillar))
            .unwrap()
    }

    /// Number of alerts of `kind` raised so far.
    pub fn alerts(&self, kind: AlertKind) -> usize {
        self.alerter.of_kind(kind).len()
    }

    /// Number of distinct files in the store.
    pub fn stored_files(&self) -> u64 {
        self.store
            .number_of_files_in_collection(self.ctx.collection_id())
            .unwrap()
    }
}

/// Text of a written report.
pub fn read_report(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}
