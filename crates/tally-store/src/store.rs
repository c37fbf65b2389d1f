//! [`MetadataStore`] implementation wrapping Fjall keyspaces.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use fjall::{Database, Keyspace, KeyspaceCreateOptions};
use tally_types::{
    Checksum, ChecksumItem, ChecksumState, Clock, CollectionId, CollectionProgress, FileId, FileIdItem,
    FileInfoItem, FileRecord, FileState, PillarId, SystemClock, Timestamp,
};
use tracing::debug;

use crate::StoreError;

type Result<T> = std::result::Result<T, StoreError>;

/// Key separator. Identifiers never contain NUL.
const SEP: u8 = 0;

/// Record counts for one pillar of a collection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PillarStats {
    /// Records in state EXISTING.
    pub existing: u64,
    /// Records in state MISSING.
    pub missing: u64,
    /// EXISTING records whose checksum state is VALID.
    pub valid_checksums: u64,
    /// EXISTING records whose checksum state is ERROR.
    pub checksum_errors: u64,
    /// EXISTING records without a checksum.
    pub missing_checksums: u64,
}

/// Record counts for a whole collection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CollectionStats {
    /// Distinct files with at least one record.
    pub files: u64,
    /// Per-pillar breakdown.
    pub pillars: BTreeMap<PillarId, PillarStats>,
}

/// Which resumption cursor a batch advances.
#[derive(Clone, Copy)]
enum Cursor {
    Files,
    Checksums,
}

/// Integrity metadata store backed by Fjall.
///
/// Every write is an upsert keyed by (collection, file, pillar), so
/// re-ingesting a page leaves the store unchanged. Read-modify-write
/// ingestion is serialized by an internal lock.
pub struct MetadataStore {
    #[allow(dead_code)]
    db: Database,
    /// `collection \0 file \0 pillar` → serialized FileRecord.
    records: Keyspace,
    /// `collection \0 pillar` → serialized CollectionProgress.
    progress: Keyspace,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
    /// Keeps the backing directory of a temporary store alive.
    _tmp: Option<tempfile::TempDir>,
}

impl MetadataStore {
    /// Open a persistent MetadataStore at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::builder(path).open()?;
        Self::init_keyspaces(db, None)
    }

    /// Open a temporary MetadataStore that is cleaned up on drop.
    ///
    /// Useful for tests.
    pub fn open_temporary() -> Result<Self> {
        let tmp = tempfile::tempdir()?;
        let db = Database::builder(tmp.path()).temporary(true).open()?;
        Self::init_keyspaces(db, Some(tmp))
    }

    fn init_keyspaces(db: Database, tmp: Option<tempfile::TempDir>) -> Result<Self> {
        let records = db.keyspace("records", KeyspaceCreateOptions::default)?;
        let progress = db.keyspace("progress", KeyspaceCreateOptions::default)?;
        Ok(Self {
            db,
            records,
            progress,
            clock: Arc::new(SystemClock),
            write_lock: Mutex::new(()),
            _tmp: tmp,
        })
    }

    /// Replace the clock used to stamp observation times.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    // ----- Ingestion -----

    /// Ingest one page of a pillar's file listing.
    ///
    /// Creates missing records (EXISTING, checksum UNKNOWN), refreshes size,
    /// modification time and `last_seen` of known ones, and brings MISSING
    /// records back to EXISTING.
    pub fn add_file_ids(
        &self,
        items: &[FileIdItem],
        pillar: &PillarId,
        collection: &CollectionId,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        let now = self.clock.now();
        for item in items {
            let mut record = self.load_or_observe(collection, &item.file_id, pillar, now)?;
            apply_listing(&mut record, item.file_size, item.last_modification_time, now);
            self.put_record(&record)?;
        }
        if let Some(newest) = items.iter().map(|i| i.last_modification_time).max() {
            self.raise_cursor(collection, pillar, Cursor::Files, newest)?;
        }
        debug!(collection = %collection, pillar = %pillar, count = items.len(), "ingested file ids");
        Ok(())
    }

    /// Ingest one page of a pillar's checksums.
    ///
    /// A changed checksum resets the record's state to UNKNOWN; an unchanged
    /// one keeps the state from the last validation.
    pub fn add_checksums(
        &self,
        items: &[ChecksumItem],
        pillar: &PillarId,
        collection: &CollectionId,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        let now = self.clock.now();
        for item in items {
            let mut record = self.load_or_observe(collection, &item.file_id, pillar, now)?;
            apply_checksum(&mut record, &item.checksum, item.calculation_time);
            self.put_record(&record)?;
        }
        if let Some(newest) = items.iter().map(|i| i.calculation_time).max() {
            self.raise_cursor(collection, pillar, Cursor::Checksums, newest)?;
        }
        debug!(collection = %collection, pillar = %pillar, count = items.len(), "ingested checksums");
        Ok(())
    }

    /// Ingest one page of combined file information (listing plus checksum).
    pub fn add_file_infos(
        &self,
        items: &[FileInfoItem],
        pillar: &PillarId,
        collection: &CollectionId,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        let now = self.clock.now();
        for item in items {
            let mut record = self.load_or_observe(collection, &item.file_id, pillar, now)?;
            apply_listing(&mut record, item.file_size, item.last_modification_time, now);
            if let Some(checksum) = &item.checksum {
                let calculated = item.calculation_time.unwrap_or(item.last_modification_time);
                apply_checksum(&mut record, checksum, calculated);
            }
            self.put_record(&record)?;
        }
        if let Some(newest) = items.iter().map(|i| i.last_modification_time).max() {
            self.raise_cursor(collection, pillar, Cursor::Files, newest)?;
        }
        if let Some(newest) = items.iter().filter_map(|i| i.calculation_time).max() {
            self.raise_cursor(collection, pillar, Cursor::Checksums, newest)?;
        }
        debug!(collection = %collection, pillar = %pillar, count = items.len(), "ingested file infos");
        Ok(())
    }

    // ----- State updates from checking -----

    /// Set the checksum state of one record. Absent records are left alone.
    pub fn set_checksum_state(
        &self,
        collection: &CollectionId,
        file: &FileId,
        pillar: &PillarId,
        state: ChecksumState,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        if let Some(mut record) = self.get_record(collection, file, pillar)? {
            if record.checksum_state != state {
                record.checksum_state = state;
                self.put_record(&record)?;
            }
        }
        Ok(())
    }

    /// Record `file` as MISSING at `pillar`, creating a placeholder if needed.
    ///
    /// `missing_since` keeps the time of the first such call.
    pub fn set_file_missing(
        &self,
        collection: &CollectionId,
        file: &FileId,
        pillar: &PillarId,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        let now = self.clock.now();
        let mut record = self.load_or_observe(collection, file, pillar, now)?;
        record.file_state = FileState::Missing;
        record.missing_since.get_or_insert(now);
        self.put_record(&record)?;
        debug!(collection = %collection, file = %file, pillar = %pillar, "marked file missing");
        Ok(())
    }

    // ----- Record access -----

    /// Fetch the record for one (collection, file, pillar).
    pub fn get_record(
        &self,
        collection: &CollectionId,
        file: &FileId,
        pillar: &PillarId,
    ) -> Result<Option<FileRecord>> {
        match self.records.get(record_key(collection, file, pillar))? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every pillar's record for one file.
    pub fn get_file_infos(&self, file: &FileId, collection: &CollectionId) -> Result<Vec<FileRecord>> {
        self.scan(file_prefix(collection, file)).collect()
    }

    /// Lazily iterate the collection one file at a time.
    ///
    /// Each item holds every pillar's record for one file, in file id order.
    pub fn files<'a>(
        &'a self,
        collection: &CollectionId,
    ) -> impl Iterator<Item = Result<Vec<FileRecord>>> + use<'a> {
        FileGroups::new(self.scan(collection_prefix(collection)))
    }

    /// Files held (EXISTING) by at least one other pillar but absent or MISSING
    /// at `pillar`, in file id order, starting after `after` and yielding at
    /// most `limit`.
    ///
    /// Pass the last file id of the previous page as `after` to page through
    /// the collection without rescanning it.
    pub fn missing_files_at_pillar<'a>(
        &'a self,
        pillar: &'a PillarId,
        after: Option<&FileId>,
        limit: usize,
        collection: &CollectionId,
    ) -> impl Iterator<Item = Result<FileId>> + use<'a> {
        let start = match after {
            Some(file) => file_prefix(collection, file),
            None => collection_prefix(collection),
        };
        let skip = after.cloned();
        let records = self
            .scan_range(start, collection_end(collection))
            .skip_while(move |record| match (record, &skip) {
                (Ok(r), Some(file)) => &r.file_id == file,
                _ => false,
            });
        FileGroups::new(records)
            .filter_map(move |group| match group {
                Ok(records) => {
                    let held_elsewhere = records
                        .iter()
                        .any(|r| &r.pillar_id != pillar && r.is_existing());
                    let held_here = records
                        .iter()
                        .any(|r| &r.pillar_id == pillar && r.is_existing());
                    (held_elsewhere && !held_here).then(|| Ok(records[0].file_id.clone()))
                }
                Err(e) => Some(Err(e)),
            })
            .take(limit)
    }

    /// EXISTING files at `pillar` whose last listing predates `since`.
    ///
    /// After a complete file listing that started at `since`, these are files
    /// the pillar no longer reports.
    pub fn find_orphan_files<'a>(
        &'a self,
        collection: &CollectionId,
        pillar: &'a PillarId,
        since: Timestamp,
    ) -> impl Iterator<Item = Result<FileId>> + use<'a> {
        self.records_at_pillar(collection, pillar)
            .filter_map(move |record| match record {
                Ok(r) => (r.is_existing() && r.last_seen < since).then_some(Ok(r.file_id)),
                Err(e) => Some(Err(e)),
            })
    }

    /// EXISTING files at `pillar` whose last checksum check predates `cutoff`.
    pub fn find_obsolete_checksums<'a>(
        &'a self,
        collection: &CollectionId,
        pillar: &'a PillarId,
        cutoff: Timestamp,
    ) -> impl Iterator<Item = Result<FileId>> + use<'a> {
        self.records_at_pillar(collection, pillar)
            .filter_map(move |record| match record {
                Ok(r) => {
                    let stale = r.is_existing()
                        && r.date_for_last_checksum_check.is_some_and(|t| t < cutoff);
                    stale.then_some(Ok(r.file_id))
                }
                Err(e) => Some(Err(e)),
            })
    }

    /// Earliest observation of `file` at any pillar.
    pub fn earliest_file_date(
        &self,
        collection: &CollectionId,
        file: &FileId,
    ) -> Result<Option<Timestamp>> {
        let mut earliest: Option<Timestamp> = None;
        for record in self.scan(file_prefix(collection, file)) {
            let first_seen = record?.first_seen;
            earliest = Some(earliest.map_or(first_seen, |e| e.min(first_seen)));
        }
        Ok(earliest)
    }

    /// Number of distinct files with at least one record in the collection.
    pub fn number_of_files_in_collection(&self, collection: &CollectionId) -> Result<u64> {
        let mut count = 0;
        for group in self.files(collection) {
            group?;
            count += 1;
        }
        Ok(count)
    }

    /// The file at zero-based `position` in file id order.
    pub fn file_id_at_position(
        &self,
        collection: &CollectionId,
        position: u64,
    ) -> Result<Option<FileId>> {
        match self.files(collection).nth(position as usize) {
            Some(group) => Ok(group?.into_iter().next().map(|r| r.file_id)),
            None => Ok(None),
        }
    }

    /// Per-pillar record counts for the collection.
    pub fn collection_stats(&self, collection: &CollectionId) -> Result<CollectionStats> {
        let mut stats = CollectionStats::default();
        for group in self.files(collection) {
            stats.files += 1;
            for record in group? {
                let pillar = stats.pillars.entry(record.pillar_id.clone()).or_default();
                if !record.is_existing() {
                    pillar.missing += 1;
                    continue;
                }
                pillar.existing += 1;
                if record.checksum.is_none() {
                    pillar.missing_checksums += 1;
                }
                match record.checksum_state {
                    ChecksumState::Valid => pillar.valid_checksums += 1,
                    ChecksumState::Error => pillar.checksum_errors += 1,
                    ChecksumState::Unknown => {}
                }
            }
        }
        Ok(stats)
    }

    // ----- Deletion -----

    /// Delete one pillar's record for a file.
    pub fn delete_file_record(
        &self,
        collection: &CollectionId,
        file: &FileId,
        pillar: &PillarId,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        let key = record_key(collection, file, pillar);
        self.records.remove(key.as_slice())?;
        debug!(collection = %collection, file = %file, pillar = %pillar, "deleted file record");
        Ok(())
    }

    /// Delete every pillar's record for a file.
    pub fn delete_file_id_entry(&self, file: &FileId, collection: &CollectionId) -> Result<()> {
        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        let mut keys = Vec::new();
        for guard in self.records.prefix(file_prefix(collection, file)) {
            keys.push(guard.key()?);
        }
        for key in &keys {
            self.records.remove(key.as_ref())?;
        }
        debug!(collection = %collection, file = %file, removed = keys.len(), "deleted file entry");
        Ok(())
    }

    // ----- Collection progress -----

    /// Resumption cursors for one pillar.
    pub fn collection_progress(
        &self,
        collection: &CollectionId,
        pillar: &PillarId,
    ) -> Result<CollectionProgress> {
        match self.progress.get(progress_key(collection, pillar))? {
            Some(bytes) => Ok(postcard::from_bytes(&bytes)?),
            None => Ok(CollectionProgress::default()),
        }
    }

    /// Resumption cursors for every pillar that has delivered data.
    pub fn progress_for_collection(
        &self,
        collection: &CollectionId,
    ) -> Result<Vec<(PillarId, CollectionProgress)>> {
        let prefix = collection_prefix(collection);
        let mut out = Vec::new();
        for guard in self.progress.prefix(prefix.clone()) {
            let (key, value) = guard.into_inner()?;
            let pillar = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            out.push((PillarId::new(pillar), postcard::from_bytes(&value)?));
        }
        Ok(out)
    }

    /// Newest file modification time ingested from `pillar`'s listings.
    pub fn date_for_newest_file_entry_for_pillar(
        &self,
        pillar: &PillarId,
        collection: &CollectionId,
    ) -> Result<Option<Timestamp>> {
        Ok(self.collection_progress(collection, pillar)?.latest_file_timestamp)
    }

    /// Newest checksum calculation time ingested from `pillar`.
    pub fn date_for_newest_checksum_entry_for_pillar(
        &self,
        pillar: &PillarId,
        collection: &CollectionId,
    ) -> Result<Option<Timestamp>> {
        Ok(self.collection_progress(collection, pillar)?.latest_checksum_timestamp)
    }

    /// Forget the file listing cursors of every pillar in the collection.
    pub fn reset_file_collection_progress(&self, collection: &CollectionId) -> Result<()> {
        self.reset_cursor(collection, Cursor::Files)
    }

    /// Forget the checksum cursors of every pillar in the collection.
    pub fn reset_checksum_collection_progress(&self, collection: &CollectionId) -> Result<()> {
        self.reset_cursor(collection, Cursor::Checksums)
    }

    // ----- Internals -----

    fn scan(&self, prefix: Vec<u8>) -> impl Iterator<Item = Result<FileRecord>> + use<'_> {
        self.records.prefix(prefix).map(|guard| {
            let value = guard.value()?;
            Ok(postcard::from_bytes(&value)?)
        })
    }

    fn scan_range(
        &self,
        start: Vec<u8>,
        end: Vec<u8>,
    ) -> impl Iterator<Item = Result<FileRecord>> + use<'_> {
        self.records.range(start..end).map(|guard| {
            let value = guard.value()?;
            Ok(postcard::from_bytes(&value)?)
        })
    }

    fn records_at_pillar<'a>(
        &'a self,
        collection: &CollectionId,
        pillar: &'a PillarId,
    ) -> impl Iterator<Item = Result<FileRecord>> + use<'a> {
        self.scan(collection_prefix(collection)).filter(move |record| match record {
            Ok(r) => &r.pillar_id == pillar,
            Err(_) => true,
        })
    }

    fn load_or_observe(
        &self,
        collection: &CollectionId,
        file: &FileId,
        pillar: &PillarId,
        now: Timestamp,
    ) -> Result<FileRecord> {
        Ok(self.get_record(collection, file, pillar)?.unwrap_or_else(|| {
            FileRecord::observed(collection.clone(), file.clone(), pillar.clone(), now)
        }))
    }

    fn put_record(&self, record: &FileRecord) -> Result<()> {
        let key = record_key(&record.collection_id, &record.file_id, &record.pillar_id);
        let value = postcard::to_allocvec(record)?;
        self.records.insert(key.as_slice(), value.as_slice())?;
        Ok(())
    }

    fn raise_cursor(
        &self,
        collection: &CollectionId,
        pillar: &PillarId,
        cursor: Cursor,
        newest: Timestamp,
    ) -> Result<()> {
        let mut progress = self.collection_progress(collection, pillar)?;
        let slot = match cursor {
            Cursor::Files => &mut progress.latest_file_timestamp,
            Cursor::Checksums => &mut progress.latest_checksum_timestamp,
        };
        if slot.is_some_and(|current| current >= newest) {
            return Ok(());
        }
        *slot = Some(newest);
        let value = postcard::to_allocvec(&progress)?;
        let key = progress_key(collection, pillar);
        self.progress.insert(key.as_slice(), value.as_slice())?;
        Ok(())
    }

    fn reset_cursor(&self, collection: &CollectionId, cursor: Cursor) -> Result<()> {
        let _guard = self.write_lock.lock().expect("store write lock poisoned");
        let mut updates = Vec::new();
        for guard in self.progress.prefix(collection_prefix(collection)) {
            let (key, value) = guard.into_inner()?;
            let mut progress: CollectionProgress = postcard::from_bytes(&value)?;
            match cursor {
                Cursor::Files => progress.latest_file_timestamp = None,
                Cursor::Checksums => progress.latest_checksum_timestamp = None,
            }
            updates.push((key, postcard::to_allocvec(&progress)?));
        }
        for (key, value) in updates {
            self.progress.insert(key.as_ref(), value.as_slice())?;
        }
        debug!(collection = %collection, "reset collection progress");
        Ok(())
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("temporary", &self._tmp.is_some())
            .finish()
    }
}

fn apply_listing(
    record: &mut FileRecord,
    size: Option<u64>,
    modified: Timestamp,
    now: Timestamp,
) {
    if size.is_some() {
        record.file_size = size;
    }
    record.last_modification_time = Some(modified);
    record.last_seen = now;
    record.file_state = FileState::Existing;
    record.missing_since = None;
}

fn apply_checksum(record: &mut FileRecord, checksum: &Checksum, calculated: Timestamp) {
    if record.checksum.as_ref() != Some(checksum) {
        record.checksum = Some(checksum.clone());
        record.checksum_state = ChecksumState::Unknown;
    }
    record.checksum_calculation_time = Some(calculated);
    record.date_for_last_checksum_check = Some(calculated);
    record.file_state = FileState::Existing;
    record.missing_since = None;
}

/// `collection \0`
fn collection_prefix(collection: &CollectionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(collection.as_str().len() + 1);
    key.extend_from_slice(collection.as_str().as_bytes());
    key.push(SEP);
    key
}

/// First key past every key of `collection`.
fn collection_end(collection: &CollectionId) -> Vec<u8> {
    let mut key = collection_prefix(collection);
    if let Some(last) = key.last_mut() {
        *last = SEP + 1;
    }
    key
}

/// `collection \0 file \0`
fn file_prefix(collection: &CollectionId, file: &FileId) -> Vec<u8> {
    let mut key = collection_prefix(collection);
    key.extend_from_slice(file.as_str().as_bytes());
    key.push(SEP);
    key
}

/// `collection \0 file \0 pillar`
fn record_key(collection: &CollectionId, file: &FileId, pillar: &PillarId) -> Vec<u8> {
    let mut key = file_prefix(collection, file);
    key.extend_from_slice(pillar.as_str().as_bytes());
    key
}

/// `collection \0 pillar`
fn progress_key(collection: &CollectionId, pillar: &PillarId) -> Vec<u8> {
    let mut key = collection_prefix(collection);
    key.extend_from_slice(pillar.as_str().as_bytes());
    key
}

/// Groups a key-ordered record stream into one `Vec` per file.
struct FileGroups<I> {
    records: I,
    pending: Option<FileRecord>,
}

impl<I> FileGroups<I> {
    fn new(records: I) -> Self {
        Self {
            records,
            pending: None,
        }
    }
}

impl<I> Iterator for FileGroups<I>
where
    I: Iterator<Item = Result<FileRecord>>,
{
    type Item = Result<Vec<FileRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.pending.take() {
            Some(record) => record,
            None => match self.records.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            },
        };
        let mut group = vec![first];
        loop {
            match self.records.next() {
                None => return Some(Ok(group)),
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(record)) if record.file_id == group[0].file_id => group.push(record),
                Some(Ok(record)) => {
                    self.pending = Some(record);
                    return Some(Ok(group));
                }
            }
        }
    }
}
