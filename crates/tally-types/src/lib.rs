//! Shared types and identifiers for tally.
//!
//! This crate defines the core types used across the tally workspace:
//! identifiers ([`CollectionId`], [`PillarId`], [`FileId`]),
//! the per-pillar data model ([`FileRecord`], [`ChecksumState`], [`FileState`]),
//! the metadata delivered by pillars ([`FileIdItem`], [`ChecksumItem`], [`FileInfoItem`]),
//! checking output ([`Finding`]), time ([`Timestamp`], [`Clock`]),
//! and configuration ([`CollectionSettings`]).

pub mod events;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Return the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }
    };
}

define_id!(
    /// Name of a collection: a set of files replicated across a fixed set of pillars.
    CollectionId
);

define_id!(
    /// Identifier of a pillar (an independent storage node holding a full replica).
    PillarId
);

define_id!(
    /// Identifier of a file within a collection.
    FileId
);

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// An opaque checksum value as delivered by a pillar.
///
/// Checksums are compared bytewise; the algorithm that produced them is not
/// interpreted here.
#[derive(Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Checksum(Vec<u8>);

/// Error returned when parsing a hex-encoded checksum fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid hex checksum: {0}")]
pub struct ChecksumParseError(String);

impl Checksum {
    /// Wrap raw checksum bytes.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Parse a checksum from its lowercase or uppercase hex representation.
    pub fn from_hex(hex: &str) -> Result<Self, ChecksumParseError> {
        let hex = hex.trim();
        if hex.len() % 2 != 0 {
            return Err(ChecksumParseError(hex.to_string()));
        }
        let mut bytes = Vec::with_capacity(hex.len() / 2);
        for pair in hex.as_bytes().chunks(2) {
            let s = std::str::from_utf8(pair).map_err(|_| ChecksumParseError(hex.to_string()))?;
            let b = u8::from_str_radix(s, 16).map_err(|_| ChecksumParseError(hex.to_string()))?;
            bytes.push(b);
        }
        Ok(Self(bytes))
    }

    /// Return the raw checksum bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex rendering of the checksum.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Whether the checksum carries no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Checksum({self})")
    }
}

/// Checksum algorithms a pillar can be asked to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    HmacMd5,
    HmacSha1,
    HmacSha256,
    HmacSha384,
    HmacSha512,
}

impl ChecksumAlgorithm {
    /// The keyed variant of this algorithm, used for salted checksums.
    pub fn salted(self) -> Self {
        match self {
            Self::Sha1 | Self::HmacSha1 => Self::HmacSha1,
            Self::Sha256 | Self::HmacSha256 => Self::HmacSha256,
            Self::Sha384 | Self::HmacSha384 => Self::HmacSha384,
            Self::Sha512 | Self::HmacSha512 => Self::HmacSha512,
            Self::Md5 | Self::HmacMd5 => Self::HmacMd5,
        }
    }

    /// Whether this algorithm takes a salt.
    pub fn is_salted(self) -> bool {
        matches!(
            self,
            Self::HmacMd5 | Self::HmacSha1 | Self::HmacSha256 | Self::HmacSha384 | Self::HmacSha512
        )
    }
}

/// What checksum a pillar should deliver: algorithm plus optional salt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumSpec {
    /// The checksum algorithm.
    pub algorithm: ChecksumAlgorithm,
    /// Salt for keyed algorithms.
    pub salt: Option<Vec<u8>>,
}

impl ChecksumSpec {
    /// An unsalted spec for the given algorithm.
    pub fn plain(algorithm: ChecksumAlgorithm) -> Self {
        Self {
            algorithm,
            salt: None,
        }
    }

    /// A salted spec using the keyed variant of `algorithm`.
    pub fn salted(algorithm: ChecksumAlgorithm, salt: Vec<u8>) -> Self {
        Self {
            algorithm: algorithm.salted(),
            salt: Some(salt),
        }
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Milliseconds since the Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// The Unix epoch; the cursor used by full collection passes.
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Build a timestamp from milliseconds since the epoch.
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Build a timestamp from seconds since the epoch.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs * 1_000)
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(millis as u64)
    }

    /// Milliseconds since the epoch.
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// `self - d`, clamped at the epoch.
    pub fn saturating_sub(self, d: Duration) -> Self {
        Self(self.0.saturating_sub(d.as_millis() as u64))
    }

    /// `self + d`, clamped at `u64::MAX`.
    pub fn saturating_add(self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.as_millis() as u64))
    }

    /// Elapsed time from `earlier` to `self` (zero if `earlier` is later).
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }

    /// Compact UTC rendering `YYYYMMDD-HHMMSS`, used for report directory names.
    pub fn compact_utc(self) -> String {
        let secs = self.0 / 1_000;
        let days = (secs / 86_400) as i64;
        let rem = secs % 86_400;
        let (y, m, d) = civil_from_days(days);
        format!(
            "{y:04}{m:02}{d:02}-{:02}{:02}{:02}",
            rem / 3_600,
            (rem % 3_600) / 60,
            rem % 60
        )
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Convert days since 1970-01-01 into a (year, month, day) civil date.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

/// Source of the current time.
///
/// Injected everywhere a decision depends on "now" (grace periods, checksum
/// age, observation timestamps) so that tests can move time explicitly.
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// The wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, t: Timestamp) {
        *self.now.lock().expect("clock lock poisoned") = t;
    }

    /// Move forward by `d`.
    pub fn advance(&self, d: Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now = now.saturating_add(d);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().expect("clock lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// Per-pillar data model
// ---------------------------------------------------------------------------

/// Classification of a stored checksum relative to the cross-pillar consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChecksumState {
    /// Not yet compared against the other pillars.
    Unknown,
    /// Agreed with every other pillar at the last check.
    Valid,
    /// Disagreed with at least one other pillar at the last check.
    Error,
}

/// Presence of a file at a pillar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FileState {
    /// The pillar reported the file.
    Existing,
    /// The file was recorded as absent after the grace period elapsed.
    Missing,
}

/// State of one file at one pillar within one collection.
///
/// The `(collection_id, file_id, pillar_id)` triple is unique; every write is
/// an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Collection the file belongs to.
    pub collection_id: CollectionId,
    /// The file.
    pub file_id: FileId,
    /// The pillar this record describes.
    pub pillar_id: PillarId,
    /// Latest checksum delivered by the pillar, if any.
    pub checksum: Option<Checksum>,
    /// Result of the last cross-pillar comparison.
    pub checksum_state: ChecksumState,
    /// Presence of the file at the pillar.
    pub file_state: FileState,
    /// Size in bytes as reported by the pillar.
    pub file_size: Option<u64>,
    /// Last modification time reported by the pillar.
    pub last_modification_time: Option<Timestamp>,
    /// When the pillar calculated `checksum`.
    pub checksum_calculation_time: Option<Timestamp>,
    /// When the pillar last verified its copy against `checksum`.
    pub date_for_last_checksum_check: Option<Timestamp>,
    /// When this record was first observed.
    pub first_seen: Timestamp,
    /// When a file listing from the pillar last included this file.
    pub last_seen: Timestamp,
    /// When the file was first recorded as missing at the pillar.
    pub missing_since: Option<Timestamp>,
}

impl FileRecord {
    /// A freshly observed, existing record with no checksum information.
    pub fn observed(
        collection_id: CollectionId,
        file_id: FileId,
        pillar_id: PillarId,
        now: Timestamp,
    ) -> Self {
        Self {
            collection_id,
            file_id,
            pillar_id,
            checksum: None,
            checksum_state: ChecksumState::Unknown,
            file_state: FileState::Existing,
            file_size: None,
            last_modification_time: None,
            checksum_calculation_time: None,
            date_for_last_checksum_check: None,
            first_seen: now,
            last_seen: now,
            missing_since: None,
        }
    }

    /// Whether the pillar currently holds the file.
    pub fn is_existing(&self) -> bool {
        self.file_state == FileState::Existing
    }
}

/// Resumption cursors for one pillar within one collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionProgress {
    /// Newest file modification time ingested from file listings.
    pub latest_file_timestamp: Option<Timestamp>,
    /// Newest checksum calculation time ingested.
    pub latest_checksum_timestamp: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// Metadata delivered by pillars
// ---------------------------------------------------------------------------

/// One entry of a file listing page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdItem {
    /// The listed file.
    pub file_id: FileId,
    /// Size in bytes, when the pillar reports it.
    pub file_size: Option<u64>,
    /// Last modification time at the pillar.
    pub last_modification_time: Timestamp,
}

/// One entry of a checksum page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumItem {
    /// The file the checksum belongs to.
    pub file_id: FileId,
    /// The checksum value.
    pub checksum: Checksum,
    /// When the pillar calculated it.
    pub calculation_time: Timestamp,
}

/// One entry of a combined file-info page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfoItem {
    /// The listed file.
    pub file_id: FileId,
    /// Size in bytes, when the pillar reports it.
    pub file_size: Option<u64>,
    /// Last modification time at the pillar.
    pub last_modification_time: Timestamp,
    /// Checksum, when the pillar has calculated one.
    pub checksum: Option<Checksum>,
    /// When the checksum was calculated.
    pub calculation_time: Option<Timestamp>,
}

/// Per-pillar pagination request.
///
/// `min_timestamp` is inclusive; `None` means "from the beginning".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorQuery {
    /// The pillar to ask.
    pub pillar_id: PillarId,
    /// Only deliver entries at or after this time.
    pub min_timestamp: Option<Timestamp>,
    /// Only deliver entries at or before this time.
    pub max_timestamp: Option<Timestamp>,
    /// Page size.
    pub max_results: u32,
}

// ---------------------------------------------------------------------------
// Findings
// ---------------------------------------------------------------------------

/// The kind of a [`Finding`], used to bucket counts and report sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum FindingKind {
    DeletedFile,
    MissingFile,
    ChecksumError,
    MissingChecksum,
    ObsoleteChecksum,
}

impl FindingKind {
    /// Every kind, in report order.
    pub const ALL: [FindingKind; 5] = [
        FindingKind::DeletedFile,
        FindingKind::MissingFile,
        FindingKind::ChecksumError,
        FindingKind::MissingChecksum,
        FindingKind::ObsoleteChecksum,
    ];

    /// Short machine name, used for detail file names.
    pub fn slug(self) -> &'static str {
        match self {
            FindingKind::DeletedFile => "deleted-files",
            FindingKind::MissingFile => "missing-files",
            FindingKind::ChecksumError => "checksum-errors",
            FindingKind::MissingChecksum => "missing-checksums",
            FindingKind::ObsoleteChecksum => "obsolete-checksums",
        }
    }

    /// Whether findings of this kind count as integrity issues.
    pub fn is_integrity_issue(self) -> bool {
        !matches!(self, FindingKind::DeletedFile)
    }
}

/// One discovered integrity issue for a (file, pillar) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Finding {
    /// The pillar lacks a file that other pillars hold.
    MissingFile { file_id: FileId, pillar_id: PillarId },
    /// The pillar holds the file but has delivered no checksum for it.
    MissingChecksum { file_id: FileId, pillar_id: PillarId },
    /// The pillar's checksum is older than the allowed age.
    ObsoleteChecksum { file_id: FileId, pillar_id: PillarId },
    /// The pillar's checksum disagrees with another pillar's.
    ChecksumError {
        file_id: FileId,
        pillar_id: PillarId,
        observed: Checksum,
    },
    /// The file disappeared from the pillar's listing.
    DeletedFile { file_id: FileId, pillar_id: PillarId },
}

impl Finding {
    /// The kind of this finding.
    pub fn kind(&self) -> FindingKind {
        match self {
            Finding::MissingFile { .. } => FindingKind::MissingFile,
            Finding::MissingChecksum { .. } => FindingKind::MissingChecksum,
            Finding::ObsoleteChecksum { .. } => FindingKind::ObsoleteChecksum,
            Finding::ChecksumError { .. } => FindingKind::ChecksumError,
            Finding::DeletedFile { .. } => FindingKind::DeletedFile,
        }
    }

    /// The affected file.
    pub fn file_id(&self) -> &FileId {
        match self {
            Finding::MissingFile { file_id, .. }
            | Finding::MissingChecksum { file_id, .. }
            | Finding::ObsoleteChecksum { file_id, .. }
            | Finding::ChecksumError { file_id, .. }
            | Finding::DeletedFile { file_id, .. } => file_id,
        }
    }

    /// The affected pillar.
    pub fn pillar_id(&self) -> &PillarId {
        match self {
            Finding::MissingFile { pillar_id, .. }
            | Finding::MissingChecksum { pillar_id, .. }
            | Finding::ObsoleteChecksum { pillar_id, .. }
            | Finding::ChecksumError { pillar_id, .. }
            | Finding::DeletedFile { pillar_id, .. } => pillar_id,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::MissingFile { file_id, pillar_id } => {
                write!(f, "missing file {file_id} at {pillar_id}")
            }
            Finding::MissingChecksum { file_id, pillar_id } => {
                write!(f, "missing checksum for {file_id} at {pillar_id}")
            }
            Finding::ObsoleteChecksum { file_id, pillar_id } => {
                write!(f, "obsolete checksum for {file_id} at {pillar_id}")
            }
            Finding::ChecksumError {
                file_id,
                pillar_id,
                observed,
            } => write!(f, "checksum error for {file_id} at {pillar_id} (observed {observed})"),
            Finding::DeletedFile { file_id, pillar_id } => {
                write!(f, "deleted file {file_id} at {pillar_id}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const DAY: Duration = Duration::from_secs(86_400);

/// Read-only policy for checking one collection.
///
/// Durations are (de)serialized as whole seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionSettings {
    /// The collection these settings apply to.
    pub collection_id: CollectionId,
    /// Nominal pillar set of the collection.
    pub pillars: Vec<PillarId>,
    /// Time allowed for pillars to identify themselves for an operation.
    #[serde(with = "duration_secs")]
    pub identification_timeout: Duration,
    /// Time allowed for an operation once identified.
    #[serde(with = "duration_secs")]
    pub operation_timeout: Duration,
    /// Maximum number of entries per page requested from a pillar.
    pub max_page_size: u32,
    /// How long a file may be absent at a pillar before it is reported missing.
    #[serde(with = "duration_secs")]
    pub missing_file_grace: Duration,
    /// Default maximum checksum age before it is reported obsolete.
    #[serde(with = "duration_secs")]
    pub obsolete_checksum_age: Duration,
    /// Per-pillar overrides of `obsolete_checksum_age`.
    #[serde(with = "duration_secs_map")]
    pub obsolete_checksum_age_overrides: BTreeMap<PillarId, Duration>,
    /// Abort the workflow when any contributor fails during collection.
    pub abort_on_failed_contributor: bool,
    /// Collect file listings and checksums in one combined request.
    pub use_file_infos: bool,
    /// Upper bound on files repaired per repair run.
    pub max_repairs_per_run: usize,
    /// Upper bound on detail lines per report part and pillar.
    pub max_report_details: usize,
    /// Algorithm for regular checksum collection.
    pub checksum_algorithm: ChecksumAlgorithm,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            collection_id: CollectionId::new("default"),
            pillars: Vec::new(),
            identification_timeout: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(3_600),
            max_page_size: 10_000,
            missing_file_grace: 7 * DAY,
            obsolete_checksum_age: 365 * DAY,
            obsolete_checksum_age_overrides: BTreeMap::new(),
            abort_on_failed_contributor: true,
            use_file_infos: false,
            max_repairs_per_run: 100,
            max_report_details: 100_000,
            checksum_algorithm: ChecksumAlgorithm::Sha256,
        }
    }
}

impl CollectionSettings {
    /// Settings for `collection_id` with the given pillars and default policy.
    pub fn new(collection_id: impl Into<CollectionId>, pillars: Vec<PillarId>) -> Self {
        Self {
            collection_id: collection_id.into(),
            pillars,
            ..Self::default()
        }
    }

    /// Total time one collection round may take: identification + operation.
    pub fn operation_deadline(&self) -> Duration {
        self.identification_timeout + self.operation_timeout
    }

    /// Maximum checksum age for `pillar`.
    pub fn obsolete_checksum_age_for(&self, pillar: &PillarId) -> Duration {
        self.obsolete_checksum_age_overrides
            .get(pillar)
            .copied()
            .unwrap_or(self.obsolete_checksum_age)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_secs_map {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::PillarId;

    pub fn serialize<S: Serializer>(
        m: &BTreeMap<PillarId, Duration>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        let secs: BTreeMap<&PillarId, u64> = m.iter().map(|(k, v)| (k, v.as_secs())).collect();
        secs.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<BTreeMap<PillarId, Duration>, D::Error> {
        let secs = BTreeMap::<PillarId, u64>::deserialize(d)?;
        Ok(secs
            .into_iter()
            .map(|(k, v)| (k, Duration::from_secs(v)))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
