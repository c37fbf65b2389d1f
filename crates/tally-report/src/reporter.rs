//! [`IntegrityReporter`]: the per-run sink for findings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::Rng;
use tally_types::{CollectionId, Finding, FindingKind, PillarId, Timestamp};
use tracing::{debug, info};

use crate::ReportError;
use crate::writer::{ReportPart, ReportWriter, create_run_dir};

type Result<T> = std::result::Result<T, ReportError>;

struct Inner {
    counts: BTreeMap<ReportPart, BTreeMap<PillarId, u64>>,
    writer: ReportWriter,
    report_path: Option<PathBuf>,
}

/// Accumulates the findings of one checking run over one collection.
///
/// Counts are exact; detail lines are capped per (part, pillar). Once
/// [`generate_report`](Self::generate_report) has run, the reporter is
/// finalized and rejects further findings.
pub struct IntegrityReporter {
    collection_id: CollectionId,
    run_id: String,
    run_dir: PathBuf,
    inner: Mutex<Inner>,
}

impl IntegrityReporter {
    /// Create a reporter and its run directory under `reports_dir`.
    pub fn new(
        collection_id: CollectionId,
        reports_dir: impl AsRef<Path>,
        max_details: usize,
    ) -> Result<Self> {
        Self::created_at(collection_id, reports_dir, max_details, Timestamp::now())
    }

    /// Like [`new`](Self::new), naming the run after `created_at`.
    pub fn created_at(
        collection_id: CollectionId,
        reports_dir: impl AsRef<Path>,
        max_details: usize,
        created_at: Timestamp,
    ) -> Result<Self> {
        let suffix: u16 = rand::rng().random();
        let run_id = format!("{}-{suffix:04x}", created_at.compact_utc());
        let run_dir = create_run_dir(reports_dir.as_ref(), collection_id.as_str(), &run_id)?;
        debug!(collection = %collection_id, run = %run_id, "created report directory");
        Ok(Self {
            collection_id,
            run_id,
            run_dir: run_dir.clone(),
            inner: Mutex::new(Inner {
                counts: BTreeMap::new(),
                writer: ReportWriter::new(run_dir, max_details),
                report_path: None,
            }),
        })
    }

    /// The collection this run covers.
    pub fn collection_id(&self) -> &CollectionId {
        &self.collection_id
    }

    /// Identifier of this run (also the run directory name).
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Directory holding the detail logs and the final report.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Record one finding.
    pub fn report(&self, finding: &Finding) -> Result<()> {
        let mut inner = self.inner.lock().expect("reporter lock poisoned");
        if inner.report_path.is_some() {
            return Err(ReportError::Finalized {
                run_id: self.run_id.clone(),
            });
        }
        let part = ReportPart::from(finding.kind());
        *inner
            .counts
            .entry(part)
            .or_default()
            .entry(finding.pillar_id().clone())
            .or_insert(0) += 1;
        let line = match finding {
            Finding::ChecksumError {
                file_id, observed, ..
            } => format!("{file_id} (observed {observed})"),
            other => other.file_id().to_string(),
        };
        inner.writer.write_issue(part, finding.pillar_id(), &line)?;
        Ok(())
    }

    /// Number of findings of `kind` reported for `pillar`.
    pub fn count(&self, kind: FindingKind, pillar: &PillarId) -> u64 {
        let inner = self.inner.lock().expect("reporter lock poisoned");
        inner
            .counts
            .get(&ReportPart::from(kind))
            .and_then(|per_pillar| per_pillar.get(pillar))
            .copied()
            .unwrap_or(0)
    }

    /// Number of findings of `kind` across all pillars.
    pub fn total(&self, kind: FindingKind) -> u64 {
        let inner = self.inner.lock().expect("reporter lock poisoned");
        inner
            .counts
            .get(&ReportPart::from(kind))
            .map(|per_pillar| per_pillar.values().sum())
            .unwrap_or(0)
    }

    /// Whether anything other than deleted files was reported.
    pub fn has_integrity_issues(&self) -> bool {
        let inner = self.inner.lock().expect("reporter lock poisoned");
        inner
            .counts
            .iter()
            .any(|(part, per_pillar)| {
                FindingKind::from(*part).is_integrity_issue() && per_pillar.values().any(|n| *n > 0)
            })
    }

    /// Short human-readable summary, one line per (part, pillar) with issues.
    pub fn generate_summary_of_report(&self) -> String {
        if !self.has_integrity_issues() {
            return "No integrity issues found".to_string();
        }
        let inner = self.inner.lock().expect("reporter lock poisoned");
        let mut lines = vec!["The following integrity issues were found:".to_string()];
        for part in ReportPart::ALL {
            let Some(per_pillar) = inner.counts.get(&part) else {
                continue;
            };
            for (pillar, &n) in per_pillar.iter().filter(|(_, n)| **n > 0) {
                lines.push(summary_line(part, pillar, n));
            }
        }
        lines.join("\n")
    }

    /// Assemble the final report file and finalize the reporter.
    ///
    /// Returns the path of the report. Calling it again rewrites the same file.
    pub fn generate_report(&self) -> Result<PathBuf> {
        let mut inner = self.inner.lock().expect("reporter lock poisoned");
        let header = format!(
            "Integrity report for collection {} (run {})",
            self.collection_id, self.run_id
        );
        let path = inner.writer.write_report(&header)?;
        inner.report_path = Some(path.clone());
        info!(collection = %self.collection_id, run = %self.run_id, path = %path.display(), "integrity report generated");
        Ok(path)
    }

    /// Path of the final report, once generated.
    pub fn report_path(&self) -> Option<PathBuf> {
        let inner = self.inner.lock().expect("reporter lock poisoned");
        inner.report_path.clone()
    }

    /// Whether the report has been generated.
    pub fn is_finalized(&self) -> bool {
        self.report_path().is_some()
    }
}

impl std::fmt::Debug for IntegrityReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrityReporter")
            .field("collection_id", &self.collection_id)
            .field("run_id", &self.run_id)
            .finish()
    }
}

fn summary_line(part: ReportPart, pillar: &PillarId, n: u64) -> String {
    let s = if n == 1 { "" } else { "s" };
    match part {
        ReportPart::DeletedFiles => format!("{pillar} has {n} deleted file{s}."),
        ReportPart::MissingFiles => format!("{pillar} is missing {n} file{s}."),
        ReportPart::ChecksumErrors => format!("{pillar} has {n} potentially corrupt file{s}."),
        ReportPart::MissingChecksums => format!("{pillar} is missing {n} checksum{s}."),
        ReportPart::ObsoleteChecksums => format!("{pillar} has {n} obsolete checksum{s}."),
    }
}
