//! On-disk detail logs and final report assembly.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tally_types::{FindingKind, PillarId};
use tracing::debug;

/// Name of the assembled report inside a run directory.
pub const REPORT_FILE: &str = "integrity_report.txt";

/// One section of an integrity report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum ReportPart {
    DeletedFiles,
    MissingFiles,
    ChecksumErrors,
    MissingChecksums,
    ObsoleteChecksums,
}

impl ReportPart {
    /// Every part, in report order.
    pub const ALL: [ReportPart; 5] = [
        ReportPart::DeletedFiles,
        ReportPart::MissingFiles,
        ReportPart::ChecksumErrors,
        ReportPart::MissingChecksums,
        ReportPart::ObsoleteChecksums,
    ];

    /// Section heading in the final report.
    pub fn title(self) -> &'static str {
        match self {
            ReportPart::DeletedFiles => "Deleted files",
            ReportPart::MissingFiles => "Missing files",
            ReportPart::ChecksumErrors => "Inconsistent checksums",
            ReportPart::MissingChecksums => "Missing checksums",
            ReportPart::ObsoleteChecksums => "Obsolete checksums",
        }
    }

    fn empty_message(self) -> &'static str {
        match self {
            ReportPart::DeletedFiles => "No deleted files detected",
            ReportPart::MissingFiles => "No missing files detected",
            ReportPart::ChecksumErrors => "No inconsistent checksums detected",
            ReportPart::MissingChecksums => "No missing checksums detected",
            ReportPart::ObsoleteChecksums => "No obsolete checksums detected",
        }
    }

    /// Prefix of the per-pillar detail file name.
    pub fn file_prefix(self) -> &'static str {
        FindingKind::from(self).slug()
    }
}

impl From<FindingKind> for ReportPart {
    fn from(kind: FindingKind) -> Self {
        match kind {
            FindingKind::DeletedFile => ReportPart::DeletedFiles,
            FindingKind::MissingFile => ReportPart::MissingFiles,
            FindingKind::ChecksumError => ReportPart::ChecksumErrors,
            FindingKind::MissingChecksum => ReportPart::MissingChecksums,
            FindingKind::ObsoleteChecksum => ReportPart::ObsoleteChecksums,
        }
    }
}

impl From<ReportPart> for FindingKind {
    fn from(part: ReportPart) -> Self {
        match part {
            ReportPart::DeletedFiles => FindingKind::DeletedFile,
            ReportPart::MissingFiles => FindingKind::MissingFile,
            ReportPart::ChecksumErrors => FindingKind::ChecksumError,
            ReportPart::MissingChecksums => FindingKind::MissingChecksum,
            ReportPart::ObsoleteChecksums => FindingKind::ObsoleteChecksum,
        }
    }
}

/// Detail log of one (part, pillar), opened on first use.
struct PartLog {
    path: PathBuf,
    out: BufWriter<File>,
    written: usize,
    omitted: u64,
}

/// Streams detail lines to per-(part, pillar) files and assembles the report.
pub(crate) struct ReportWriter {
    dir: PathBuf,
    max_details: usize,
    logs: BTreeMap<(ReportPart, PillarId), PartLog>,
}

impl ReportWriter {
    pub(crate) fn new(dir: PathBuf, max_details: usize) -> Self {
        Self {
            dir,
            max_details,
            logs: BTreeMap::new(),
        }
    }

    /// Append `line` to the detail log of (part, pillar), or count it as
    /// omitted once the log holds `max_details` lines.
    pub(crate) fn write_issue(
        &mut self,
        part: ReportPart,
        pillar: &PillarId,
        line: &str,
    ) -> io::Result<()> {
        let key = (part, pillar.clone());
        if !self.logs.contains_key(&key) {
            let path = self
                .dir
                .join(format!("{}-{}", part.file_prefix(), sanitize(pillar.as_str())));
            let out = BufWriter::new(File::create(&path)?);
            self.logs.insert(
                key.clone(),
                PartLog {
                    path,
                    out,
                    written: 0,
                    omitted: 0,
                },
            );
        }
        let Some(log) = self.logs.get_mut(&key) else {
            return Ok(());
        };
        if log.written >= self.max_details {
            log.omitted += 1;
            return Ok(());
        }
        writeln!(log.out, "{line}")?;
        log.written += 1;
        Ok(())
    }

    /// Write the full report under the run directory and return its path.
    ///
    /// An existing report file is replaced.
    pub(crate) fn write_report(&mut self, header: &str) -> io::Result<PathBuf> {
        for log in self.logs.values_mut() {
            log.out.flush()?;
        }

        let path = self.dir.join(REPORT_FILE);
        let mut report = BufWriter::new(File::create(&path)?);
        writeln!(report, "{header}")?;

        for part in ReportPart::ALL {
            writeln!(report, "== {} ==", part.title())?;
            let mut any = false;
            for ((_, pillar), log) in self.logs.iter().filter(|((p, _), _)| *p == part) {
                any = true;
                writeln!(report, "-- {pillar} --")?;
                copy_lines(&log.path, &mut report)?;
                if log.omitted > 0 {
                    writeln!(report, "... {} more not listed", log.omitted)?;
                }
            }
            if !any {
                writeln!(report, "-- {} --", part.empty_message())?;
            }
        }

        report.flush()?;
        debug!(path = %path.display(), "wrote integrity report");
        Ok(path)
    }
}

fn copy_lines(from: &Path, to: &mut impl Write) -> io::Result<()> {
    let reader = BufReader::new(File::open(from)?);
    for line in reader.lines() {
        writeln!(to, "{}", line?)?;
    }
    Ok(())
}

/// Keep pillar ids usable as file name components.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}

/// Create the run directory `<reports_dir>/<collection>/<run_id>`.
pub(crate) fn create_run_dir(reports_dir: &Path, collection: &str, run_id: &str) -> io::Result<PathBuf> {
    let dir = reports_dir.join(sanitize(collection)).join(run_id);
    fs::create_dir_all(&dir)?;
    Ok(dir)
}
