//! Integrity reporting for one checking run.
//!
//! An [`IntegrityReporter`] accumulates [`Finding`](tally_types::Finding)s for
//! a single run over a single collection. It keeps exact counts per report
//! part and pillar, streams detail lines to per-part files on disk (bounded by
//! a configurable line limit), and on [`IntegrityReporter::generate_report`]
//! assembles `integrity_report.txt` and becomes read-only.
//!
//! Layout of a run directory:
//!
//! ```text
//! <reports_dir>/<collection>/<YYYYMMDD-HHMMSS>-<suffix>/
//!     missing-files-<pillar>
//!     checksum-errors-<pillar>
//!     ...
//!     integrity_report.txt
//! ```

mod error;
mod reporter;
mod writer;

pub use error::ReportError;
pub use reporter::IntegrityReporter;
pub use writer::{REPORT_FILE, ReportPart};
