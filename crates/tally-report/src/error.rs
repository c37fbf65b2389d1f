//! Error types for the integrity reporter.

/// Errors returned by [`IntegrityReporter`](crate::IntegrityReporter) operations.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    /// Writing a detail log or the final report failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The report was already generated; the run accepts no more findings.
    #[error("report {run_id} is finalized")]
    Finalized {
        /// Run whose report is closed.
        run_id: String,
    },
}
