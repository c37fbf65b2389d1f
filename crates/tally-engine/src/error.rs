//! Error types for the integrity engine.

/// Errors that end a workflow step.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Failed to access the metadata store.
    #[error("store error: {0}")]
    Store(#[from] tally_store::StoreError),

    /// Failed to write the integrity report.
    #[error("report error: {0}")]
    Report(#[from] tally_report::ReportError),

    /// The workflow was aborted by policy (a contributor failed while
    /// `abort_on_failed_contributor` is set).
    #[error("step {step} aborted: {reason}")]
    Aborted {
        /// Name of the step that raised the abort.
        step: String,
        /// Why.
        reason: String,
    },

    /// The step could not complete.
    #[error("step {step} failed: {reason}")]
    StepFailed {
        /// Name of the failed step.
        step: String,
        /// Why.
        reason: String,
    },
}

impl EngineError {
    /// Whether this is the policy-fatal abort signal.
    pub fn is_abort(&self) -> bool {
        matches!(self, EngineError::Aborted { .. })
    }
}
