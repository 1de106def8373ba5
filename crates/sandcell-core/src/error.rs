//! Error types for the orchestrator
//!
//! Only infrastructure and caller misuse are errors. Dangerous, unapproved,
//! crashing or hung programs are all reported as a [`TaskResult`](crate::TaskResult).

use crate::config::ConfigError;
use sandcell_cell::CellError;
use sandcell_classifier::ClassifierError;
use sandcell_types::ProgramDigest;

/// Orchestrator errors
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// No cell could be allocated
    #[error("execution environment unavailable: {0}")]
    Environment(#[from] CellError),

    /// Classifier could not be built
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    /// Configuration is invalid
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Grant was issued for a different program
    #[error("approval grant is for program {granted}, not {submitted}")]
    ApprovalMismatch {
        granted: ProgramDigest,
        submitted: ProgramDigest,
    },

    /// Two inputs share a name
    #[error("duplicate input artifact '{0}'")]
    DuplicateArtifact(String),

    /// Classification task did not finish
    #[error("classification aborted: {0}")]
    Classification(String),

    /// Orchestrator is shutting down
    #[error("orchestrator closed")]
    Closed,
}

impl OrchestratorError {
    /// Check if the error came from the container runtime
    #[inline]
    #[must_use]
    pub fn is_environment(&self) -> bool {
        matches!(self, Self::Environment(_))
    }

    /// Check if the caller sent something unusable
    #[inline]
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::ApprovalMismatch { .. } | Self::DuplicateArtifact(_))
    }
}
