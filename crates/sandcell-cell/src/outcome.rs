//! Structured result of one cell run

use crate::runtime::ExecCapture;
use sandcell_types::OutputArtifacts;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Exit status reported when the program hit the wall-clock limit
pub const TIMEOUT_EXIT_STATUS: i32 = 124;

/// Exit status reported when the program could not be run or harvested
pub const INFRA_EXIT_STATUS: i32 = -1;

/// Why a run did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExecutionFailure {
    /// Program exited with a non-zero status
    NonZeroExit {
        /// The exit status
        status: i32,
    },
    /// Program exceeded the wall-clock limit and was terminated
    TimedOut {
        /// The limit that was hit
        #[serde(serialize_with = "as_secs")]
        after: Duration,
    },
    /// Input artifacts could not be staged
    Staging(String),
    /// The interpreter could not be invoked
    Invocation(String),
    /// Output artifacts could not be retrieved
    Harvest(String),
}

impl Display for ExecutionFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonZeroExit { status } => write!(f, "program exited with status {status}"),
            Self::TimedOut { after } => write!(
                f,
                "execution timed out after {}s; the program was terminated",
                after.as_secs()
            ),
            Self::Staging(msg) => write!(f, "failed to stage input artifacts: {msg}"),
            Self::Invocation(msg) => write!(f, "failed to invoke interpreter: {msg}"),
            Self::Harvest(msg) => write!(f, "failed to retrieve output artifacts: {msg}"),
        }
    }
}

/// Result of running one program in one cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    /// `exit_status == 0` and no failure
    pub succeeded: bool,
    /// Captured standard output (lossy UTF-8)
    pub standard_output: String,
    /// Captured standard error (lossy UTF-8), plus failure diagnostics
    pub standard_error: String,
    /// Program exit status, [`TIMEOUT_EXIT_STATUS`] or [`INFRA_EXIT_STATUS`]
    pub exit_status: i32,
    /// Files written under the output root, by relative name
    #[serde(serialize_with = "artifact_sizes")]
    pub output_artifacts: OutputArtifacts,
    /// Why the run did not succeed
    pub failure: Option<ExecutionFailure>,
    /// Wall-clock time from allocation to teardown
    #[serde(serialize_with = "as_millis", rename = "elapsed_ms")]
    pub elapsed: Duration,
}

impl ExecutionOutcome {
    /// Outcome of a program that ran to completion and was harvested
    #[must_use]
    pub fn completed(capture: ExecCapture, output_artifacts: OutputArtifacts, elapsed: Duration) -> Self {
        let failure = (capture.exit_status != 0).then_some(ExecutionFailure::NonZeroExit {
            status: capture.exit_status,
        });
        Self {
            succeeded: failure.is_none(),
            standard_output: String::from_utf8_lossy(&capture.stdout).into_owned(),
            standard_error: String::from_utf8_lossy(&capture.stderr).into_owned(),
            exit_status: capture.exit_status,
            output_artifacts,
            failure,
            elapsed,
        }
    }

    /// Outcome of a run cut short by `failure`
    ///
    /// Whatever the program printed before the failure is kept; the failure
    /// description is appended to standard error.
    #[must_use]
    pub fn failed(failure: ExecutionFailure, partial: Option<ExecCapture>, elapsed: Duration) -> Self {
        let partial = partial.unwrap_or_default();
        let exit_status = match failure {
            ExecutionFailure::TimedOut { .. } => TIMEOUT_EXIT_STATUS,
            ExecutionFailure::NonZeroExit { status } => status,
            _ => INFRA_EXIT_STATUS,
        };

        let mut standard_error = String::from_utf8_lossy(&partial.stderr).into_owned();
        if !standard_error.is_empty() && !standard_error.ends_with('\n') {
            standard_error.push('\n');
        }
        standard_error.push_str(&failure.to_string());

        Self {
            succeeded: false,
            standard_output: String::from_utf8_lossy(&partial.stdout).into_owned(),
            standard_error,
            exit_status,
            output_artifacts: OutputArtifacts::new(),
            failure: Some(failure),
            elapsed,
        }
    }

    /// Check if the program hit the wall-clock limit
    #[inline]
    #[must_use]
    pub fn timed_out(&self) -> bool {
        matches!(self.failure, Some(ExecutionFailure::TimedOut { .. }))
    }
}

fn artifact_sizes<S: Serializer>(artifacts: &OutputArtifacts, serializer: S) -> Result<S::Ok, S::Error> {
    let sizes: BTreeMap<&str, usize> = artifacts
        .iter()
        .map(|(name, bytes)| (name.as_str(), bytes.len()))
        .collect();
    sizes.serialize(serializer)
}

fn as_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

fn as_secs<S: Serializer>(after: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(after.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_success() {
        let capture = ExecCapture {
            stdout: b"6\n".to_vec(),
            stderr: Vec::new(),
            exit_status: 0,
        };
        let mut artifacts = OutputArtifacts::new();
        artifacts.insert("result.csv".into(), b"6".to_vec());
        let outcome = ExecutionOutcome::completed(capture, artifacts, Duration::from_millis(5));
        assert!(outcome.succeeded);
        assert_eq!(outcome.standard_output, "6\n");
        assert_eq!(outcome.failure, None);
    }

    #[test]
    fn test_completed_non_zero() {
        let outcome = ExecutionOutcome::completed(ExecCapture::exited(1), OutputArtifacts::new(), Duration::ZERO);
        assert!(!outcome.succeeded);
        assert_eq!(outcome.failure, Some(ExecutionFailure::NonZeroExit { status: 1 }));
    }

    #[test]
    fn test_timeout_outcome() {
        let outcome = ExecutionOutcome::failed(
            ExecutionFailure::TimedOut {
                after: Duration::from_secs(2),
            },
            None,
            Duration::from_secs(2),
        );
        assert!(!outcome.succeeded);
        assert!(outcome.timed_out());
        assert_eq!(outcome.exit_status, TIMEOUT_EXIT_STATUS);
        assert!(outcome.standard_error.contains("timed out after 2s"));
    }

    #[test]
    fn test_harvest_failure_keeps_program_output() {
        let partial = ExecCapture {
            stdout: b"done\n".to_vec(),
            stderr: b"warning".to_vec(),
            exit_status: 0,
        };
        let outcome = ExecutionOutcome::failed(
            ExecutionFailure::Harvest("archive truncated".into()),
            Some(partial),
            Duration::ZERO,
        );
        assert_eq!(outcome.exit_status, INFRA_EXIT_STATUS);
        assert_eq!(outcome.standard_output, "done\n");
        assert_eq!(
            outcome.standard_error,
            "warning\nfailed to retrieve output artifacts: archive truncated"
        );
    }

    #[test]
    fn test_outcome_json_reports_sizes() {
        let mut artifacts = OutputArtifacts::new();
        artifacts.insert("a.bin".into(), vec![0; 3]);
        let outcome = ExecutionOutcome::completed(ExecCapture::exited(0), artifacts, Duration::from_millis(1500));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["output_artifacts"]["a.bin"], 3);
        assert_eq!(json["elapsed_ms"], 1500);
    }
}
