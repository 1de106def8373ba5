//! Error types for the execution cell
//!
//! Two layers:
//! - [`RuntimeError`]: one container runtime operation failed
//! - [`CellError`]: what escapes [`IsolatedExecutionCell::run`](crate::IsolatedExecutionCell::run).
//!   Only allocation (and misconfiguration) ever does; everything after the
//!   cell is started is reported inside the outcome.

use crate::runtime::CellId;

/// Container runtime operation errors
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Runtime binary missing or daemon unreachable
    #[error("container runtime unavailable: {0}")]
    Unavailable(String),

    /// Base image not present locally
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Cell does not exist (already removed or never created)
    #[error("no such cell: {0}")]
    NoSuchCell(CellId),

    /// Runtime command exited unsuccessfully
    #[error("{operation} failed (status {status:?}): {stderr}")]
    CommandFailed {
        /// Runtime operation, e.g. `create`
        operation: &'static str,
        /// Exit status of the runtime client, if it exited normally
        status: Option<i32>,
        /// Trimmed standard error of the runtime client
        stderr: String,
    },

    /// Archive could not be built or decoded
    #[error("archive error: {0}")]
    Archive(String),

    /// Transfer exceeded its size limit
    #[error("{what} exceeds {limit} bytes")]
    TooLarge {
        /// What was being transferred
        what: &'static str,
        /// The limit in bytes
        limit: usize,
    },

    /// I/O talking to the runtime client
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Create a command failure
    #[inline]
    pub fn command(operation: &'static str, status: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::CommandFailed {
            operation,
            status,
            stderr: stderr.into(),
        }
    }
}

/// Errors escaping a cell run
#[derive(Debug, thiserror::Error)]
pub enum CellError {
    /// No container runtime
    #[error("environment allocation failed: container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// Base image missing
    #[error("environment allocation failed: image '{0}' not found")]
    ImageNotFound(String),

    /// Cell could not be created
    #[error("environment allocation failed: could not create cell: {0}")]
    CreateFailed(#[source] RuntimeError),

    /// Cell was created but could not be started; it has been removed
    #[error("environment allocation failed: could not start cell {id}: {source}")]
    StartFailed {
        /// The created cell
        id: CellId,
        /// Why start failed
        #[source]
        source: RuntimeError,
    },

    /// Invalid cell configuration
    #[error("invalid cell configuration: {0}")]
    InvalidConfig(String),
}

impl CellError {
    /// Classify a creation failure
    pub(crate) fn from_create(err: RuntimeError, image: &str) -> Self {
        match err {
            RuntimeError::Unavailable(msg) => Self::RuntimeUnavailable(msg),
            RuntimeError::ImageNotFound(_) => Self::ImageNotFound(image.to_string()),
            other => Self::CreateFailed(other),
        }
    }

    /// Classify a failed image check
    pub fn from_image_check(err: RuntimeError, image: &str) -> Self {
        match err {
            RuntimeError::ImageNotFound(_) => Self::ImageNotFound(image.to_string()),
            RuntimeError::Unavailable(msg) => Self::RuntimeUnavailable(msg),
            other => Self::RuntimeUnavailable(other.to_string()),
        }
    }

    /// Check if this is an environment allocation failure
    #[inline]
    #[must_use]
    pub fn is_allocation(&self) -> bool {
        !matches!(self, Self::InvalidConfig(_))
    }

    /// Allocation failures are deployment preconditions, never retried
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::command("create", Some(125), "Conflict");
        assert_eq!(err.to_string(), "create failed (status Some(125)): Conflict");

        let err = RuntimeError::TooLarge {
            what: "output archive",
            limit: 1024,
        };
        assert_eq!(err.to_string(), "output archive exceeds 1024 bytes");

        let err = CellError::ImageNotFound("sandcell-executor:latest".into());
        assert!(err.to_string().contains("image 'sandcell-executor:latest' not found"));
    }

    #[test]
    fn test_create_failures_are_classified() {
        let err = CellError::from_create(RuntimeError::ImageNotFound("x".into()), "img");
        assert!(matches!(err, CellError::ImageNotFound(ref i) if i == "img"));

        let err = CellError::from_create(RuntimeError::Unavailable("no daemon".into()), "img");
        assert!(matches!(err, CellError::RuntimeUnavailable(_)));

        let err = CellError::from_create(RuntimeError::command("create", Some(1), "boom"), "img");
        assert!(matches!(err, CellError::CreateFailed(_)));
        assert!(err.is_allocation());
        assert!(!err.is_retryable());
    }
}
