//! The container runtime seam
//!
//! [`CellRuntime`] is the narrow set of operations a cell needs from a
//! container engine. `DockerCli` implements it against the `docker` binary;
//! tests plug in an in-memory fake.

use crate::error::RuntimeError;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Runtime-assigned container identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CellId(String);

impl CellId {
    /// Wrap a runtime identifier
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, as container tooling displays ids
    #[must_use]
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map_or(self.0.len(), |(i, _)| i);
        &self.0[..end]
    }
}

impl Display for CellId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything needed to create one cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellSpec {
    /// Container name
    pub name: String,
    /// Base image
    pub image: String,
    /// Labels attached to the container
    pub labels: BTreeMap<String, String>,
    /// Memory ceiling; swap is pinned to the same value
    pub memory_limit_bytes: u64,
    /// CPU ceiling in cores
    pub cpus: f64,
    /// Maximum number of processes
    pub pids_limit: u32,
    /// Mount the root filesystem read-only
    pub read_only_rootfs: bool,
    /// Paths backed by fresh anonymous volumes (the only writable locations)
    pub writable_paths: Vec<String>,
    /// Idle process keeping the container alive
    pub idle_command: Vec<String>,
    /// Run a minimal init as PID 1 so the idle process honours stop signals
    pub init: bool,
}

/// One command run inside a started cell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Program and arguments
    pub argv: Vec<String>,
    /// Bytes fed to the command's standard input; empty for none
    pub stdin: Vec<u8>,
    /// Unprivileged user to run as
    pub user: String,
    /// Working directory
    pub workdir: String,
    /// Bytes of each output stream the caller wants
    ///
    /// Runtimes keep at most one byte more per stream, so the caller can tell
    /// a stream was cut, and discard the rest.
    pub max_output_bytes: usize,
}

/// Captured result of an [`ExecRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecCapture {
    /// Standard output bytes
    pub stdout: Vec<u8>,
    /// Standard error bytes
    pub stderr: Vec<u8>,
    /// Exit status (-1 when terminated by a signal)
    pub exit_status: i32,
}

impl ExecCapture {
    /// A capture with the given exit status and no output
    #[must_use]
    pub fn exited(exit_status: i32) -> Self {
        Self {
            exit_status,
            ..Self::default()
        }
    }
}

/// Container engine operations used by a cell
///
/// Implementations must be safe to call concurrently for different cells.
#[async_trait]
pub trait CellRuntime: Send + Sync {
    /// Create (but do not start) a cell
    async fn create(&self, spec: &CellSpec) -> Result<CellId, RuntimeError>;

    /// Start the cell's idle process
    async fn start(&self, id: &CellId) -> Result<(), RuntimeError>;

    /// Extract a tar archive into `dest` inside the cell
    async fn put_archive(&self, id: &CellId, dest: &str, archive: Vec<u8>) -> Result<(), RuntimeError>;

    /// Run one command and capture its streams
    ///
    /// Dropping the returned future must abandon the command.
    async fn exec(&self, id: &CellId, request: &ExecRequest) -> Result<ExecCapture, RuntimeError>;

    /// Tar archive of `path` inside the cell; `None` if `path` does not exist
    ///
    /// An archive larger than `max_bytes` is [`RuntimeError::TooLarge`].
    async fn get_archive(&self, id: &CellId, path: &str, max_bytes: usize) -> Result<Option<Vec<u8>>, RuntimeError>;

    /// Stop the cell (waiting up to `grace`) and remove it with its volumes
    ///
    /// Removing a cell that no longer exists succeeds.
    async fn remove(&self, id: &CellId, grace: Duration) -> Result<(), RuntimeError>;

    /// Cells carrying `label` (`key=value`), in any state
    async fn list_cells(&self, label: &str) -> Result<Vec<CellId>, RuntimeError>;

    /// Check the runtime answers and `image` is present
    async fn check_image(&self, image: &str) -> Result<(), RuntimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_id_short() {
        let id = CellId::new("0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(CellId::new("abc").short(), "abc");
        assert_eq!(id.to_string(), "0123456789abcdef0123");
    }
}
