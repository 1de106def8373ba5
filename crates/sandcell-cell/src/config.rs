//! Cell configuration

use crate::error::CellError;
use sandcell_types::{normalize_posix, SandboxRoots};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Smallest memory limit the container runtime accepts (6 MiB)
pub const MIN_MEMORY_BYTES: u64 = 6 * 1024 * 1024;

/// Default cap on each captured output stream (4 MiB)
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

/// Default cap on the harvested output archive (64 MiB)
pub const DEFAULT_MAX_ARTIFACT_BYTES: usize = 64 * 1024 * 1024;

/// Resource limits and identity for every cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellConfig {
    /// Base image with the interpreter and libraries installed
    pub image: String,
    /// Container runtime client binary
    pub docker_binary: String,
    /// Memory ceiling in bytes (swap pinned to the same value)
    pub memory_limit_bytes: u64,
    /// CPU ceiling in cores
    pub cpus: f64,
    /// Maximum number of processes
    pub pids_limit: u32,
    /// Wall-clock limit for the program, in whole seconds
    pub timeout_secs: u64,
    /// Grace period between stop and kill at teardown
    pub stop_grace_secs: u64,
    /// Unprivileged user the program runs as
    pub user: String,
    /// Working directory, outside both roots
    pub workdir: String,
    /// Interpreter invoked as `<interpreter> -`, reading the program from stdin
    pub interpreter: String,
    /// Bytes of stdout and of stderr kept from the program; the rest is discarded
    pub max_output_bytes: usize,
    /// Largest output-root archive harvested; a larger one fails the harvest
    pub max_artifact_bytes: usize,
    /// `key=value` label marking cells this process manages
    pub label: String,
    /// Mount the image root filesystem read-only
    pub read_only_rootfs: bool,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            image: "sandcell-executor:latest".to_string(),
            docker_binary: "docker".to_string(),
            memory_limit_bytes: 512 * 1024 * 1024,
            cpus: 1.0,
            pids_limit: 64,
            timeout_secs: 120,
            stop_grace_secs: 5,
            user: "sandbox".to_string(),
            workdir: "/tmp".to_string(),
            interpreter: "python".to_string(),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            max_artifact_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
            label: "sandcell.managed=true".to_string(),
            read_only_rootfs: true,
        }
    }
}

impl CellConfig {
    /// Set the base image
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    /// Set the wall-clock limit, rounded up to whole seconds
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
        self
    }

    /// Set the per-stream output cap
    #[must_use]
    pub fn with_max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output_bytes = bytes;
        self
    }

    /// Set the output archive cap
    #[must_use]
    pub fn with_max_artifact_bytes(mut self, bytes: usize) -> Self {
        self.max_artifact_bytes = bytes;
        self
    }

    /// Set the memory ceiling
    #[must_use]
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = bytes;
        self
    }

    /// Wall-clock limit as a duration
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Stop grace period as a duration
    #[inline]
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Split the management label into key and value
    #[must_use]
    pub fn label_pair(&self) -> Option<(&str, &str)> {
        self.label
            .split_once('=')
            .filter(|(key, value)| !key.is_empty() && !value.is_empty())
    }

    /// Check limits are usable and the working directory is neutral
    ///
    /// # Errors
    /// Returns [`CellError::InvalidConfig`] naming the offending field
    pub fn validate(&self, roots: &SandboxRoots) -> Result<(), CellError> {
        let invalid = |msg: String| Err(CellError::InvalidConfig(msg));

        if self.image.trim().is_empty() {
            return invalid("image must not be empty".into());
        }
        if self.docker_binary.trim().is_empty() {
            return invalid("docker_binary must not be empty".into());
        }
        if self.memory_limit_bytes < MIN_MEMORY_BYTES {
            return invalid(format!(
                "memory_limit_bytes must be at least {MIN_MEMORY_BYTES}, got {}",
                self.memory_limit_bytes
            ));
        }
        if !(self.cpus.is_finite() && self.cpus > 0.0) {
            return invalid(format!("cpus must be positive, got {}", self.cpus));
        }
        if self.pids_limit == 0 {
            return invalid("pids_limit must be greater than zero".into());
        }
        if self.timeout_secs == 0 {
            return invalid("timeout_secs must be greater than zero".into());
        }
        if self.user.trim().is_empty() || self.user == "root" || self.user == "0" {
            return invalid(format!("user must be an unprivileged account, got '{}'", self.user));
        }
        if self.interpreter.trim().is_empty() {
            return invalid("interpreter must not be empty".into());
        }
        if self.max_output_bytes == 0 {
            return invalid("max_output_bytes must be greater than zero".into());
        }
        if self.max_artifact_bytes == 0 {
            return invalid("max_artifact_bytes must be greater than zero".into());
        }
        if self.label_pair().is_none() {
            return invalid(format!("label must be key=value, got '{}'", self.label));
        }

        match normalize_posix(&self.workdir) {
            Some(workdir) if roots.root_for(&workdir).is_none() => Ok(()),
            Some(_) => invalid(format!(
                "workdir '{}' must not be inside the input or output root",
                self.workdir
            )),
            None => invalid(format!("workdir '{}' must be an absolute path", self.workdir)),
        }
    }
}
