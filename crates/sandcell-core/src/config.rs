//! Layered configuration
//!
//! Defaults, then a TOML file, then environment overrides, then
//! [`SandcellConfig::validate`].

use sandcell_cell::CellConfig;
use sandcell_classifier::{ClassifierConfig, RiskClassifier};
use sandcell_types::SandboxRoots;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides [`CellConfig::image`]
pub const ENV_IMAGE: &str = "SANDCELL_IMAGE";
/// Overrides [`CellConfig::timeout_secs`]
pub const ENV_TIMEOUT_SECS: &str = "SANDCELL_TIMEOUT_SECS";
/// Overrides [`CellConfig::docker_binary`]
pub const ENV_DOCKER: &str = "SANDCELL_DOCKER";

/// Default bound on cells running at once
pub const DEFAULT_MAX_CONCURRENT_CELLS: usize = 4;

/// Whole-process configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandcellConfig {
    /// Input and output roots, shared by classifier and cell
    pub roots: SandboxRoots,
    /// Classifier limits and import policy additions
    pub classifier: ClassifierConfig,
    /// Container image and resource limits
    pub cell: CellConfig,
    /// Cells allowed to run at once
    pub max_concurrent_cells: usize,
}

impl Default for SandcellConfig {
    fn default() -> Self {
        Self {
            roots: SandboxRoots::default(),
            classifier: ClassifierConfig::default(),
            cell: CellConfig::default(),
            max_concurrent_cells: DEFAULT_MAX_CONCURRENT_CELLS,
        }
    }
}

impl SandcellConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With container image
    #[must_use]
    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.cell.image = image.into();
        self
    }

    /// With wall-clock limit
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.cell = self.cell.with_timeout(timeout);
        self
    }

    /// With concurrency bound
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_cells(mut self, max: usize) -> Self {
        self.max_concurrent_cells = max;
        self
    }

    /// With sandbox roots
    #[must_use]
    pub fn with_roots(mut self, roots: SandboxRoots) -> Self {
        self.roots = roots;
        self
    }

    /// Parse TOML; missing keys keep their defaults
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] on malformed TOML or unknown types
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read a TOML file, apply environment overrides and validate
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or parsed, an
    /// override is malformed, or the result is invalid
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env()?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Apply `SANDCELL_*` variables from the process environment
    ///
    /// # Errors
    /// Returns [`ConfigError::Env`] for a value that does not parse
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from any variable source
    ///
    /// # Errors
    /// Returns [`ConfigError::Env`] for a value that does not parse
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(image) = lookup(ENV_IMAGE) {
            self.cell.image = image;
        }
        if let Some(binary) = lookup(ENV_DOCKER) {
            self.cell.docker_binary = binary;
        }
        if let Some(value) = lookup(ENV_TIMEOUT_SECS) {
            self.cell.timeout_secs = value.trim().parse().map_err(|_| ConfigError::Env {
                var: ENV_TIMEOUT_SECS,
                value,
            })?;
        }
        Ok(())
    }

    /// Check every section
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] describing the first problem found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_cells == 0 {
            return Err(ConfigError::Invalid("max_concurrent_cells must be greater than zero".into()));
        }
        RiskClassifier::new(&self.classifier, self.roots.clone())
            .map_err(|e| ConfigError::Invalid(format!("classifier: {e}")))?;
        self.cell
            .validate(&self.roots)
            .map_err(|e| ConfigError::Invalid(format!("cell: {e}")))?;
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment override does not parse
    #[error("{var}: cannot use '{value}'")]
    Env { var: &'static str, value: String },

    /// Values parse but are unusable
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_validate() {
        let config = SandcellConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_concurrent_cells, 4);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = SandcellConfig::from_toml_str(
            r#"
            max_concurrent_cells = 2

            [cell]
            image = "custom:1"
            timeout_secs = 30

            [classifier.policy]
            trusted = ["polars"]
            "#,
        )
        .unwrap();

        assert_eq!(config.max_concurrent_cells, 2);
        assert_eq!(config.cell.image, "custom:1");
        assert_eq!(config.cell.timeout_secs, 30);
        assert_eq!(config.cell.pids_limit, CellConfig::default().pids_limit);
        assert_eq!(config.roots, SandboxRoots::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_IMAGE, "override:2"),
            (ENV_TIMEOUT_SECS, " 45 "),
            (ENV_DOCKER, "/usr/local/bin/podman"),
        ]);
        let mut config = SandcellConfig::new();
        config
            .apply_overrides(|var| env.get(var).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.cell.image, "override:2");
        assert_eq!(config.cell.timeout_secs, 45);
        assert_eq!(config.cell.docker_binary, "/usr/local/bin/podman");
    }

    #[test]
    fn test_bad_timeout_override_is_rejected() {
        let mut config = SandcellConfig::new();
        let err = config
            .apply_overrides(|var| (var == ENV_TIMEOUT_SECS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: ENV_TIMEOUT_SECS, .. }));
    }

    #[test]
    fn test_invalid_sections_are_rejected() {
        assert!(SandcellConfig::new().with_max_concurrent_cells(0).validate().is_err());
        assert!(SandcellConfig::new().with_timeout(Duration::ZERO).validate().is_err());
        assert!(SandcellConfig::new()
            .with_roots(SandboxRoots::new("/data", "/data/out"))
            .validate()
            .is_err());
    }
}
