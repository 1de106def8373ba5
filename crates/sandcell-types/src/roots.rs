//! The two writable filesystem roots inside an execution cell
//!
//! Both the classifier's path policy and the cell's staging/harvest steps use
//! the same [`SandboxRoots`], so they cannot drift apart.

use serde::{Deserialize, Serialize};

/// Default input root inside the cell
pub const DEFAULT_INPUT_ROOT: &str = "/tmp/input";
/// Default output root inside the cell
pub const DEFAULT_OUTPUT_ROOT: &str = "/tmp/output";

/// Input and output roots (absolute POSIX paths inside the cell)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxRoots {
    /// Where input artifacts are staged
    pub input_root: String,
    /// Where the program writes output artifacts
    pub output_root: String,
}

impl Default for SandboxRoots {
    fn default() -> Self {
        Self {
            input_root: DEFAULT_INPUT_ROOT.to_string(),
            output_root: DEFAULT_OUTPUT_ROOT.to_string(),
        }
    }
}

impl SandboxRoots {
    /// Create roots from explicit paths
    #[inline]
    #[must_use]
    pub fn new(input_root: impl Into<String>, output_root: impl Into<String>) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
        }
    }

    /// Check both roots are absolute, normalised and disjoint
    ///
    /// # Errors
    /// Returns [`RootsError`] naming the offending root
    pub fn validate(&self) -> Result<(), RootsError> {
        for root in [&self.input_root, &self.output_root] {
            match normalize_posix(root) {
                Some(norm) if root.starts_with('/') && &norm == root && norm != "/" => {}
                _ => return Err(RootsError::NotAbsolute(root.clone())),
            }
        }
        if is_within(&self.input_root, &self.output_root)
            || is_within(&self.output_root, &self.input_root)
        {
            return Err(RootsError::Overlapping {
                input: self.input_root.clone(),
                output: self.output_root.clone(),
            });
        }
        Ok(())
    }

    /// Check whether `path` lies inside either root
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.root_for(path).is_some()
    }

    /// The root that `path` lies inside, if any
    #[must_use]
    pub fn root_for(&self, path: &str) -> Option<&str> {
        let normalized = normalize_posix(path)?;
        [self.input_root.as_str(), self.output_root.as_str()]
            .into_iter()
            .find(|root| is_within(&normalized, root))
    }
}

/// Lexically normalise an absolute POSIX path
///
/// Resolves `.` and `..` segments and collapses repeated separators.
/// Returns `None` for relative paths and for paths that climb above `/`.
#[must_use]
pub fn normalize_posix(path: &str) -> Option<String> {
    if !path.starts_with('/') {
        return None;
    }
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(format!("/{}", parts.join("/")))
}

/// `path` equals `root` or is a descendant of it (both normalised)
fn is_within(path: &str, root: &str) -> bool {
    path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Root configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RootsError {
    /// Root is relative, not normalised, or `/`
    #[error("sandbox root '{0}' must be a normalised absolute path below /")]
    NotAbsolute(String),

    /// One root contains the other
    #[error("sandbox roots overlap: input '{input}', output '{output}'")]
    Overlapping { input: String, output: String },
}
