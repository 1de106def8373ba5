//! Named byte blobs moved into and out of an execution cell
//!
//! [`ArtifactName`] is validated once, at construction: a name that exists is
//! a simple filename that cannot escape the directory it is staged into.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Maximum artifact name length in bytes (common filesystem limit)
pub const MAX_NAME_LEN: usize = 255;

/// Output artifacts harvested from a cell, keyed by path relative to the output root
pub type OutputArtifacts = BTreeMap<String, Vec<u8>>;

/// A simple filename for an input artifact
///
/// # Rules
/// - non-empty, at most [`MAX_NAME_LEN`] bytes
/// - no `/` or `\` separators
/// - not `.` or `..`
/// - no NUL or other control characters
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactName(String);

impl ArtifactName {
    /// Validate and wrap a filename
    ///
    /// # Errors
    /// Returns [`ArtifactNameError`] describing the first rule the name breaks
    pub fn new(name: impl Into<String>) -> Result<Self, ArtifactNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ArtifactNameError::Empty);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(ArtifactNameError::TooLong {
                max: MAX_NAME_LEN,
                actual: name.len(),
            });
        }
        if name == "." || name == ".." {
            return Err(ArtifactNameError::Traversal(name));
        }
        if name.contains(['/', '\\']) {
            return Err(ArtifactNameError::Separator(name));
        }
        if name.chars().any(char::is_control) {
            return Err(ArtifactNameError::ControlCharacter(name));
        }
        Ok(Self(name))
    }

    /// Borrow the name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ArtifactName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ArtifactName {
    type Err = ArtifactNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for ArtifactName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl serde::Serialize for ArtifactName {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for ArtifactName {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Self::new(name).map_err(serde::de::Error::custom)
    }
}

/// An input file staged into the cell's input root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputArtifact {
    /// Filename inside the input root
    pub name: ArtifactName,
    /// Opaque payload
    pub bytes: Vec<u8>,
}

impl InputArtifact {
    /// Create an input artifact from a validated name
    #[inline]
    #[must_use]
    pub fn new(name: ArtifactName, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name,
            bytes: bytes.into(),
        }
    }

    /// Validate the name and create an input artifact
    ///
    /// # Errors
    /// Returns [`ArtifactNameError`] if the name is not a simple filename
    pub fn named(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Result<Self, ArtifactNameError> {
        Ok(Self::new(ArtifactName::new(name)?, bytes))
    }

    /// Payload size in bytes
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Check if the payload is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Artifact name validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArtifactNameError {
    /// Empty name
    #[error("artifact name is empty")]
    Empty,

    /// Name longer than the filesystem allows
    #[error("artifact name too long (max {max} bytes, got {actual})")]
    TooLong { max: usize, actual: usize },

    /// `.` or `..`
    #[error("artifact name '{0}' refers to a directory")]
    Traversal(String),

    /// Contains a path separator
    #[error("artifact name '{0}' contains a path separator")]
    Separator(String),

    /// Contains NUL or another control character
    #[error("artifact name {0:?} contains a control character")]
    ControlCharacter(String),
}
