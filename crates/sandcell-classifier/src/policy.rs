//! Import policy: the three disjoint module sets
//!
//! Every root module name falls into exactly one [`ModuleClass`]. Names that
//! match none of the sets are [`ModuleClass::Unknown`], which the classifier
//! treats like a conditional import: ask, never silently trust or block.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Always blocked: process control, raw sockets, unsafe deserialisation,
/// dynamic import, FFI, concurrency primitives and terminal control
pub const BLOCKED_MODULES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "shutil",
    "socket",
    "pickle",
    "shelve",
    "marshal",
    "importlib",
    "__import__",
    "builtins",
    "ctypes",
    "cffi",
    "multiprocessing",
    "threading",
    "_thread",
    "concurrent",
    "pty",
    "termios",
    "fcntl",
    "ioctl",
];

/// Conditionally trusted, with the justification shown to the reviewer
pub const CONDITIONAL_MODULES: &[(&str, &str)] = &[
    (
        "requests",
        "to make HTTP requests to external APIs (e.g., Stripe, NetSuite)",
    ),
    ("urllib", "to access web resources and download data"),
    ("urllib3", "to make advanced HTTP connections"),
    ("xlrd", "to read legacy Excel files (.xls format)"),
    ("pyxlsb", "to read binary Excel files (.xlsb format)"),
    ("xlwings", "to perform advanced Excel automation"),
    ("httpx", "to make modern async HTTP requests"),
];

/// Core trusted: data manipulation, numerics, spreadsheets, paths, dates,
/// text and collections
pub const TRUSTED_MODULES: &[&str] = &[
    "pandas",
    "openpyxl",
    "numpy",
    "pathlib",
    "datetime",
    "json",
    "csv",
    "re",
    "math",
    "statistics",
    "decimal",
    "collections",
];

/// Generic justification for a conditional module added without one
const DEFAULT_JUSTIFICATION: &str = "for functionality outside the core allowlist";

/// Which set a root module belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleClass {
    /// HIGH: never runs
    Blocked,
    /// MEDIUM: recognised, needs approval
    Conditional,
    /// LOW: allowlisted
    Trusted,
    /// MEDIUM: not recognised, needs approval
    Unknown,
}

/// Additional modules layered on top of the built-in sets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyOverrides {
    /// Extra always-blocked modules
    pub blocked: Vec<String>,
    /// Extra conditional modules, mapped to their justification (may be empty)
    pub conditional: BTreeMap<String, String>,
    /// Extra trusted modules
    pub trusted: Vec<String>,
}

impl PolicyOverrides {
    /// True when nothing is overridden
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty() && self.conditional.is_empty() && self.trusted.is_empty()
    }
}

/// The three disjoint module sets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportPolicy {
    blocked: BTreeSet<String>,
    conditional: BTreeMap<String, String>,
    trusted: BTreeSet<String>,
}

impl Default for ImportPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl ImportPolicy {
    /// The built-in sets
    #[must_use]
    pub fn standard() -> Self {
        Self {
            blocked: BLOCKED_MODULES.iter().map(|m| (*m).to_string()).collect(),
            conditional: CONDITIONAL_MODULES
                .iter()
                .map(|(m, why)| ((*m).to_string(), (*why).to_string()))
                .collect(),
            trusted: TRUSTED_MODULES.iter().map(|m| (*m).to_string()).collect(),
        }
    }

    /// The built-in sets extended with `overrides`
    ///
    /// # Errors
    /// Returns [`PolicyError`] if a name is not a valid module identifier or
    /// would end up in more than one set
    pub fn with_overrides(overrides: &PolicyOverrides) -> Result<Self, PolicyError> {
        let mut policy = Self::standard();

        for name in &overrides.blocked {
            policy.insert(name, ModuleClass::Blocked, None)?;
        }
        for (name, why) in &overrides.conditional {
            policy.insert(name, ModuleClass::Conditional, Some(why))?;
        }
        for name in &overrides.trusted {
            policy.insert(name, ModuleClass::Trusted, None)?;
        }

        Ok(policy)
    }

    fn insert(
        &mut self,
        name: &str,
        class: ModuleClass,
        justification: Option<&String>,
    ) -> Result<(), PolicyError> {
        validate_module_name(name)?;

        match self.classify(name) {
            ModuleClass::Unknown => {}
            existing if existing == class => return Ok(()),
            existing => {
                return Err(PolicyError::Overlap {
                    module: name.to_string(),
                    existing,
                    requested: class,
                })
            }
        }

        match class {
            ModuleClass::Blocked => {
                self.blocked.insert(name.to_string());
            }
            ModuleClass::Conditional => {
                let why = justification
                    .filter(|w| !w.trim().is_empty())
                    .map_or_else(|| DEFAULT_JUSTIFICATION.to_string(), |w| w.trim().to_string());
                self.conditional.insert(name.to_string(), why);
            }
            ModuleClass::Trusted => {
                self.trusted.insert(name.to_string());
            }
            ModuleClass::Unknown => {}
        }
        Ok(())
    }

    /// Classify a root module name
    #[must_use]
    pub fn classify(&self, root: &str) -> ModuleClass {
        if self.blocked.contains(root) {
            ModuleClass::Blocked
        } else if self.conditional.contains_key(root) {
            ModuleClass::Conditional
        } else if self.trusted.contains(root) {
            ModuleClass::Trusted
        } else {
            ModuleClass::Unknown
        }
    }

    /// Reviewer-facing justification for a conditional module
    #[must_use]
    pub fn justification(&self, root: &str) -> Option<&str> {
        self.conditional.get(root).map(String::as_str)
    }

    /// Number of modules in each set: (blocked, conditional, trusted)
    #[must_use]
    pub fn sizes(&self) -> (usize, usize, usize) {
        (self.blocked.len(), self.conditional.len(), self.trusted.len())
    }
}

fn validate_module_name(name: &str) -> Result<(), PolicyError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {
            chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(PolicyError::InvalidModuleName(name.to_string()))
    }
}

/// Import policy construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// Not a root module identifier
    #[error("invalid module name '{0}': expected a root module identifier")]
    InvalidModuleName(String),

    /// Module would be in two sets
    #[error("module '{module}' is already {existing:?}, cannot also be {requested:?}")]
    Overlap {
        module: String,
        existing: ModuleClass,
        requested: ModuleClass,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_sets_are_disjoint() {
        let policy = ImportPolicy::standard();
        for m in BLOCKED_MODULES {
            assert_eq!(policy.classify(m), ModuleClass::Blocked, "{m}");
        }
        for (m, _) in CONDITIONAL_MODULES {
            assert_eq!(policy.classify(m), ModuleClass::Conditional, "{m}");
        }
        for m in TRUSTED_MODULES {
            assert_eq!(policy.classify(m), ModuleClass::Trusted, "{m}");
        }
        let (b, c, t) = policy.sizes();
        assert_eq!(b + c + t, BLOCKED_MODULES.len() + CONDITIONAL_MODULES.len() + TRUSTED_MODULES.len());
    }

    #[test]
    fn unknown_modules_are_unknown() {
        let policy = ImportPolicy::standard();
        assert_eq!(policy.classify("bs4"), ModuleClass::Unknown);
        assert_eq!(policy.classify("pd"), ModuleClass::Unknown);
    }

    #[test]
    fn overrides_extend_sets() {
        let mut overrides = PolicyOverrides::default();
        overrides.trusted.push("itertools".into());
        overrides.blocked.push("signal".into());
        overrides.conditional.insert("boto3".into(), String::new());

        let policy = ImportPolicy::with_overrides(&overrides).unwrap();
        assert_eq!(policy.classify("itertools"), ModuleClass::Trusted);
        assert_eq!(policy.classify("signal"), ModuleClass::Blocked);
        assert_eq!(policy.classify("boto3"), ModuleClass::Conditional);
        assert_eq!(policy.justification("boto3"), Some(DEFAULT_JUSTIFICATION));
    }

    #[test]
    fn overrides_reject_overlap() {
        let overrides = PolicyOverrides {
            trusted: vec!["os".into()],
            ..PolicyOverrides::default()
        };
        let err = ImportPolicy::with_overrides(&overrides).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::Overlap {
                existing: ModuleClass::Blocked,
                requested: ModuleClass::Trusted,
                ..
            }
        ));
    }

    #[test]
    fn overrides_reject_dotted_names() {
        let overrides = PolicyOverrides {
            trusted: vec!["numpy.linalg".into()],
            ..PolicyOverrides::default()
        };
        assert!(matches!(
            ImportPolicy::with_overrides(&overrides),
            Err(PolicyError::InvalidModuleName(_))
        ));
    }

    #[test]
    fn repeating_a_builtin_entry_is_allowed() {
        let overrides = PolicyOverrides {
            trusted: vec!["pandas".into()],
            ..PolicyOverrides::default()
        };
        assert!(ImportPolicy::with_overrides(&overrides).is_ok());
    }
}
