//! Risk verdicts
//!
//! A [`RiskVerdict`] is a sum type with one variant per tier. The flat view
//! callers need (`may_proceed`, `needs_approval`, ...) is derived from the
//! variant, so a HIGH verdict that may proceed cannot be built.

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};

static NO_IMPORTS: BTreeSet<String> = BTreeSet::new();

/// Risk tiers, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    /// Runs without approval
    Low,
    /// Runs only after human approval
    Medium,
    /// Never runs
    High,
}

impl RiskTier {
    /// Lowercase name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            RiskTier::Low => "low",
            RiskTier::Medium => "medium",
            RiskTier::High => "high",
        }
    }
}

impl Display for RiskTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What pushed a program into the HIGH tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HighRiskTrigger {
    /// Source did not parse as Python 3
    Unparseable {
        /// 1-based line of the first syntax error
        line: usize,
        /// 1-based column of the first syntax error
        column: usize,
    },
    /// Source exceeded the configured size limit
    Oversized {
        /// Configured limit in bytes
        limit: usize,
        /// Actual size in bytes
        actual: usize,
    },
    /// An always-blocked module was imported
    BlockedImport,
    /// A dangerous builtin was called by bare name
    DangerousBuiltin {
        /// Builtins called, in source order, deduplicated
        names: Vec<String>,
    },
    /// `open()` was called with a literal path outside both roots
    ForbiddenPath {
        /// Offending literal paths, in source order
        paths: Vec<String>,
    },
}

/// Kind of a non-blocking diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// `open()` path is computed at runtime
    DynamicPath,
    /// Conditional or unknown imports need approval
    ApprovalRequired,
}

/// A non-blocking warning attached to a verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Warning category
    pub kind: DiagnosticKind,
    /// 1-based source line, when the warning points at code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    /// 1-based source column, when the warning points at code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    /// Human-readable message
    pub message: String,
}

impl Diagnostic {
    /// Dynamic `open()` path at a source location
    #[must_use]
    pub fn dynamic_path(line: usize, column: usize, roots: (&str, &str)) -> Self {
        Self {
            kind: DiagnosticKind::DynamicPath,
            line: Some(line),
            column: Some(column),
            message: format!(
                "Dynamic file path in open(). Ensure it accesses only {} or {}.",
                roots.0, roots.1
            ),
        }
    }

    /// Approval notice for flagged imports
    #[must_use]
    pub fn approval_required(modules: &BTreeSet<String>) -> Self {
        Self {
            kind: DiagnosticKind::ApprovalRequired,
            line: None,
            column: None,
            message: format!("Requires user permission for: {}", join(modules)),
        }
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "{line}:{column}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Classification outcome for one program
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "risk_tier", rename_all = "lowercase")]
pub enum RiskVerdict {
    /// Only trusted imports, no dangerous calls, no illegal paths
    Low {
        allowed_imports: BTreeSet<String>,
        diagnostics: Vec<Diagnostic>,
    },
    /// Conditional or unknown imports; runs after approval
    Medium {
        flagged_imports: BTreeSet<String>,
        allowed_imports: BTreeSet<String>,
        rationale: String,
        diagnostics: Vec<Diagnostic>,
    },
    /// Never runs
    High {
        trigger: HighRiskTrigger,
        flagged_imports: BTreeSet<String>,
        rationale: String,
        diagnostics: Vec<Diagnostic>,
    },
}

impl RiskVerdict {
    /// Build a HIGH verdict with no flagged imports
    #[must_use]
    pub fn high(trigger: HighRiskTrigger, rationale: impl Into<String>) -> Self {
        Self::High {
            trigger,
            flagged_imports: BTreeSet::new(),
            rationale: rationale.into(),
            diagnostics: Vec::new(),
        }
    }

    /// Tier of this verdict
    #[inline]
    #[must_use]
    pub fn risk_tier(&self) -> RiskTier {
        match self {
            Self::Low { .. } => RiskTier::Low,
            Self::Medium { .. } => RiskTier::Medium,
            Self::High { .. } => RiskTier::High,
        }
    }

    /// True for LOW and MEDIUM
    #[inline]
    #[must_use]
    pub fn may_proceed(&self) -> bool {
        !matches!(self, Self::High { .. })
    }

    /// True only for MEDIUM
    #[inline]
    #[must_use]
    pub fn needs_approval(&self) -> bool {
        matches!(self, Self::Medium { .. })
    }

    /// Modules that drove the tier (empty for LOW)
    #[must_use]
    pub fn flagged_imports(&self) -> &BTreeSet<String> {
        match self {
            Self::Low { .. } => &NO_IMPORTS,
            Self::Medium { flagged_imports, .. } | Self::High { flagged_imports, .. } => {
                flagged_imports
            }
        }
    }

    /// Modules recognised as trusted (empty for HIGH)
    #[must_use]
    pub fn allowed_imports(&self) -> &BTreeSet<String> {
        match self {
            Self::Low { allowed_imports, .. } | Self::Medium { allowed_imports, .. } => {
                allowed_imports
            }
            Self::High { .. } => &NO_IMPORTS,
        }
    }

    /// Explanation; always present for MEDIUM and HIGH
    #[must_use]
    pub fn rationale(&self) -> Option<&str> {
        match self {
            Self::Low { .. } => None,
            Self::Medium { rationale, .. } | Self::High { rationale, .. } => Some(rationale),
        }
    }

    /// Non-blocking warnings in source order
    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            Self::Low { diagnostics, .. }
            | Self::Medium { diagnostics, .. }
            | Self::High { diagnostics, .. } => diagnostics,
        }
    }

    /// Why the verdict is HIGH, if it is
    #[must_use]
    pub fn high_risk_trigger(&self) -> Option<&HighRiskTrigger> {
        match self {
            Self::High { trigger, .. } => Some(trigger),
            _ => None,
        }
    }
}

/// Comma-join module names in set order
pub(crate) fn join(modules: &BTreeSet<String>) -> String {
    modules.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
