//! Task results and approval grants

use sandcell_cell::ExecutionOutcome;
use sandcell_classifier::Diagnostic;
use sandcell_types::{ProgramDigest, ProgramText};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Permission to run one exact program despite a MEDIUM verdict
///
/// Bound to the program's digest; it authorises nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalGrant {
    digest: ProgramDigest,
    flagged_imports: BTreeSet<String>,
}

impl ApprovalGrant {
    /// Grant for `program`, recording which imports the reviewer accepted
    #[must_use]
    pub fn for_program(program: &ProgramText, flagged_imports: BTreeSet<String>) -> Self {
        Self {
            digest: program.digest(),
            flagged_imports,
        }
    }

    /// Digest of the approved program
    #[inline]
    #[must_use]
    pub fn digest(&self) -> ProgramDigest {
        self.digest
    }

    /// Imports the reviewer saw flagged
    #[inline]
    #[must_use]
    pub fn flagged_imports(&self) -> &BTreeSet<String> {
        &self.flagged_imports
    }

    /// Check whether this grant is for `program`
    #[must_use]
    pub fn covers(&self, program: &ProgramText) -> bool {
        self.digest == program.digest()
    }
}

/// What happened to one task
///
/// `Blocked` and `NeedsApproval` mean the program never ran. `Completed`
/// means it ran; check [`ExecutionOutcome::succeeded`] for how that went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResult {
    /// HIGH risk; never runs
    Blocked {
        rationale: String,
        flagged_imports: BTreeSet<String>,
    },

    /// MEDIUM risk; runs only through an approval
    NeedsApproval {
        rationale: String,
        flagged_imports: BTreeSet<String>,
        allowed_imports: BTreeSet<String>,
        /// The full program text, exactly as it would run
        code_preview: String,
        diagnostics: Vec<Diagnostic>,
        grant: ApprovalGrant,
    },

    /// Ran in a cell
    Completed { outcome: ExecutionOutcome },
}

impl TaskResult {
    /// Status label
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            Self::Blocked { .. } => "blocked",
            Self::NeedsApproval { .. } => "needs_approval",
            Self::Completed { .. } => "completed",
        }
    }

    #[inline]
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    #[inline]
    #[must_use]
    pub fn needs_approval(&self) -> bool {
        matches!(self, Self::NeedsApproval { .. })
    }

    /// The execution outcome, if the program ran
    #[must_use]
    pub fn outcome(&self) -> Option<&ExecutionOutcome> {
        match self {
            Self::Completed { outcome } => Some(outcome),
            _ => None,
        }
    }

    /// Why the program did not run
    #[must_use]
    pub fn rationale(&self) -> Option<&str> {
        match self {
            Self::Blocked { rationale, .. } | Self::NeedsApproval { rationale, .. } => Some(rationale),
            Self::Completed { .. } => None,
        }
    }

    /// The grant a reviewer would hand back to run this program
    #[must_use]
    pub fn grant(&self) -> Option<&ApprovalGrant> {
        match self {
            Self::NeedsApproval { grant, .. } => Some(grant),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_is_bound_to_exact_text() {
        let program = ProgramText::from("import requests");
        let grant = ApprovalGrant::for_program(&program, BTreeSet::from(["requests".to_string()]));

        assert!(grant.covers(&program));
        assert!(!grant.covers(&ProgramText::from("import requests ")));
    }

    #[test]
    fn test_grant_survives_json() {
        let program = ProgramText::from("import requests");
        let grant = ApprovalGrant::for_program(&program, BTreeSet::from(["requests".to_string()]));

        let json = serde_json::to_string(&grant).unwrap();
        let back: ApprovalGrant = serde_json::from_str(&json).unwrap();
        assert_eq!(back, grant);
        assert!(back.covers(&program));
    }

    #[test]
    fn test_blocked_serializes_with_status_tag() {
        let result = TaskResult::Blocked {
            rationale: "HIGH RISK imports detected (always blocked): os".into(),
            flagged_imports: BTreeSet::from(["os".to_string()]),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "blocked");
        assert_eq!(json["flagged_imports"][0], "os");
        assert_eq!(result.status(), "blocked");
        assert!(result.outcome().is_none());
    }
}
