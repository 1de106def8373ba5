//! The risk classifier
//!
//! Decision order: size and syntax, blocked imports, conditional/unknown
//! imports, dangerous builtins, then `open()` paths. A HIGH verdict from an
//! earlier stage is final.

use crate::policy::{ImportPolicy, ModuleClass, PolicyError, PolicyOverrides};
use crate::scan::{self, OpenTarget, ProgramFacts};
use crate::syntax;
use crate::verdict::{join, Diagnostic, HighRiskTrigger, RiskVerdict};
use sandcell_types::{ProgramText, RootsError, SandboxRoots};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default limit on program size (256 KiB)
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 256 * 1024;

/// Classifier settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Programs larger than this are HIGH without parsing
    pub max_source_bytes: usize,
    /// Modules added to the built-in import sets
    pub policy: PolicyOverrides,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
            policy: PolicyOverrides::default(),
        }
    }
}

impl ClassifierConfig {
    /// Set the size limit
    #[must_use]
    pub fn with_max_source_bytes(mut self, bytes: usize) -> Self {
        self.max_source_bytes = bytes;
        self
    }

    /// Set the policy overrides
    #[must_use]
    pub fn with_policy(mut self, policy: PolicyOverrides) -> Self {
        self.policy = policy;
        self
    }
}

/// Classifier construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifierError {
    /// Import policy overrides are inconsistent
    #[error("import policy: {0}")]
    Policy(#[from] PolicyError),

    /// Sandbox roots are invalid
    #[error("sandbox roots: {0}")]
    Roots(#[from] RootsError),

    /// Size limit of zero
    #[error("max_source_bytes must be greater than zero")]
    ZeroSizeLimit,
}

/// Static LOW/MEDIUM/HIGH classifier for Python program text
///
/// Holds only immutable policy, so one instance can be shared across tasks.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    policy: ImportPolicy,
    roots: SandboxRoots,
    max_source_bytes: usize,
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self {
            policy: ImportPolicy::standard(),
            roots: SandboxRoots::default(),
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }
}

impl RiskClassifier {
    /// Create a classifier
    ///
    /// # Errors
    /// Returns [`ClassifierError`] for inconsistent policy overrides, invalid
    /// roots or a zero size limit
    pub fn new(config: &ClassifierConfig, roots: SandboxRoots) -> Result<Self, ClassifierError> {
        if config.max_source_bytes == 0 {
            return Err(ClassifierError::ZeroSizeLimit);
        }
        roots.validate()?;
        let policy = ImportPolicy::with_overrides(&config.policy)?;

        Ok(Self {
            policy,
            roots,
            max_source_bytes: config.max_source_bytes,
        })
    }

    /// The import policy in force
    #[must_use]
    pub fn policy(&self) -> &ImportPolicy {
        &self.policy
    }

    /// The roots `open()` paths are checked against
    #[must_use]
    pub fn roots(&self) -> &SandboxRoots {
        &self.roots
    }

    /// Classify a program without executing it
    ///
    /// Never fails: unparseable or oversized input is a HIGH verdict.
    #[tracing::instrument(skip_all, fields(digest = %program.digest().short(), bytes = program.len()))]
    pub fn classify(&self, program: &ProgramText) -> RiskVerdict {
        let verdict = self.decide(program.as_str());

        match &verdict {
            RiskVerdict::High { rationale, .. } => {
                tracing::warn!(tier = %verdict.risk_tier(), flagged = ?verdict.flagged_imports(), %rationale, "program blocked");
            }
            RiskVerdict::Medium { .. } => {
                tracing::info!(tier = %verdict.risk_tier(), flagged = ?verdict.flagged_imports(), "program needs approval");
            }
            RiskVerdict::Low { .. } => {
                tracing::info!(tier = %verdict.risk_tier(), allowed = ?verdict.allowed_imports(), "program allowed");
            }
        }
        tracing::debug!(diagnostics = verdict.diagnostics().len(), "classification finished");

        verdict
    }

    fn decide(&self, source: &str) -> RiskVerdict {
        if source.len() > self.max_source_bytes {
            return RiskVerdict::high(
                HighRiskTrigger::Oversized {
                    limit: self.max_source_bytes,
                    actual: source.len(),
                },
                format!(
                    "program too large to analyse: {} bytes exceeds the {}-byte limit",
                    source.len(),
                    self.max_source_bytes
                ),
            );
        }

        let tree = match syntax::parse(source) {
            Ok(tree) => tree,
            Err(detail) => {
                return RiskVerdict::high(
                    HighRiskTrigger::Unparseable { line: 1, column: 1 },
                    format!("unparseable: {detail}"),
                )
            }
        };
        let root = tree.root_node();

        if let Some(fault) = syntax::first_syntax_fault(root) {
            return RiskVerdict::high(
                HighRiskTrigger::Unparseable {
                    line: fault.line,
                    column: fault.column,
                },
                format!(
                    "unparseable: syntax error at line {}, column {}: {}",
                    fault.line, fault.column, fault.detail
                ),
            );
        }

        let facts = scan::collect(root, source);
        self.apply_policy(&facts)
    }

    fn apply_policy(&self, facts: &ProgramFacts) -> RiskVerdict {
        let mut blocked = BTreeSet::new();
        let mut flagged = BTreeSet::new();
        let mut allowed = BTreeSet::new();

        for root in &facts.import_roots {
            match self.policy.classify(root) {
                ModuleClass::Blocked => blocked.insert(root.clone()),
                ModuleClass::Conditional | ModuleClass::Unknown => flagged.insert(root.clone()),
                ModuleClass::Trusted => allowed.insert(root.clone()),
            };
        }

        if !blocked.is_empty() {
            return RiskVerdict::High {
                trigger: HighRiskTrigger::BlockedImport,
                rationale: format!("HIGH RISK imports detected (always blocked): {}", join(&blocked)),
                flagged_imports: blocked,
                diagnostics: Vec::new(),
            };
        }

        let dynamic_paths = self.dynamic_path_diagnostics(facts);

        if !facts.builtin_calls.is_empty() {
            return RiskVerdict::High {
                trigger: HighRiskTrigger::DangerousBuiltin {
                    names: facts.builtin_calls.clone(),
                },
                flagged_imports: BTreeSet::new(),
                rationale: format!(
                    "Dangerous builtin function call detected: {}",
                    facts.builtin_calls.join(", ")
                ),
                diagnostics: dynamic_paths,
            };
        }

        let forbidden: Vec<String> = facts
            .open_calls
            .iter()
            .filter_map(|call| match &call.target {
                OpenTarget::Literal(path) if !self.roots.contains(path) => Some(path.clone()),
                OpenTarget::Unresolved(written) => Some(written.clone()),
                OpenTarget::Literal(_) | OpenTarget::Dynamic => None,
            })
            .collect();
        if !forbidden.is_empty() {
            return RiskVerdict::High {
                rationale: format!(
                    "Unauthorized file access: {}. Only allowed in {} or {}.",
                    forbidden.join(", "),
                    self.roots.input_root,
                    self.roots.output_root
                ),
                trigger: HighRiskTrigger::ForbiddenPath { paths: forbidden },
                flagged_imports: BTreeSet::new(),
                diagnostics: dynamic_paths,
            };
        }

        if flagged.is_empty() {
            return RiskVerdict::Low {
                allowed_imports: allowed,
                diagnostics: dynamic_paths,
            };
        }

        let mut diagnostics = vec![Diagnostic::approval_required(&flagged)];
        diagnostics.extend(dynamic_paths);
        RiskVerdict::Medium {
            rationale: self.approval_rationale(&flagged),
            flagged_imports: flagged,
            allowed_imports: allowed,
            diagnostics,
        }
    }

    fn dynamic_path_diagnostics(&self, facts: &ProgramFacts) -> Vec<Diagnostic> {
        facts
            .open_calls
            .iter()
            .filter(|call| call.target == OpenTarget::Dynamic)
            .map(|call| {
                Diagnostic::dynamic_path(
                    call.at.line,
                    call.at.column,
                    (self.roots.input_root.as_str(), self.roots.output_root.as_str()),
                )
            })
            .collect()
    }

    /// Reviewer-facing explanation of why approval is needed
    fn approval_rationale(&self, flagged: &BTreeSet<String>) -> String {
        let known: Vec<(&str, &str)> = flagged
            .iter()
            .filter_map(|m| self.policy.justification(m).map(|why| (m.as_str(), why)))
            .collect();
        let unknown: Vec<&str> = flagged
            .iter()
            .map(String::as_str)
            .filter(|m| self.policy.justification(m).is_none())
            .collect();

        match (known.as_slice(), unknown.as_slice()) {
            ([(module, why)], []) => format!("Code needs '{module}' library {why}."),
            ([], [module]) => format!(
                "Code needs '{module}' library (not in standard whitelist). \
                 This is an unknown library that may provide additional functionality. \
                 Please verify this is a legitimate library before approving."
            ),
            _ => {
                let mut parts = Vec::new();
                if !known.is_empty() {
                    let reasons: Vec<String> = known
                        .iter()
                        .map(|(module, why)| format!("'{module}' ({why})"))
                        .collect();
                    parts.push(format!("Known libraries: {}", reasons.join(", ")));
                }
                if !unknown.is_empty() {
                    let names: Vec<String> = unknown.iter().map(|m| format!("'{m}'")).collect();
                    parts.push(format!(
                        "Unknown libraries (verify before approving): {}",
                        names.join(", ")
                    ));
                }
                format!("Code needs these libraries: {}.", parts.join("; "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::RiskTier;

    fn classify(source: &str) -> RiskVerdict {
        RiskClassifier::default().classify(&ProgramText::from(source))
    }

    #[test]
    fn single_known_rationale() {
        let v = classify("import requests\n");
        assert_eq!(
            v.rationale(),
            Some("Code needs 'requests' library to make HTTP requests to external APIs (e.g., Stripe, NetSuite).")
        );
    }

    #[test]
    fn single_unknown_rationale() {
        let v = classify("import bs4\n");
        let rationale = v.rationale().unwrap();
        assert!(rationale.starts_with("Code needs 'bs4' library (not in standard whitelist)."));
        assert!(rationale.contains("verify"));
    }

    #[test]
    fn mixed_rationale_groups_known_and_unknown() {
        let v = classify("import xlrd\nimport bs4\nimport requests\n");
        assert_eq!(
            v.rationale(),
            Some(
                "Code needs these libraries: Known libraries: \
                 'requests' (to make HTTP requests to external APIs (e.g., Stripe, NetSuite)), \
                 'xlrd' (to read legacy Excel files (.xls format)); \
                 Unknown libraries (verify before approving): 'bs4'."
            )
        );
    }

    #[test]
    fn oversized_programs_are_high() {
        let config = ClassifierConfig::default().with_max_source_bytes(8);
        let classifier = RiskClassifier::new(&config, SandboxRoots::default()).unwrap();
        let v = classifier.classify(&ProgramText::from("import pandas\n"));
        assert_eq!(
            v.high_risk_trigger(),
            Some(&HighRiskTrigger::Oversized { limit: 8, actual: 14 })
        );
    }

    #[test]
    fn rejects_zero_size_limit() {
        let config = ClassifierConfig::default().with_max_source_bytes(0);
        assert_eq!(
            RiskClassifier::new(&config, SandboxRoots::default()).unwrap_err(),
            ClassifierError::ZeroSizeLimit
        );
    }

    #[test]
    fn custom_roots_drive_path_policy() {
        let roots = SandboxRoots::new("/data/in", "/data/out");
        let classifier = RiskClassifier::new(&ClassifierConfig::default(), roots).unwrap();
        let ok = classifier.classify(&ProgramText::from("open('/data/in/x.csv')\n"));
        assert_eq!(ok.risk_tier(), RiskTier::Low);
        let bad = classifier.classify(&ProgramText::from("open('/tmp/input/x.csv')\n"));
        assert_eq!(bad.risk_tier(), RiskTier::High);
        assert!(bad.rationale().unwrap().contains("/data/in or /data/out"));
    }

    #[test]
    fn policy_overrides_apply() {
        let mut overrides = PolicyOverrides::default();
        overrides.trusted.push("itertools".into());
        let config = ClassifierConfig::default().with_policy(overrides);
        let classifier = RiskClassifier::new(&config, SandboxRoots::default()).unwrap();
        let v = classifier.classify(&ProgramText::from("import itertools\n"));
        assert_eq!(v.risk_tier(), RiskTier::Low);
    }
}
