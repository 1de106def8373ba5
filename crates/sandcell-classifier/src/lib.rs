//! Sandcell risk classifier
//!
//! Static LOW/MEDIUM/HIGH classification of untrusted Python program text.
//! The source is parsed with tree-sitter and walked; nothing is imported or
//! executed.
//!
//! # Tiers
//!
//! - **HIGH**: unparseable or oversized source, an always-blocked import, a
//!   bare call to a dangerous builtin, or `open()` on a literal path outside
//!   the sandbox roots. Never runs.
//! - **MEDIUM**: conditional or unknown imports. Runs after human approval.
//! - **LOW**: everything else.
//!
//! # Example
//!
//! ```rust
//! use sandcell_classifier::{RiskClassifier, RiskTier};
//! use sandcell_types::ProgramText;
//!
//! let classifier = RiskClassifier::default();
//!
//! let verdict = classifier.classify(&ProgramText::from("import os\nos.listdir('/')"));
//! assert_eq!(verdict.risk_tier(), RiskTier::High);
//! assert!(verdict.flagged_imports().contains("os"));
//!
//! let verdict = classifier.classify(&ProgramText::from("import pandas as pd"));
//! assert_eq!(verdict.risk_tier(), RiskTier::Low);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod classifier;
mod policy;
mod scan;
mod syntax;
mod verdict;

pub use classifier::{ClassifierConfig, ClassifierError, RiskClassifier, DEFAULT_MAX_SOURCE_BYTES};
pub use policy::{
    ImportPolicy, ModuleClass, PolicyError, PolicyOverrides, BLOCKED_MODULES, CONDITIONAL_MODULES,
    TRUSTED_MODULES,
};
pub use scan::DANGEROUS_BUILTINS;
pub use verdict::{Diagnostic, DiagnosticKind, HighRiskTrigger, RiskTier, RiskVerdict};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
