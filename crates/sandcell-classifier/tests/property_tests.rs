use proptest::prelude::*;
use sandcell_classifier::{
    RiskClassifier, RiskTier, BLOCKED_MODULES, CONDITIONAL_MODULES, TRUSTED_MODULES,
};
use sandcell_types::ProgramText;
use std::collections::BTreeSet;

fn trusted() -> impl Strategy<Value = &'static str> {
    proptest::sample::select(TRUSTED_MODULES)
}

fn blocked() -> impl Strategy<Value = &'static str> {
    proptest::sample::select(BLOCKED_MODULES)
}

fn conditional() -> impl Strategy<Value = &'static str> {
    proptest::sample::select(CONDITIONAL_MODULES).prop_map(|(m, _)| m)
}

/// Lowercase identifiers prefixed so they never collide with a known module
fn unknown() -> impl Strategy<Value = String> {
    "[a-z]{1,8}".prop_map(|s| format!("zz_{s}"))
}

fn program(imports: &[String]) -> ProgramText {
    let mut source = String::new();
    for module in imports {
        source.push_str(&format!("import {module}\n"));
    }
    source.push_str("result = 1 + 1\n");
    ProgramText::from(source)
}

proptest! {
    #[test]
    fn prop_blocked_import_dominates(
        mut safe in proptest::collection::vec(trusted().prop_map(String::from), 0..5),
        risky in proptest::collection::vec(conditional().prop_map(String::from), 0..3),
        bad in blocked(),
        position in 0..8usize,
    ) {
        safe.extend(risky);
        let at = position.min(safe.len());
        safe.insert(at, bad.to_string());

        let verdict = RiskClassifier::default().classify(&program(&safe));
        prop_assert_eq!(verdict.risk_tier(), RiskTier::High);
        prop_assert!(verdict.flagged_imports().contains(bad));
        prop_assert!(!verdict.may_proceed());
    }

    #[test]
    fn prop_trusted_only_is_low(
        modules in proptest::collection::vec(trusted().prop_map(String::from), 0..8),
    ) {
        let verdict = RiskClassifier::default().classify(&program(&modules));
        prop_assert_eq!(verdict.risk_tier(), RiskTier::Low);
        let expected: BTreeSet<String> = modules.into_iter().collect();
        prop_assert_eq!(verdict.allowed_imports(), &expected);
    }

    #[test]
    fn prop_medium_flags_exactly_conditional_and_unknown(
        safe in proptest::collection::vec(trusted().prop_map(String::from), 0..4),
        known in proptest::collection::vec(conditional().prop_map(String::from), 0..3),
        unknown in proptest::collection::vec(unknown(), 0..3),
    ) {
        prop_assume!(!known.is_empty() || !unknown.is_empty());

        let mut imports = safe.clone();
        imports.extend(known.iter().cloned());
        imports.extend(unknown.iter().cloned());

        let verdict = RiskClassifier::default().classify(&program(&imports));
        prop_assert_eq!(verdict.risk_tier(), RiskTier::Medium);
        prop_assert!(verdict.needs_approval());

        let expected: BTreeSet<String> = known.into_iter().chain(unknown).collect();
        prop_assert_eq!(verdict.flagged_imports(), &expected);
        let allowed: BTreeSet<String> = safe.into_iter().collect();
        prop_assert_eq!(verdict.allowed_imports(), &allowed);
    }

    #[test]
    fn prop_classification_is_deterministic(source in "[a-z_ ()'=.\n0-9/]{0,120}") {
        let classifier = RiskClassifier::default();
        let program = ProgramText::from(source);
        prop_assert_eq!(classifier.classify(&program), classifier.classify(&program));
    }

    #[test]
    fn prop_dynamic_open_never_blocks(name in "p_[a-z0-9_]{0,10}") {
        let program = ProgramText::from(format!("import pandas as pd\nf = open({name})\n"));
        let verdict = RiskClassifier::default().classify(&program);
        prop_assert_eq!(verdict.risk_tier(), RiskTier::Low);
        prop_assert!(!verdict.diagnostics().is_empty());
    }
}
