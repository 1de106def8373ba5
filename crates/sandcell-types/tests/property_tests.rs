use proptest::prelude::*;
use sandcell_types::{normalize_posix, ArtifactName, ProgramText, SandboxRoots};

fn segment() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just(".".to_string()),
        Just("..".to_string()),
        Just("tmp".to_string()),
        Just("input".to_string()),
        Just("output".to_string()),
        "[a-z]{1,6}",
    ]
}

fn absolute_path() -> impl Strategy<Value = String> {
    prop::collection::vec(segment(), 0..8).prop_map(|segments| format!("/{}", segments.join("/")))
}

proptest! {
    #[test]
    fn normalized_paths_are_fixed_points(path in absolute_path()) {
        if let Some(normalized) = normalize_posix(&path) {
            prop_assert_eq!(normalize_posix(&normalized), Some(normalized.clone()));
            prop_assert!(!normalized.contains("//"));
            prop_assert!(!normalized.split('/').any(|s| s == "." || s == ".."));
        }
    }

    #[test]
    fn climbing_out_of_a_root_leaves_the_sandbox(name in "[a-z]{1,8}") {
        let roots = SandboxRoots::default();
        let p = format!("/tmp/input/{name}");
        prop_assert!(roots.contains(&p));
        let p = format!("/tmp/output/sub/{name}");
        prop_assert!(roots.contains(&p));
        let p = format!("/tmp/input/../../etc/{name}");
        prop_assert!(!roots.contains(&p));
        let p = format!("/tmp/input{name}");
        prop_assert!(!roots.contains(&p));
        let p = format!("tmp/input/{name}");
        prop_assert!(!roots.contains(&p));
    }

    #[test]
    fn simple_filenames_are_accepted(name in "[A-Za-z0-9_-][A-Za-z0-9_.-]{0,63}") {
        let artifact = ArtifactName::new(name.clone()).unwrap();
        prop_assert_eq!(artifact.as_str(), name.as_str());
    }

    #[test]
    fn names_with_separators_are_rejected(
        head in "[a-z]{0,8}",
        sep in prop::sample::select(vec!['/', '\\']),
        tail in "[a-z]{0,8}",
    ) {
        let candidate = format!("{head}{sep}{tail}");
        prop_assert!(ArtifactName::new(candidate).is_err());
    }

    #[test]
    fn digest_depends_only_on_text(text in ".{0,200}") {
        let a = ProgramText::from(text.as_str());
        let b = ProgramText::from(text.clone());
        prop_assert_eq!(a.digest(), b.digest());
        prop_assert_ne!(a.digest(), ProgramText::from(format!("{text} ")).digest());
    }
}
