//! Single-pass fact collection over a parsed program
//!
//! The scanner only records what it sees: import roots, bare calls to
//! dangerous builtins and the first argument of every bare `open()` call.
//! Policy is applied afterwards by the classifier.

use crate::syntax::{self, named_children, text, NotLiteral};
use tree_sitter::Node;

/// Builtins that execute, compile, import or read interactively
pub const DANGEROUS_BUILTINS: &[&str] = &["eval", "exec", "compile", "__import__", "input"];

/// Builtin whose path argument is checked separately
const FILE_OPEN: &str = "open";

/// Root reported for `from __future__ import ...`
const FUTURE_MODULE: &str = "__future__";

/// Where a node starts, 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Location {
    pub(crate) line: usize,
    pub(crate) column: usize,
}

impl Location {
    fn of(node: Node<'_>) -> Self {
        let pos = node.start_position();
        Self {
            line: pos.row + 1,
            column: pos.column + 1,
        }
    }
}

/// What the path argument of an `open()` call turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OpenTarget {
    /// A plain string literal, decoded
    Literal(String),
    /// A literal whose value is not resolved statically, as written
    Unresolved(String),
    /// Computed at runtime, or absent
    Dynamic,
}

/// One bare `open(...)` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OpenCall {
    pub(crate) at: Location,
    pub(crate) target: OpenTarget,
}

/// Everything the policy needs from one program
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct ProgramFacts {
    /// Root module names in source order, possibly repeated
    pub(crate) import_roots: Vec<String>,
    /// Dangerous builtins called by bare name, source order, deduplicated
    pub(crate) builtin_calls: Vec<String>,
    /// Bare `open()` calls in source order
    pub(crate) open_calls: Vec<OpenCall>,
}

/// Collect facts from the tree rooted at `root`
pub(crate) fn collect(root: Node<'_>, source: &str) -> ProgramFacts {
    let mut facts = ProgramFacts::default();

    syntax::walk(root, |node| match node.kind() {
        "import_statement" => {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                if let Some(root) = imported_root(name, source) {
                    facts.import_roots.push(root);
                }
            }
        }
        "import_from_statement" => {
            if let Some(root) = node
                .child_by_field_name("module_name")
                .and_then(|module| from_root(module, source))
            {
                facts.import_roots.push(root);
            }
        }
        "future_import_statement" => facts.import_roots.push(FUTURE_MODULE.to_string()),
        "call" => collect_call(node, source, &mut facts),
        _ => {}
    });

    facts
}

/// Root of `a.b.c` or `a.b as c` in an `import` statement
fn imported_root(name: Node<'_>, source: &str) -> Option<String> {
    let dotted = match name.kind() {
        "aliased_import" => name.child_by_field_name("name")?,
        _ => name,
    };
    root_segment(text(dotted, source))
}

/// Root of the module in `from X import ...`
///
/// `from . import x` names no module; `from .pkg import x` yields `pkg`.
fn from_root(module: Node<'_>, source: &str) -> Option<String> {
    match module.kind() {
        "relative_import" => named_children(module)
            .into_iter()
            .find(|child| child.kind() == "dotted_name")
            .and_then(|dotted| root_segment(text(dotted, source))),
        _ => root_segment(text(module, source)),
    }
}

fn root_segment(dotted: &str) -> Option<String> {
    let root: String = dotted
        .split('.')
        .next()?
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    (!root.is_empty()).then_some(root)
}

fn collect_call(node: Node<'_>, source: &str, facts: &mut ProgramFacts) {
    let Some(function) = node.child_by_field_name("function") else {
        return;
    };
    if function.kind() != "identifier" {
        return;
    }

    let name = text(function, source);
    if name == FILE_OPEN {
        facts.open_calls.push(OpenCall {
            at: Location::of(node),
            target: open_target(node, source),
        });
    } else if DANGEROUS_BUILTINS.contains(&name) && !facts.builtin_calls.iter().any(|b| b == name) {
        facts.builtin_calls.push(name.to_string());
    }
}

/// First positional argument, else the `file=` keyword
fn open_target(call: Node<'_>, source: &str) -> OpenTarget {
    let Some(arguments) = call.child_by_field_name("arguments") else {
        return OpenTarget::Dynamic;
    };
    if arguments.kind() != "argument_list" {
        return OpenTarget::Dynamic;
    }

    let args = named_children(arguments);
    let path = match args.first() {
        Some(first) if !is_keyword_or_splat(*first) => Some(*first),
        Some(first) if is_splat(*first) => None,
        _ => args.iter().copied().find_map(|arg| file_keyword(arg, source)),
    };

    let Some(expr) = path else {
        return OpenTarget::Dynamic;
    };
    match syntax::string_literal(expr, source) {
        Ok(value) => OpenTarget::Literal(value),
        Err(NotLiteral::NamedEscape) => OpenTarget::Unresolved(text(expr, source).to_string()),
        Err(NotLiteral::Computed) => OpenTarget::Dynamic,
    }
}

fn is_splat(node: Node<'_>) -> bool {
    matches!(node.kind(), "list_splat" | "dictionary_splat")
}

fn is_keyword_or_splat(node: Node<'_>) -> bool {
    node.kind() == "keyword_argument" || is_splat(node)
}

fn file_keyword<'t>(arg: Node<'t>, source: &str) -> Option<Node<'t>> {
    if arg.kind() != "keyword_argument" {
        return None;
    }
    let name = arg.child_by_field_name("name")?;
    (text(name, source) == "file")
        .then(|| arg.child_by_field_name("value"))
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn facts(source: &str) -> ProgramFacts {
        let tree = syntax::parse(source).unwrap();
        collect(tree.root_node(), source)
    }

    #[test]
    fn collects_import_roots() {
        let f = facts(
            "import numpy.linalg as la, json\n\
             from pandas.io import parsers\n\
             from . import sibling\n\
             from .pkg import thing\n\
             def f():\n    import requests\n",
        );
        assert_eq!(f.import_roots, vec!["numpy", "json", "pandas", "pkg", "requests"]);
    }

    #[test]
    fn reports_future_imports() {
        let f = facts("from __future__ import annotations\nimport csv\n");
        assert_eq!(f.import_roots, vec!["__future__", "csv"]);
    }

    #[test]
    fn only_bare_calls_count_as_builtins() {
        let f = facts("df.eval('a + b')\neval('1')\neval('2')\nexec(code)\n");
        assert_eq!(f.builtin_calls, vec!["eval", "exec"]);
    }

    #[test]
    fn open_is_not_a_dangerous_builtin() {
        let f = facts("open('/tmp/input/a.csv')\n");
        assert!(f.builtin_calls.is_empty());
        assert_eq!(f.open_calls.len(), 1);
    }

    #[test]
    fn open_targets() {
        let f = facts(
            "open('/etc/passwd')\n\
             open(name)\n\
             open(file='/tmp/output/r.csv', mode='w')\n\
             open(*args)\n\
             open()\n\
             open('/tmp/input/\\N{SOLIDUS}x')\n\
             fs.open('/etc/shadow')\n",
        );
        let targets: Vec<_> = f.open_calls.iter().map(|c| c.target.clone()).collect();
        assert_eq!(
            targets,
            vec![
                OpenTarget::Literal("/etc/passwd".into()),
                OpenTarget::Dynamic,
                OpenTarget::Literal("/tmp/output/r.csv".into()),
                OpenTarget::Dynamic,
                OpenTarget::Dynamic,
                OpenTarget::Unresolved("'/tmp/input/\\N{SOLIDUS}x'".into()),
            ]
        );
        assert_eq!(f.open_calls[1].at, Location { line: 2, column: 1 });
    }
}
