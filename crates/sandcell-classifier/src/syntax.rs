//! Python syntax tree access via tree-sitter
//!
//! Parsing, pre-order traversal, syntax error location and evaluation of
//! plain string literals. Nothing here executes or imports the program.

use tree_sitter::{Node, Parser, Tree};

/// Location and description of the first syntax error in a tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SyntaxFault {
    /// 1-based line
    pub(crate) line: usize,
    /// 1-based column
    pub(crate) column: usize,
    /// What went wrong
    pub(crate) detail: String,
}

/// Parse Python source into a tree
///
/// Returns `Err` with a description when the grammar cannot be loaded or the
/// parser gives up; both are treated as unparseable input by the caller.
pub(crate) fn parse(source: &str) -> Result<Tree, String> {
    let mut parser = Parser::new();
    let language: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
    parser
        .set_language(&language)
        .map_err(|e| format!("python grammar unavailable: {e}"))?;
    parser
        .parse(source, None)
        .ok_or_else(|| "parser produced no tree".to_string())
}

/// Visit every node in pre-order (source order)
///
/// Iterative, so deeply nested input cannot overflow the stack.
pub(crate) fn walk<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>)) {
    let mut cursor = root.walk();
    loop {
        visit(cursor.node());
        if cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// Find the first syntax error, if any
///
/// Error and missing nodes come from the grammar's recovery. Python 2
/// `print`/`exec` statements parse in the grammar but are syntax errors for
/// the Python 3 interpreter the cell runs.
pub(crate) fn first_syntax_fault(root: Node<'_>) -> Option<SyntaxFault> {
    if !root.has_error() && !contains_python2_statement(root) {
        return None;
    }

    let mut fault = None;
    walk(root, |node| {
        if fault.is_some() {
            return;
        }
        let detail = if node.is_missing() {
            Some(format!("missing '{}'", node.kind()))
        } else if node.is_error() {
            Some("invalid syntax".to_string())
        } else if matches!(node.kind(), "print_statement" | "exec_statement") {
            Some(format!("Python 2 {} is not valid Python 3", node.kind().replace('_', " ")))
        } else {
            None
        };
        if let Some(detail) = detail {
            let pos = node.start_position();
            fault = Some(SyntaxFault {
                line: pos.row + 1,
                column: pos.column + 1,
                detail,
            });
        }
    });

    // has_error() can be set without a reachable error node in rare recovery
    // cases; fall back to the root position.
    fault.or_else(|| {
        Some(SyntaxFault {
            line: 1,
            column: 1,
            detail: "invalid syntax".to_string(),
        })
    })
}

fn contains_python2_statement(root: Node<'_>) -> bool {
    let mut found = false;
    walk(root, |node| {
        found |= matches!(node.kind(), "print_statement" | "exec_statement");
    });
    found
}

/// Source text of a node
pub(crate) fn text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or_default()
}

/// Named children, skipping comments
pub(crate) fn named_children<'t>(node: Node<'t>) -> Vec<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

/// Why an expression has no static string value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NotLiteral {
    /// Computed at runtime: a name, a call, an f-string
    Computed,
    /// A literal using `\N{...}` named escapes, which are not resolved
    NamedEscape,
}

/// Evaluate an expression that is a plain string literal
///
/// Handles prefixes (`r`, `b`, `u`), triple quotes, implicit concatenation and
/// redundant parentheses.
pub(crate) fn string_literal(node: Node<'_>, source: &str) -> Result<String, NotLiteral> {
    match node.kind() {
        "string" => {
            let mut cursor = node.walk();
            let interpolated = node
                .named_children(&mut cursor)
                .any(|child| child.kind() == "interpolation");
            if interpolated {
                return Err(NotLiteral::Computed);
            }
            decode_string(text(node, source))
        }
        "concatenated_string" => {
            let mut out = String::new();
            let mut named_escape = false;
            for part in named_children(node) {
                match string_literal(part, source) {
                    Ok(value) => out.push_str(&value),
                    Err(NotLiteral::NamedEscape) => named_escape = true,
                    Err(NotLiteral::Computed) => return Err(NotLiteral::Computed),
                }
            }
            if named_escape {
                return Err(NotLiteral::NamedEscape);
            }
            Ok(out)
        }
        "parenthesized_expression" => match named_children(node).as_slice() {
            [inner] => string_literal(*inner, source),
            _ => Err(NotLiteral::Computed),
        },
        _ => Err(NotLiteral::Computed),
    }
}

/// Decode the text of one string token, including prefix and quotes
fn decode_string(token: &str) -> Result<String, NotLiteral> {
    let prefix_len = token
        .find(|c: char| c == '\'' || c == '"')
        .unwrap_or(token.len());
    let prefix = token[..prefix_len].to_ascii_lowercase();
    if prefix.contains('f') || prefix.contains('t') {
        return Err(NotLiteral::Computed);
    }
    let raw = prefix.contains('r');
    let bytes = prefix.contains('b');

    let rest = &token[prefix_len..];
    let quote = ["\"\"\"", "'''", "\"", "'"]
        .into_iter()
        .find(|q| rest.starts_with(q) && rest.len() >= 2 * q.len() && rest.ends_with(q))
        .ok_or(NotLiteral::Computed)?;
    let body = &rest[quote.len()..rest.len() - quote.len()];

    if raw {
        Ok(body.to_string())
    } else {
        unescape(body, bytes)
    }
}

/// Resolve Python backslash escapes
///
/// Unknown escapes are kept verbatim, as Python does. `\N{...}` in a text
/// literal is refused rather than looked up.
fn unescape(body: &str, bytes: bool) -> Result<String, NotLiteral> {
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        let Some(next) = chars.next() else {
            out.push('\\');
            break;
        };
        match next {
            '\n' => {}
            '\\' => out.push('\\'),
            '\'' => out.push('\''),
            '"' => out.push('"'),
            'a' => out.push('\x07'),
            'b' => out.push('\x08'),
            'f' => out.push('\x0c'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            't' => out.push('\t'),
            'v' => out.push('\x0b'),
            'x' => push_hex(&mut out, &mut chars, 2, "\\x"),
            'u' if !bytes => push_hex(&mut out, &mut chars, 4, "\\u"),
            'U' if !bytes => push_hex(&mut out, &mut chars, 8, "\\U"),
            'N' if !bytes => return Err(NotLiteral::NamedEscape),
            '0'..='7' => {
                let mut value = next.to_digit(8).unwrap_or(0);
                for _ in 0..2 {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                out.push(char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            other => {
                out.push('\\');
                out.push(other);
            }
        }
    }
    Ok(out)
}

fn push_hex(
    out: &mut String,
    chars: &mut std::iter::Peekable<std::str::Chars<'_>>,
    digits: usize,
    escape: &str,
) {
    let mut hex = String::with_capacity(digits);
    while hex.len() < digits {
        match chars.peek() {
            Some(c) if c.is_ascii_hexdigit() => {
                hex.push(*c);
                chars.next();
            }
            _ => break,
        }
    }
    let decoded = (hex.len() == digits)
        .then(|| u32::from_str_radix(&hex, 16).ok())
        .flatten()
        .and_then(char::from_u32);
    match decoded {
        Some(c) => out.push(c),
        None => {
            out.push_str(escape);
            out.push_str(&hex);
        }
    }
}
