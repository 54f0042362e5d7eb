//! User-code injection.
//!
//! Splices the student's submission into the harness at the placeholder
//! line. If the submission looks like a complete function definition it is
//! unwrapped to just the body first; the detection is a cheap textual
//! heuristic, not a parse, and it must not mistake a body statement
//! containing a call-like expression for a definition.

use super::PLACEHOLDER;

/// Inject user code into the harness for the given language.
///
/// If the placeholder is absent the harness is returned unchanged; that is
/// an upstream invariant violation the caller may log but not repair.
pub fn inject(harness: &str, user_code: &str, language: &str) -> String {
    let user_code = match language {
        "python" => unwrap_python(user_code),
        "cpp" | "java" => unwrap_braced(user_code, language),
        _ => return harness.to_string(),
    };

    let lines: Vec<&str> = harness.split('\n').collect();
    let Some(idx) = lines.iter().position(|line| line.contains(PLACEHOLDER)) else {
        return harness.to_string();
    };

    let indent: String = lines[idx]
        .chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .collect();

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    out.extend(lines[..idx].iter().map(|s| s.to_string()));
    for line in user_code.trim().split('\n') {
        if line.trim().is_empty() {
            out.push(String::new());
        } else {
            out.push(format!("{}{}", indent, line));
        }
    }
    out.extend(lines[idx + 1..].iter().map(|s| s.to_string()));
    out.join("\n")
}

/// If the first non-blank line starts a function definition, drop it and
/// dedent the remainder by its minimum leading whitespace.
fn unwrap_python(code: &str) -> String {
    let code = code.trim();
    let lines: Vec<&str> = code.split('\n').collect();
    let first = lines.iter().position(|line| !line.trim().is_empty());

    match first {
        Some(i) if lines[i].trim_start().starts_with("def ") => dedent(&lines[i + 1..]),
        _ => code.to_string(),
    }
}

fn dedent(lines: &[&str]) -> String {
    let min_indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start_matches([' ', '\t']).len())
        .min()
        .unwrap_or(0);

    lines
        .iter()
        .map(|line| {
            if line.trim().is_empty() {
                ""
            } else {
                &line[min_indent.min(line.len())..]
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Unwrap a braced-language definition to its body, or return the code
/// verbatim when it does not look like one.
///
/// The code is a definition only when, scanning outside string and char
/// literals, `(` then `)` then `{` appear in order, no `;` precedes the
/// first `(`, and the tokens before `(` read like `[modifiers]* type name`.
fn unwrap_braced(code: &str, language: &str) -> String {
    let code = code.trim();
    let scan = scan_structure(code);

    let (Some(open_paren), Some(close_paren), Some(open_brace)) =
        (scan.first_paren, scan.close_paren, scan.first_brace)
    else {
        return code.to_string();
    };
    if !(open_paren < close_paren && close_paren < open_brace) {
        return code.to_string();
    }
    if scan.semicolon_before_paren {
        return code.to_string();
    }
    if !looks_like_signature(&code[..open_paren], language) {
        return code.to_string();
    }

    let end = code.rfind('}').unwrap_or(code.len());
    code[open_brace + 1..end].trim().to_string()
}

struct Structure {
    first_paren: Option<usize>,
    close_paren: Option<usize>,
    first_brace: Option<usize>,
    semicolon_before_paren: bool,
}

fn scan_structure(code: &str) -> Structure {
    let mut out = Structure {
        first_paren: None,
        close_paren: None,
        first_brace: None,
        semicolon_before_paren: false,
    };
    let mut in_string = false;
    let mut in_char = false;
    let mut escaped = false;

    for (i, c) in code.char_indices() {
        if in_string || in_char {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if in_string && c == '"' {
                in_string = false;
            } else if in_char && c == '\'' {
                in_char = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '\'' => in_char = true,
            ';' if out.first_paren.is_none() => out.semicolon_before_paren = true,
            '(' if out.first_paren.is_none() => out.first_paren = Some(i),
            ')' if out.first_paren.is_some() && out.close_paren.is_none() => {
                out.close_paren = Some(i)
            }
            '{' if out.first_brace.is_none() => out.first_brace = Some(i),
            _ => {}
        }
    }
    out
}

const SIGNATURE_KEYWORDS: &[&str] = &[
    "public",
    "private",
    "protected",
    "static",
    "final",
    "synchronized",
    "void",
    "int",
    "boolean",
    "String",
    "char",
    "double",
    "float",
    "long",
    "short",
    "byte",
    "auto",
    "bool",
    "unsigned",
    "signed",
];

fn looks_like_signature(before_paren: &str, language: &str) -> bool {
    let before = before_paren.trim();
    let tokens: Vec<&str> = before.split_whitespace().collect();
    let Some(first) = tokens.first() else {
        return false;
    };

    if SIGNATURE_KEYWORDS.contains(first) {
        return true;
    }

    // C-family without modifiers: `vector<int> name`, `size_t name`.
    if language == "cpp"
        && tokens.len() >= 2
        && !before.contains('.')
        && !before.contains("->")
        && tokens.iter().all(|t| identifier_like(t))
    {
        return true;
    }

    false
}

fn identifier_like(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    token
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '<' | '>' | ',' | '&' | '*'))
}
