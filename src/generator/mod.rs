//! Test harness generation.
//!
//! From a problem's typed signature and typed test-case inputs, emits a
//! self-contained driver program in the target language: a function
//! declaration holding the `STUDENT_CODE_HERE` placeholder, and a main
//! entry that materializes each case's inputs as typed literals, invokes
//! the function, and prints one JSON line per case in definition order.
//!
//! Generation is deterministic: the same problem and language always
//! produce byte-identical source.

mod cpp;
pub mod inject;
mod java;
mod python;

use anyhow::{bail, Result};

use crate::models::{Problem, TestCase, TypedValue};

/// Placeholder line marker replaced by the injector.
pub const PLACEHOLDER: &str = "STUDENT_CODE_HERE";

/// Generate the harness source for a problem in the given language.
pub fn generate(problem: &Problem, language: &str) -> Result<String> {
    if problem.function_name.trim().is_empty() {
        bail!("problem {} has no function name", problem.id);
    }

    for (i, tc) in problem.test_cases.iter().enumerate() {
        validate_case(problem, tc, i)?;
    }

    match language {
        "python" => python::generate(problem),
        "cpp" => cpp::generate(problem),
        "java" => java::generate(problem),
        other => bail!("unsupported language: {}", other),
    }
}

fn validate_case(problem: &Problem, tc: &TestCase, index: usize) -> Result<()> {
    let params = &problem.parameters.0;
    if tc.inputs.0.len() != params.len() {
        bail!(
            "test case {}: expected {} parameters but got {} inputs",
            index + 1,
            params.len(),
            tc.inputs.0.len()
        );
    }
    let expected = &tc.expected_output.0;
    if expected.type_tag.is_empty() || expected.value.is_null() {
        bail!(
            "test case {}: expected output has missing type or value",
            index + 1
        );
    }
    Ok(())
}

/// Split a type tag into its base type and array depth
/// (`"int[][]"` → `("int", 2)`).
pub(crate) fn split_tag(tag: &str) -> (&str, usize) {
    let mut base = tag;
    let mut dims = 0;
    while let Some(stripped) = base.strip_suffix("[]") {
        base = stripped;
        dims += 1;
    }
    (base, dims)
}

pub(crate) fn is_integer_tag(tag: &str) -> bool {
    matches!(tag, "int" | "long")
}

/// Format a JSON number as a source literal. Integer-typed values print
/// without a fraction; float-typed values keep one even when the fraction
/// is zero.
pub(crate) fn format_number(n: &serde_json::Number, integer_expected: bool) -> String {
    if integer_expected {
        if let Some(i) = n.as_i64() {
            return i.to_string();
        }
    }
    if let Some(f) = n.as_f64() {
        if f.fract() == 0.0 && f.is_finite() {
            if integer_expected {
                return format!("{}", f as i64);
            }
            return format!("{:.1}", f);
        }
        return f.to_string();
    }
    n.to_string()
}

/// Escape a string for a double-quoted source literal: backslash, quote,
/// and the control characters that would break the line structure.
pub(crate) fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out
}

pub(crate) fn input_pairs<'a>(
    problem: &'a Problem,
    tc: &'a TestCase,
) -> impl Iterator<Item = (&'a str, &'a TypedValue)> {
    problem
        .parameters
        .0
        .iter()
        .map(|p| p.name.as_str())
        .zip(tc.inputs.0.iter())
}


#[cfg(test)]
mod tests {
    use super::testutil::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn unsupported_language_is_rejected() {
        let problem = add_problem();
        assert!(generate(&problem, "cobol").is_err());
    }

    #[test]
    fn missing_function_name_is_rejected() {
        let mut problem = add_problem();
        problem.function_name = "  ".into();
        assert!(generate(&problem, "python").is_err());
    }

    #[test]
    fn arity_mismatch_is_rejected() {
        let problem = problem(
            "add",
            "int",
            &[("a", "int"), ("b", "int")],
            vec![case(
                1,
                vec![typed("int", json!(2))],
                typed("int", json!(5)),
            )],
        );
        let err = generate(&problem, "python").unwrap_err();
        assert!(err.to_string().contains("expected 2 parameters"));
    }

    #[test]
    fn empty_expected_output_is_rejected() {
        let problem = problem(
            "add",
            "int",
            &[("a", "int")],
            vec![case(
                1,
                vec![typed("int", json!(2))],
                typed("", json!(null)),
            )],
        );
        assert!(generate(&problem, "cpp").is_err());
    }

    #[test]
    fn generation_is_deterministic() {
        let problem = add_problem();
        for language in ["python", "cpp", "java"] {
            let first = generate(&problem, language).unwrap();
            let second = generate(&problem, language).unwrap();
            assert_eq!(first, second, "{} harness must be reproducible", language);
        }
    }

    #[test]
    fn every_harness_carries_exactly_one_placeholder() {
        let problem = add_problem();
        for language in ["python", "cpp", "java"] {
            let harness = generate(&problem, language).unwrap();
            assert_eq!(
                harness.matches(PLACEHOLDER).count(),
                1,
                "{} harness placeholder",
                language
            );
            assert!(harness.contains("USER_CODE_START"));
            assert!(harness.contains("USER_CODE_END"));
        }
    }

    #[test]
    fn tag_splitting() {
        assert_eq!(split_tag("int"), ("int", 0));
        assert_eq!(split_tag("int[]"), ("int", 1));
        assert_eq!(split_tag("string[][]"), ("string", 2));
    }

    #[test]
    fn number_formatting_follows_expected_type() {
        let n = serde_json::Number::from_f64(5.0).unwrap();
        assert_eq!(format_number(&n, true), "5");
        assert_eq!(format_number(&n, false), "5.0");
        let frac = serde_json::Number::from_f64(2.5).unwrap();
        assert_eq!(format_number(&frac, false), "2.5");
        let i = serde_json::Number::from(42);
        assert_eq!(format_number(&i, true), "42");
    }

    #[test]
    fn string_escaping_is_minimal() {
        assert_eq!(escape_string(r#"a"b\c"#), r#"a\"b\\c"#);
        assert_eq!(escape_string("line1\nline2"), "line1\\nline2");
    }
}
