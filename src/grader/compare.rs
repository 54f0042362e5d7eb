//! Type-directed output comparison.
//!
//! The harness prints one JSON value per test case; equality against the
//! expected `{type, value}` is directed by the expected type tag. Any
//! coercion failure is a non-match, never an error.

use serde_json::Value;

use crate::generator::split_tag;
use crate::models::TypedValue;

const EPSILON: f64 = 1e-9;

/// Compare one output line against the expected typed value.
pub fn outputs_match(actual_line: &str, expected: &TypedValue) -> bool {
    let Ok(actual) = serde_json::from_str::<Value>(actual_line.trim()) else {
        return false;
    };
    compare(&actual, &expected.value, &expected.type_tag)
}

fn compare(actual: &Value, expected: &Value, tag: &str) -> bool {
    let (base, dims) = split_tag(tag);

    match (base, dims) {
        ("int" | "long", 0) => match (to_i64(actual), to_i64(expected)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        ("bool", 0) => match (actual, expected) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => false,
        },
        ("float" | "double", 0) => match (to_f64(actual), to_f64(expected)) {
            (Some(a), Some(b)) => (a - b).abs() < EPSILON,
            _ => false,
        },
        ("string", 0) => stringify(actual).trim() == stringify(expected).trim(),
        ("float" | "double", 1) => match (actual, expected) {
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| {
                        matches!((to_f64(x), to_f64(y)), (Some(x), Some(y)) if (x - y).abs() < EPSILON)
                    })
            }
            _ => false,
        },
        // Everything else: canonical JSON equality (key-order-independent,
        // whitespace-free by construction of Value comparison).
        _ => actual == expected,
    }
}

fn to_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        _ => None,
    }
}

fn to_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
