//! Shared data model for problems, submissions, and grading results.
//!
//! Statuses form a closed alphabet used both for the overall result and for
//! per-test-case entries. Wire structs serialize to the JSON shape the
//! backend expects at `/internal/submissions/<id>/result`.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

/// Grading status alphabet.
///
/// The wire spelling ("Wrong Answer", not "wrong_answer") is shared with
/// the backend; `Display` and serde both produce it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Compile Error")]
    CompileError,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
    #[serde(rename = "Time Limit Exceeded")]
    TimeLimitExceeded,
    #[serde(rename = "Memory Limit Exceeded")]
    MemoryLimitExceeded,
    #[serde(rename = "Output Limit Exceeded")]
    OutputLimitExceeded,
    #[serde(rename = "System Error")]
    SystemError,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Pending => "Pending",
            Status::Accepted => "Accepted",
            Status::WrongAnswer => "Wrong Answer",
            Status::CompileError => "Compile Error",
            Status::RuntimeError => "Runtime Error",
            Status::TimeLimitExceeded => "Time Limit Exceeded",
            Status::MemoryLimitExceeded => "Memory Limit Exceeded",
            Status::OutputLimitExceeded => "Output Limit Exceeded",
            Status::SystemError => "System Error",
        };
        write!(f, "{}", s)
    }
}

/// One `{type, value}` pair as stored in test-case JSONB columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedValue {
    #[serde(rename = "type")]
    pub type_tag: String,
    pub value: serde_json::Value,
}

/// A named, typed function parameter from the problem definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
}

/// Per-language override of the problem's resource limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageLimit {
    #[serde(rename = "timeMs")]
    pub time_ms: u32,
    #[serde(rename = "memoryKb")]
    pub memory_kb: u32,
}

/// A programming problem with a typed function signature.
#[derive(Debug, Clone, FromRow)]
pub struct Problem {
    pub id: i64,
    pub title: String,
    pub function_name: String,
    pub return_type: String,
    pub parameters: Json<Vec<Parameter>>,
    pub time_limit_ms: i32,
    pub memory_limit_kb: i32,
    #[sqlx(default)]
    pub language_limits: Option<Json<HashMap<String, LanguageLimit>>>,
    #[sqlx(skip)]
    pub test_cases: Vec<TestCase>,
}

impl Problem {
    /// Effective base limits for a language: the per-language override if
    /// one is set, else the problem defaults.
    pub fn limits_for_language(&self, language: &str) -> (u32, u32) {
        if let Some(limits) = &self.language_limits {
            if let Some(limit) = limits.get(language) {
                return (limit.time_ms, limit.memory_kb);
            }
        }
        (self.time_limit_ms as u32, self.memory_limit_kb as u32)
    }
}

/// A single test case: an ordered typed input tuple and one expected output.
///
/// Hidden and public cases are graded identically; visibility only matters
/// to the frontend.
#[derive(Debug, Clone, FromRow)]
pub struct TestCase {
    pub id: i64,
    pub inputs: Json<Vec<TypedValue>>,
    pub expected_output: Json<TypedValue>,
    pub points: i32,
    pub is_hidden: bool,
}

/// A student's code submission.
#[derive(Debug, Clone, FromRow)]
pub struct Submission {
    pub id: i64,
    pub problem_id: i64,
    pub source_code: String,
    pub language: String,
}

/// Result of one test case, as published to the backend.
///
/// `status` is a string rather than [`Status`] so partial-execution entries
/// can carry the "Partial Run - <cause>" prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub test_case_id: Option<i64>,
    pub status: String,
    pub execution_time_ms: u32,
    pub memory_used_kb: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_received: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TestCaseResult {
    /// Entry with no metrics, used for compile errors and structural
    /// failures where nothing ran.
    pub fn bare(status: Status, error_message: impl Into<String>) -> Self {
        Self {
            test_case_id: None,
            status: status.to_string(),
            execution_time_ms: 0,
            memory_used_kb: 0,
            output_received: None,
            error_message: Some(error_message.into()),
        }
    }
}

/// Overall grading result for one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingResult {
    pub overall_status: Status,
    pub results: Vec<TestCaseResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_metrics: Option<QualityMetrics>,
}

impl GradingResult {
    /// Single-entry result used when the whole run collapses to one
    /// terminal outcome (compile error, memory gate, system error).
    pub fn single(status: Status, entry: TestCaseResult) -> Self {
        Self {
            overall_status: status,
            results: vec![entry],
            quality_metrics: None,
        }
    }
}

/// Optional code-quality sidecar computed by an analyzer collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub quality_score: i32,
    pub complexity_score: i32,
    pub style_score: i32,
    pub security_score: i32,
    pub issues: Vec<QualityIssue>,
    pub metrics: ComplexityMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIssue {
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// "error", "warning", or "info"
    pub severity: String,
    /// "style", "complexity", "security", or "best-practice"
    pub category: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplexityMetrics {
    pub cyclomatic_complexity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cognitive_complexity: Option<u32>,
    pub max_nesting_depth: u32,
    pub function_length: u32,
    pub comment_lines: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintainability_index: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_wire_spelling() {
        assert_eq!(
            serde_json::to_string(&Status::WrongAnswer).unwrap(),
            "\"Wrong Answer\""
        );
        assert_eq!(Status::TimeLimitExceeded.to_string(), "Time Limit Exceeded");
        let parsed: Status = serde_json::from_str("\"Memory Limit Exceeded\"").unwrap();
        assert_eq!(parsed, Status::MemoryLimitExceeded);
    }

    #[test]
    fn language_limit_override_falls_back_to_defaults() {
        let mut limits = HashMap::new();
        limits.insert(
            "java".to_string(),
            LanguageLimit {
                time_ms: 3000,
                memory_kb: 512_000,
            },
        );
        let problem = Problem {
            id: 1,
            title: "add".into(),
            function_name: "add".into(),
            return_type: "int".into(),
            parameters: Json(vec![]),
            time_limit_ms: 1000,
            memory_limit_kb: 256_000,
            language_limits: Some(Json(limits)),
            test_cases: vec![],
        };

        assert_eq!(problem.limits_for_language("java"), (3000, 512_000));
        assert_eq!(problem.limits_for_language("cpp"), (1000, 256_000));
    }

    #[test]
    fn result_serialization_skips_empty_fields() {
        let result = GradingResult {
            overall_status: Status::Accepted,
            results: vec![TestCaseResult {
                test_case_id: Some(7),
                status: Status::Accepted.to_string(),
                execution_time_ms: 12,
                memory_used_kb: 1024,
                output_received: Some("5".into()),
                error_message: None,
            }],
            quality_metrics: None,
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["overall_status"], "Accepted");
        assert_eq!(json["results"][0]["test_case_id"], 7);
        assert!(json["results"][0].get("error_message").is_none());
        assert!(json.get("quality_metrics").is_none());
    }
}
