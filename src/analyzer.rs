//! Optional code-quality analysis.
//!
//! Runs the language profile's lint command against the raw submission in
//! the leased sandbox and folds the diagnostics into 0-100 scores. The
//! analyzer is a collaborator: when it is absent or fails, grading
//! proceeds without a quality sidecar.

use std::sync::OnceLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::languages;
use crate::models::{ComplexityMetrics, QualityIssue, QualityMetrics};
use crate::sandbox::{SandboxDriver, SCRATCH_DIR};

/// Code-quality analyzer boundary.
#[async_trait]
pub trait QualityAnalyzer: Send + Sync {
    async fn analyze(
        &self,
        driver: &dyn SandboxDriver,
        sandbox_id: &str,
        source: &str,
        language: &str,
    ) -> Result<QualityMetrics>;
}

/// Analyzer that shells out to the profile's lint tool inside the sandbox.
pub struct LintAnalyzer;

#[async_trait]
impl QualityAnalyzer for LintAnalyzer {
    async fn analyze(
        &self,
        driver: &dyn SandboxDriver,
        sandbox_id: &str,
        source: &str,
        language: &str,
    ) -> Result<QualityMetrics> {
        let Some(profile) = languages::get_profile(language) else {
            bail!("unsupported language: {}", language);
        };
        let Some(lint_command) = profile.lint_command.clone() else {
            bail!("no lint command configured for {}", profile.name);
        };

        let path = format!("{}/{}", SCRATCH_DIR, profile.source_file);
        driver
            .copy_file_into(sandbox_id, &path, source.as_bytes())
            .await?;

        // Lint tools exit non-zero when they find issues; the output is
        // still what we want.
        let output = driver.exec(sandbox_id, &lint_command, SCRATCH_DIR).await?;
        let combined = format!("{}\n{}", output.stdout, output.stderr);

        let issues = parse_diagnostics(&combined);
        let metrics = complexity_metrics(source);
        debug!(
            "analysis: {} issues, cyclomatic {}",
            issues.len(),
            metrics.cyclomatic_complexity
        );

        Ok(score(issues, metrics))
    }
}

fn diagnostic_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // "<file>:<line>:<col>: <severity>: <message> [<code>]" with the
    // column, severity, and code all optional.
    RE.get_or_init(|| {
        Regex::new(r"^[\w./-]+:(\d+):(?:(\d+):)?\s*([A-Za-z]\w*)?:?\s+(.+?)(?:\s+\[([-\w.]+)\])?\s*$")
            .expect("diagnostic pattern")
    })
}

/// Parse `file:line:col: severity: message [code]`-shaped lint output.
fn parse_diagnostics(output: &str) -> Vec<QualityIssue> {
    let mut issues = Vec::new();

    for line in output.lines() {
        let Some(caps) = diagnostic_re().captures(line.trim()) else {
            continue;
        };
        let Some(line_no) = caps[1].parse::<u32>().ok() else {
            continue;
        };
        let column = caps.get(2).and_then(|m| m.as_str().parse().ok());
        let raw_severity = caps
            .get(3)
            .map(|m| m.as_str().to_lowercase())
            .unwrap_or_default();
        let message = caps[4].trim().to_string();
        let code = caps.get(5).map(|m| m.as_str().to_string());

        let severity = match raw_severity.as_str() {
            "error" | "fatal" | "e" | "f" => "error",
            "warning" | "w" => "warning",
            _ => "info",
        };
        let category = if raw_severity == "performance" {
            "best-practice"
        } else {
            "style"
        };

        issues.push(QualityIssue {
            line: line_no,
            column,
            severity: severity.to_string(),
            category: category.to_string(),
            message,
            code,
        });
    }

    issues
}

/// Rough complexity counting over the raw source: branch keywords drive
/// the cyclomatic estimate, brace/indent depth drives nesting.
fn complexity_metrics(source: &str) -> ComplexityMetrics {
    static BRANCH_RE: OnceLock<Regex> = OnceLock::new();
    let branch = BRANCH_RE.get_or_init(|| {
        Regex::new(r"\b(if|for|while|case|elif|catch|except)\b|&&|\|\||\band\b|\bor\b")
            .expect("branch pattern")
    });

    let mut cyclomatic = 1u32;
    let mut comment_lines = 0u32;
    let mut depth = 0i32;
    let mut max_depth = 0i32;
    let mut code_lines = 0u32;

    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with("//") || trimmed.starts_with('#') || trimmed.starts_with('*') {
            comment_lines += 1;
            continue;
        }
        code_lines += 1;
        cyclomatic += branch.find_iter(trimmed).count() as u32;
        for c in trimmed.chars() {
            match c {
                '{' => {
                    depth += 1;
                    max_depth = max_depth.max(depth);
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
    }

    ComplexityMetrics {
        cyclomatic_complexity: cyclomatic,
        cognitive_complexity: None,
        max_nesting_depth: max_depth.max(0) as u32,
        function_length: code_lines,
        comment_lines,
        maintainability_index: None,
    }
}

/// Fold issues and complexity into the four 0-100 scores.
fn score(issues: Vec<QualityIssue>, metrics: ComplexityMetrics) -> QualityMetrics {
    let mut style: i32 = 100;
    let mut security: i32 = 100;
    for issue in &issues {
        let deduction = match issue.severity.as_str() {
            "error" => 10,
            "warning" => 4,
            _ => 1,
        };
        if issue.category == "security" {
            security -= deduction * 2;
        } else {
            style -= deduction;
        }
    }

    let mut complexity: i32 = 100;
    if metrics.cyclomatic_complexity > 10 {
        complexity -= ((metrics.cyclomatic_complexity - 10) * 5) as i32;
    }
    if metrics.max_nesting_depth > 3 {
        complexity -= ((metrics.max_nesting_depth - 3) * 10) as i32;
    }

    let style = style.clamp(0, 100);
    let security = security.clamp(0, 100);
    let complexity = complexity.clamp(0, 100);
    let quality = (style * 4 + complexity * 3 + security * 3) / 10;

    QualityMetrics {
        quality_score: quality,
        complexity_score: complexity,
        style_score: style,
        security_score: security,
        issues,
        metrics,
    }
}
