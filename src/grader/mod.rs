//! Grading executor.
//!
//! Runs one submission against one leased sandbox: generates the harness,
//! injects the user code, compiles, executes the artifact once under
//! time/output limits, then classifies the termination and compares the
//! per-case JSON lines against the expected outputs.
//!
//! An `Err` from [`grade`] is an infrastructure failure the dispatcher may
//! retry; every user-visible outcome (including System Error for
//! structurally invalid problems) comes back as `Ok(GradingResult)`.

pub mod classify;
pub mod compare;

use std::sync::OnceLock;
use std::time::Instant;

use anyhow::{Context, Result};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::generator::{self, inject};
use crate::languages;
use crate::models::{GradingResult, Problem, Status, Submission, TestCaseResult};
use crate::sandbox::{SandboxDriver, SCRATCH_DIR};

use classify::{classify, TerminationCause};

/// Hard cap on captured stdout; hitting it is Output Limit Exceeded.
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Grace added to the adjusted time limit before a wall-clock overshoot is
/// classified as Time Limit Exceeded.
const TIME_TOLERANCE_MS: u32 = 100;

/// Compile-diagnostic lines kept before the rest is elided.
const MAX_DIAGNOSTIC_LINES: usize = 5;

/// Grade one submission on a leased sandbox.
pub async fn grade(
    driver: &dyn SandboxDriver,
    sandbox_id: &str,
    submission: &Submission,
    problem: &Problem,
) -> Result<GradingResult> {
    let Some(profile) = languages::get_profile(&submission.language) else {
        return Ok(system_error(format!(
            "Unsupported language: {}",
            submission.language
        )));
    };

    let (base_time_ms, base_memory_kb) = problem.limits_for_language(&profile.name);
    let time_limit_ms = profile.adjusted_time_ms(base_time_ms);
    let memory_limit_kb = profile.adjusted_memory_kb(base_memory_kb);

    debug!(
        "[{}] limits: time={}ms memory={}KB ({} x{})",
        submission.id, time_limit_ms, memory_limit_kb, profile.name, profile.time_multiplier
    );

    // Harness generation failures are structural problems with the problem
    // definition; retrying the task cannot fix them.
    let harness = match generator::generate(problem, &profile.name) {
        Ok(h) => h,
        Err(e) => {
            error!("[{}] harness generation failed: {:#}", submission.id, e);
            return Ok(system_error(format!(
                "Failed to generate test harness: {:#}",
                e
            )));
        }
    };
    if !harness.contains(generator::PLACEHOLDER) {
        error!("[{}] generated harness has no placeholder", submission.id);
        return Ok(system_error(
            "Generated harness is missing the student code placeholder",
        ));
    }

    let final_source = inject::inject(&harness, &submission.source_code, &profile.name);

    let source_path = format!("{}/{}", SCRATCH_DIR, profile.source_file);
    driver
        .copy_file_into(sandbox_id, &source_path, final_source.as_bytes())
        .await
        .context("failed to upload source into sandbox")?;

    info!("[{}] compiling ({})", submission.id, profile.name);
    let compile = driver
        .exec(sandbox_id, &profile.compile_command, SCRATCH_DIR)
        .await
        .context("compile step failed in sandbox")?;

    if !compile.is_success() {
        let raw = if compile.stderr.trim().is_empty() {
            &compile.stdout
        } else {
            &compile.stderr
        };
        let diagnostics = extract_diagnostics(raw);
        info!("[{}] compile error", submission.id);
        return Ok(GradingResult::single(
            Status::CompileError,
            TestCaseResult::bare(Status::CompileError, diagnostics),
        ));
    }

    info!(
        "[{}] running harness ({} test cases)",
        submission.id,
        problem.test_cases.len()
    );

    let wrapper = run_wrapper_script(&profile.run_command.join(" "), time_limit_ms);
    let wrapper_path = format!("{}/run_wrapper.sh", SCRATCH_DIR);
    driver
        .copy_file_into(sandbox_id, &wrapper_path, wrapper.as_bytes())
        .await
        .context("failed to upload run wrapper")?;
    driver
        .exec(
            sandbox_id,
            &["chmod".into(), "+x".into(), wrapper_path.clone()],
            SCRATCH_DIR,
        )
        .await
        .context("failed to mark run wrapper executable")?;

    let started = Instant::now();
    driver
        .exec(
            sandbox_id,
            &["/bin/bash".into(), wrapper_path],
            SCRATCH_DIR,
        )
        .await
        .context("failed to execute harness in sandbox")?;
    let wall_ms = (started.elapsed().as_millis() as u32).max(1);

    let exit_code: i64 = read_text(driver, sandbox_id, "exitcode.txt")
        .await
        .trim()
        .parse()
        .unwrap_or(-1);
    let stdout = read_text(driver, sandbox_id, "output.txt").await;
    let stderr = read_text(driver, sandbox_id, "program_stderr.txt").await;
    let time_metrics = read_text(driver, sandbox_id, "time_output.txt").await;
    let bash_time = read_text(driver, sandbox_id, "bash_time.txt").await;

    let (cpu_ms, max_rss_kb) = parse_time_metrics(&time_metrics);
    let exec_time_ms = parse_bash_time(&bash_time)
        .or(cpu_ms)
        .unwrap_or(wall_ms)
        .max(1);
    let memory_used_kb = max_rss_kb.unwrap_or(0);

    // Output cap first: a truncated capture invalidates everything after
    // the last complete line.
    if stdout.len() >= MAX_OUTPUT_BYTES {
        warn!("[{}] output limit exceeded", submission.id);
        let mut lines = split_output_lines(&stdout);
        if !stdout.ends_with('\n') {
            lines.pop();
        }
        let cause = TerminationCause {
            status: Status::OutputLimitExceeded,
            message: "Program produced more than 10 MiB of output".into(),
        };
        let (overall, results) =
            partial_results(problem, &lines, &cause, exec_time_ms, memory_used_kb);
        return Ok(GradingResult {
            overall_status: overall,
            results,
            quality_metrics: None,
        });
    }

    // Memory gate before any output comparison.
    if memory_used_kb > memory_limit_kb {
        info!(
            "[{}] memory limit exceeded: used {} KB, limit {} KB",
            submission.id, memory_used_kb, memory_limit_kb
        );
        return Ok(GradingResult::single(
            Status::MemoryLimitExceeded,
            TestCaseResult {
                test_case_id: None,
                status: Status::MemoryLimitExceeded.to_string(),
                execution_time_ms: exec_time_ms,
                memory_used_kb,
                output_received: None,
                error_message: Some(format!(
                    "Program used {} KB of memory, but limit is {} KB",
                    memory_used_kb, memory_limit_kb
                )),
            },
        ));
    }

    let lines = split_output_lines(&stdout);
    let timed_out = exec_time_ms > time_limit_ms + TIME_TOLERANCE_MS;

    if exit_code != 0 || timed_out {
        let cause = classify(exit_code, &stderr, timed_out, &profile.name);
        info!(
            "[{}] terminated: {} ({})",
            submission.id, cause.status, cause.message
        );
        let (overall, results) =
            partial_results(problem, &lines, &cause, exec_time_ms, memory_used_kb);
        return Ok(GradingResult {
            overall_status: overall,
            results,
            quality_metrics: None,
        });
    }

    let (overall, results) = per_case_results(problem, &lines, exec_time_ms, memory_used_kb);
    info!("[{}] graded: {}", submission.id, overall);

    Ok(GradingResult {
        overall_status: overall,
        results,
        quality_metrics: None,
    })
}

fn system_error(message: impl Into<String>) -> GradingResult {
    GradingResult::single(
        Status::SystemError,
        TestCaseResult::bare(Status::SystemError, message),
    )
}

async fn read_text(driver: &dyn SandboxDriver, sandbox_id: &str, file: &str) -> String {
    let path = format!("{}/{}", SCRATCH_DIR, file);
    match driver.copy_file_out_of(sandbox_id, &path).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => String::new(),
    }
}

/// Shell wrapper imposing the wall-time cap and the stdout cap while
/// collecting wall/CPU/RSS metrics and the program's own exit code.
fn run_wrapper_script(run_cmd: &str, time_limit_ms: u32) -> String {
    let limit_secs = time_limit_ms as f64 / 1000.0;
    format!(
        "#!/bin/bash\n\
         {{ time /usr/bin/time -v -o {dir}/time_output.txt timeout {secs:.2} {cmd} 2> {dir}/program_stderr.txt | head -c {max} > {dir}/output.txt; }} 2> {dir}/bash_time.txt\n\
         PROGRAM_EXIT=${{PIPESTATUS[0]}}\n\
         echo $PROGRAM_EXIT > {dir}/exitcode.txt\n\
         exit $PROGRAM_EXIT\n",
        dir = SCRATCH_DIR,
        secs = limit_secs,
        cmd = run_cmd,
        max = MAX_OUTPUT_BYTES,
    )
}

/// Keep the first error-looking diagnostic lines; elide the rest.
fn extract_diagnostics(output: &str) -> String {
    let error_lines: Vec<&str> = output
        .lines()
        .filter(|l| l.contains("error:") || l.contains(": error"))
        .collect();
    let lines: Vec<&str> = if error_lines.is_empty() {
        output.lines().collect()
    } else {
        error_lines
    };

    let mut out = lines
        .iter()
        .take(MAX_DIAGNOSTIC_LINES)
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    if lines.len() > MAX_DIAGNOSTIC_LINES {
        out.push_str("\n... (more errors omitted)");
    }
    out
}

fn bash_time_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"real\s+(\d+)m([\d.]+)s").expect("bash time pattern"))
}

/// Parse the bash `time` builtin's "real 0m0.003s" into milliseconds.
/// Sub-millisecond measurements round up to 1; a zero reading means the
/// caller should fall back to another source.
fn parse_bash_time(output: &str) -> Option<u32> {
    let caps = bash_time_re().captures(output)?;
    let minutes: f64 = caps[1].parse().ok()?;
    let seconds: f64 = caps[2].parse().ok()?;
    let ms = (minutes * 60.0 + seconds) * 1000.0;
    if ms == 0.0 {
        return None;
    }
    Some((ms as u32).max(1))
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)").expect("number pattern"))
}

/// Parse `/usr/bin/time -v` output: CPU time (user + sys, ms) and peak
/// RSS (KiB).
fn parse_time_metrics(output: &str) -> (Option<u32>, Option<u32>) {
    let mut user = None;
    let mut sys = None;
    let mut rss = None;

    for line in output.lines() {
        if line.contains("User time (seconds):") {
            user = number_re()
                .captures(line)
                .and_then(|c| c[1].parse::<f64>().ok());
        } else if line.contains("System time (seconds):") {
            sys = number_re()
                .captures(line)
                .and_then(|c| c[1].parse::<f64>().ok());
        } else if line.contains("Maximum resident set size") {
            rss = number_re()
                .captures(line)
                .and_then(|c| c[1].parse::<u32>().ok());
        }
    }

    let cpu_ms = match (user, sys) {
        (None, None) => None,
        (u, s) => {
            let total = (u.unwrap_or(0.0) + s.unwrap_or(0.0)) * 1000.0;
            Some((total as u32).max(1))
        }
    };
    (cpu_ms, rss)
}

/// One trimmed line per test case, in emission order.
fn split_output_lines(stdout: &str) -> Vec<String> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.lines().map(|l| l.trim().to_string()).collect()
}

/// Normal-path per-case results: compare each line, flag missing output.
fn per_case_results(
    problem: &Problem,
    lines: &[String],
    exec_time_ms: u32,
    memory_used_kb: u32,
) -> (Status, Vec<TestCaseResult>) {
    let mut overall = Status::Accepted;
    let mut results = Vec::with_capacity(problem.test_cases.len());

    for (i, tc) in problem.test_cases.iter().enumerate() {
        let line = lines.get(i).map(String::as_str).unwrap_or("");

        let (status, output_received, error_message) = if line.is_empty() {
            (
                Status::SystemError,
                None,
                Some("no output produced for this test case".to_string()),
            )
        } else if let Some(error) = harness_error(line) {
            (Status::RuntimeError, None, Some(error))
        } else if compare::outputs_match(line, &tc.expected_output.0) {
            (Status::Accepted, Some(line.to_string()), None)
        } else {
            (Status::WrongAnswer, Some(line.to_string()), None)
        };

        if status != Status::Accepted && overall == Status::Accepted {
            overall = status;
        }
        results.push(TestCaseResult {
            test_case_id: Some(tc.id),
            status: status.to_string(),
            execution_time_ms: exec_time_ms,
            memory_used_kb,
            output_received,
            error_message,
        });
    }

    (overall, results)
}

/// Per-case results after a terminal cause: lines that were produced are
/// kept with a partial-run marker, missing lines inherit the cause.
fn partial_results(
    problem: &Problem,
    lines: &[String],
    cause: &TerminationCause,
    exec_time_ms: u32,
    memory_used_kb: u32,
) -> (Status, Vec<TestCaseResult>) {
    let mut results = Vec::with_capacity(problem.test_cases.len());

    for (i, tc) in problem.test_cases.iter().enumerate() {
        let line = lines.get(i).map(String::as_str).unwrap_or("");
        if !line.is_empty() {
            results.push(TestCaseResult {
                test_case_id: Some(tc.id),
                status: format!("Partial Run - {}", cause.status),
                execution_time_ms: exec_time_ms,
                memory_used_kb,
                output_received: Some(line.to_string()),
                error_message: Some(
                    "Program terminated before completing all test cases".to_string(),
                ),
            });
        } else {
            results.push(TestCaseResult {
                test_case_id: Some(tc.id),
                status: cause.status.to_string(),
                execution_time_ms: exec_time_ms,
                memory_used_kb,
                output_received: None,
                error_message: Some(cause.message.clone()),
            });
        }
    }

    (cause.status, results)
}

/// Extract the error text from a harness fault-boundary line like
/// `{"error": "division by zero"}`.
fn harness_error(line: &str) -> Option<String> {
    let value: Value = serde_json::from_str(line).ok()?;
    value
        .as_object()?
        .get("error")?
        .as_str()
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::testutil::*;
    use crate::sandbox::ExecOutput;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Driver that "runs" the harness by materializing pre-scripted
    /// wrapper output files.
    struct ScriptedDriver {
        files: Mutex<HashMap<String, Vec<u8>>>,
        compile_exit: i64,
        compile_stderr: String,
        run_files: HashMap<String, String>,
    }

    impl ScriptedDriver {
        fn new(run_files: &[(&str, &str)]) -> Self {
            Self {
                files: Mutex::new(HashMap::new()),
                compile_exit: 0,
                compile_stderr: String::new(),
                run_files: run_files
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }
        }

        fn failing_compile(stderr: &str) -> Self {
            Self {
                files: Mutex::new(HashMap::new()),
                compile_exit: 1,
                compile_stderr: stderr.to_string(),
                run_files: HashMap::new(),
            }
        }
    }

    #[async_trait]
    impl SandboxDriver for ScriptedDriver {
        async fn create(&self, _image: &str) -> anyhow::Result<String> {
            Ok("scripted".into())
        }

        async fn exec(
            &self,
            _id: &str,
            argv: &[String],
            _wd: &str,
        ) -> anyhow::Result<ExecOutput> {
            // Compile commands are recognizable by their first token.
            let program = argv.first().map(String::as_str).unwrap_or("");
            if matches!(program, "g++" | "javac") || argv.join(" ").contains("py_compile") {
                return Ok(ExecOutput {
                    exit_code: self.compile_exit,
                    stdout: String::new(),
                    stderr: self.compile_stderr.clone(),
                });
            }
            if argv.iter().any(|a| a.ends_with("run_wrapper.sh")) && program == "/bin/bash" {
                let mut files = self.files.lock().unwrap();
                for (name, contents) in &self.run_files {
                    files.insert(
                        format!("{}/{}", SCRATCH_DIR, name),
                        contents.clone().into_bytes(),
                    );
                }
            }
            Ok(ExecOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        async fn copy_file_into(
            &self,
            _id: &str,
            path: &str,
            contents: &[u8],
        ) -> anyhow::Result<()> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), contents.to_vec());
            Ok(())
        }

        async fn copy_file_out_of(&self, _id: &str, path: &str) -> anyhow::Result<Vec<u8>> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no such file: {}", path))
        }

        async fn inspect_running(&self, _id: &str) -> anyhow::Result<bool> {
            Ok(true)
        }

        async fn destroy(&self, _id: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn list_labeled(&self) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    fn submission(language: &str, code: &str) -> crate::models::Submission {
        crate::models::Submission {
            id: 42,
            problem_id: 1,
            source_code: code.to_string(),
            language: language.to_string(),
        }
    }

    fn ok_metrics(cpu: &str, rss_kb: u32) -> Vec<(&'static str, String)> {
        vec![
            (
                "time_output.txt",
                format!(
                    "\tUser time (seconds): {}\n\tSystem time (seconds): 0.00\n\tMaximum resident set size (kbytes): {}\n",
                    cpu, rss_kb
                ),
            ),
            ("bash_time.txt", "real\t0m0.012s\nuser\t0m0.010s".to_string()),
        ]
    }

    fn ensure_langs() {
        let _ = crate::languages::init_languages();
    }

    #[tokio::test]
    async fn accepted_run_end_to_end() {
        ensure_langs();
        let metrics = ok_metrics("0.01", 2048);
        let mut files: Vec<(&str, &str)> = vec![("output.txt", "5\n"), ("exitcode.txt", "0")];
        files.extend(metrics.iter().map(|(k, v)| (*k, v.as_str())));
        let driver = ScriptedDriver::new(&files);

        let problem = add_problem();
        let result = grade(&driver, "sbx", &submission("python", "return a + b"), &problem)
            .await
            .unwrap();

        assert_eq!(result.overall_status, Status::Accepted);
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].status, "Accepted");
        assert_eq!(result.results[0].output_received.as_deref(), Some("5"));
        assert_eq!(result.results[0].execution_time_ms, 12);
        assert_eq!(result.results[0].memory_used_kb, 2048);
    }

    #[tokio::test]
    async fn wrong_answer_carries_received_output() {
        ensure_langs();
        let metrics = ok_metrics("0.01", 2048);
        let mut files: Vec<(&str, &str)> = vec![("output.txt", "-1\n"), ("exitcode.txt", "0")];
        files.extend(metrics.iter().map(|(k, v)| (*k, v.as_str())));
        let driver = ScriptedDriver::new(&files);

        let result = grade(
            &driver,
            "sbx",
            &submission("python", "return a - b"),
            &add_problem(),
        )
        .await
        .unwrap();

        assert_eq!(result.overall_status, Status::WrongAnswer);
        assert_eq!(result.results[0].status, "Wrong Answer");
        assert_eq!(result.results[0].output_received.as_deref(), Some("-1"));
    }

    #[tokio::test]
    async fn sigfpe_exit_classifies_as_runtime_error() {
        ensure_langs();
        let driver = ScriptedDriver::new(&[
            ("output.txt", ""),
            ("exitcode.txt", "136"),
            ("program_stderr.txt", ""),
        ]);

        let problem = problem(
            "divide",
            "int",
            &[("a", "int"), ("b", "int")],
            vec![case(
                1,
                vec![typed("int", json!(1)), typed("int", json!(0))],
                typed("int", json!(0)),
            )],
        );

        let result = grade(&driver, "sbx", &submission("cpp", "return a / b;"), &problem)
            .await
            .unwrap();

        assert_eq!(result.overall_status, Status::RuntimeError);
        assert_eq!(result.results.len(), 1);
        assert!(result.results[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("SIGFPE"));
    }

    #[tokio::test]
    async fn timeout_exit_is_time_limit_exceeded() {
        ensure_langs();
        let driver = ScriptedDriver::new(&[
            ("output.txt", ""),
            ("exitcode.txt", "124"),
            ("bash_time.txt", "real\t0m0.600s"),
        ]);

        let problem = problem(
            "loop",
            "int",
            &[],
            vec![case(1, vec![], typed("int", json!(0)))],
        );
        // 500 ms limit on the problem itself.
        let mut problem = problem;
        problem.time_limit_ms = 500;

        let result = grade(&driver, "sbx", &submission("cpp", "while(1){}"), &problem)
            .await
            .unwrap();

        assert_eq!(result.overall_status, Status::TimeLimitExceeded);
        assert!(result.results[0].execution_time_ms >= 500);
    }

    #[tokio::test]
    async fn compile_failure_returns_first_diagnostics() {
        ensure_langs();
        let stderr = "main.cpp:3:5: error: expected ';' before '}'\nmain.cpp:4:1: error: x\nnote: context\n";
        let driver = ScriptedDriver::failing_compile(stderr);

        let result = grade(
            &driver,
            "sbx",
            &submission("cpp", "return a + b"),
            &add_problem(),
        )
        .await
        .unwrap();

        assert_eq!(result.overall_status, Status::CompileError);
        let msg = result.results[0].error_message.as_deref().unwrap();
        assert!(msg.contains("expected ';'"));
        assert!(!msg.contains("note: context"));
    }

    #[tokio::test]
    async fn memory_over_limit_gates_before_comparison() {
        ensure_langs();
        // 300 MB peak against a 256 MB problem limit (cpp: x1.0 + 0).
        let metrics = ok_metrics("0.01", 300_000);
        let mut files: Vec<(&str, &str)> = vec![("output.txt", "5\n"), ("exitcode.txt", "0")];
        files.extend(metrics.iter().map(|(k, v)| (*k, v.as_str())));
        let driver = ScriptedDriver::new(&files);

        let result = grade(
            &driver,
            "sbx",
            &submission("cpp", "return a + b;"),
            &add_problem(),
        )
        .await
        .unwrap();

        assert_eq!(result.overall_status, Status::MemoryLimitExceeded);
        assert_eq!(result.results.len(), 1);
        assert!(result.results[0]
            .error_message
            .as_deref()
            .unwrap()
            .contains("limit is 256000 KB"));
    }

    #[tokio::test]
    async fn memory_exactly_at_limit_is_not_mle() {
        ensure_langs();
        let metrics = ok_metrics("0.01", 256_000);
        let mut files: Vec<(&str, &str)> = vec![("output.txt", "5\n"), ("exitcode.txt", "0")];
        files.extend(metrics.iter().map(|(k, v)| (*k, v.as_str())));
        let driver = ScriptedDriver::new(&files);

        let result = grade(
            &driver,
            "sbx",
            &submission("cpp", "return a + b;"),
            &add_problem(),
        )
        .await
        .unwrap();

        assert_eq!(result.overall_status, Status::Accepted);
    }

    #[tokio::test]
    async fn output_at_cap_is_output_limit_exceeded() {
        ensure_langs();
        let at_cap = "x".repeat(MAX_OUTPUT_BYTES);
        let driver = ScriptedDriver::new(&[("output.txt", at_cap.as_str()), ("exitcode.txt", "0")]);

        let result = grade(
            &driver,
            "sbx",
            &submission("cpp", "return a + b;"),
            &add_problem(),
        )
        .await
        .unwrap();
        assert_eq!(result.overall_status, Status::OutputLimitExceeded);
    }

    #[tokio::test]
    async fn output_one_byte_under_cap_is_not_output_limit_exceeded() {
        ensure_langs();
        let under_cap = "x".repeat(MAX_OUTPUT_BYTES - 1);
        let driver =
            ScriptedDriver::new(&[("output.txt", under_cap.as_str()), ("exitcode.txt", "0")]);

        let result = grade(
            &driver,
            "sbx",
            &submission("cpp", "return a + b;"),
            &add_problem(),
        )
        .await
        .unwrap();
        assert_ne!(result.overall_status, Status::OutputLimitExceeded);
    }

    #[tokio::test]
    async fn unsupported_language_is_system_error_not_err() {
        ensure_langs();
        let driver = ScriptedDriver::new(&[]);
        let result = grade(
            &driver,
            "sbx",
            &submission("cobol", "DISPLAY 'HI'"),
            &add_problem(),
        )
        .await
        .unwrap();
        assert_eq!(result.overall_status, Status::SystemError);
    }

    #[test]
    fn harness_error_lines_are_runtime_errors() {
        let problem = problem(
            "f",
            "int",
            &[("a", "int")],
            vec![
                case(1, vec![typed("int", json!(1))], typed("int", json!(1))),
                case(2, vec![typed("int", json!(2))], typed("int", json!(2))),
            ],
        );
        let lines = vec![
            "{\"error\": \"division by zero\"}".to_string(),
            "2".to_string(),
        ];
        let (overall, results) = per_case_results(&problem, &lines, 5, 100);

        assert_eq!(overall, Status::RuntimeError);
        assert_eq!(results[0].status, "Runtime Error");
        assert_eq!(
            results[0].error_message.as_deref(),
            Some("division by zero")
        );
        assert_eq!(results[1].status, "Accepted");
    }

    #[test]
    fn missing_lines_are_system_errors() {
        let problem = problem(
            "f",
            "int",
            &[("a", "int")],
            vec![
                case(1, vec![typed("int", json!(1))], typed("int", json!(1))),
                case(2, vec![typed("int", json!(2))], typed("int", json!(2))),
            ],
        );
        let lines = vec!["1".to_string()];
        let (overall, results) = per_case_results(&problem, &lines, 5, 100);

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].status, "Accepted");
        assert_eq!(results[1].status, "System Error");
        assert_eq!(overall, Status::SystemError);
    }

    #[test]
    fn partial_results_mark_produced_lines() {
        let problem = problem(
            "f",
            "int",
            &[("a", "int")],
            vec![
                case(1, vec![typed("int", json!(1))], typed("int", json!(1))),
                case(2, vec![typed("int", json!(2))], typed("int", json!(2))),
            ],
        );
        let cause = TerminationCause {
            status: Status::TimeLimitExceeded,
            message: "Program exceeded the time limit".into(),
        };
        let lines = vec!["1".to_string()];
        let (overall, results) = partial_results(&problem, &lines, &cause, 900, 100);

        assert_eq!(overall, Status::TimeLimitExceeded);
        assert_eq!(results[0].status, "Partial Run - Time Limit Exceeded");
        assert_eq!(results[0].output_received.as_deref(), Some("1"));
        assert_eq!(results[1].status, "Time Limit Exceeded");
    }

    #[test]
    fn bash_time_parsing() {
        assert_eq!(parse_bash_time("real\t0m0.003s"), Some(3));
        assert_eq!(parse_bash_time("real\t1m2.500s"), Some(62_500));
        // Sub-millisecond rounds up to 1.
        assert_eq!(parse_bash_time("real\t0m0.0004s"), Some(1));
        assert_eq!(parse_bash_time("real\t0m0.000s"), None);
        assert_eq!(parse_bash_time("garbage"), None);
    }

    #[test]
    fn time_metrics_parsing() {
        let output = "\tUser time (seconds): 0.42\n\tSystem time (seconds): 0.08\n\tMaximum resident set size (kbytes): 12345\n";
        let (cpu, rss) = parse_time_metrics(output);
        assert_eq!(cpu, Some(500));
        assert_eq!(rss, Some(12345));

        assert_eq!(parse_time_metrics(""), (None, None));
    }

    #[test]
    fn diagnostics_keep_at_most_five_error_lines() {
        let output = (1..=8)
            .map(|i| format!("main.cpp:{}:1: error: problem {}", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let diag = extract_diagnostics(&output);
        assert_eq!(diag.lines().count(), 6);
        assert!(diag.ends_with("... (more errors omitted)"));
        assert!(diag.contains("problem 5"));
        assert!(!diag.contains("problem 6"));
    }

    #[test]
    fn wrapper_script_embeds_limits() {
        let script = run_wrapper_script("./main", 1500);
        assert!(script.contains("timeout 1.50 ./main"));
        assert!(script.contains(&format!("head -c {}", MAX_OUTPUT_BYTES)));
        assert!(script.contains("PIPESTATUS[0]"));
    }
}
