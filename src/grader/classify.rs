//! Termination classification.
//!
//! Maps an exit code, a timeout flag, and the captured stderr onto a
//! grading status plus a human-readable message. Priority order: timeout,
//! signal exits, per-language stderr patterns, generic runtime error.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::Status;

/// Why the program stopped, when it did not stop cleanly.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminationCause {
    pub status: Status,
    pub message: String,
}

impl TerminationCause {
    fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Classify a failed execution.
///
/// `timed_out` is set by the executor when the measured wall time exceeds
/// the adjusted limit plus tolerance, independent of the wrapper's exit
/// code.
pub fn classify(exit_code: i64, stderr: &str, timed_out: bool, language: &str) -> TerminationCause {
    if exit_code == 124 || timed_out {
        return TerminationCause::new(
            Status::TimeLimitExceeded,
            "Program exceeded the time limit",
        );
    }

    if exit_code > 128 {
        return classify_signal(exit_code - 128, exit_code);
    }

    if !stderr.trim().is_empty() {
        if let Some(cause) = classify_stderr(stderr, language) {
            return cause;
        }
    }

    TerminationCause::new(
        Status::RuntimeError,
        format!("Program terminated with exit code {}", exit_code),
    )
}

fn classify_signal(signal: i64, exit_code: i64) -> TerminationCause {
    match signal {
        4 => TerminationCause::new(
            Status::RuntimeError,
            "Illegal instruction (SIGILL)",
        ),
        6 => TerminationCause::new(
            Status::RuntimeError,
            "Aborted (SIGABRT): assertion failure, double free, or heap corruption",
        ),
        8 => TerminationCause::new(
            Status::RuntimeError,
            "Arithmetic exception (SIGFPE): division or modulo by zero",
        ),
        9 => TerminationCause::new(
            Status::MemoryLimitExceeded,
            "Killed by the system (SIGKILL), likely memory limit exceeded",
        ),
        11 => TerminationCause::new(
            Status::RuntimeError,
            "Segmentation fault (SIGSEGV): invalid memory access, out-of-bounds index, or stack overflow",
        ),
        13 => TerminationCause::new(
            Status::OutputLimitExceeded,
            "Output pipe closed (SIGPIPE): program produced too much output",
        ),
        25 => TerminationCause::new(
            Status::OutputLimitExceeded,
            "File size limit exceeded (SIGXFSZ): program produced too much output",
        ),
        other => TerminationCause::new(
            Status::RuntimeError,
            format!("Terminated by signal {} (exit code {})", other, exit_code),
        ),
    }
}

fn classify_stderr(stderr: &str, language: &str) -> Option<TerminationCause> {
    let lower = stderr.to_lowercase();

    match language {
        "cpp" => classify_cpp_stderr(&lower),
        "java" => classify_java_stderr(stderr),
        "python" => classify_python_stderr(stderr),
        _ => None,
    }
}

fn classify_cpp_stderr(lower: &str) -> Option<TerminationCause> {
    if lower.contains("segmentation fault") || lower.contains("sigsegv") {
        return Some(TerminationCause::new(
            Status::RuntimeError,
            "Segmentation fault: invalid memory access",
        ));
    }
    if lower.contains("floating point") || lower.contains("sigfpe") {
        return Some(TerminationCause::new(
            Status::RuntimeError,
            "Floating point exception: division or modulo by zero",
        ));
    }
    if lower.contains("stack overflow") {
        return Some(TerminationCause::new(
            Status::RuntimeError,
            "Stack overflow: infinite or too-deep recursion",
        ));
    }
    if lower.contains("abort") || lower.contains("sigabrt") {
        return Some(TerminationCause::new(
            Status::RuntimeError,
            "Aborted: assertion failure or heap corruption",
        ));
    }
    if lower.contains("killed") {
        return Some(TerminationCause::new(
            Status::MemoryLimitExceeded,
            "Process killed by the system, likely memory limit exceeded",
        ));
    }
    None
}

fn java_exception_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"Exception in thread "[^"]*" (?:[\w$]+\.)*([\w$]+(?:Error|Exception))"#)
            .expect("java exception pattern")
    })
}

fn java_simple_exception_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([A-Z][A-Za-z$]*(?:Error|Exception))").expect("java pattern"))
}

fn classify_java_stderr(stderr: &str) -> Option<TerminationCause> {
    let name = java_exception_re()
        .captures(stderr)
        .or_else(|| java_simple_exception_re().captures(stderr))
        .map(|c| c[1].to_string())?;

    let status = if name == "OutOfMemoryError" {
        Status::MemoryLimitExceeded
    } else {
        Status::RuntimeError
    };
    Some(TerminationCause::new(
        status,
        format!("Java exception: {}", name),
    ))
}

fn python_exception_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Z][A-Za-z]*(?:Error|Exception))(?::\s*(.*))?$").expect("python pattern")
    })
}

fn classify_python_stderr(stderr: &str) -> Option<TerminationCause> {
    // The exception name sits on the final non-empty line of a traceback.
    let line = stderr.lines().rev().find(|l| !l.trim().is_empty())?;
    let caps = python_exception_re().captures(line.trim())?;
    let name = &caps[1];
    let msg = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

    let status = if name == "MemoryError" {
        Status::MemoryLimitExceeded
    } else {
        Status::RuntimeError
    };
    let message = if msg.is_empty() {
        name.to_string()
    } else {
        format!("{}: {}", name, msg)
    };
    Some(TerminationCause::new(status, message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_124_is_tle_even_with_clean_stderr() {
        let cause = classify(124, "", false, "cpp");
        assert_eq!(cause.status, Status::TimeLimitExceeded);
    }

    #[test]
    fn wall_overshoot_is_tle_without_exit_124() {
        let cause = classify(0, "", true, "cpp");
        assert_eq!(cause.status, Status::TimeLimitExceeded);
    }

    #[test]
    fn signal_exits_map_to_semantic_classes() {
        let fpe = classify(136, "", false, "cpp");
        assert_eq!(fpe.status, Status::RuntimeError);
        assert!(fpe.message.contains("SIGFPE"));

        let segv = classify(139, "", false, "cpp");
        assert!(segv.message.contains("SIGSEGV"));

        let abrt = classify(134, "", false, "cpp");
        assert!(abrt.message.contains("SIGABRT"));

        let kill = classify(137, "", false, "cpp");
        assert_eq!(kill.status, Status::MemoryLimitExceeded);

        let pipe = classify(141, "", false, "cpp");
        assert_eq!(pipe.status, Status::OutputLimitExceeded);

        let xfsz = classify(153, "", false, "cpp");
        assert_eq!(xfsz.status, Status::OutputLimitExceeded);
    }

    #[test]
    fn cpp_stderr_patterns() {
        let cause = classify(1, "Segmentation fault (core dumped)", false, "cpp");
        assert!(cause.message.contains("Segmentation fault"));

        let cause = classify(1, "Floating point exception", false, "cpp");
        assert!(cause.message.contains("division or modulo"));

        let cause = classify(1, "Killed", false, "cpp");
        assert_eq!(cause.status, Status::MemoryLimitExceeded);
    }

    #[test]
    fn java_exception_extraction() {
        let stderr = "Exception in thread \"main\" java.lang.ArrayIndexOutOfBoundsException: Index 5 out of bounds";
        let cause = classify(1, stderr, false, "java");
        assert_eq!(cause.status, Status::RuntimeError);
        assert!(cause.message.contains("ArrayIndexOutOfBoundsException"));

        let oom = classify(1, "Exception in thread \"main\" java.lang.OutOfMemoryError: Java heap space", false, "java");
        assert_eq!(oom.status, Status::MemoryLimitExceeded);
    }

    #[test]
    fn python_final_line_extraction() {
        let stderr = "Traceback (most recent call last):\n  File \"main.py\", line 9\nZeroDivisionError: division by zero\n";
        let cause = classify(1, stderr, false, "python");
        assert_eq!(cause.status, Status::RuntimeError);
        assert_eq!(cause.message, "ZeroDivisionError: division by zero");

        let mem = classify(1, "Traceback ...\nMemoryError\n", false, "python");
        assert_eq!(mem.status, Status::MemoryLimitExceeded);
    }

    #[test]
    fn unmatched_nonzero_exit_is_generic_runtime_error() {
        let cause = classify(3, "something odd", false, "cpp");
        assert_eq!(cause.status, Status::RuntimeError);
        assert!(cause.message.contains("exit code 3"));
    }
}
