//! Sandbox primitive boundary.
//!
//! The core never talks to the isolation layer directly; it goes through
//! the [`SandboxDriver`] trait. The driver provides long-lived isolated
//! environments with a writable scratch directory, command execution with
//! captured output, and small-file transfer. All calls may block on the
//! isolation layer; callers apply their own timeouts.
//!
//! The driver does NOT:
//! - Interpret exit codes or classify failures
//! - Enforce grading-level resource limits
//! - Track which sandboxes belong to the pool

pub mod docker;

use anyhow::Result;
use async_trait::async_trait;

pub use docker::DockerDriver;

/// Scratch directory inside every sandbox.
pub const SCRATCH_DIR: &str = "/sandbox";

/// Output of one command execution inside a sandbox.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Driver for the underlying isolation primitive.
#[async_trait]
pub trait SandboxDriver: Send + Sync {
    /// Create and start a new sandbox from the given image, returning its
    /// opaque identifier.
    async fn create(&self, image: &str) -> Result<String>;

    /// Execute a command in the sandbox with the given working directory,
    /// capturing stdout, stderr, and the exit code.
    async fn exec(&self, sandbox_id: &str, argv: &[String], working_dir: &str)
        -> Result<ExecOutput>;

    /// Write a small file into the sandbox at the given absolute path.
    async fn copy_file_into(&self, sandbox_id: &str, path: &str, contents: &[u8]) -> Result<()>;

    /// Read a small file out of the sandbox; missing files are an error.
    async fn copy_file_out_of(&self, sandbox_id: &str, path: &str) -> Result<Vec<u8>>;

    /// Whether the sandbox process is still alive and responsive.
    async fn inspect_running(&self, sandbox_id: &str) -> Result<bool>;

    /// Destroy the sandbox, releasing all its resources.
    async fn destroy(&self, sandbox_id: &str) -> Result<()>;

    /// Identifiers of every sandbox the driver created with the pool label,
    /// whether or not the pool still tracks them. Used by the reaper's
    /// orphan sweep.
    async fn list_labeled(&self) -> Result<Vec<String>>;
}
