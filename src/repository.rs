//! Submission repository.
//!
//! Loads a submission with its problem and ordered test cases under a
//! pessimistic row lock. The transaction stays open until the worker has
//! published the result, so two workers can never grade the same
//! submission concurrently.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};

use crate::config::Config;
use crate::models::{Problem, Submission, TestCase};

/// Postgres-backed repository.
pub struct Repository {
    pool: PgPool,
}

/// A submission held under `FOR UPDATE` for the duration of grading.
pub struct LockedSubmission {
    pub submission: Submission,
    pub problem: Problem,
    tx: Transaction<'static, Postgres>,
}

impl LockedSubmission {
    /// Release the row lock after the result has been published.
    pub async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .context("failed to commit grading transaction")
    }
}

impl Repository {
    /// Connect with the configured pool sizing.
    pub async fn connect(cfg: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(cfg.db_max_idle_conns)
            .max_connections(cfg.db_max_open_conns)
            .max_lifetime(Duration::from_secs(cfg.db_conn_max_lifetime_minutes * 60))
            .connect(&cfg.database_url)
            .await
            .context("failed to connect to database")?;
        Ok(Self { pool })
    }

    /// Cheap connectivity probe for the health surface.
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    /// Fetch a submission and its problem + test cases, locking the
    /// submission row against concurrent graders.
    pub async fn load_for_grading(&self, submission_id: i64) -> Result<LockedSubmission> {
        let mut tx = self.pool.begin().await.context("failed to open transaction")?;

        let submission: Submission = sqlx::query_as(
            "SELECT id, problem_id, source_code, language \
             FROM submissions WHERE id = $1 FOR UPDATE",
        )
        .bind(submission_id)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to fetch submission {}", submission_id))?;

        let mut problem: Problem = sqlx::query_as(
            "SELECT id, title, function_name, return_type, parameters, \
                    time_limit_ms, memory_limit_kb, language_limits \
             FROM problems WHERE id = $1",
        )
        .bind(submission.problem_id)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| {
            format!(
                "failed to fetch problem {} for submission {}",
                submission.problem_id, submission_id
            )
        })?;

        let test_cases: Vec<TestCase> = sqlx::query_as(
            "SELECT id, inputs, expected_output, points, is_hidden \
             FROM test_cases WHERE problem_id = $1 ORDER BY id",
        )
        .bind(problem.id)
        .fetch_all(&mut *tx)
        .await
        .with_context(|| format!("failed to fetch test cases for problem {}", problem.id))?;
        problem.test_cases = test_cases;

        Ok(LockedSubmission {
            submission,
            problem,
            tx,
        })
    }
}
