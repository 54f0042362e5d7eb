//! Task dispatcher.
//!
//! Each worker owns one queue connection and drives one grading pipeline:
//! pop a task, load the submission under a row lock, lease a sandbox, run
//! the executor, publish the result, bump the counter. Infrastructure
//! failures republish the task to the queue tail with a bumped retry
//! count; malformed messages and exhausted retries are dropped without
//! requeue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::analyzer::QualityAnalyzer;
use crate::config::Config;
use crate::grader;
use crate::models::{GradingResult, Status};
use crate::pool::SandboxPool;
use crate::publisher::ResultSink;
use crate::repository::{LockedSubmission, Repository};
use crate::sandbox::SandboxDriver;

/// A task is abandoned after this many republish cycles.
const MAX_TASK_RETRIES: u32 = 3;

/// How long a worker waits for a sandbox before failing the task.
const LEASE_TIMEOUT: Duration = Duration::from_secs(10);

/// Initial queue connection: bounded retry.
const CONNECT_ATTEMPTS: u32 = 10;
const CONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Poll granularity of the consume loop; bounds shutdown latency.
const POP_TIMEOUT_SECS: f64 = 1.0;

/// Message drawn from the task queue.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskMessage {
    pub submission_id: i64,
    #[serde(default)]
    pub retry_count: u32,
}

/// Parse a queue message body; `None` marks a poison message that must be
/// dropped without requeue.
pub fn parse_task(body: &str) -> Option<TaskMessage> {
    let task: TaskMessage = serde_json::from_str(body).ok()?;
    if task.submission_id <= 0 {
        return None;
    }
    Some(task)
}

/// One grading worker.
pub struct Worker {
    pub id: usize,
    pub cfg: Arc<Config>,
    pub driver: Arc<dyn SandboxDriver>,
    pub pool: Arc<SandboxPool>,
    pub repo: Arc<Repository>,
    pub sink: Arc<dyn ResultSink>,
    pub analyzer: Option<Arc<dyn QualityAnalyzer>>,
    pub tasks_processed: Arc<AtomicU64>,
    pub shutdown: watch::Receiver<bool>,
}

impl Worker {
    /// Consume tasks until the shutdown signal flips. The in-flight task
    /// always runs to completion.
    pub async fn run(self) -> Result<()> {
        let client = redis::Client::open(self.cfg.redis_url.clone())
            .context("failed to create queue client")?;
        let mut conn = connect_with_retry(&client).await?;

        info!("worker {} waiting for tasks", self.id);

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let popped: Option<(String, String)> =
                match conn.blpop(&self.cfg.task_queue, POP_TIMEOUT_SECS).await {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("worker {}: queue pop failed: {}. Reconnecting...", self.id, e);
                        conn = connect_with_retry(&client).await?;
                        continue;
                    }
                };

            let Some((_, body)) = popped else {
                continue;
            };
            self.handle_message(&mut conn, &body).await;
        }

        info!("worker {} stopped", self.id);
        Ok(())
    }

    async fn handle_message(&self, conn: &mut MultiplexedConnection, body: &str) {
        let Some(task) = parse_task(body) else {
            warn!("worker {}: dropping malformed task message: {}", self.id, body);
            return;
        };

        info!(
            "worker {}: grading submission #{} (retry {})",
            self.id, task.submission_id, task.retry_count
        );
        let started = Instant::now();

        match self.process(&task).await {
            Ok(status) => {
                info!(
                    "worker {}: submission #{} -> {} (took {:?})",
                    self.id,
                    task.submission_id,
                    status,
                    started.elapsed()
                );
                self.tasks_processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!(
                    "worker {}: failed to grade submission #{}: {:#}",
                    self.id, task.submission_id, e
                );

                if task.retry_count >= MAX_TASK_RETRIES {
                    error!(
                        "worker {}: submission #{} exceeded {} retries, dropping",
                        self.id, task.submission_id, MAX_TASK_RETRIES
                    );
                    return;
                }

                let bumped = TaskMessage {
                    submission_id: task.submission_id,
                    retry_count: task.retry_count + 1,
                };
                let body = match serde_json::to_string(&bumped) {
                    Ok(b) => b,
                    Err(e) => {
                        error!("worker {}: failed to encode retry task: {}", self.id, e);
                        return;
                    }
                };
                if let Err(e) = conn
                    .rpush::<_, _, ()>(&self.cfg.task_queue, &body)
                    .await
                {
                    error!(
                        "worker {}: failed to requeue submission #{}: {}",
                        self.id, task.submission_id, e
                    );
                }
            }
        }
    }

    /// Full pipeline for one task. Any `Err` is an infrastructure failure
    /// eligible for a retry cycle.
    async fn process(&self, task: &TaskMessage) -> Result<Status> {
        let locked = self.repo.load_for_grading(task.submission_id).await?;

        let handle = self
            .pool
            .lease(LEASE_TIMEOUT)
            .await
            .map_err(|e| anyhow!("sandbox lease failed: {}", e))?;

        let outcome = self.run_on_sandbox(&locked, handle.id()).await;
        self.pool.release(handle).await;
        let result = outcome?;

        self.sink.publish(task.submission_id, &result).await?;
        locked.commit().await?;

        Ok(result.overall_status)
    }

    async fn run_on_sandbox(
        &self,
        locked: &LockedSubmission,
        sandbox_id: &str,
    ) -> Result<GradingResult> {
        // Analysis first: it works on the raw submission, and the grading
        // step overwrites the source file with the injected harness.
        let quality = match &self.analyzer {
            Some(analyzer) => match analyzer
                .analyze(
                    self.driver.as_ref(),
                    sandbox_id,
                    &locked.submission.source_code,
                    &locked.submission.language,
                )
                .await
            {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    warn!(
                        "[{}] quality analysis failed (non-fatal): {:#}",
                        locked.submission.id, e
                    );
                    None
                }
            },
            None => None,
        };

        let mut result = grader::grade(
            self.driver.as_ref(),
            sandbox_id,
            &locked.submission,
            &locked.problem,
        )
        .await?;
        result.quality_metrics = quality;
        Ok(result)
    }
}

async fn connect_with_retry(client: &redis::Client) -> Result<MultiplexedConnection> {
    for attempt in 1..=CONNECT_ATTEMPTS {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => {
                info!("connected to task queue (attempt {})", attempt);
                return Ok(conn);
            }
            Err(e) => {
                warn!(
                    "failed to connect to task queue (attempt {}/{}): {}",
                    attempt, CONNECT_ATTEMPTS, e
                );
                if attempt < CONNECT_ATTEMPTS {
                    sleep(CONNECT_BACKOFF).await;
                }
            }
        }
    }
    anyhow::bail!(
        "failed to connect to task queue after {} attempts",
        CONNECT_ATTEMPTS
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_task_parses_with_default_retry() {
        let task = parse_task(r#"{"submission_id": 7}"#).unwrap();
        assert_eq!(task.submission_id, 7);
        assert_eq!(task.retry_count, 0);
    }

    #[test]
    fn extra_fields_are_ignored() {
        let task = parse_task(r#"{"submission_id": 7, "retry_count": 2, "color": "blue"}"#)
            .unwrap();
        assert_eq!(task.retry_count, 2);
    }

    #[test]
    fn poison_messages_are_rejected() {
        assert!(parse_task("not json").is_none());
        assert!(parse_task(r#"{"submission_id": 0}"#).is_none());
        assert!(parse_task(r#"{"submission_id": -3}"#).is_none());
        assert!(parse_task(r#"{"retry_count": 1}"#).is_none());
    }

    #[test]
    fn retry_roundtrip_preserves_count() {
        let bumped = TaskMessage {
            submission_id: 9,
            retry_count: 2,
        };
        let body = serde_json::to_string(&bumped).unwrap();
        let parsed = parse_task(&body).unwrap();
        assert_eq!(parsed.retry_count, 2);
    }
}
