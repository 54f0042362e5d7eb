//! Result sink: outbound publication of grading results.

use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::GradingResult;

const MAX_ATTEMPTS: u32 = 3;

/// Destination for finished grading results.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, submission_id: i64, result: &GradingResult) -> Result<()>;
}

/// Sink that POSTs results to the backend's internal endpoint.
pub struct HttpResultSink {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResultSink {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, submission_id: i64) -> String {
        format!(
            "{}/internal/submissions/{}/result",
            self.base_url.trim_end_matches('/'),
            submission_id
        )
    }
}

#[async_trait]
impl ResultSink for HttpResultSink {
    /// POST the result, retrying with exponential backoff (1s, 2s, 4s).
    /// Any 2xx response is success.
    async fn publish(&self, submission_id: i64, result: &GradingResult) -> Result<()> {
        let url = self.endpoint(submission_id);

        for attempt in 0..MAX_ATTEMPTS {
            match self.client.post(&url).json(result).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!("[{}] result published", submission_id);
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(
                        "[{}] result publish attempt {}/{} got HTTP {}",
                        submission_id,
                        attempt + 1,
                        MAX_ATTEMPTS,
                        resp.status()
                    );
                }
                Err(e) => {
                    warn!(
                        "[{}] result publish attempt {}/{} failed: {}",
                        submission_id,
                        attempt + 1,
                        MAX_ATTEMPTS,
                        e
                    );
                }
            }

            if attempt + 1 < MAX_ATTEMPTS {
                let backoff = Duration::from_secs(1 << attempt);
                tokio::time::sleep(backoff).await;
            }
        }

        bail!(
            "failed to publish result for submission {} after {} attempts",
            submission_id,
            MAX_ATTEMPTS
        )
    }
}
