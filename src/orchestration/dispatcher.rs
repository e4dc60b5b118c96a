//! # Job Dispatch Transport
//!
//! Outbound HTTP for the engine: [`HttpDispatcher`] delivers
//! [`JobStartMessage`]s to a task's action URL, and [`JobCompletionClient`] is
//! the worker-side client that reports a job finished.
//!
//! Both share one retry policy: a request is attempted once plus up to
//! `retries_max` more times, waiting `retry_wait` between attempts. Network
//! errors, timeouts and 5xx responses are retried; 4xx responses fail at once.
//! Every request carries the job's trace context as a `traceparent` header.

use crate::config::DispatchConfig;
use crate::constants::http::JOB_COMPLETE_PATH;
use crate::error::{OrderflowError, Result};
use crate::models::{JobCompleteMessage, JobStartMessage};
use crate::telemetry::{TraceContext, TRACEPARENT_HEADER};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Transport that hands a claimed job to its external worker
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        destination: &str,
        message: &JobStartMessage,
        trace: &TraceContext,
    ) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetryPolicy {
    retries_max: u32,
    retry_wait: Duration,
}

impl From<&DispatchConfig> for RetryPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            retries_max: config.retries_max,
            retry_wait: config.retry_wait(),
        }
    }
}

fn build_client(config: &DispatchConfig) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout())
        .user_agent(format!("orderflow/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| {
            OrderflowError::ConfigurationError(format!("Failed to create HTTP client: {e}"))
        })
}

/// POST `payload` as JSON to `url`, retrying per `policy`
async fn post_with_retries<T: Serialize + ?Sized>(
    client: &Client,
    url: Url,
    payload: &T,
    trace: &TraceContext,
    policy: RetryPolicy,
) -> Result<()> {
    let destination = url.to_string();
    let failure = |reason: String| OrderflowError::DispatchFailure {
        destination: destination.clone(),
        reason,
    };

    let mut attempt: u32 = 0;
    loop {
        let response = client
            .post(url.clone())
            .header(TRACEPARENT_HEADER, trace.to_token())
            .json(payload)
            .send()
            .await;

        let reason = match response {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    destination = %destination,
                    status = %resp.status(),
                    attempt = attempt + 1,
                    "Request delivered"
                );
                return Ok(());
            }
            Ok(resp) => {
                let status = resp.status();
                let body = resp
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());

                // Don't retry client errors (4xx)
                if status.is_client_error() {
                    error!(destination = %destination, status = %status, error = %body, "Request rejected");
                    return Err(failure(format!("HTTP {status}: {body}")));
                }

                format!("HTTP {status}: {body}")
            }
            Err(e) => e.to_string(),
        };

        if attempt >= policy.retries_max {
            error!(
                destination = %destination,
                attempts = attempt + 1,
                error = %reason,
                "Exhausted all retries"
            );
            return Err(failure(format!(
                "gave up after {} attempts: {reason}",
                attempt + 1
            )));
        }

        attempt += 1;
        warn!(
            destination = %destination,
            error = %reason,
            retry = attempt,
            max_retries = policy.retries_max,
            "Request failed, will retry"
        );
        tokio::time::sleep(policy.retry_wait).await;
    }
}

/// Dispatches jobs with an HTTP POST to the task's action URL
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
    policy: RetryPolicy,
}

impl HttpDispatcher {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let client = build_client(config)?;

        info!(
            timeout_ms = config.timeout_ms,
            retries_max = config.retries_max,
            retry_wait_ms = config.retry_wait_ms,
            "Created HTTP job dispatcher"
        );

        Ok(Self {
            client,
            policy: RetryPolicy::from(config),
        })
    }
}

#[async_trait]
impl JobDispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        destination: &str,
        message: &JobStartMessage,
        trace: &TraceContext,
    ) -> Result<()> {
        let url = Url::parse(destination).map_err(|e| OrderflowError::DispatchFailure {
            destination: destination.to_string(),
            reason: format!("invalid URL: {e}"),
        })?;

        post_with_retries(&self.client, url, message, trace, self.policy).await
    }
}

/// Worker-side client for the orchestration API's job completion endpoint.
///
/// POSTs `{taskId, orderId}` to `<completion_url>/job/complete`.
#[derive(Debug, Clone)]
pub struct JobCompletionClient {
    client: Client,
    endpoint: Url,
    policy: RetryPolicy,
}

impl JobCompletionClient {
    pub fn new(config: &DispatchConfig) -> Result<Self> {
        let base_url = Url::parse(&config.completion_url).map_err(|e| {
            OrderflowError::ConfigurationError(format!("Invalid completion URL: {e}"))
        })?;
        let endpoint = base_url.join(JOB_COMPLETE_PATH).map_err(|e| {
            OrderflowError::ConfigurationError(format!("Failed to construct URL: {e}"))
        })?;

        Ok(Self {
            client: build_client(config)?,
            endpoint,
            policy: RetryPolicy::from(config),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Report `(task_id, order_id)` as finished, continuing the trace the job carried
    pub async fn complete_job(
        &self,
        task_id: &str,
        order_id: &str,
        trace: &TraceContext,
    ) -> Result<()> {
        let message = JobCompleteMessage {
            task_id: task_id.to_string(),
            order_id: order_id.to_string(),
        };

        debug!(
            url = %self.endpoint,
            task_id = %task_id,
            order_id = %order_id,
            "Reporting job completion"
        );

        post_with_retries(
            &self.client,
            self.endpoint.clone(),
            &message,
            trace,
            self.policy,
        )
        .await
    }
}
