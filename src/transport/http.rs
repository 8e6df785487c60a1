//! HTTP transport speaking the agent's JSON protocol.
//!
//! Every call is a `POST {endpoint}/agent`. Submissions and status queries
//! carry separate connection-level retry policies: submissions use a short
//! one, `get_task` polls a long one.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::protocol::{self, AgentRequest, RawResponse, TaskHandle, TaskStatus, GET_TASK_METHOD};
use super::Transport;
use crate::error::TransportError;

/// Connection-level retry policy for one kind of request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Zero is treated as one.
    pub attempts: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// A single attempt with no retry.
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Transport that talks to the agent over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    reply_to: String,
    submit_retry: RetryPolicy,
    poll_retry: RetryPolicy,
}

impl HttpTransport {
    /// Create a transport for `endpoint`, identifying replies with `reply_to`.
    pub fn new(endpoint: &str, reply_to: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/agent", endpoint.trim_end_matches('/')),
            reply_to: reply_to.to_string(),
            submit_retry: RetryPolicy::once(),
            poll_retry: RetryPolicy::once(),
        })
    }

    /// Retry policy for task submissions.
    #[must_use]
    pub fn with_submit_retry(mut self, policy: RetryPolicy) -> Self {
        self.submit_retry = policy;
        self
    }

    /// Retry policy for `get_task` status queries.
    #[must_use]
    pub fn with_poll_retry(mut self, policy: RetryPolicy) -> Self {
        self.poll_retry = policy;
        self
    }

    /// Send one request, retrying retryable failures per `policy`.
    async fn send(
        &self,
        method: &str,
        arguments: Vec<Value>,
        policy: RetryPolicy,
    ) -> Result<RawResponse, TransportError> {
        let req = AgentRequest {
            method: method.to_string(),
            arguments,
            reply_to: self.reply_to.clone(),
        };

        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.send_once(&req).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    debug!(method, attempt, error = %e, "Retrying agent request");
                    tokio::time::sleep(policy.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(method, attempts, error = %e, "Agent request failed");
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn send_once(&self, req: &AgentRequest) -> Result<RawResponse, TransportError> {
        let resp = self.client.post(&self.url).json(req).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|_| TransportError::Protocol {
            expected: "reply envelope",
            actual: body,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, arguments), fields(url = %self.url))]
    async fn submit(
        &self,
        method: &str,
        arguments: &[Value],
    ) -> Result<TaskHandle, TransportError> {
        let reply = self
            .send(method, arguments.to_vec(), self.submit_retry)
            .await?;

        if let Some(exception) = reply.exception {
            return Err(TransportError::Rejected(exception.message));
        }

        let handle = protocol::task_handle(&reply.value).ok_or_else(|| TransportError::Protocol {
            expected: "task reference",
            actual: reply.value.to_string(),
        })?;
        debug!(task_id = %handle, "Task submitted");
        Ok(handle)
    }

    #[instrument(skip(self), fields(url = %self.url, task_id = %handle))]
    async fn query_status(&self, handle: &TaskHandle) -> Result<TaskStatus, TransportError> {
        let reply = self
            .send(GET_TASK_METHOD, vec![json!(handle.as_str())], self.poll_retry)
            .await?;
        Ok(protocol::task_status(reply))
    }
}
