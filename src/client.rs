//! Task RPC client for the agent.
//!
//! Every method follows the same path: submit the command, poll the task
//! handle until it is terminal, decode the reply into the method's result
//! shape. Adding a method means adding an argument tuple and a shape.

use std::time::Duration;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::actions::{
    FetchLogsWithSignedUrlRequest, FetchLogsWithSignedUrlResponse, SshParams, SshResult,
    SyncDnsWithSignedUrlRequest, UpdateSettings,
};
use crate::digest::MultipleDigest;
use crate::error::RpcError;
use crate::task::{decode, ErrorTolerance, ResponseShape, TaskPoller};
use crate::transport::{TaskHandle, Transport};

/// A remote method with positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    method: String,
    arguments: Vec<Value>,
}

impl Command {
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            arguments: Vec::new(),
        }
    }

    /// Append a positional argument.
    pub fn arg<A: Serialize + ?Sized>(mut self, arg: &A) -> Result<Self, RpcError> {
        let value = serde_json::to_value(arg).map_err(|source| RpcError::Encode {
            method: self.method.clone(),
            source,
        })?;
        self.arguments.push(value);
        Ok(self)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn arguments(&self) -> &[Value] {
        &self.arguments
    }
}

/// Polling cadence and failure tolerance of a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientSettings {
    /// Pause between `get_task` polls and between transport retries.
    pub get_task_delay: Duration,
    /// Consecutive transport failures tolerated within one call.
    pub tolerated_error_count: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            get_task_delay: Duration::from_secs(1),
            tolerated_error_count: 3,
        }
    }
}

/// Client issuing asynchronous task commands to an agent.
///
/// Holds no per-call state, so one client can serve concurrent calls.
pub struct AgentClient<T> {
    transport: T,
    settings: ClientSettings,
}

impl<T: Transport> AgentClient<T> {
    pub const fn new(transport: T, settings: ClientSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    /// Run `command` to completion and decode its result as `S`.
    #[instrument(skip(self, command), fields(method = %command.method()))]
    pub async fn invoke<S: ResponseShape>(&self, command: Command) -> Result<S, RpcError> {
        let method = command.method();
        let mut tolerance = ErrorTolerance::new(self.settings.tolerated_error_count);

        let handle = self
            .submit(method, command.arguments(), &mut tolerance)
            .await?;
        let raw = TaskPoller::new(&self.transport, self.settings.get_task_delay)
            .poll(method, handle, &mut tolerance)
            .await?;

        decode::<S>(&raw).map_err(|failure| RpcError::from_decode(method, failure))
    }

    async fn submit(
        &self,
        method: &str,
        arguments: &[Value],
        tolerance: &mut ErrorTolerance,
    ) -> Result<TaskHandle, RpcError> {
        loop {
            match self.transport.submit(method, arguments).await {
                Ok(handle) => {
                    tolerance.on_transport_success();
                    debug!(method, task_id = %handle, "Submitted task");
                    return Ok(handle);
                }
                Err(e) => tolerance.absorb(method, e)?,
            }
            tokio::time::sleep(self.settings.get_task_delay).await;
        }
    }

    /// Fetch logs of `log_type`; the agent's reply map is returned unchanged.
    pub async fn fetch_logs(
        &self,
        log_type: &str,
        filters: &[String],
    ) -> Result<Map<String, Value>, RpcError> {
        let command = Command::new("fetch_logs").arg(log_type)?.arg(filters)?;
        self.invoke(command).await
    }

    /// Have the agent upload logs to `signed_url`.
    pub async fn fetch_logs_with_signed_url(
        &self,
        signed_url: &str,
        log_type: &str,
        filters: &[String],
    ) -> Result<FetchLogsWithSignedUrlResponse, RpcError> {
        let request = FetchLogsWithSignedUrlRequest {
            signed_url: signed_url.to_string(),
            log_type: log_type.to_string(),
            filters: filters.to_vec(),
        };
        let command = Command::new("fetch_logs_with_signed_url").arg(&request)?;
        self.invoke(command).await
    }

    /// Have the agent download DNS records from `signed_url`.
    ///
    /// Returns the agent's acknowledgement string as is.
    pub async fn sync_dns_with_signed_url(
        &self,
        signed_url: &str,
        digest: MultipleDigest,
        version: u64,
    ) -> Result<String, RpcError> {
        let request = SyncDnsWithSignedUrlRequest {
            signed_url: signed_url.to_string(),
            multi_digest: digest,
            version,
        };
        let command = Command::new("sync_dns_with_signed_url").arg(&request)?;
        self.invoke(command).await
    }

    /// Run an ssh setup/cleanup command on the agent.
    ///
    /// `Ok` means the agent raised no exception; the command's own status is
    /// in the result.
    pub async fn ssh(&self, cmd: &str, params: &SshParams) -> Result<SshResult, RpcError> {
        let command = Command::new("ssh").arg(cmd)?.arg(params)?;
        self.invoke(command).await
    }

    pub async fn update_settings(&self, settings: &UpdateSettings) -> Result<(), RpcError> {
        let command = Command::new("update_settings").arg(settings)?;
        self.invoke::<Value>(command).await.map(|_| ())
    }
}
