//! Transport layer for node ↔ agent communication.
//!
//! Provides the `Transport` trait used by the task client and the HTTP
//! implementation that speaks the agent's JSON protocol.

pub mod http;
pub mod protocol;

pub use http::{HttpTransport, RetryPolicy};
pub use protocol::{AgentException, AgentRequest, RawResponse, TaskHandle, TaskStatus};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;

/// Abstraction over the channel to the agent.
///
/// Implementations own connection-level retries; whatever error they return
/// has already exhausted that policy and is fed to the caller's error
/// tolerance.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit `method` with positional `arguments`, returning the task handle.
    async fn submit(&self, method: &str, arguments: &[Value]) -> Result<TaskHandle, TransportError>;

    /// Query the current status of a submitted task.
    async fn query_status(&self, handle: &TaskHandle) -> Result<TaskStatus, TransportError>;
}
