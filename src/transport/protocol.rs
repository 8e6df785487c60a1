//! Agent protocol message types.
//!
//! JSON over HTTP: every request is `{method, arguments, reply_to}` and every
//! reply is an envelope `{value, exception}`. Long-running methods answer with
//! a task reference that is then polled with `get_task`.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method used to query the status of a submitted task.
pub const GET_TASK_METHOD: &str = "get_task";

/// Request sent from this node to the agent endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub method: String,
    pub arguments: Vec<Value>,
    pub reply_to: String,
}

/// Business-level failure reported inside an otherwise successful reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentException {
    #[serde(alias = "Message")]
    pub message: String,
}

/// Reply envelope for every agent request.
///
/// Older agents capitalize the keys, so both spellings are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawResponse {
    #[serde(default, alias = "Value")]
    pub value: Value,
    #[serde(default, alias = "Exception", skip_serializing_if = "Option::is_none")]
    pub exception: Option<AgentException>,
}

impl RawResponse {
    /// A successful reply carrying `value`.
    pub const fn value(value: Value) -> Self {
        Self {
            value,
            exception: None,
        }
    }

    /// A reply carrying an embedded agent exception.
    pub fn exception(message: impl Into<String>) -> Self {
        Self {
            value: Value::Null,
            exception: Some(AgentException {
                message: message.into(),
            }),
        }
    }
}

/// Opaque identifier of a task running on the agent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskHandle(String);

impl TaskHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a submitted task as reported by `get_task`.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    /// Still executing; poll again later.
    Running,
    /// Finished; the reply may still carry an agent exception.
    Done(RawResponse),
    /// The task itself failed on the agent.
    Failed(String),
}

/// Task reference found in the value of a submission or `get_task` reply.
#[derive(Debug, Deserialize)]
struct TaskRef {
    agent_task_id: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl TaskRef {
    fn from_value(value: &Value) -> Option<Self> {
        if !value.is_object() {
            return None;
        }
        Self::deserialize(value).ok()
    }
}

/// Extract the task handle from a submission reply value.
pub fn task_handle(value: &Value) -> Option<TaskHandle> {
    TaskRef::from_value(value).map(|r| TaskHandle(r.agent_task_id))
}

/// Classify a `get_task` reply.
///
/// A value carrying `agent_task_id` with state `running` or `failed` is a
/// status report; anything else, including an exception, is the terminal
/// result of the task.
pub fn task_status(reply: RawResponse) -> TaskStatus {
    if reply.exception.is_none() {
        if let Some(task) = TaskRef::from_value(&reply.value) {
            match task.state.as_deref() {
                Some("running") => return TaskStatus::Running,
                Some("failed") => {
                    let message = task
                        .message
                        .or(task.error)
                        .unwrap_or_else(|| format!("task {} failed", task.agent_task_id));
                    return TaskStatus::Failed(message);
                }
                _ => {}
            }
        }
    }
    TaskStatus::Done(reply)
}
