//! Scripted transport for task tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportError;
use crate::transport::{RawResponse, TaskHandle, TaskStatus, Transport};

/// Transport that replays scripted replies in order and records every call.
#[derive(Default)]
pub struct ScriptedTransport {
    submissions: Mutex<VecDeque<Result<TaskHandle, TransportError>>>,
    statuses: Mutex<VecDeque<Result<TaskStatus, TransportError>>>,
    submitted: Mutex<Vec<(String, Vec<Value>)>>,
    polled: Mutex<Vec<TaskHandle>>,
    submit_calls: AtomicU32,
    status_calls: AtomicU32,
}

pub fn connection_error() -> TransportError {
    TransportError::Connection("connection reset by peer".to_string())
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that accepts one submission and finishes with `value`.
    pub fn completing_with(value: Value) -> Self {
        Self::new()
            .accept("task-1")
            .status(TaskStatus::Done(RawResponse::value(value)))
    }

    pub fn accept(self, task_id: &str) -> Self {
        self.submissions
            .lock()
            .unwrap()
            .push_back(Ok(TaskHandle::new(task_id)));
        self
    }

    pub fn submit_error(self, err: TransportError) -> Self {
        self.submissions.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn status(self, status: TaskStatus) -> Self {
        self.statuses.lock().unwrap().push_back(Ok(status));
        self
    }

    pub fn status_error(self, err: TransportError) -> Self {
        self.statuses.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn status_errors(mut self, count: usize) -> Self {
        for _ in 0..count {
            self = self.status_error(connection_error());
        }
        self
    }

    pub fn submit_calls(&self) -> u32 {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<(String, Vec<Value>)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn polled(&self) -> Vec<TaskHandle> {
        self.polled.lock().unwrap().clone()
    }
}

fn exhausted_script() -> TransportError {
    TransportError::Protocol {
        expected: "scripted reply",
        actual: "end of script".to_string(),
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn submit(
        &self,
        method: &str,
        arguments: &[Value],
    ) -> Result<TaskHandle, TransportError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submitted
            .lock()
            .unwrap()
            .push((method.to_string(), arguments.to_vec()));
        self.submissions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(exhausted_script()))
    }

    async fn query_status(&self, handle: &TaskHandle) -> Result<TaskStatus, TransportError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.polled.lock().unwrap().push(handle.clone());
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(exhausted_script()))
    }
}
