//! Polling a submitted task until it reaches a terminal status.

use std::time::Duration;

use tracing::{debug, trace, warn};

use super::tolerance::ErrorTolerance;
use crate::error::RpcError;
use crate::transport::{RawResponse, TaskHandle, TaskStatus, Transport};

/// Polls `get_task` for one handle at a fixed delay.
pub struct TaskPoller<'a, T: ?Sized> {
    transport: &'a T,
    delay: Duration,
}

impl<'a, T: Transport + ?Sized> TaskPoller<'a, T> {
    pub const fn new(transport: &'a T, delay: Duration) -> Self {
        Self { transport, delay }
    }

    /// Poll `handle` until the task finishes.
    ///
    /// Transport failures go through `tolerance`; any received status resets
    /// it. A failed task ends the loop immediately. Dropping the returned
    /// future abandons the poll without leaving anything to clean up.
    pub async fn poll(
        &self,
        method: &str,
        handle: TaskHandle,
        tolerance: &mut ErrorTolerance,
    ) -> Result<RawResponse, RpcError> {
        let mut polls: u64 = 0;
        loop {
            polls += 1;
            match self.transport.query_status(&handle).await {
                Ok(status) => {
                    tolerance.on_transport_success();
                    match status {
                        TaskStatus::Running => {
                            trace!(method, task_id = %handle, polls, "Task still running");
                        }
                        TaskStatus::Done(raw) => {
                            debug!(method, task_id = %handle, polls, "Task finished");
                            return Ok(raw);
                        }
                        TaskStatus::Failed(message) => {
                            warn!(method, task_id = %handle, %message, "Task failed");
                            return Err(RpcError::TaskFailed {
                                method: method.to_string(),
                                task_id: handle.to_string(),
                                message,
                            });
                        }
                    }
                }
                Err(e) => tolerance.absorb(method, e)?,
            }
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::fake::{connection_error, ScriptedTransport};
    use serde_json::json;

    const DELAY: Duration = Duration::from_millis(1);

    async fn poll(
        transport: &ScriptedTransport,
        tolerance: &mut ErrorTolerance,
    ) -> Result<RawResponse, RpcError> {
        TaskPoller::new(transport, DELAY)
            .poll("fetch_logs", TaskHandle::new("task-1"), tolerance)
            .await
    }

    #[tokio::test]
    async fn returns_payload_after_running() {
        let transport = ScriptedTransport::new()
            .status(TaskStatus::Running)
            .status(TaskStatus::Running)
            .status(TaskStatus::Done(RawResponse::value(json!({"ok": true}))));

        let raw = poll(&transport, &mut ErrorTolerance::new(0)).await.unwrap();

        assert_eq!(raw.value, json!({"ok": true}));
        assert_eq!(transport.status_calls(), 3);
        assert!(transport
            .polled()
            .iter()
            .all(|h| h == &TaskHandle::new("task-1")));
    }

    #[tokio::test]
    async fn exhausts_after_tolerated_plus_one_failures() {
        let transport = ScriptedTransport::new()
            .status_errors(3)
            .status(TaskStatus::Done(RawResponse::value(json!("late"))));

        let err = poll(&transport, &mut ErrorTolerance::new(2))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RpcError::TransportExhausted { failures: 3, .. }
        ));
        assert_eq!(transport.status_calls(), 3);
    }

    #[tokio::test]
    async fn tolerated_failures_then_done() {
        let transport = ScriptedTransport::new()
            .status_errors(2)
            .status(TaskStatus::Done(RawResponse::value(json!("ok"))));

        let raw = poll(&transport, &mut ErrorTolerance::new(2)).await.unwrap();
        assert_eq!(raw.value, json!("ok"));
    }

    #[tokio::test]
    async fn running_status_resets_failures() {
        // Four failures in total, never more than two in a row.
        let transport = ScriptedTransport::new()
            .status_errors(2)
            .status(TaskStatus::Running)
            .status_errors(2)
            .status(TaskStatus::Done(RawResponse::value(json!("ok"))));

        let raw = poll(&transport, &mut ErrorTolerance::new(2)).await.unwrap();
        assert_eq!(raw.value, json!("ok"));
        assert_eq!(transport.status_calls(), 6);
    }

    #[tokio::test]
    async fn failed_task_is_not_retried() {
        let transport = ScriptedTransport::new()
            .status_error(connection_error())
            .status(TaskStatus::Failed("out of disk".to_string()))
            .status(TaskStatus::Done(RawResponse::value(json!("unreachable"))));

        let mut tolerance = ErrorTolerance::new(5);
        let err = poll(&transport, &mut tolerance).await.unwrap_err();

        match err {
            RpcError::TaskFailed {
                task_id, message, ..
            } => {
                assert_eq!(task_id, "task-1");
                assert_eq!(message, "out of disk");
            }
            other => panic!("expected TaskFailed, got {other:?}"),
        }
        assert_eq!(transport.status_calls(), 2);
        // A failed status is still a successful exchange.
        assert_eq!(tolerance.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn exception_reply_is_returned_for_decoding() {
        let transport =
            ScriptedTransport::new().status(TaskStatus::Done(RawResponse::exception("denied")));

        let raw = poll(&transport, &mut ErrorTolerance::new(0)).await.unwrap();
        assert_eq!(raw.exception.unwrap().message, "denied");
    }
}
