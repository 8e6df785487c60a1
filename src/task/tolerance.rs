//! Consecutive transport failure tracking for a single task call.

use tracing::debug;

use crate::error::{RpcError, TransportError};

/// What the caller should do after a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Still within tolerance: wait and try the transport again.
    Retry,
    /// Tolerance exceeded: give up on the call.
    Exhausted,
}

/// Counts consecutive transport failures across the submission and polls of
/// one call.
///
/// A single successful exchange forgives every earlier failure. Each call
/// creates its own tracker, so nothing is shared between invocations.
#[derive(Debug, Clone)]
pub struct ErrorTolerance {
    tolerated: u32,
    consecutive: u32,
}

impl ErrorTolerance {
    /// Tolerate up to `tolerated` consecutive failures; the next one aborts.
    pub const fn new(tolerated: u32) -> Self {
        Self {
            tolerated,
            consecutive: 0,
        }
    }

    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }

    pub fn on_transport_failure(&mut self) -> Verdict {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive > self.tolerated {
            Verdict::Exhausted
        } else {
            Verdict::Retry
        }
    }

    pub fn on_transport_success(&mut self) {
        self.consecutive = 0;
    }

    /// Account for a transport error raised while running `method`.
    ///
    /// Returns `Ok` when the caller should retry. Errors that are not
    /// transport failures (rejections, protocol violations) end the call
    /// without touching the counter.
    pub fn absorb(&mut self, method: &str, err: TransportError) -> Result<(), RpcError> {
        let err = RpcError::retryable_or_fatal(method, err)?;

        match self.on_transport_failure() {
            Verdict::Retry => {
                debug!(
                    method,
                    failures = self.consecutive,
                    tolerated = self.tolerated,
                    error = %err,
                    "Tolerating transport failure"
                );
                Ok(())
            }
            Verdict::Exhausted => Err(RpcError::TransportExhausted {
                method: method.to_string(),
                failures: self.consecutive,
                last: err,
            }),
        }
    }
}
