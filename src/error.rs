//! Error types for agent task calls.

use thiserror::Error;

use crate::task::DecodeFailure;

/// Failure of a single exchange with the agent endpoint.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection, timeout or body read failure.
    #[error("connection error: {0}")]
    Connection(String),

    /// The endpoint answered with a non-success HTTP status.
    #[error("agent endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The agent rejected the submission with an exception.
    #[error("agent rejected request: {0}")]
    Rejected(String),

    /// The reply did not follow the task protocol.
    #[error("expected {expected}, got {actual}")]
    Protocol {
        expected: &'static str,
        actual: String,
    },
}

impl TransportError {
    /// Whether the failure counts against the error tolerance and may be retried.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Status { .. })
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

/// Error returned by an agent task call.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Arguments could not be encoded.
    #[error("encoding arguments for '{method}': {source}")]
    Encode {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    /// Consecutive transport failures exceeded the tolerated count.
    #[error("sending '{method}' to the agent: gave up after {failures} consecutive transport failures: {last}")]
    TransportExhausted {
        method: String,
        failures: u32,
        #[source]
        last: TransportError,
    },

    /// The agent reported that the task itself failed.
    #[error("sending '{method}' to the agent: task {task_id} failed: {message}")]
    TaskFailed {
        method: String,
        task_id: String,
        message: String,
    },

    /// The agent responded with an exception.
    #[error("sending '{method}' to the agent: agent responded with error: {message}")]
    Server { method: String, message: String },

    /// The terminal payload did not have the expected shape.
    #[error("unable to parse {method} response value: expected {expected}, got {actual}")]
    Decode {
        method: String,
        expected: &'static str,
        actual: String,
    },
}

impl RpcError {
    /// The method of the call that failed.
    pub fn method(&self) -> &str {
        match self {
            Self::Encode { method, .. }
            | Self::TransportExhausted { method, .. }
            | Self::TaskFailed { method, .. }
            | Self::Server { method, .. }
            | Self::Decode { method, .. } => method,
        }
    }

    /// Attach the failing method to a decode failure.
    pub(crate) fn from_decode(method: &str, failure: DecodeFailure) -> Self {
        match failure {
            DecodeFailure::Exception(message) => Self::Server {
                method: method.to_string(),
                message,
            },
            DecodeFailure::Shape { expected, actual } => Self::Decode {
                method: method.to_string(),
                expected,
                actual,
            },
        }
    }

    /// Split a transport error of `method` into one worth retrying (`Ok`) and
    /// one that ends the call (`Err`, mapped into the call's taxonomy).
    pub(crate) fn retryable_or_fatal(
        method: &str,
        err: TransportError,
    ) -> Result<TransportError, Self> {
        match err {
            retryable @ (TransportError::Connection(_) | TransportError::Status { .. }) => {
                Ok(retryable)
            }
            TransportError::Rejected(message) => Err(Self::Server {
                method: method.to_string(),
                message,
            }),
            TransportError::Protocol { expected, actual } => Err(Self::Decode {
                method: method.to_string(),
                expected,
                actual,
            }),
        }
    }
}
