//! Submit-then-poll machinery shared by every agent method.
//!
//! A call submits a command, polls the returned handle until the task is
//! terminal, and decodes the reply into the method's result shape. One
//! [`ErrorTolerance`] spans the whole call.

pub mod decode;
pub mod poller;
pub mod tolerance;

#[cfg(test)]
pub(crate) mod fake;

pub use decode::{decode, DecodeFailure, ResponseShape};
pub use poller::TaskPoller;
pub use tolerance::{ErrorTolerance, Verdict};
