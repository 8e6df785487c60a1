//! agent-tasks library
//!
//! This crate provides the node-side plumbing for talking to a remote agent
//! and converging the node's installed packages:
//! - Async task RPC: submit, poll and decode with bounded error tolerance
//! - HTTP transport speaking the agent's JSON task protocol
//! - Two-phase package applier with dependency-ordered convergence passes

pub mod actions;
pub mod applier;
pub mod client;
pub mod config;
pub mod digest;
pub mod error;
pub mod task;
pub mod transport;
