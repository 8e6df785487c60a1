//! Process supervisor seam used around package cutover.
//!
//! The supervisor itself is an external collaborator; `MonitSupervisor`
//! drives it through its command line.

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
}

/// Starts, stops and reports supervised jobs by name.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn start(&self, job: &str) -> Result<()>;
    async fn stop(&self, job: &str) -> Result<()>;
    async fn restart(&self, job: &str) -> Result<()>;
    async fn status(&self, job: &str) -> Result<JobState>;
}

/// Supervisor driven through the `monit` command line.
#[derive(Debug, Clone)]
pub struct MonitSupervisor {
    binary: String,
}

impl MonitSupervisor {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run `<binary> <verb> <job>` and return its stdout.
    #[instrument(skip(self), fields(binary = %self.binary))]
    async fn run(&self, verb: &str, job: &str) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg(verb)
            .arg(job)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to spawn {}", self.binary))?;

        if !output.status.success() {
            anyhow::bail!(
                "{} {verb} {job} exited with {}: {}",
                self.binary,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        debug!("Supervisor command succeeded");
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ProcessSupervisor for MonitSupervisor {
    async fn start(&self, job: &str) -> Result<()> {
        self.run("start", job).await.map(|_| ())
    }

    async fn stop(&self, job: &str) -> Result<()> {
        self.run("stop", job).await.map(|_| ())
    }

    async fn restart(&self, job: &str) -> Result<()> {
        self.run("restart", job).await.map(|_| ())
    }

    async fn status(&self, job: &str) -> Result<JobState> {
        let summary = self.run("summary", job).await?;
        let running = summary
            .lines()
            .any(|line| line.contains(job) && line.to_ascii_lowercase().contains("running"));
        Ok(if running {
            JobState::Running
        } else {
            JobState::Stopped
        })
    }
}
