//! Configuration for the agent client and the package applier.
//!
//! Read as JSON from the `AGENT_TASKS_CONFIG` environment variable or from a
//! file. Everything except the agent endpoint has a default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::applier::ApplierSettings;
use crate::client::ClientSettings;
use crate::transport::{HttpTransport, RetryPolicy};

/// Environment variable holding the configuration JSON.
pub const CONFIG_ENV: &str = "AGENT_TASKS_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub agent: AgentConfig,

    #[serde(default)]
    pub applier: ApplierConfig,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

/// How to reach the agent and how patiently to wait for it.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Base URL of the agent; requests go to `<endpoint>/agent`.
    pub endpoint: String,

    /// Reply address sent with every request.
    #[serde(default = "default_reply_to")]
    pub reply_to: String,

    /// Wait between status queries of a running task.
    #[serde(default = "default_get_task_delay")]
    pub get_task_delay_ms: u64,

    /// Consecutive transport failures absorbed per call.
    #[serde(default = "default_tolerated_error_count")]
    pub tolerated_error_count: u32,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,

    /// Connection retries for task submission.
    #[serde(default = "default_submit_retry")]
    pub submit_retry: RetryConfig,

    /// Connection retries for status queries.
    #[serde(default = "default_poll_retry")]
    pub poll_retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl From<RetryConfig> for RetryPolicy {
    fn from(retry: RetryConfig) -> Self {
        Self::new(retry.attempts, Duration::from_millis(retry.delay_ms))
    }
}

/// Package store locations.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplierConfig {
    #[serde(default = "default_store_dir")]
    pub store_dir: PathBuf,

    #[serde(default = "default_live_dir")]
    pub live_dir: PathBuf,

    /// Directory of package blobs named by digest.
    #[serde(default = "default_blobstore_dir")]
    pub blobstore_dir: PathBuf,
}

impl Default for ApplierConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            live_dir: default_live_dir(),
            blobstore_dir: default_blobstore_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Supervisor command line binary.
    #[serde(default = "default_supervisor_binary")]
    pub binary: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            binary: default_supervisor_binary(),
        }
    }
}

impl Config {
    /// Load configuration from the `AGENT_TASKS_CONFIG` environment variable.
    pub fn from_env() -> Result<Self> {
        let json = std::env::var(CONFIG_ENV)
            .with_context(|| format!("{CONFIG_ENV} not set and no --config given"))?;
        Self::from_json(&json).with_context(|| format!("Failed to parse {CONFIG_ENV}"))
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&json)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse JSON")?;
        anyhow::ensure!(
            !config.agent.endpoint.trim().is_empty(),
            "agent.endpoint must not be empty"
        );
        Ok(config)
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            get_task_delay: Duration::from_millis(self.agent.get_task_delay_ms),
            tolerated_error_count: self.agent.tolerated_error_count,
        }
    }

    /// Build the HTTP transport described by `agent`.
    pub fn transport(&self) -> Result<HttpTransport> {
        let transport = HttpTransport::new(
            &self.agent.endpoint,
            &self.agent.reply_to,
            Duration::from_secs(self.agent.request_timeout_seconds),
        )
        .context("Failed to build HTTP transport")?;
        Ok(transport
            .with_submit_retry(self.agent.submit_retry.into())
            .with_poll_retry(self.agent.poll_retry.into()))
    }

    pub fn applier_settings(&self) -> ApplierSettings {
        ApplierSettings {
            store_dir: self.applier.store_dir.clone(),
            live_dir: self.applier.live_dir.clone(),
        }
    }
}

fn default_reply_to() -> String {
    "agent-tasks".into()
}

const fn default_get_task_delay() -> u64 {
    1000
}

const fn default_tolerated_error_count() -> u32 {
    3
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_submit_retry() -> RetryConfig {
    RetryConfig {
        attempts: 3,
        delay_ms: 1000,
    }
}

const fn default_poll_retry() -> RetryConfig {
    RetryConfig {
        attempts: 10,
        delay_ms: 1000,
    }
}

fn default_store_dir() -> PathBuf {
    "/var/vcap/data/packages".into()
}

fn default_live_dir() -> PathBuf {
    "/var/vcap/packages".into()
}

fn default_blobstore_dir() -> PathBuf {
    "/var/vcap/data/blobs".into()
}

fn default_supervisor_binary() -> String {
    "monit".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let json = r#"{"agent": {"endpoint": "https://10.0.0.5:6868"}}"#;

        let config = Config::from_json(json).unwrap();

        // Check defaults are applied
        assert_eq!(config.agent.reply_to, "agent-tasks");
        assert_eq!(config.agent.get_task_delay_ms, 1000);
        assert_eq!(config.agent.tolerated_error_count, 3);
        assert_eq!(config.agent.request_timeout_seconds, 30);
        assert_eq!(config.agent.submit_retry, default_submit_retry());
        assert_eq!(config.agent.poll_retry.attempts, 10);
        assert_eq!(config.applier.store_dir, PathBuf::from("/var/vcap/data/packages"));
        assert_eq!(config.applier.live_dir, PathBuf::from("/var/vcap/packages"));
        assert_eq!(config.applier.blobstore_dir, PathBuf::from("/var/vcap/data/blobs"));
        assert_eq!(config.supervisor.binary, "monit");
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "agent": {
                "endpoint": "http://agent.internal",
                "reply_to": "director",
                "get_task_delay_ms": 250,
                "tolerated_error_count": 5,
                "request_timeout_seconds": 10,
                "submit_retry": {"attempts": 1, "delay_ms": 0},
                "poll_retry": {"attempts": 20, "delay_ms": 500}
            },
            "applier": {
                "store_dir": "/data/store",
                "live_dir": "/data/live",
                "blobstore_dir": "/data/blobs"
            },
            "supervisor": {"binary": "/usr/bin/monit"}
        }"#;

        let config = Config::from_json(json).unwrap();

        assert_eq!(config.agent.reply_to, "director");
        assert_eq!(config.supervisor.binary, "/usr/bin/monit");

        let settings = config.client_settings();
        assert_eq!(settings.get_task_delay, Duration::from_millis(250));
        assert_eq!(settings.tolerated_error_count, 5);

        let applier = config.applier_settings();
        assert_eq!(applier.store_dir, PathBuf::from("/data/store"));
        assert_eq!(applier.live_dir, PathBuf::from("/data/live"));

        let poll: RetryPolicy = config.agent.poll_retry.into();
        assert_eq!(poll.attempts, 20);
        assert_eq!(poll.delay, Duration::from_millis(500));
    }

    #[test]
    fn missing_endpoint_is_an_error() {
        assert!(Config::from_json(r#"{"agent": {}}"#).is_err());
        assert!(Config::from_json(r#"{"agent": {"endpoint": " "}}"#).is_err());
    }

    #[test]
    fn builds_transport() {
        let config = Config::from_json(r#"{"agent": {"endpoint": "http://127.0.0.1:1"}}"#).unwrap();
        assert!(config.transport().is_ok());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"agent": {"endpoint": "http://agent"}}"#).unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.agent.endpoint, "http://agent");
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = Config::from_file(Path::new("/nonexistent/config.json")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/config.json"));
    }
}
