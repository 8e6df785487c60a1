//! agent-tasks
//!
//! Runs one agent task or one package convergence pass and prints the result
//! as JSON. Configuration comes from `--config` or `AGENT_TASKS_CONFIG`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use agent_tasks::actions::{SshParams, UpdateSettings};
use agent_tasks::applier::{BlobstoreDir, FsApplier, MonitSupervisor, Package, Reconciler};
use agent_tasks::client::AgentClient;
use agent_tasks::config::Config;
use agent_tasks::digest::MultipleDigest;
use agent_tasks::transport::HttpTransport;

#[derive(Parser, Debug)]
#[command(name = "agent-tasks")]
#[command(about = "Run agent tasks and converge installed packages")]
struct Args {
    /// Configuration file (JSON); defaults to the AGENT_TASKS_CONFIG variable
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch logs from the agent
    FetchLogs {
        #[arg(long, default_value = "job")]
        log_type: String,
        /// Log filter; may be repeated
        #[arg(long = "filter")]
        filters: Vec<String>,
    },

    /// Have the agent upload logs to a signed URL
    FetchLogsSigned {
        signed_url: String,
        #[arg(long, default_value = "job")]
        log_type: String,
        #[arg(long = "filter")]
        filters: Vec<String>,
    },

    /// Have the agent sync DNS records from a signed URL
    SyncDns {
        signed_url: String,
        /// Digest of the records blob, e.g. `sha256:ab12...`
        #[arg(long)]
        digest: MultipleDigest,
        #[arg(long)]
        version: u64,
    },

    /// Run an ssh setup or cleanup command on the agent
    Ssh {
        /// Either `setup` or `cleanup`
        cmd: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "")]
        user_regex: String,
        #[arg(long, default_value = "")]
        public_key: String,
    },

    /// Push settings read from a JSON file to the agent
    UpdateSettings {
        #[arg(long)]
        file: PathBuf,
    },

    /// Converge installed packages to the set listed in a JSON file
    Converge {
        #[arg(long)]
        desired: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout carries only results
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path),
        None => Config::from_env(),
    }
    .context("Failed to load configuration")?;

    info!(endpoint = %config.agent.endpoint, "Loaded configuration");

    match args.command {
        Command::FetchLogs { log_type, filters } => {
            print_json(&client(&config)?.fetch_logs(&log_type, &filters).await?)
        }
        Command::FetchLogsSigned {
            signed_url,
            log_type,
            filters,
        } => print_json(
            &client(&config)?
                .fetch_logs_with_signed_url(&signed_url, &log_type, &filters)
                .await?,
        ),
        Command::SyncDns {
            signed_url,
            digest,
            version,
        } => print_json(
            &client(&config)?
                .sync_dns_with_signed_url(&signed_url, digest, version)
                .await?,
        ),
        Command::Ssh {
            cmd,
            user,
            user_regex,
            public_key,
        } => {
            let params = SshParams {
                user,
                user_regex,
                public_key,
            };
            print_json(&client(&config)?.ssh(&cmd, &params).await?)
        }
        Command::UpdateSettings { file } => {
            let settings: UpdateSettings = read_json(&file)?;
            client(&config)?.update_settings(&settings).await?;
            print_json(&serde_json::json!({"updated": true}))
        }
        Command::Converge { desired } => converge(&config, &desired).await,
    }
}

fn client(config: &Config) -> Result<AgentClient<HttpTransport>> {
    Ok(AgentClient::new(config.transport()?, config.client_settings()))
}

async fn converge(config: &Config, desired: &Path) -> Result<()> {
    let desired: Vec<Package> = read_json(desired)?;

    let applier = FsApplier::open(
        config.applier_settings(),
        BlobstoreDir::new(&config.applier.blobstore_dir),
        MonitSupervisor::new(&config.supervisor.binary),
    )
    .await
    .context("Failed to open package store")?;

    let report = Reconciler::new(applier).converge(&desired).await?;
    print_json(&serde_json::json!({
        "applied": report.applied,
        "removed": report.removed,
    }))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
