mod client;
mod config;
mod models;
mod pki;
mod retry;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, info_span, warn};

use client::ApiClient;
use config::Config;
use models::{parse_env_vars, Workload};
use pki::{CertificateManager, CredentialState, EnsureOutcome};

#[derive(Parser)]
#[command(name = "persysctl")]
#[command(about = "Command-line client for managing Persys workloads, nodes and metrics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: ~/.persys/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage workloads
    #[command(subcommand)]
    Workload(WorkloadCommand),

    /// Manage nodes
    #[command(subcommand)]
    Node(NodeCommand),

    /// Show cluster metrics
    Metrics,

    /// Manage the client certificate
    #[command(subcommand)]
    Cert(CertCommand),

    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum WorkloadCommand {
    /// Schedule a new workload from a JSON file or from flags
    Schedule(ScheduleArgs),

    /// List all workloads
    List,
}

#[derive(Subcommand)]
enum NodeCommand {
    /// List all nodes
    List,
}

#[derive(Subcommand)]
enum CertCommand {
    /// Obtain a client certificate if none is valid
    Ensure,

    /// Show the stored certificate without changing anything
    Status,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write a default config file
    Init,

    /// Print the effective configuration
    Show,
}

#[derive(Args)]
struct ScheduleArgs {
    /// Workload JSON file; flags are ignored when given
    file: Option<PathBuf>,

    /// Workload ID
    #[arg(long, default_value = "")]
    id: String,

    /// Workload name
    #[arg(long, default_value = "")]
    name: String,

    /// Workload type (docker-container, docker-compose, git-compose)
    #[arg(long = "type", default_value = "")]
    workload_type: String,

    /// Docker image (for docker-container)
    #[arg(long, default_value = "")]
    image: String,

    /// Command (for docker-container)
    #[arg(long, default_value = "")]
    command: String,

    /// Base64-encoded Compose content
    #[arg(long, default_value = "")]
    compose: String,

    /// Git repository URL (for git-compose)
    #[arg(long, default_value = "")]
    git_repo: String,

    /// Git branch (for git-compose)
    #[arg(long, default_value = "main")]
    git_branch: String,

    /// Git auth token (for git-compose)
    #[arg(long, default_value = "")]
    git_token: String,

    /// Local Compose path (for docker-compose)
    #[arg(long, default_value = "")]
    local_path: String,

    /// Environment variables (key1=value1,key2=value2)
    #[arg(long, default_value = "")]
    env: String,

    /// Ports to expose (e.g. 8080:80)
    #[arg(long)]
    ports: Vec<String>,

    /// Volumes to mount (e.g. /host/path:/container/path)
    #[arg(long)]
    volumes: Vec<String>,

    /// Network for the container
    #[arg(long, default_value = "")]
    network: String,

    /// Restart policy (e.g. always, no)
    #[arg(long, default_value = "no")]
    restart_policy: String,
}

impl ScheduleArgs {
    fn into_workload(self) -> Result<Workload> {
        if let Some(path) = &self.file {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read workload file {}", path.display()))?;
            return serde_json::from_str(&data).context("Failed to parse workload file");
        }

        Ok(Workload {
            id: self.id,
            name: self.name,
            workload_type: self.workload_type,
            image: self.image,
            command: self.command,
            compose: self.compose,
            git_repo: self.git_repo,
            git_branch: self.git_branch,
            git_token: self.git_token,
            local_path: self.local_path,
            env_vars: parse_env_vars(&self.env),
            ports: self.ports,
            volumes: self.volumes,
            network: self.network,
            restart_policy: self.restart_policy,
            ..Default::default()
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    match cli.command {
        Commands::Workload(WorkloadCommand::Schedule(args)) => {
            let workload = args.into_workload()?;
            workload.validate()?;

            let client = connect(&config_path).await?;
            let response = client.schedule_workload(&workload).await?;
            println!(
                "Workload {} scheduled on node {}",
                response.workload_id, response.node_id
            );
        }

        Commands::Workload(WorkloadCommand::List) => {
            let client = connect(&config_path).await?;
            print_json(&client.list_workloads().await?)?;
        }

        Commands::Node(NodeCommand::List) => {
            let client = connect(&config_path).await?;
            print_json(&client.list_nodes().await?)?;
        }

        Commands::Metrics => {
            let client = connect(&config_path).await?;
            print_json(&client.cluster_metrics().await?)?;
        }

        Commands::Cert(CertCommand::Ensure) => {
            ensure_certificate(&config_path).await?;
        }

        Commands::Cert(CertCommand::Status) => {
            show_certificate_status(&config_path)?;
        }

        Commands::Config(ConfigCommand::Init) => {
            Config::create_default(&config_path)?;
            info!("Wrote default configuration to {}", config_path.display());
        }

        Commands::Config(ConfigCommand::Show) => {
            let config = Config::load(Some(&config_path))?;
            println!("# {}", config_path.display());
            print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
        }

        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<Config> {
    let config = Config::load(Some(path))?;
    config.validate()?;
    Ok(config)
}

async fn connect(config_path: &Path) -> Result<ApiClient> {
    let config = load_config(config_path)?;
    ApiClient::connect(&config)
        .await
        .context("Failed to connect to the Persys API")
}

fn certificate_manager(config: &Config) -> Result<CertificateManager> {
    let identity = config.identity();
    let span = info_span!("certificate", cn = %identity.common_name);
    let manager =
        CertificateManager::with_cfssl(identity, config.sign_timeout(), config.retry_config())?
            .with_span(span);
    Ok(manager)
}

async fn ensure_certificate(config_path: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let manager = certificate_manager(&config)?;

    match manager.ensure_certificate().await? {
        EnsureOutcome::AlreadyValid { not_after } => {
            println!("Certificate is valid until {}", not_after.format("%Y-%m-%d %H:%M:%S UTC"));
        }
        EnsureOutcome::Issued { previous } => {
            println!("Issued a new certificate (previous: {})", previous);
        }
    }

    // Fail now rather than on the first API call
    manager.tls_config()?;
    Ok(())
}

fn show_certificate_status(config_path: &Path) -> Result<()> {
    let config = Config::load(Some(config_path))?;
    let manager = certificate_manager(&config)?;
    let status = manager.status();

    println!("Certificate: {}", config.tls.cert_path.display());
    println!("Key:         {}", config.tls.key_path.display());
    println!("State:       {}", status.state);
    if let Some(fingerprint) = status.fingerprint {
        println!("SHA-256:     {}", fingerprint);
    }

    if let CredentialState::Unreadable(_) | CredentialState::Expired { .. } = status.state {
        warn!("Run `persysctl cert ensure` to obtain a new certificate");
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let data = serde_json::to_string_pretty(value).context("Failed to format response")?;
    println!("{}", data);
    Ok(())
}

fn show_version() {
    println!("persysctl {}", env!("CARGO_PKG_VERSION"));

    if let Some(hash) = option_env!("VERGEN_GIT_SHA") {
        println!("Git Commit: {}", hash);
    }

    println!("Config: {}", Config::default_path().display());
}
