//! Parcel - package registry and dependency resolution
//!
//! Command-line front end over parcel-core: browse the merged catalog of the
//! configured sources, resolve dependencies and manage installed packages.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use parcel_core::config::{default_data_dir, ConfigEnv};
use parcel_core::{JsonFileStore, PackageRepoConfig, SourceManager};

mod package_cli;

use package_cli::PackageCommand;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "parcel",
    about = "Package registry and dependency resolution for component packages",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: PackageCommand,

    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Emit logs as JSON lines
    #[clap(long, global = true)]
    json_logs: bool,

    /// Package repository config file (YAML or JSON); overrides PARCEL_CONFIG
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of the installed-package store
    #[clap(long, global = true)]
    store_dir: Option<PathBuf>,
}

/// Initialize tracing with CLI flags
///
/// Logs always go to stderr so command output on stdout stays parseable.
fn initialize_tracing(log_level: &LogLevel, json: bool) {
    let filter = EnvFilter::new(log_level.to_filter_directive());

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Everything a command needs: the repository config and where the store lives
pub struct CliContext {
    pub config: PackageRepoConfig,
    pub store_dir: PathBuf,
}

impl CliContext {
    async fn load(config_path: Option<PathBuf>, store_dir: Option<PathBuf>) -> Result<Self> {
        let mut env = ConfigEnv::from_env();
        if config_path.is_some() {
            env.config_path = config_path;
        }

        let config = PackageRepoConfig::from_env(&env)
            .await
            .context("Failed to load package repository configuration")?;

        let store_dir = match store_dir {
            Some(dir) => dir,
            None => default_data_dir()?.join("store"),
        };
        debug!("Using store directory {}", store_dir.display());

        Ok(Self { config, store_dir })
    }

    pub fn manager(&self) -> Result<SourceManager> {
        SourceManager::from_repo_config(&self.config).context("Failed to set up package sources")
    }

    pub fn store(&self) -> JsonFileStore {
        JsonFileStore::new(&self.store_dir)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level, cli.json_logs);

    let context = CliContext::load(cli.config, cli.store_dir).await?;
    cli.command.execute(&context).await
}
