//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// sticky-cluster - sticky-session TCP worker cluster
#[derive(Parser, Debug)]
#[command(
    name = "sticky-cluster",
    author,
    version,
    about = "Sticky-session worker cluster with cross-worker broadcast",
    long_about = "Accepts TCP connections on one port and hands each one, unread, to a \n\
                  worker process chosen from the client's IP address. Workers are \n\
                  respawned in place when they die and share broadcast topics \n\
                  through Redis pub/sub."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "STICKY_CLUSTER_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "STICKY_CLUSTER_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Global flags to repeat on worker command lines
    pub fn worker_args(&self) -> Vec<String> {
        let mut args = vec!["--log-format".to_string(), self.log_format.as_arg().to_string()];
        if self.quiet {
            args.push("--quiet".to_string());
        } else if self.verbose > 0 {
            args.push(format!("-{}", "v".repeat(self.verbose as usize)));
        }
        args
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the master and its workers
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),

    /// Worker process entry point (started by the master)
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON); built-in defaults when absent
    #[arg(short, long, env = "STICKY_CLUSTER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the listen host from configuration
    #[arg(long, env = "STICKY_CLUSTER_HOST")]
    pub host: Option<String>,

    /// Override the listen port from configuration
    #[arg(short, long, env = "STICKY_CLUSTER_PORT")]
    pub port: Option<u16>,

    /// Override the number of workers
    #[arg(short, long, env = "STICKY_CLUSTER_WORKERS")]
    pub workers: Option<usize>,

    /// Override the broadcast transport
    #[arg(long, value_enum, env = "STICKY_CLUSTER_BROADCAST_TRANSPORT")]
    pub broadcast_transport: Option<TransportArg>,

    /// Override the broadcast host
    #[arg(long, env = "STICKY_CLUSTER_BROADCAST_HOST")]
    pub broadcast_host: Option<String>,

    /// Override the broadcast port
    #[arg(long, env = "STICKY_CLUSTER_BROADCAST_PORT")]
    pub broadcast_port: Option<u16>,

    /// Validate configuration and exit without starting workers
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "STICKY_CLUSTER_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "cluster.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "cluster.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show the per-slot routing of sample addresses
    #[arg(long, value_name = "IP", num_args = 1..)]
    pub route: Vec<String>,
}

/// Arguments for the hidden `worker` command
///
/// Everything comes from the environment the master sets up.
#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Slot index
    #[arg(long, env = "STICKY_WORKER_SLOT")]
    pub slot: usize,

    /// Resolved cluster configuration as JSON
    #[arg(long, env = "STICKY_CLUSTER_BLUEPRINT", hide_env_values = true)]
    pub blueprint: String,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl LogFormat {
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Pretty => "pretty",
            Self::Compact => "compact",
        }
    }
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}

/// Broadcast transport choice
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum TransportArg {
    /// Redis pub/sub
    Redis,
    /// In-process only
    Local,
}

impl From<TransportArg> for contracts::TransportKind {
    fn from(arg: TransportArg) -> Self {
        match arg {
            TransportArg::Redis => Self::Redis,
            TransportArg::Local => Self::Local,
        }
    }
}
