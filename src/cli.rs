//! CLI arguments and subcommands for herakles-cluster-snapshot.
//!
//! Running without a subcommand starts the aggregator server. Collectors,
//! queries and maintenance tasks are subcommands.

use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::records::ProcessGrouping;

/// Log level options for CLI parsing
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

/// Configuration format options for output
#[derive(Debug, Clone, ValueEnum)]
pub enum ConfigFormat {
    Yaml,
    Json,
    Toml,
}

/// Output format for query results
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

/// Main CLI arguments structure
#[derive(Parser, Debug)]
#[command(
    name = "herakles-cluster-snapshot",
    about = "Cluster metric collectors and a time-aligned snapshot aggregator",
    long_about = "Cluster metric collectors and a time-aligned snapshot aggregator.\n\n\
                  Per-node collectors sample hardware and service process usage, average \
                  each batch and push it to the aggregator. The aggregator aligns node and \
                  cluster queues on a shared interval and persists fused snapshots that can \
                  be queried by time range.",
    author = "Michael Moll <proc-mem@herakles.io> - Herakles IO",
    version = "0.1.0",
    propagate_version = true,
    after_help = "Project: https://github.com/herakles-io/herakles-cluster-snapshot - More info: https://www.herakles.io"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// HTTP listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Bind to specific interface/IP
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Log level (overrides log_level from the config file)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Config file (YAML/JSON/TOML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Disable all config file loading
    #[arg(long)]
    pub no_config: bool,

    /// Print effective merged config and exit
    #[arg(long)]
    pub show_config: bool,

    /// Output format for --show-config
    #[arg(long, value_enum, default_value = "yaml")]
    pub config_format: ConfigFormat,

    /// Validate config and exit (return code 1 on error)
    #[arg(long)]
    pub check_config: bool,

    /// Aggregator base URL used by collectors and queries
    #[arg(long)]
    pub aggregator_url: Option<String>,

    /// Collection and aggregation interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Directory for persistent queues (in-memory when unset)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Node name reported by the node collector
    #[arg(long)]
    pub node_name: Option<String>,

    /// How processes are grouped when batches are averaged
    #[arg(long)]
    pub process_grouping: Option<ProcessGrouping>,

    /// Parallel /proc scanning threads (0 = auto)
    #[arg(long)]
    pub parallelism: Option<usize>,

    /// Disable /health endpoint
    #[arg(long)]
    pub disable_health: bool,

    /// Disable /metrics endpoint
    #[arg(long)]
    pub disable_telemetry: bool,

    /// Serve HTTPS
    #[arg(long)]
    pub enable_tls: bool,

    /// TLS certificate (PEM)
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,
}

/// Subcommands for additional functionality
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the node collector and push averaged NodeData to the aggregator
    Collect {
        /// Override the node name
        #[arg(long)]
        node: Option<String>,
    },

    /// Run the cluster topology collector
    CollectCluster,

    /// Fetch snapshots in a time range
    Query {
        /// Lower bound, milliseconds since epoch (inclusive)
        #[arg(long, default_value_t = 0.0)]
        from: f64,

        /// Upper bound, milliseconds since epoch (inclusive, default now)
        #[arg(long)]
        to: Option<f64>,

        /// Average the range into one snapshot
        #[arg(long)]
        average: bool,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Delete every stored snapshot
    DeleteSnapshots {
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Generate configuration files
    Config {
        /// Output file path
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: ConfigFormat,

        /// Include comments and examples
        #[arg(long)]
        commented: bool,
    },

    /// Validate configuration and system requirements
    Check {
        /// Check /proc filesystem
        #[arg(long)]
        proc: bool,

        /// Check the queue store
        #[arg(long)]
        store: bool,

        /// Check all system requirements
        #[arg(long)]
        all: bool,
    },

    /// Generate synthetic NodeData and ClusterData records
    GenerateTestdata {
        /// Number of nodes
        #[arg(long, default_value_t = 3)]
        nodes: usize,

        /// Number of intervals per node
        #[arg(long, default_value_t = 10)]
        intervals: usize,

        /// Output file path (JSON)
        #[arg(short = 'o', long, default_value = "testdata.json")]
        output: PathBuf,

        /// Push records to the aggregator instead of writing a file
        #[arg(long)]
        push: bool,
    },
}
