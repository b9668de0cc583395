//! Command-line interface argument parsing and definitions
//!
//! This module defines the CLI structure using clap's derive API.

use clap::{Parser, Subcommand, ValueEnum};
use is_terminal::IsTerminal;
use std::path::PathBuf;

/// Vitatrack CLI - drive the Vitatrack request pipeline from a terminal
///
/// Sends API requests through the same caching, retry and offline-queue
/// pipeline the app uses, and inspects the local queue and storage.
#[derive(Parser, Debug)]
#[command(
    name = "vitatrack",
    version,
    author,
    about,
    long_about = None,
    propagate_version = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Enable verbose output (can be used multiple times for increased verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "VITATRACK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format for results
    #[arg(short, long, value_enum, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// The subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send one request through the pipeline
    Request(RequestArgs),

    /// Upload an image as multipart form data
    Upload(UploadArgs),

    /// Download a resource to a file
    Download(DownloadArgs),

    /// Inspect or replay the offline queue
    Queue(QueueArgs),

    /// Inspect local storage
    Storage(StorageArgs),

    /// Manage configuration files
    Config(ConfigArgs),
}

/// Arguments for the request command
#[derive(Parser, Debug)]
pub struct RequestArgs {
    /// HTTP method (GET, POST, PUT, PATCH, DELETE, HEAD)
    #[arg(value_name = "METHOD")]
    pub method: String,

    /// Path relative to the base URL, or an absolute URL
    #[arg(value_name = "URL")]
    pub url: String,

    /// JSON request body
    #[arg(short, long)]
    pub data: Option<String>,

    /// Query parameter as key=value (repeatable)
    #[arg(long = "query", value_name = "KEY=VALUE")]
    pub query: Vec<String>,

    /// Path parameter as name=value, substituted for `:name` (repeatable)
    #[arg(long = "param", value_name = "NAME=VALUE")]
    pub params: Vec<String>,

    /// Extra header as name=value (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME=VALUE")]
    pub headers: Vec<String>,

    /// Bypass the response cache
    #[arg(long)]
    pub no_cache: bool,

    /// Queue the request for later if the device is offline
    #[arg(long)]
    pub queueable: bool,

    /// Retry transient failures using the configured policy
    #[arg(long)]
    pub retry: bool,

    /// Per-request timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Send without the stored bearer token
    #[arg(long)]
    pub anonymous: bool,
}

/// Arguments for the upload command
#[derive(Parser, Debug)]
pub struct UploadArgs {
    /// Upload endpoint
    #[arg(value_name = "URL")]
    pub url: String,

    /// Image file to send
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Form field name for the file
    #[arg(long, default_value = "file")]
    pub field: String,

    /// Content type override (guessed from the extension otherwise)
    #[arg(long)]
    pub content_type: Option<String>,

    /// Extra text field as name=value (repeatable)
    #[arg(long = "form", value_name = "NAME=VALUE")]
    pub form: Vec<String>,
}

/// Arguments for the download command
#[derive(Parser, Debug)]
pub struct DownloadArgs {
    /// Resource to fetch
    #[arg(value_name = "URL")]
    pub url: String,

    /// Destination file
    #[arg(value_name = "OUT")]
    pub out: PathBuf,

    /// Overwrite an existing destination
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub action: QueueAction,
}

#[derive(Subcommand, Debug)]
pub enum QueueAction {
    /// List queued requests in replay order
    List,

    /// Drop every queued request
    Clear,

    /// Replay queued requests now
    Drain,
}

#[derive(Parser, Debug)]
pub struct StorageArgs {
    #[command(subcommand)]
    pub action: StorageAction,
}

#[derive(Subcommand, Debug)]
pub enum StorageAction {
    /// Remove expired entries
    Cleanup,

    /// List stored keys
    Keys,

    /// Print one stored value
    Get {
        /// Key without the namespace prefix
        key: String,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show(ConfigShowArgs),

    /// Write a default user configuration file
    Init(ConfigInitArgs),

    /// Print configuration and data locations
    Path,
}

/// Arguments for config show
#[derive(Parser, Debug)]
pub struct ConfigShowArgs {
    /// Show configuration in specified format
    #[arg(short, long, value_enum, default_value = "toml")]
    pub format: ConfigFormat,
}

/// Arguments for config init
#[derive(Parser, Debug)]
pub struct ConfigInitArgs {
    /// Force overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

/// Configuration file formats
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ConfigFormat {
    Toml,
    Json,
    Yaml,
}

/// Output format options
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Human,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
    /// Pretty-printed JSON output
    JsonPretty,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Get the effective verbosity level (considering quiet flag)
    pub fn verbosity_level(&self) -> u8 {
        if self.quiet {
            0
        } else {
            self.verbose
        }
    }

    /// Check if colored output should be used
    pub fn use_color(&self) -> bool {
        !self.no_color && std::io::stdout().is_terminal()
    }
}
