//! Error types and handling for the CLI

use std::io;
use std::path::PathBuf;
use vitatrack_core::{AuthError, ConfigError, NormalizedError, StorageError};

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for CLI operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A request failed inside the pipeline
    #[error("{}", .0.message)]
    Api(#[from] NormalizedError),

    /// Client configuration rejected by the core
    #[error("Invalid client configuration: {0}")]
    ClientConfig(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// File not found
    #[error("File not found: {}", path.display())]
    FileNotFound { path: PathBuf },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid argument combination
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Error with ad hoc context
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an invalid arguments error
    pub fn invalid_args(message: impl Into<String>) -> Self {
        Self::InvalidArgs(message.into())
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) => 1,
            Self::Api(e) if e.was_queued() => 0,
            Self::Api(_) => 2,
            Self::FileNotFound { .. } => 3,
            Self::Config(_) | Self::ClientConfig(_) => 5,
            Self::InvalidArgs(_) => 6,
            Self::Storage(_) => 7,
            Self::Auth(_) => 8,
            Self::Json(_) => 12,
            Self::Yaml(_) => 13,
            Self::Toml(_) => 14,
            Self::Other(_) => 99,
        }
    }

    /// Check if this error should display usage help
    pub fn should_show_help(&self) -> bool {
        matches!(self, Self::InvalidArgs(_))
    }
}

/// Format an error for display to the user
pub fn format_error(error: &Error, use_color: bool) -> String {
    let detail = match error {
        Error::Api(e) if e.http_status > 0 => format!(" [{} / HTTP {}]", e.code, e.http_status),
        Error::Api(e) => format!(" [{}]", e.code),
        _ => String::new(),
    };

    if use_color {
        use colored::Colorize;
        format!("{} {}{}", "Error:".red().bold(), error, detail.dimmed())
    } else {
        format!("Error: {}{}", error, detail)
    }
}
