//! Configuration management for the CLI
//!
//! Configuration is merged from:
//! - Default values
//! - A configuration file (TOML, YAML or JSON)
//! - Environment variables (`VITATRACK_BASE_URL`, `VITATRACK_TOKEN`)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use vitatrack_core::ClientConfig;

const APP_DIR: &str = "vitatrack";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Request pipeline settings handed to the core client
    pub client: ClientConfig,

    /// Bearer token stored before each command runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Directory holding the persistent key-value store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// File this configuration was read from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    Toml,
    Yaml,
    Json,
}

impl FileFormat {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => Self::Yaml,
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;

        let mut config: Config = match FileFormat::of(path) {
            FileFormat::Yaml => serde_yaml::from_str(&content)?,
            FileFormat::Json => serde_json::from_str(&content)?,
            FileFormat::Toml => toml::from_str(&content)?,
        };
        config.source = Some(path.to_path_buf());
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        for path in Self::default_config_paths() {
            if path.exists() {
                match Self::from_file(&path) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable config file");
                    }
                }
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file or default locations, then
    /// apply environment overrides
    pub fn load_with_file(file: Option<&Path>) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::load()?,
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.client.validate()?;
        Ok(config)
    }

    /// Apply `VITATRACK_*` overrides from a variable lookup
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup("VITATRACK_BASE_URL") {
            self.client.base_url = base_url;
        }
        if let Some(token) = lookup("VITATRACK_TOKEN") {
            self.token = Some(token);
        }
        if let Some(dir) = lookup("VITATRACK_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Get default configuration file paths to check
    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("vitatrack.toml"),
            PathBuf::from("vitatrack.yaml"),
            PathBuf::from("vitatrack.json"),
        ];

        if let Some(user) = Self::user_config_path() {
            paths.push(user.with_extension("yaml"));
            paths.push(user.with_extension("json"));
            paths.push(user);
        }

        paths
    }

    /// `<config dir>/vitatrack/config.toml`
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
    }

    /// Directory for the persistent store
    pub fn storage_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .map(|d| d.join(APP_DIR))
            .unwrap_or_else(|| PathBuf::from(".vitatrack"))
    }

    /// Save configuration to a file in the format implied by its extension
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = match FileFormat::of(path) {
            FileFormat::Yaml => serde_yaml::to_string(self)?,
            FileFormat::Json => serde_json::to_string_pretty(self)?,
            FileFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| Error::config(format!("Failed to serialize as TOML: {}", e)))?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }
}
