//! Client configuration
//!
//! A [`ClientConfig`] is built once and shared read-only by every component
//! of a client. Per-endpoint overrides sit between the per-request value and
//! the client default.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ErrorMessages;
use crate::offline::OfflineQueueConfig;
use crate::retry::RetryPolicy;
use crate::storage::StorageConfig;
use crate::types::Method;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid base URL '{url}': {message}")]
    InvalidBaseUrl { url: String, message: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid offline queue pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Failed to create transport: {0}")]
    Transport(String),
}

/// Settings applied to calls whose URL template starts with `prefix`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointOverride {
    pub prefix: String,
    /// Restrict the override to one method
    #[serde(default)]
    pub method: Option<Method>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub cache_ttl_ms: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

impl EndpointOverride {
    fn matches(&self, method: Method, url: &str) -> bool {
        url.starts_with(&self.prefix) && self.method.map_or(true, |m| m == method)
    }
}

/// Limits checked before an upload leaves the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    pub max_bytes: usize,
    pub allowed_types: Vec<String>,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_bytes: 5 * 1024 * 1024,
            allowed_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Prefix joined onto relative request paths
    pub base_url: String,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub validate_tls: bool,
    pub cache_ttl_ms: u64,
    /// Sent as `x-app-version`
    pub app_version: String,
    /// Extra headers added to every request
    pub headers: BTreeMap<String, String>,
    pub retry: RetryPolicy,
    pub endpoints: Vec<EndpointOverride>,
    pub offline_queue: OfflineQueueConfig,
    pub storage: StorageConfig,
    pub upload: UploadLimits,
    pub messages: ErrorMessages,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            timeout_ms: 30_000,
            connect_timeout_ms: 10_000,
            validate_tls: true,
            cache_ttl_ms: 5 * 60 * 1000,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            headers: BTreeMap::new(),
            retry: RetryPolicy::default(),
            endpoints: Vec::new(),
            offline_queue: OfflineQueueConfig::default(),
            storage: StorageConfig::default(),
            upload: UploadLimits::default(),
            messages: ErrorMessages::default(),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            message: e.to_string(),
        })?;

        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.multiplier".to_string(),
                message: "must be at least 1.0".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.storage.warning_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "storage.warning_threshold".to_string(),
                message: "must be between 0 and 1".to_string(),
            });
        }
        for pattern in &self.offline_queue.queueable_patterns {
            regex::Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
        }
        Ok(())
    }

    /// First override matching the unresolved URL template
    pub fn endpoint_for(&self, method: Method, url: &str) -> Option<&EndpointOverride> {
        self.endpoints.iter().find(|e| e.matches(method, url))
    }

    pub fn timeout_for(&self, method: Method, url: &str, per_request: Option<u64>) -> u64 {
        per_request
            .or_else(|| self.endpoint_for(method, url).and_then(|e| e.timeout_ms))
            .unwrap_or(self.timeout_ms)
    }

    pub fn cache_ttl_for(&self, method: Method, url: &str) -> u64 {
        self.endpoint_for(method, url)
            .and_then(|e| e.cache_ttl_ms)
            .unwrap_or(self.cache_ttl_ms)
    }

    pub fn retry_for(&self, method: Method, url: &str) -> &RetryPolicy {
        self.endpoint_for(method, url)
            .and_then(|e| e.retry.as_ref())
            .unwrap_or(&self.retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_overrides() -> ClientConfig {
        ClientConfig {
            endpoints: vec![
                EndpointOverride {
                    prefix: "/uploads".to_string(),
                    method: Some(Method::Post),
                    timeout_ms: Some(120_000),
                    cache_ttl_ms: None,
                    retry: Some(RetryPolicy::new(1)),
                },
                EndpointOverride {
                    prefix: "/reports".to_string(),
                    method: None,
                    timeout_ms: Some(5_000),
                    cache_ttl_ms: Some(60_000),
                    retry: None,
                },
            ],
            ..ClientConfig::default()
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let bad_url = ClientConfig::default().with_base_url("not a url");
        assert!(matches!(bad_url.validate(), Err(ConfigError::InvalidBaseUrl { .. })));

        let mut bad_pattern = ClientConfig::default();
        bad_pattern.offline_queue.queueable_patterns.push("([".to_string());
        assert!(matches!(bad_pattern.validate(), Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn test_override_precedence() {
        let config = with_overrides();

        // Per-request value wins
        assert_eq!(config.timeout_for(Method::Get, "/reports", Some(1_000)), 1_000);
        // Then the endpoint override
        assert_eq!(config.timeout_for(Method::Get, "/reports/42", None), 5_000);
        assert_eq!(config.cache_ttl_for(Method::Get, "/reports"), 60_000);
        // Then the client default
        assert_eq!(config.timeout_for(Method::Get, "/profile", None), 30_000);
        assert_eq!(config.cache_ttl_for(Method::Get, "/profile"), 300_000);
    }

    #[test]
    fn test_method_scoped_override() {
        let config = with_overrides();
        assert_eq!(config.retry_for(Method::Post, "/uploads/avatar").max_retries, 1);
        assert_eq!(config.retry_for(Method::Get, "/uploads/avatar").max_retries, 3);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"base_url": "https://api.example.com", "endpoints": [{"prefix": "/reports", "timeout_ms": 100}]}"#,
        )
        .unwrap();
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.cache_ttl_ms, 300_000);
        assert_eq!(config.endpoints[0].timeout_ms, Some(100));
    }
}
