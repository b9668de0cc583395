//! Error taxonomy
//!
//! Every failure that leaves [`crate::ApiClient`] is a [`NormalizedError`].
//! Heterogeneous inputs are first captured as a [`RawError`] and then mapped
//! through [`ErrorTaxonomy::normalize`].

mod messages;
mod normalize;

pub use messages::ErrorMessages;
pub use normalize::{normalize, ErrorTaxonomy};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::storage::StorageError;
use crate::transport::TransportError;
use crate::types::ResponseBody;

/// Closed set of error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Validation,
    Authentication,
    Network,
    Api,
    Storage,
    Image,
    Unknown,
}

/// Stable error codes
pub mod codes {
    pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const OFFLINE: &str = "OFFLINE";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const CANCELLED: &str = "CANCELLED";
    pub const SERVER_ERROR: &str = "SERVER_ERROR";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const SESSION_EXPIRED: &str = "SESSION_EXPIRED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const PARSE_ERROR: &str = "PARSE_ERROR";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const QUOTA_EXCEEDED: &str = "QUOTA_EXCEEDED";
    pub const IMAGE_TOO_LARGE: &str = "IMAGE_TOO_LARGE";
    pub const IMAGE_INVALID_TYPE: &str = "IMAGE_INVALID_TYPE";

    /// Code for an HTTP status without a dedicated mapping
    pub fn http(status: u16) -> String {
        format!("HTTP_{}", status)
    }
}

/// The single error type surfaced to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("{message} ({code})")]
pub struct NormalizedError {
    pub kind: ErrorKind,
    pub code: String,
    /// 0 when the failure did not come from an HTTP response
    #[serde(default)]
    pub http_status: u16,
    pub message: String,
    #[serde(default)]
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

impl NormalizedError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            http_status: 0,
            message: message.into(),
            details: Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = status;
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Set one field of `details`, turning it into an object if needed
    pub fn set_detail(&mut self, key: &str, value: Value) {
        if !self.details.is_object() {
            let previous = std::mem::take(&mut self.details);
            let mut map = serde_json::Map::new();
            if !previous.is_null() {
                map.insert("previous".to_string(), previous);
            }
            self.details = Value::Object(map);
        }
        if let Value::Object(map) = &mut self.details {
            map.insert(key.to_string(), value);
        }
    }

    pub fn detail(&self, key: &str) -> Option<&Value> {
        self.details.get(key)
    }

    pub fn is_retryable(&self) -> bool {
        is_retryable(self)
    }

    /// True when the failed call was handed to the offline queue
    pub fn was_queued(&self) -> bool {
        self.detail("queued").and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Transient failures worth retrying
pub fn is_retryable(error: &NormalizedError) -> bool {
    matches!(
        error.code.as_str(),
        codes::NETWORK_ERROR | codes::OFFLINE | codes::TIMEOUT | codes::SERVER_ERROR
    ) || (500..600).contains(&error.http_status)
}

/// Unnormalized failure as produced inside the pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum RawError {
    Normalized(NormalizedError),
    Message(String),
    Transport(TransportError),
    /// Non-2xx response
    Status {
        status: u16,
        body: ResponseBody,
        headers: BTreeMap<String, String>,
    },
    /// Loosely structured payload, inspected for known shapes
    Object(Value),
    /// A foreign error value with a type name and message
    ErrorLike { type_name: String, message: String },
    Storage(StorageError),
    Image { code: &'static str, details: Value },
    InvalidRequest(String),
    Parse(String),
    SessionExpired,
    Unknown,
}

impl RawError {
    /// Capture any error type by name and display text
    pub fn from_error<E: std::error::Error + ?Sized>(err: &E) -> Self {
        let type_name = std::any::type_name::<E>();
        let short = type_name.rsplit("::").next().unwrap_or(type_name);
        RawError::ErrorLike {
            type_name: short.to_string(),
            message: err.to_string(),
        }
    }

    /// HTTP status carried by the failure, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            RawError::Status { status, .. } => Some(*status),
            RawError::Normalized(e) if e.http_status != 0 => Some(e.http_status),
            _ => None,
        }
    }
}

impl From<NormalizedError> for RawError {
    fn from(err: NormalizedError) -> Self {
        RawError::Normalized(err)
    }
}

impl From<String> for RawError {
    fn from(message: String) -> Self {
        RawError::Message(message)
    }
}

impl From<&str> for RawError {
    fn from(message: &str) -> Self {
        RawError::Message(message.to_string())
    }
}

impl From<TransportError> for RawError {
    fn from(err: TransportError) -> Self {
        RawError::Transport(err)
    }
}

impl From<StorageError> for RawError {
    fn from(err: StorageError) -> Self {
        RawError::Storage(err)
    }
}

impl From<Value> for RawError {
    fn from(value: Value) -> Self {
        RawError::Object(value)
    }
}
