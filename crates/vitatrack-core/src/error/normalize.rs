use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;

use super::{codes, ErrorKind, ErrorMessages, NormalizedError, RawError};
use crate::storage::StorageError;
use crate::transport::{TransportError, TransportErrorKind};
use crate::types::ResponseBody;

fn network_pattern() -> Option<&'static Regex> {
    static NETWORK_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    NETWORK_REGEX
        .get_or_init(|| {
            Regex::new(r"(?i)network|failed to fetch|connection (refused|reset|closed|aborted)|econn|dns|unreachable|socket hang up").ok()
        })
        .as_ref()
}

fn offline_pattern() -> Option<&'static Regex> {
    static OFFLINE_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    OFFLINE_REGEX
        .get_or_init(|| Regex::new(r"(?i)offline|no internet|not connected|internet connection").ok())
        .as_ref()
}

fn matches(pattern: Option<&Regex>, text: &str) -> bool {
    pattern.map_or(false, |re| re.is_match(text))
}

/// Maps raw failures onto [`NormalizedError`] using a message catalog
#[derive(Debug, Clone, Default)]
pub struct ErrorTaxonomy {
    messages: ErrorMessages,
}

impl ErrorTaxonomy {
    pub fn new(messages: ErrorMessages) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &ErrorMessages {
        &self.messages
    }

    /// Normalize any failure. Already normalized input is returned unchanged.
    pub fn normalize(&self, input: impl Into<RawError>) -> NormalizedError {
        match input.into() {
            RawError::Normalized(err) => err,
            RawError::Message(message) => {
                NormalizedError::new(ErrorKind::Unknown, codes::UNKNOWN_ERROR, message)
            }
            RawError::Transport(err) => self.from_transport(&err),
            RawError::Status { status, body, .. } => self.from_status(status, body.to_json_value()),
            RawError::Object(value) => self.from_object(value),
            RawError::ErrorLike { type_name, message } => {
                NormalizedError::new(ErrorKind::Unknown, codes::UNKNOWN_ERROR, message)
                    .with_details(json!({ "originalType": type_name }))
            }
            RawError::Storage(err) => self.from_storage(&err),
            RawError::Image { code, details } => {
                let message = if code == codes::IMAGE_TOO_LARGE {
                    &self.messages.image_too_large
                } else {
                    &self.messages.image_invalid_type
                };
                NormalizedError::new(ErrorKind::Image, code, message.clone()).with_details(details)
            }
            RawError::InvalidRequest(reason) => NormalizedError::new(
                ErrorKind::Validation,
                codes::INVALID_REQUEST,
                self.messages.invalid_request.clone(),
            )
            .with_details(json!({ "reason": reason })),
            RawError::Parse(reason) => NormalizedError::new(
                ErrorKind::Unknown,
                codes::PARSE_ERROR,
                self.messages.parse.clone(),
            )
            .with_details(json!({ "reason": reason })),
            RawError::SessionExpired => NormalizedError::new(
                ErrorKind::Authentication,
                codes::SESSION_EXPIRED,
                self.messages.session_expired.clone(),
            ),
            RawError::Unknown => self.generic(),
        }
    }

    fn generic(&self) -> NormalizedError {
        NormalizedError::new(
            ErrorKind::Unknown,
            codes::UNKNOWN_ERROR,
            self.messages.generic.clone(),
        )
    }

    fn from_transport(&self, err: &TransportError) -> NormalizedError {
        let (code, message) = match err.kind {
            TransportErrorKind::Timeout => (codes::TIMEOUT, &self.messages.timeout),
            TransportErrorKind::Cancelled => (codes::CANCELLED, &self.messages.cancelled),
            TransportErrorKind::Offline => (codes::OFFLINE, &self.messages.offline),
            _ if matches(offline_pattern(), &err.message) => (codes::OFFLINE, &self.messages.offline),
            _ => (codes::NETWORK_ERROR, &self.messages.network),
        };
        NormalizedError::new(ErrorKind::Network, code, message.clone())
            .with_details(json!({ "reason": err.message, "transportKind": err.kind }))
    }

    fn from_status(&self, status: u16, body: Value) -> NormalizedError {
        let message = self.messages.for_status(status).to_string();
        let field_errors = body.get("errors").cloned().unwrap_or(Value::Null);
        let server_message = body
            .get("message")
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut details = json!({
            "status": status,
            "body": body,
            "serverMessage": server_message,
        });

        let (kind, code) = match status {
            401 | 403 => (ErrorKind::Authentication, codes::UNAUTHORIZED.to_string()),
            404 => (ErrorKind::Api, codes::NOT_FOUND.to_string()),
            422 => {
                details["fieldErrors"] = field_errors;
                (ErrorKind::Validation, codes::VALIDATION_ERROR.to_string())
            }
            _ => (ErrorKind::Api, codes::http(status)),
        };

        NormalizedError::new(kind, code, message)
            .with_status(status)
            .with_details(details)
    }

    fn from_storage(&self, err: &StorageError) -> NormalizedError {
        let (code, message) = if err.is_quota() {
            (codes::QUOTA_EXCEEDED, &self.messages.quota_exceeded)
        } else {
            (codes::STORAGE_ERROR, &self.messages.storage)
        };
        NormalizedError::new(ErrorKind::Storage, code, message.clone())
            .with_details(json!({ "reason": err.to_string() }))
    }

    fn from_object(&self, value: Value) -> NormalizedError {
        let object = match value {
            Value::Object(map) => map,
            Value::String(message) => return self.normalize(RawError::Message(message)),
            _ => return self.generic(),
        };

        if object.contains_key("kind") && object.contains_key("code") {
            if let Ok(err) = serde_json::from_value::<NormalizedError>(Value::Object(object.clone())) {
                return err;
            }
        }

        let status = object
            .get("status")
            .and_then(Value::as_u64)
            .or_else(|| object.get("response").and_then(|r| r.get("status")).and_then(Value::as_u64))
            .and_then(|s| u16::try_from(s).ok());
        if let Some(status) = status {
            let body = object
                .get("response")
                .and_then(|r| r.get("data"))
                .or_else(|| object.get("data"))
                .or_else(|| object.get("body"))
                .cloned()
                .unwrap_or(Value::Null);
            return self.from_status(status, body);
        }

        if let Some(message) = object.get("message").and_then(Value::as_str) {
            if matches(network_pattern(), message) || matches(offline_pattern(), message) {
                return self.from_transport(&TransportError::new(TransportErrorKind::Connect, message));
            }
            let original_type = object
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("Object");
            return NormalizedError::new(ErrorKind::Unknown, codes::UNKNOWN_ERROR, message)
                .with_details(json!({ "originalType": original_type }));
        }

        self.generic()
    }
}

/// Normalize with the default message catalog
pub fn normalize(input: impl Into<RawError>) -> NormalizedError {
    ErrorTaxonomy::default().normalize(input)
}

impl From<ResponseBody> for RawError {
    fn from(body: ResponseBody) -> Self {
        RawError::Object(body.to_json_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn status(status: u16, body: Value) -> RawError {
        RawError::Status {
            status,
            body: ResponseBody::Json(body),
            headers: BTreeMap::new(),
        }
    }

    #[test]
    fn test_plain_string_is_unknown() {
        let err = normalize("something broke");
        assert_eq!(err.kind, ErrorKind::Unknown);
        assert_eq!(err.code, codes::UNKNOWN_ERROR);
        assert_eq!(err.message, "something broke");
        assert_eq!(err.http_status, 0);
    }

    #[test]
    fn test_status_mappings() {
        let not_found = normalize(status(404, json!({"message": "missing"})));
        assert_eq!(not_found.kind, ErrorKind::Api);
        assert_eq!(not_found.code, codes::NOT_FOUND);
        assert_eq!(not_found.http_status, 404);
        assert_eq!(not_found.detail("serverMessage"), Some(&json!("missing")));

        let unauthorized = normalize(status(401, Value::Null));
        assert_eq!(unauthorized.kind, ErrorKind::Authentication);
        assert_eq!(unauthorized.code, codes::UNAUTHORIZED);

        let forbidden = normalize(status(403, Value::Null));
        assert_eq!(forbidden.kind, ErrorKind::Authentication);
        assert_eq!(forbidden.message, ErrorMessages::default().for_status(403));

        let teapot = normalize(status(418, Value::Null));
        assert_eq!(teapot.code, "HTTP_418");
        assert_eq!(teapot.message, ErrorMessages::default().http_generic);
    }

    #[test]
    fn test_validation_keeps_field_errors() {
        let err = normalize(status(422, json!({"errors": {"hb": ["must be positive"]}})));
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.code, codes::VALIDATION_ERROR);
        assert_eq!(err.detail("fieldErrors"), Some(&json!({"hb": ["must be positive"]})));
    }

    #[test]
    fn test_server_error_uses_configured_message() {
        let mut messages = ErrorMessages::default();
        messages.status.insert("500".into(), "Server sedang bermasalah".into());
        let taxonomy = ErrorTaxonomy::new(messages);

        let err = taxonomy.normalize(status(500, json!({})));
        assert_eq!(err.kind, ErrorKind::Api);
        assert_eq!(err.code, "HTTP_500");
        assert_eq!(err.message, "Server sedang bermasalah");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_transport_failures() {
        let timeout = normalize(TransportError::timeout("elapsed"));
        assert_eq!((timeout.kind, timeout.code.as_str()), (ErrorKind::Network, codes::TIMEOUT));

        let offline = normalize(TransportError::connect("The Internet connection appears to be offline"));
        assert_eq!(offline.code, codes::OFFLINE);

        let refused = normalize(TransportError::connect("connection refused"));
        assert_eq!(refused.code, codes::NETWORK_ERROR);
        assert!(refused.is_retryable());

        let cancelled = normalize(TransportError::cancelled("cancelled"));
        assert_eq!(cancelled.code, codes::CANCELLED);
        assert!(!cancelled.is_retryable());
    }

    #[test]
    fn test_object_shapes() {
        let axios_like = normalize(json!({"response": {"status": 404, "data": {"message": "nope"}}}));
        assert_eq!(axios_like.code, codes::NOT_FOUND);
        assert_eq!(axios_like.detail("serverMessage"), Some(&json!("nope")));

        let network = normalize(json!({"message": "Network Error"}));
        assert_eq!(network.kind, ErrorKind::Network);
        assert_eq!(network.code, codes::NETWORK_ERROR);

        let typed = normalize(json!({"name": "TypeError", "message": "x is undefined"}));
        assert_eq!(typed.code, codes::UNKNOWN_ERROR);
        assert_eq!(typed.message, "x is undefined");
        assert_eq!(typed.detail("originalType"), Some(&json!("TypeError")));

        let anonymous = normalize(json!({"message": "odd"}));
        assert_eq!(anonymous.detail("originalType"), Some(&json!("Object")));

        let nothing = normalize(json!(42));
        assert_eq!(nothing.message, ErrorMessages::default().generic);
    }

    #[test]
    fn test_embedded_normalized_error_survives_json() {
        let original = normalize(status(404, Value::Null));
        let value = serde_json::to_value(&original).unwrap();
        assert_eq!(normalize(value), original);
    }

    #[test]
    fn test_storage_and_supplemental_codes() {
        let quota = normalize(StorageError::QuotaExceeded { needed: 10, available: 2 });
        assert_eq!((quota.kind, quota.code.as_str()), (ErrorKind::Storage, codes::QUOTA_EXCEEDED));

        let backend = normalize(StorageError::Backend("io".into()));
        assert_eq!(backend.code, codes::STORAGE_ERROR);

        let invalid = normalize(RawError::InvalidRequest("missing :id".into()));
        assert_eq!((invalid.kind, invalid.code.as_str()), (ErrorKind::Validation, codes::INVALID_REQUEST));

        let expired = normalize(RawError::SessionExpired);
        assert_eq!(expired.code, codes::SESSION_EXPIRED);

        let image = normalize(RawError::Image { code: codes::IMAGE_TOO_LARGE, details: json!({"size": 9}) });
        assert_eq!(image.kind, ErrorKind::Image);
        assert_eq!(image.message, ErrorMessages::default().image_too_large);
    }

    #[test]
    fn test_already_normalized_is_unchanged() {
        let first = normalize("boom");
        assert_eq!(normalize(first.clone()), first);
    }
}
