//! Core request and response types
//!
//! [`RequestConfig`] describes one outbound call and is also the unit that
//! the offline queue persists, so every field round-trips through serde.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Binary payloads persist as base64 strings rather than number arrays
mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// HTTP methods supported by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl Method {
    /// Uppercase wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }

    /// Whether the method changes server state
    pub fn is_mutating(&self) -> bool {
        matches!(self, Method::Post | Method::Put | Method::Patch | Method::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unsupported method name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unsupported HTTP method: {0}")]
pub struct ParseMethodError(pub String);

impl FromStr for Method {
    type Err = ParseMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            _ => Err(ParseMethodError(s.to_string())),
        }
    }
}

/// A query-string value: a scalar or a list serialized as `key[]=value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryValue {
    Single(String),
    Multiple(Vec<String>),
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Single(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Single(value)
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        QueryValue::Single(value.to_string())
    }
}

macro_rules! query_value_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for QueryValue {
                fn from(value: $ty) -> Self {
                    QueryValue::Single(value.to_string())
                }
            }
        )*
    };
}

query_value_from_number!(i32, i64, u32, u64, usize, f64);

impl<T: Into<String>> From<Vec<T>> for QueryValue {
    fn from(values: Vec<T>) -> Self {
        QueryValue::Multiple(values.into_iter().map(Into::into).collect())
    }
}

/// One part of a multipart form body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormPart {
    pub name: String,
    pub value: FormValue,
}

/// Value carried by a multipart part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormValue {
    Text {
        value: String,
    },
    File {
        file_name: String,
        content_type: String,
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
    },
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: FormValue::Text {
                value: value.into(),
            },
        }
    }

    pub fn file(name: impl Into<String>, file: UploadFile) -> Self {
        Self {
            name: name.into(),
            value: FormValue::File {
                file_name: file.file_name,
                content_type: file.content_type,
                bytes: file.bytes,
            },
        }
    }
}

/// File handed to [`crate::ApiClient::upload`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }
}

/// Request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum RequestBody {
    Json(Value),
    Multipart(Vec<FormPart>),
    Bytes(#[serde(with = "base64_bytes")] Vec<u8>),
}

impl RequestBody {
    /// Stable serialization used when building cache keys
    pub fn cache_fragment(&self) -> String {
        match self {
            RequestBody::Json(value) => value.to_string(),
            other => serde_json::to_string(other).unwrap_or_default(),
        }
    }
}

/// Forces how a response body is interpreted, overriding its content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Auto,
    Json,
    Text,
    Bytes,
}

fn default_true() -> bool {
    true
}

/// Descriptor for one outbound call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestConfig {
    pub method: Method,
    /// Path or absolute URL; `:name` tokens are replaced from `path_params`
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub path_params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, QueryValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<RequestBody>,
    /// Header names are kept lowercase
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cacheable: Option<bool>,
    #[serde(default = "default_true")]
    pub requires_auth: bool,
    #[serde(default)]
    pub offline_queueable: bool,
    #[serde(default)]
    pub response_type: ResponseType,
    #[serde(skip)]
    replay: bool,
}

impl RequestConfig {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            path_params: BTreeMap::new(),
            query: BTreeMap::new(),
            data: None,
            headers: BTreeMap::new(),
            timeout_ms: None,
            cacheable: None,
            requires_auth: true,
            offline_queueable: false,
            response_type: ResponseType::Auto,
            replay: false,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::Post, url).with_cacheable(false)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::Put, url).with_cacheable(false)
    }

    pub fn patch(url: impl Into<String>) -> Self {
        Self::new(Method::Patch, url).with_cacheable(false)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url).with_cacheable(false)
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::Head, url)
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<QueryValue>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_json(mut self, value: Value) -> Self {
        self.data = Some(RequestBody::Json(value));
        self
    }

    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.data = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = Some(cacheable);
        self
    }

    pub fn with_requires_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }

    pub fn with_offline_queueable(mut self, queueable: bool) -> Self {
        self.offline_queueable = queueable;
        self
    }

    pub fn with_response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// Only GET responses are cached, and only when not opted out
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::Get && self.cacheable != Some(false)
    }

    /// Set a header, replacing any previous value
    pub fn set_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains_key(&name.to_ascii_lowercase())
    }

    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(&name.to_ascii_lowercase())
    }

    /// True when this call is a replay issued by the offline queue
    pub fn is_replay(&self) -> bool {
        self.replay
    }

    pub(crate) fn into_replay(mut self) -> Self {
        self.replay = true;
        self
    }
}

/// Parsed response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Form(Vec<(String, String)>),
    Bytes(Vec<u8>),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_json_mut(&mut self) -> Option<&mut Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }

    /// JSON view of any body, used for error details and logging
    pub fn to_json_value(&self) -> Value {
        match self {
            ResponseBody::Json(value) => value.clone(),
            ResponseBody::Text(text) => Value::String(text.clone()),
            ResponseBody::Form(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
            ResponseBody::Bytes(bytes) => serde_json::json!({ "bytes": bytes.len() }),
        }
    }

    /// Raw bytes of the body
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            ResponseBody::Json(value) => value.to_string().into_bytes(),
            ResponseBody::Text(text) => text.into_bytes(),
            ResponseBody::Form(fields) => url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(fields)
                .finish()
                .into_bytes(),
            ResponseBody::Bytes(bytes) => bytes,
        }
    }
}

/// A completed response as seen by response interceptors
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: ResponseBody,
    pub method: Method,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_parsing_is_case_insensitive() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::Get);
        assert_eq!("Patch".parse::<Method>().unwrap(), Method::Patch);
        assert!("TRACE".parse::<Method>().is_err());
        assert_eq!(Method::Delete.to_string(), "DELETE");
    }

    #[test]
    fn test_file_parts_persist_as_base64() {
        let body = RequestBody::Multipart(vec![FormPart::file(
            "photo",
            UploadFile::new("meal.png", "image/png", vec![0x89, b'P', b'N', b'G']),
        )]);

        let encoded = serde_json::to_value(&body).unwrap();
        assert_eq!(encoded["content"][0]["value"]["bytes"], "iVBORw==");
        assert_eq!(serde_json::from_value::<RequestBody>(encoded).unwrap(), body);

        let raw = RequestBody::Bytes(vec![1, 2, 3]);
        assert_eq!(serde_json::to_value(&raw).unwrap()["content"], "AQID");
    }

    #[test]
    fn test_cacheability_defaults() {
        assert!(RequestConfig::get("/reports").is_cacheable());
        assert!(!RequestConfig::get("/reports").with_cacheable(false).is_cacheable());
        assert!(!RequestConfig::post("/reports").is_cacheable());
        // Mutating verbs never cache, even when asked to
        assert!(!RequestConfig::post("/reports").with_cacheable(true).is_cacheable());
    }

    #[test]
    fn test_headers_are_case_insensitive() {
        let mut config = RequestConfig::get("/x").with_header("X-App-Version", "1.0");
        assert_eq!(config.header("x-app-version"), Some("1.0"));
        assert!(config.has_header("X-APP-VERSION"));

        config.set_header("x-app-version", "2.0");
        assert_eq!(config.headers.len(), 1);
        assert_eq!(config.remove_header("X-App-Version"), Some("2.0".to_string()));
    }

    #[test]
    fn test_request_config_round_trips_without_replay_flag() {
        let config = RequestConfig::post("/reports/:id")
            .with_path_param("id", "42")
            .with_query("tags", vec!["a", "b"])
            .with_json(json!({"hb": 12.5}))
            .with_offline_queueable(true)
            .into_replay();

        let encoded = serde_json::to_string(&config).unwrap();
        let decoded: RequestConfig = serde_json::from_str(&encoded).unwrap();

        assert!(!decoded.is_replay());
        assert_eq!(decoded.url, "/reports/:id");
        assert_eq!(decoded.query["tags"], QueryValue::Multiple(vec!["a".into(), "b".into()]));
        assert!(decoded.offline_queueable);
        assert!(decoded.requires_auth);
    }

    #[test]
    fn test_response_body_json_view() {
        let form = ResponseBody::Form(vec![("a".into(), "1".into())]);
        assert_eq!(form.to_json_value(), json!({"a": "1"}));

        let bytes = ResponseBody::Bytes(vec![1, 2, 3]);
        assert_eq!(bytes.to_json_value(), json!({"bytes": 3}));
        assert_eq!(ResponseBody::Text("hi".into()).into_bytes(), b"hi".to_vec());
    }
}
