use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::{InterceptorError, RequestInterceptor};
use crate::auth::TokenProvider;
use crate::types::{RequestBody, RequestConfig};

/// Attaches `authorization: Bearer <token>` to authenticated requests
pub struct AuthTokenInterceptor {
    provider: Arc<dyn TokenProvider>,
}

impl AuthTokenInterceptor {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl RequestInterceptor for AuthTokenInterceptor {
    fn name(&self) -> &str {
        "auth-token"
    }

    async fn on_request(&self, config: &mut RequestConfig) -> Result<(), InterceptorError> {
        if !config.requires_auth || config.has_header("authorization") {
            return Ok(());
        }
        match self.provider.token().await {
            Ok(Some(token)) => {
                config.set_header("authorization", format!("Bearer {}", token));
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(InterceptorError::failed(self.name(), e.to_string())),
        }
    }
}

/// Content negotiation, app version and configured extra headers
pub struct CommonHeadersInterceptor {
    app_version: String,
    extra: BTreeMap<String, String>,
}

impl CommonHeadersInterceptor {
    pub fn new(app_version: impl Into<String>, extra: BTreeMap<String, String>) -> Self {
        Self {
            app_version: app_version.into(),
            extra,
        }
    }
}

#[async_trait]
impl RequestInterceptor for CommonHeadersInterceptor {
    fn name(&self) -> &str {
        "common-headers"
    }

    async fn on_request(&self, config: &mut RequestConfig) -> Result<(), InterceptorError> {
        if matches!(config.data, Some(RequestBody::Json(_))) && !config.has_header("content-type") {
            config.set_header("content-type", "application/json");
        }
        if !config.has_header("accept") {
            config.set_header("accept", "application/json");
        }
        config.set_header("x-app-version", self.app_version.clone());
        for (name, value) in &self.extra {
            if !config.has_header(name) {
                config.set_header(name, value.clone());
            }
        }
        Ok(())
    }
}

/// Header values safe to log
pub(crate) fn redact_headers(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = match name.as_str() {
                "authorization" | "cookie" | "x-api-key" => "[REDACTED]".to_string(),
                _ => value.clone(),
            };
            (name.clone(), shown)
        })
        .collect()
}

pub struct RequestLoggingInterceptor;

#[async_trait]
impl RequestInterceptor for RequestLoggingInterceptor {
    fn name(&self) -> &str {
        "request-logging"
    }

    async fn on_request(&self, config: &mut RequestConfig) -> Result<(), InterceptorError> {
        debug!(
            method = %config.method,
            url = %config.url,
            headers = ?redact_headers(&config.headers),
            replay = config.is_replay(),
            "Outgoing request"
        );
        Ok(())
    }
}
