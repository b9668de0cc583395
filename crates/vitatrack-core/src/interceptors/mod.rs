//! Interceptor pipeline
//!
//! Three ordered stage lists run around every call:
//!
//! - request stages mutate the outgoing [`RequestConfig`]
//! - response stages mutate a successful [`ApiResponse`]
//! - error stages transform a failure and hand it to the next stage
//!
//! A failing request or response stage is logged and skipped; whatever it
//! already changed stays changed. A failing error stage leaves the error it
//! received untouched and the chain continues with the next stage.

mod errors;
mod request;
mod response;

pub use errors::{
    ClassifyErrorInterceptor, ErrorLoggingInterceptor, OfflineQueueInterceptor,
    UnauthorizedInterceptor,
};
pub use request::{AuthTokenInterceptor, CommonHeadersInterceptor, RequestLoggingInterceptor};
pub use response::{EnvelopeInterceptor, ResponseLoggingInterceptor};

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

use crate::auth::{AuthEvent, TokenProvider};
use crate::error::{ErrorTaxonomy, RawError};
use crate::offline::OfflineQueue;
use crate::types::{ApiResponse, RequestConfig};

#[derive(Debug, thiserror::Error)]
pub enum InterceptorError {
    #[error("Interceptor '{stage}' failed: {message}")]
    Failed { stage: String, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl InterceptorError {
    pub fn failed(stage: impl Into<String>, message: impl Into<String>) -> Self {
        InterceptorError::Failed {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait RequestInterceptor: Send + Sync {
    fn name(&self) -> &str;

    async fn on_request(&self, config: &mut RequestConfig) -> Result<(), InterceptorError>;
}

#[async_trait]
pub trait ResponseInterceptor: Send + Sync {
    fn name(&self) -> &str;

    async fn on_response(&self, response: &mut ApiResponse) -> Result<(), InterceptorError>;
}

#[async_trait]
pub trait ErrorInterceptor: Send + Sync {
    fn name(&self) -> &str;

    async fn on_error(&self, error: RawError, config: &RequestConfig) -> Result<RawError, InterceptorError>;
}

/// Collaborators needed by the default stages
pub struct DefaultStages {
    pub token_provider: Arc<dyn TokenProvider>,
    pub taxonomy: ErrorTaxonomy,
    pub app_version: String,
    pub extra_headers: BTreeMap<String, String>,
    pub auth_events: broadcast::Sender<AuthEvent>,
    pub offline_queue: Arc<OfflineQueue>,
}

#[derive(Clone, Default)]
pub struct InterceptorPipeline {
    request: Vec<Arc<dyn RequestInterceptor>>,
    response: Vec<Arc<dyn ResponseInterceptor>>,
    error: Vec<Arc<dyn ErrorInterceptor>>,
}

impl std::fmt::Debug for InterceptorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorPipeline")
            .field("request", &self.request.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("response", &self.response.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("error", &self.error.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl InterceptorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard stage order used by every client
    pub fn with_defaults(stages: DefaultStages) -> Self {
        let mut pipeline = Self::new();
        pipeline
            .add_request(AuthTokenInterceptor::new(stages.token_provider.clone()))
            .add_request(CommonHeadersInterceptor::new(stages.app_version, stages.extra_headers))
            .add_request(RequestLoggingInterceptor)
            .add_response(EnvelopeInterceptor)
            .add_response(ResponseLoggingInterceptor)
            .add_error(ClassifyErrorInterceptor::new(stages.taxonomy.clone()))
            .add_error(UnauthorizedInterceptor::new(
                stages.token_provider,
                stages.auth_events,
                stages.taxonomy.clone(),
            ))
            .add_error(OfflineQueueInterceptor::new(stages.offline_queue, stages.taxonomy))
            .add_error(ErrorLoggingInterceptor);
        pipeline
    }

    pub fn add_request(&mut self, stage: impl RequestInterceptor + 'static) -> &mut Self {
        self.request.push(Arc::new(stage));
        self
    }

    pub fn add_response(&mut self, stage: impl ResponseInterceptor + 'static) -> &mut Self {
        self.response.push(Arc::new(stage));
        self
    }

    pub fn add_error(&mut self, stage: impl ErrorInterceptor + 'static) -> &mut Self {
        self.error.push(Arc::new(stage));
        self
    }

    /// Append every stage of `other` after the existing ones
    pub fn extend(&mut self, other: InterceptorPipeline) -> &mut Self {
        self.request.extend(other.request);
        self.response.extend(other.response);
        self.error.extend(other.error);
        self
    }

    pub fn stage_names(&self) -> (Vec<&str>, Vec<&str>, Vec<&str>) {
        (
            self.request.iter().map(|s| s.name()).collect(),
            self.response.iter().map(|s| s.name()).collect(),
            self.error.iter().map(|s| s.name()).collect(),
        )
    }

    pub async fn run_request(&self, config: &mut RequestConfig) {
        for stage in &self.request {
            if let Err(e) = stage.on_request(config).await {
                warn!(stage = stage.name(), error = %e, "Request interceptor failed, skipping");
            }
        }
    }

    pub async fn run_response(&self, response: &mut ApiResponse) {
        for stage in &self.response {
            if let Err(e) = stage.on_response(response).await {
                warn!(stage = stage.name(), error = %e, "Response interceptor failed, skipping");
            }
        }
    }

    pub async fn run_error(&self, error: RawError, config: &RequestConfig) -> RawError {
        let mut current = error;
        for stage in &self.error {
            match stage.on_error(current.clone(), config).await {
                Ok(next) => current = next,
                Err(e) => {
                    warn!(stage = stage.name(), error = %e, "Error interceptor failed, keeping previous error");
                }
            }
        }
        current
    }
}
