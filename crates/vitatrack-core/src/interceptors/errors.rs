use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use super::{ErrorInterceptor, InterceptorError};
use crate::auth::{AuthEvent, TokenProvider};
use crate::error::{codes, ErrorTaxonomy, NormalizedError, RawError};
use crate::offline::OfflineQueue;
use crate::types::RequestConfig;

/// Maps the raw failure into the error taxonomy
pub struct ClassifyErrorInterceptor {
    taxonomy: ErrorTaxonomy,
}

impl ClassifyErrorInterceptor {
    pub fn new(taxonomy: ErrorTaxonomy) -> Self {
        Self { taxonomy }
    }
}

#[async_trait]
impl ErrorInterceptor for ClassifyErrorInterceptor {
    fn name(&self) -> &str {
        "classify-error"
    }

    async fn on_error(&self, error: RawError, _config: &RequestConfig) -> Result<RawError, InterceptorError> {
        Ok(RawError::Normalized(self.taxonomy.normalize(error)))
    }
}

/// On HTTP 401 clears the stored token and notifies the application
///
/// Navigation is left to whoever listens for [`AuthEvent`]s.
pub struct UnauthorizedInterceptor {
    provider: Arc<dyn TokenProvider>,
    events: broadcast::Sender<AuthEvent>,
    taxonomy: ErrorTaxonomy,
}

impl UnauthorizedInterceptor {
    pub fn new(
        provider: Arc<dyn TokenProvider>,
        events: broadcast::Sender<AuthEvent>,
        taxonomy: ErrorTaxonomy,
    ) -> Self {
        Self {
            provider,
            events,
            taxonomy,
        }
    }
}

#[async_trait]
impl ErrorInterceptor for UnauthorizedInterceptor {
    fn name(&self) -> &str {
        "unauthorized"
    }

    async fn on_error(&self, error: RawError, config: &RequestConfig) -> Result<RawError, InterceptorError> {
        if error.http_status() != Some(401) {
            return Ok(error);
        }

        let expired = self.provider.is_expired().await;
        if let Err(e) = self.provider.clear().await {
            warn!(error = %e, "Failed to clear stored token after 401");
        }

        let url = config.url.clone();
        let event = if expired {
            AuthEvent::SessionExpired { url }
        } else {
            AuthEvent::Unauthorized { url }
        };
        info!(event = ?event, "Authentication rejected, token cleared");
        // No receivers is fine
        let _ = self.events.send(event);

        if !expired {
            return Ok(error);
        }
        let original = self.taxonomy.normalize(error);
        let session = self
            .taxonomy
            .normalize(RawError::SessionExpired)
            .with_status(original.http_status)
            .with_details(original.details);
        Ok(RawError::Normalized(session))
    }
}

fn is_connection_failure(error: &RawError) -> bool {
    match error {
        RawError::Transport(e) => e.is_connection_level(),
        RawError::Normalized(e) => {
            e.http_status == 0 && matches!(e.code.as_str(), codes::NETWORK_ERROR | codes::OFFLINE)
        }
        _ => false,
    }
}

/// Queues mutating requests that failed before reaching the server
pub struct OfflineQueueInterceptor {
    queue: Arc<OfflineQueue>,
    taxonomy: ErrorTaxonomy,
}

impl OfflineQueueInterceptor {
    pub fn new(queue: Arc<OfflineQueue>, taxonomy: ErrorTaxonomy) -> Self {
        Self { queue, taxonomy }
    }
}

#[async_trait]
impl ErrorInterceptor for OfflineQueueInterceptor {
    fn name(&self) -> &str {
        "offline-queue"
    }

    async fn on_error(&self, error: RawError, config: &RequestConfig) -> Result<RawError, InterceptorError> {
        if config.is_replay() || !self.queue.should_queue(config) || !is_connection_failure(&error) {
            return Ok(error);
        }

        let entry = match self.queue.enqueue(config.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(url = %config.url, error = %e, "Could not queue failed request");
                return Ok(error);
            }
        };

        let mut normalized: NormalizedError = self.taxonomy.normalize(error);
        normalized.set_detail("queued", Value::Bool(true));
        normalized.set_detail("queuedId", json!(entry.id));
        Ok(RawError::Normalized(normalized))
    }
}

pub struct ErrorLoggingInterceptor;

#[async_trait]
impl ErrorInterceptor for ErrorLoggingInterceptor {
    fn name(&self) -> &str {
        "error-logging"
    }

    async fn on_error(&self, error: RawError, config: &RequestConfig) -> Result<RawError, InterceptorError> {
        match &error {
            RawError::Normalized(e) => warn!(
                method = %config.method,
                url = %config.url,
                code = %e.code,
                status = e.http_status,
                "Request failed: {}",
                e.message
            ),
            other => warn!(method = %config.method, url = %config.url, error = ?other, "Request failed"),
        }
        Ok(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;
    use crate::error::ErrorKind;
    use crate::offline::OfflineQueueConfig;
    use crate::storage::{SetOptions, StorageAdapter, StorageConfig};
    use crate::transport::TransportError;
    use crate::types::ResponseBody;
    use chrono::{DateTime, Utc};
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct RecordingProvider {
        expired: bool,
        cleared: AtomicBool,
    }

    #[async_trait]
    impl TokenProvider for RecordingProvider {
        async fn token(&self) -> Result<Option<String>, AuthError> {
            if self.expired {
                Err(AuthError::SessionExpired)
            } else {
                Ok(Some("abc".into()))
            }
        }

        async fn set_token(&self, _token: &str, _expires_at: Option<DateTime<Utc>>) -> Result<(), AuthError> {
            Ok(())
        }

        async fn clear(&self) -> Result<(), AuthError> {
            self.cleared.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn status(code: u16) -> RawError {
        RawError::Status {
            status: code,
            body: ResponseBody::Json(Value::Null),
            headers: BTreeMap::new(),
        }
    }

    fn queue() -> Arc<OfflineQueue> {
        let storage = Arc::new(StorageAdapter::in_memory(StorageConfig::default()));
        Arc::new(OfflineQueue::new(storage, OfflineQueueConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_unauthorized_clears_token_and_broadcasts() {
        let provider = Arc::new(RecordingProvider::default());
        let (tx, mut rx) = broadcast::channel(4);
        let stage = UnauthorizedInterceptor::new(provider.clone(), tx, ErrorTaxonomy::default());

        let out = stage.on_error(status(401), &RequestConfig::get("/me")).await.unwrap();
        assert_eq!(out, status(401));
        assert!(provider.cleared.load(Ordering::SeqCst));
        assert_eq!(rx.recv().await.unwrap(), AuthEvent::Unauthorized { url: "/me".into() });
    }

    #[tokio::test]
    async fn test_expired_token_becomes_session_expired() {
        let provider = Arc::new(RecordingProvider {
            expired: true,
            ..Default::default()
        });
        let (tx, _rx) = broadcast::channel(4);
        let stage = UnauthorizedInterceptor::new(provider, tx, ErrorTaxonomy::default());

        match stage.on_error(status(401), &RequestConfig::get("/me")).await.unwrap() {
            RawError::Normalized(e) => {
                assert_eq!(e.kind, ErrorKind::Authentication);
                assert_eq!(e.code, codes::SESSION_EXPIRED);
                assert_eq!(e.http_status, 401);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_other_statuses_pass_through() {
        let provider = Arc::new(RecordingProvider::default());
        let (tx, _rx) = broadcast::channel(4);
        let stage = UnauthorizedInterceptor::new(provider.clone(), tx, ErrorTaxonomy::default());

        assert_eq!(stage.on_error(status(403), &RequestConfig::get("/me")).await.unwrap(), status(403));
        assert!(!provider.cleared.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_connection_failure_on_queueable_request_is_queued() {
        let queue = queue();
        let stage = OfflineQueueInterceptor::new(queue.clone(), ErrorTaxonomy::default());
        let config = RequestConfig::post("/consumption").with_offline_queueable(true);

        let out = stage
            .on_error(RawError::Transport(TransportError::connect("connection refused")), &config)
            .await
            .unwrap();

        match out {
            RawError::Normalized(e) => {
                assert!(e.was_queued());
                assert_eq!(e.code, codes::NETWORK_ERROR);
                assert_eq!(e.detail("queuedId"), Some(&json!(queue.peek_all()[0].id)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_too_large_to_queue_keeps_its_error() {
        let storage = Arc::new(StorageAdapter::in_memory(StorageConfig {
            max_bytes: 200,
            ..StorageConfig::default()
        }));
        storage.set("auth_token", &"abc", SetOptions::default()).unwrap();
        let queue = Arc::new(OfflineQueue::new(storage.clone(), OfflineQueueConfig::default()).unwrap());
        let stage = OfflineQueueInterceptor::new(queue.clone(), ErrorTaxonomy::default());
        let config = RequestConfig::post("/photos")
            .with_json(json!({ "blob": "x".repeat(1_000) }))
            .with_offline_queueable(true);
        let failure = RawError::Transport(TransportError::connect("connection refused"));

        let out = stage.on_error(failure.clone(), &config).await.unwrap();

        assert_eq!(out, failure);
        assert!(queue.is_empty());
        assert_eq!(storage.get_opt::<String>("auth_token"), Some("abc".to_string()));
    }

    #[tokio::test]
    async fn test_replays_and_server_errors_are_not_queued() {
        let queue = queue();
        let stage = OfflineQueueInterceptor::new(queue.clone(), ErrorTaxonomy::default());
        let config = RequestConfig::post("/consumption").with_offline_queueable(true);

        stage.on_error(status(500), &config).await.unwrap();
        stage
            .on_error(RawError::Transport(TransportError::timeout("slow")), &config)
            .await
            .unwrap();
        stage
            .on_error(RawError::Transport(TransportError::connect("refused")), &config.clone().into_replay())
            .await
            .unwrap();

        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_classify_normalizes() {
        let stage = ClassifyErrorInterceptor::new(ErrorTaxonomy::default());
        match stage.on_error(status(404), &RequestConfig::get("/x")).await.unwrap() {
            RawError::Normalized(e) => assert_eq!(e.code, codes::NOT_FOUND),
            other => panic!("unexpected {:?}", other),
        }
    }
}
