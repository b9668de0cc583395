//! Request engine
//!
//! [`ApiClient`] runs one call through the interceptor pipeline, the response
//! cache, the offline check and in-flight de-duplication before handing it to
//! the transport. Every failure that leaves it is a [`NormalizedError`].

mod body;
mod builder;
mod url;

pub use builder::ApiClientBuilder;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthEvent, TokenProvider};
use crate::cache::{cache_key, ResponseCache};
use crate::clock::SharedClock;
use crate::config::ClientConfig;
use crate::error::{codes, ErrorTaxonomy, NormalizedError, RawError};
use crate::interceptors::InterceptorPipeline;
use crate::network::NetworkMonitor;
use crate::offline::{DrainOutcome, OfflineQueue};
use crate::retry::retry_with;
use crate::storage::StorageAdapter;
use crate::transport::{Transport, TransportError, TransportRequest};
use crate::types::{
    ApiResponse, FormPart, Method, RequestBody, RequestConfig, ResponseBody, ResponseType,
    UploadFile,
};

type SharedCall = Shared<BoxFuture<'static, Result<ResponseBody, NormalizedError>>>;

struct PendingEntry {
    generation: u64,
    call: SharedCall,
}

pub(crate) struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    pipeline: InterceptorPipeline,
    taxonomy: ErrorTaxonomy,
    cache: ResponseCache,
    pending: Mutex<HashMap<String, PendingEntry>>,
    next_generation: AtomicU64,
    cancel: Mutex<CancellationToken>,
    monitor: NetworkMonitor,
    offline_queue: Arc<OfflineQueue>,
    storage: Arc<StorageAdapter>,
    token_provider: Arc<dyn TokenProvider>,
    auth_events: broadcast::Sender<AuthEvent>,
    clock: SharedClock,
}

/// Removes a pending entry when its call settles, unless a newer call
/// has taken the key in the meantime
struct PendingGuard {
    inner: Arc<ClientInner>,
    key: String,
    generation: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut pending = self
            .inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if pending
            .get(&self.key)
            .is_some_and(|entry| entry.generation == self.generation)
        {
            pending.remove(&self.key);
        }
    }
}

impl ClientInner {
    /// Run the error stages and normalize whatever comes out
    async fn fail(&self, error: RawError, config: &RequestConfig) -> NormalizedError {
        let error = self.pipeline.run_error(error, config).await;
        self.taxonomy.normalize(error)
    }

    async fn dispatch(
        &self,
        key: String,
        url: String,
        config: RequestConfig,
        cancel: CancellationToken,
    ) -> Result<ResponseBody, NormalizedError> {
        let timeout_ms = self
            .config
            .timeout_for(config.method, &config.url, config.timeout_ms);
        let request = TransportRequest {
            method: config.method,
            url: url.clone(),
            headers: config.headers.clone(),
            body: config.data.clone(),
        };

        let started = Instant::now();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(TransportError::cancelled("Request cancelled")),
            result = tokio::time::timeout(Duration::from_millis(timeout_ms), self.transport.send(request)) => {
                match result {
                    Ok(sent) => sent,
                    Err(_) => Err(TransportError::timeout(format!("No response within {} ms", timeout_ms))),
                }
            }
        };

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %url, error = %e, "Transport failed");
                return Err(self.fail(RawError::Transport(e), &config).await);
            }
        };

        let status = response.status;
        let headers = response.headers.clone();
        let success = response.is_success();
        let body = body::parse_body(response, config.response_type).await;
        debug!(
            url = %url,
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transport completed"
        );

        if !success {
            return Err(self
                .fail(RawError::Status { status, body, headers }, &config)
                .await);
        }

        let mut response = ApiResponse {
            status,
            headers,
            body,
            method: config.method,
            url,
        };
        self.pipeline.run_response(&mut response).await;

        if config.is_cacheable() {
            let ttl = self.config.cache_ttl_for(config.method, &config.url);
            self.cache.insert(key, response.body.clone(), ttl);
        }
        Ok(response.body)
    }
}

/// Cheap-to-clone handle to a request engine
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.config.base_url)
            .field("pipeline", &self.inner.pipeline)
            .field("pending", &self.pending_requests_count())
            .field("cached", &self.cache_len())
            .finish()
    }
}

impl ApiClient {
    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder::new(config)
    }

    /// Run one call through the full pipeline
    pub async fn request(&self, config: RequestConfig) -> Result<ResponseBody, NormalizedError> {
        let inner = &self.inner;
        let mut config = config;
        inner.pipeline.run_request(&mut config).await;

        let url = match url::resolve_url(&inner.config.base_url, &config) {
            Ok(url) => url,
            Err(e) => return Err(inner.fail(e, &config).await),
        };
        let key = cache_key(config.method, &url, config.data.as_ref());

        if config.is_cacheable() {
            if let Some(hit) = inner.cache.get(&key) {
                debug!(key = %key, "Cache hit");
                return Ok(hit);
            }
        }

        if !inner.monitor.is_online() {
            return self.handle_offline(config).await;
        }

        self.join_or_dispatch(key, url, config).await
    }

    async fn handle_offline(&self, config: RequestConfig) -> Result<ResponseBody, NormalizedError> {
        let inner = &self.inner;
        if config.is_replay() || !inner.offline_queue.should_queue(&config) {
            let error = RawError::Transport(TransportError::offline("Device is offline"));
            return Err(inner.fail(error, &config).await);
        }

        let url = config.url.clone();
        let entry = inner.offline_queue.enqueue(config).map_err(|e| {
            warn!(url = %url, error = %e, "Offline request could not be queued");
            inner.taxonomy.normalize(e)
        })?;
        Ok(ResponseBody::Json(json!({
            "success": true,
            "queued": true,
            "queuedId": entry.id,
            "queuedAt": entry.queued_at,
        })))
    }

    async fn join_or_dispatch(
        &self,
        key: String,
        url: String,
        config: RequestConfig,
    ) -> Result<ResponseBody, NormalizedError> {
        let cancel = self
            .inner
            .cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let call = {
            let mut pending = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match pending.get(&key) {
                Some(entry) => {
                    debug!(key = %key, "Joining in-flight request");
                    entry.call.clone()
                }
                None => {
                    let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
                    let guard = PendingGuard {
                        inner: self.inner.clone(),
                        key: key.clone(),
                        generation,
                    };
                    let task: JoinHandle<Result<ResponseBody, NormalizedError>> =
                        tokio::spawn(async move {
                            let inner = guard.inner.clone();
                            let result = inner.dispatch(guard.key.clone(), url, config, cancel).await;
                            drop(guard);
                            result
                        });

                    let taxonomy = self.inner.taxonomy.clone();
                    let call = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(e) if e.is_cancelled() => {
                                Err(taxonomy.normalize(TransportError::cancelled("Request task aborted")))
                            }
                            Err(e) => Err(taxonomy.normalize(format!("Request task failed: {}", e))),
                        }
                    }
                    .boxed()
                    .shared();

                    pending.insert(
                        key,
                        PendingEntry {
                            generation,
                            call: call.clone(),
                        },
                    );
                    call
                }
            }
        };

        call.await
    }

    pub async fn get(&self, url: &str) -> Result<ResponseBody, NormalizedError> {
        self.request(RequestConfig::get(url)).await
    }

    pub async fn post(&self, url: &str, data: Value) -> Result<ResponseBody, NormalizedError> {
        self.request(RequestConfig::post(url).with_json(data)).await
    }

    pub async fn put(&self, url: &str, data: Value) -> Result<ResponseBody, NormalizedError> {
        self.request(RequestConfig::put(url).with_json(data)).await
    }

    pub async fn patch(&self, url: &str, data: Value) -> Result<ResponseBody, NormalizedError> {
        self.request(RequestConfig::patch(url).with_json(data)).await
    }

    pub async fn delete(&self, url: &str) -> Result<ResponseBody, NormalizedError> {
        self.request(RequestConfig::delete(url)).await
    }

    /// Send a file as multipart form data after checking the upload limits
    pub async fn upload(
        &self,
        url: &str,
        field: &str,
        file: UploadFile,
        fields: &[(String, String)],
    ) -> Result<ResponseBody, NormalizedError> {
        let limits = &self.inner.config.upload;
        if file.bytes.len() > limits.max_bytes {
            return Err(self.inner.taxonomy.normalize(RawError::Image {
                code: codes::IMAGE_TOO_LARGE,
                details: json!({ "size": file.bytes.len(), "maxBytes": limits.max_bytes }),
            }));
        }
        if !limits
            .allowed_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&file.content_type))
        {
            return Err(self.inner.taxonomy.normalize(RawError::Image {
                code: codes::IMAGE_INVALID_TYPE,
                details: json!({ "contentType": file.content_type, "allowed": limits.allowed_types }),
            }));
        }

        let mut parts: Vec<FormPart> = fields
            .iter()
            .map(|(name, value)| FormPart::text(name.as_str(), value.as_str()))
            .collect();
        parts.push(FormPart::file(field, file));

        self.request(RequestConfig::post(url).with_body(RequestBody::Multipart(parts)))
            .await
    }

    /// Fetch raw bytes, bypassing the cache
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, NormalizedError> {
        let config = RequestConfig::get(url)
            .with_cacheable(false)
            .with_response_type(ResponseType::Bytes)
            .with_header("accept", "*/*");
        Ok(self.request(config).await?.into_bytes())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, NormalizedError> {
        self.request_json(RequestConfig::get(url)).await
    }

    /// Run a call and decode its JSON body into `T`
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        config: RequestConfig,
    ) -> Result<T, NormalizedError> {
        let body = self.request(config).await?;
        let value = match body {
            ResponseBody::Json(value) => value,
            other => other.to_json_value(),
        };
        serde_json::from_value(value)
            .map_err(|e| self.inner.taxonomy.normalize(RawError::Parse(e.to_string())))
    }

    /// [`Self::request`] wrapped in the retry policy for this endpoint
    ///
    /// Calls already handed to the offline queue are not retried.
    pub async fn request_with_retry(
        &self,
        config: RequestConfig,
    ) -> Result<ResponseBody, NormalizedError> {
        let policy = self
            .inner
            .config
            .retry_for(config.method, &config.url)
            .clone();
        retry_with(
            || self.request(config.clone()),
            &policy,
            |e: &NormalizedError| e.is_retryable() && !e.was_queued(),
        )
        .await
    }

    /// Replay the offline queue through this client
    pub async fn sync_offline_queue(&self) -> Result<Vec<DrainOutcome>, NormalizedError> {
        if !self.inner.monitor.is_online() {
            debug!("Skipping offline sync while offline");
            return Ok(Vec::new());
        }
        let outcomes = self
            .inner
            .offline_queue
            .drain(|config| {
                let client = self.clone();
                async move { client.request(config.into_replay()).await }
            })
            .await
            .map_err(|e| self.inner.taxonomy.normalize(e))?;

        if !outcomes.is_empty() {
            let sent = outcomes
                .iter()
                .filter(|o| matches!(o, DrainOutcome::Sent { .. }))
                .count();
            info!(processed = outcomes.len(), sent, "Offline queue synchronized");
        }
        Ok(outcomes)
    }

    /// Drain the offline queue each time connectivity comes back
    pub fn spawn_offline_sync(&self) -> SyncHandle {
        let client = self.clone();
        let mut status = self.inner.monitor.watch();
        let task = tokio::spawn(async move {
            // Status changes seen only by their latest value still trigger a drain
            while status.changed().await.is_ok() {
                let online = status.borrow_and_update().is_connected;
                if online && !client.inner.offline_queue.is_empty() {
                    if let Err(e) = client.sync_offline_queue().await {
                        warn!(code = %e.code, "Offline sync failed: {}", e.message);
                    }
                }
            }
        });
        SyncHandle { task }
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }

    pub fn pending_requests_count(&self) -> usize {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Cancel every in-flight call and forget them
    pub fn cancel_all_requests(&self) {
        let previous = {
            let mut token = self
                .inner
                .cancel
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *token)
        };
        previous.cancel();

        let cleared = {
            let mut pending = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let count = pending.len();
            pending.clear();
            count
        };
        info!(cleared, "Cancelled all in-flight requests");
    }

    pub fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.auth_events.subscribe()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.inner.monitor
    }

    pub fn offline_queue(&self) -> &Arc<OfflineQueue> {
        &self.inner.offline_queue
    }

    pub fn storage(&self) -> &Arc<StorageAdapter> {
        &self.inner.storage
    }

    pub fn token_provider(&self) -> &Arc<dyn TokenProvider> {
        &self.inner.token_provider
    }

    pub fn taxonomy(&self) -> &ErrorTaxonomy {
        &self.inner.taxonomy
    }

    pub fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }

    /// Whether a method/URL pair would be served from the cache right now
    pub fn is_cached(&self, method: Method, url: &str) -> bool {
        let config = RequestConfig::new(method, url);
        match url::resolve_url(&self.inner.config.base_url, &config) {
            Ok(resolved) => self.inner.cache.get(&cache_key(method, &resolved, None)).is_some(),
            Err(_) => false,
        }
    }
}

/// Background offline-sync task; aborted on drop
#[derive(Debug)]
pub struct SyncHandle {
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn stop(self) {}
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportResponse;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for Echo {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = json!({ "url": request.url, "auth": request.headers.get("authorization") });
            Ok(TransportResponse::new(200, body.to_string()).with_header("content-type", "application/json"))
        }
    }

    fn client() -> (ApiClient, Arc<Echo>) {
        let transport = Arc::new(Echo {
            calls: AtomicUsize::new(0),
        });
        let client = ApiClient::builder(ClientConfig::default().with_base_url("https://api.test/v1"))
            .transport(transport.clone())
            .build()
            .unwrap();
        (client, transport)
    }

    #[tokio::test]
    async fn test_missing_path_param_never_reaches_transport() {
        let (client, transport) = client();
        let err = client
            .request(RequestConfig::get("/students/:id"))
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INVALID_REQUEST);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stored_token_is_sent() {
        let (client, _) = client();
        client.token_provider().set_token("abc", None).await.unwrap();

        let body = client.get("/me").await.unwrap();
        assert_eq!(body.as_json().unwrap()["auth"], "Bearer abc");
        assert_eq!(body.as_json().unwrap()["success"], true);
    }

    #[tokio::test]
    async fn test_upload_limits_are_checked_locally() {
        let (client, transport) = client();

        let big = UploadFile::new("a.png", "image/png", vec![0; 6 * 1024 * 1024]);
        let err = client.upload("/photos", "photo", big, &[]).await.unwrap_err();
        assert_eq!(err.code, codes::IMAGE_TOO_LARGE);

        let gif = UploadFile::new("a.gif", "image/gif", vec![0; 10]);
        let err = client.upload("/photos", "photo", gif, &[]).await.unwrap_err();
        assert_eq!(err.code, codes::IMAGE_INVALID_TYPE);

        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_request_json_parse_error() {
        let (client, _) = client();
        let err = client.get_json::<Vec<u32>>("/numbers").await.unwrap_err();
        assert_eq!(err.code, codes::PARSE_ERROR);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let (client, transport) = client();
        client.get("/profile").await.unwrap();
        assert!(client.is_cached(Method::Get, "/profile"));

        client.clear_cache();
        assert_eq!(client.cache_len(), 0);
        client.get("/profile").await.unwrap();
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }
}
