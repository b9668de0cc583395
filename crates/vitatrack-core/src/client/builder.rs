//! Builder for [`ApiClient`]

use std::sync::Arc;
use tokio::sync::broadcast;

use super::{ApiClient, ClientInner};
use crate::auth::{StoredTokenProvider, TokenProvider};
use crate::cache::ResponseCache;
use crate::clock::{system_clock, SharedClock};
use crate::config::{ClientConfig, ConfigError};
use crate::error::ErrorTaxonomy;
use crate::interceptors::{
    DefaultStages, ErrorInterceptor, InterceptorPipeline, RequestInterceptor, ResponseInterceptor,
};
use crate::network::NetworkMonitor;
use crate::offline::OfflineQueue;
use crate::storage::StorageAdapter;
use crate::transport::{ReqwestTransport, Transport};

const AUTH_EVENT_CAPACITY: usize = 16;

/// Assembles a client; unset collaborators get production defaults
pub struct ApiClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    storage: Option<Arc<StorageAdapter>>,
    monitor: Option<NetworkMonitor>,
    token_provider: Option<Arc<dyn TokenProvider>>,
    clock: Option<SharedClock>,
    default_interceptors: bool,
    extra: InterceptorPipeline,
}

impl ApiClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            storage: None,
            monitor: None,
            token_provider: None,
            clock: None,
            default_interceptors: true,
            extra: InterceptorPipeline::new(),
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn storage(mut self, storage: Arc<StorageAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn monitor(mut self, monitor: NetworkMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(provider);
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Start from an empty pipeline instead of the standard stages
    pub fn without_default_interceptors(mut self) -> Self {
        self.default_interceptors = false;
        self
    }

    pub fn request_interceptor(mut self, stage: impl RequestInterceptor + 'static) -> Self {
        self.extra.add_request(stage);
        self
    }

    pub fn response_interceptor(mut self, stage: impl ResponseInterceptor + 'static) -> Self {
        self.extra.add_response(stage);
        self
    }

    pub fn error_interceptor(mut self, stage: impl ErrorInterceptor + 'static) -> Self {
        self.extra.add_error(stage);
        self
    }

    pub fn build(self) -> Result<ApiClient, ConfigError> {
        self.config.validate()?;
        let config = self.config;

        let clock = self.clock.unwrap_or_else(system_clock);
        let storage = self.storage.unwrap_or_else(|| {
            Arc::new(StorageAdapter::in_memory(config.storage.clone()).with_clock(clock.clone()))
        });
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::from_config(&config)
                    .map_err(|e| ConfigError::Transport(e.to_string()))?,
            ),
        };
        let token_provider: Arc<dyn TokenProvider> = self
            .token_provider
            .unwrap_or_else(|| Arc::new(StoredTokenProvider::new(storage.clone(), clock.clone())));
        let offline_queue = Arc::new(
            OfflineQueue::new(storage.clone(), config.offline_queue.clone())?.with_clock(clock.clone()),
        );
        let (auth_events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        let taxonomy = ErrorTaxonomy::new(config.messages.clone());

        let mut pipeline = if self.default_interceptors {
            InterceptorPipeline::with_defaults(DefaultStages {
                token_provider: token_provider.clone(),
                taxonomy: taxonomy.clone(),
                app_version: config.app_version.clone(),
                extra_headers: config.headers.clone(),
                auth_events: auth_events.clone(),
                offline_queue: offline_queue.clone(),
            })
        } else {
            InterceptorPipeline::new()
        };
        pipeline.extend(self.extra);

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                cache: ResponseCache::new(clock.clone()),
                config,
                transport,
                pipeline,
                taxonomy,
                pending: Default::default(),
                next_generation: Default::default(),
                cancel: Default::default(),
                monitor: self.monitor.unwrap_or_default(),
                offline_queue,
                storage,
                token_provider,
                auth_events,
                clock,
            }),
        })
    }
}
