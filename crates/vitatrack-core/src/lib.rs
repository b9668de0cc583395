//! Vitatrack Core - request pipeline for the Vitatrack health app
//!
//! Every call made by the app goes through an [`ApiClient`], which layers
//! these concerns over a pluggable [`Transport`]:
//!
//! - **Interceptors**: ordered request, response and error stages
//! - **Caching and coalescing**: GET responses are cached per URL and body,
//!   and identical in-flight calls share a single network round trip
//! - **Error normalization**: any failure becomes a [`NormalizedError`] with a
//!   stable code and a user-facing message
//! - **Offline queue**: mutating calls made without connectivity are persisted
//!   and replayed in order when the device is back online
//! - **Storage**: a namespaced key-value layer with TTLs and quota recovery
//!
//! # Example
//!
//! ```no_run
//! use vitatrack_core::{ApiClient, ClientConfig, RequestConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::builder(ClientConfig::default().with_base_url("https://api.example.com"))
//!     .build()?;
//! let reports = client
//!     .request(RequestConfig::get("/students/:id/reports").with_path_param("id", "42"))
//!     .await?;
//! println!("{:?}", reports.as_json());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cache;
pub mod client;
pub mod clock;
pub mod config;
pub mod error;
pub mod interceptors;
pub mod network;
pub mod offline;
pub mod retry;
pub mod storage;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use auth::{AuthError, AuthEvent, StoredTokenProvider, TokenProvider};
pub use client::{ApiClient, ApiClientBuilder, SyncHandle};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ClientConfig, ConfigError, EndpointOverride, UploadLimits};
pub use error::{codes, normalize, ErrorKind, ErrorMessages, ErrorTaxonomy, NormalizedError, RawError};
pub use network::{
    ConnectionQuality, ConnectionType, ConnectivityEvent, NetworkMonitor, NetworkStatus,
};
pub use offline::{DrainOutcome, OfflineQueue, OfflineQueueConfig, QueuedRequest};
pub use retry::{retry, retry_with, RetryPolicy};
pub use storage::{FileStore, MemoryStore, SetOptions, StorageAdapter, StorageConfig, StorageError};
pub use transport::{Transport, TransportError, TransportRequest, TransportResponse};
pub use types::{
    ApiResponse, FormPart, Method, QueryValue, RequestBody, RequestConfig, ResponseBody,
    ResponseType, UploadFile,
};
