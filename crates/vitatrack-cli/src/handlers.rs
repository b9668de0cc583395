//! Command handlers for CLI subcommands
//!
//! Each handler builds what it needs from the loaded [`Config`]: the
//! persistent store under the data directory and, for network commands, an
//! [`ApiClient`] sharing that store.

mod config;
mod queue;
mod request;
mod storage;
mod transfer;

pub use config::handle_config;
pub use queue::handle_queue;
pub use request::handle_request;
pub use storage::handle_storage;
pub use transfer::{handle_download, handle_upload};

use crate::config::Config;
use crate::error::{Error, Result};
use std::sync::Arc;
use tracing::debug;
use vitatrack_core::{ApiClient, FileStore, StorageAdapter};

/// Open the file-backed store under the configured data directory
pub(crate) fn open_storage(config: &Config) -> Result<Arc<StorageAdapter>> {
    let dir = config.storage_dir();
    debug!(dir = %dir.display(), "Opening storage");
    let store = FileStore::open(&dir)?;
    Ok(Arc::new(StorageAdapter::new(
        Arc::new(store),
        config.client.storage.clone(),
    )))
}

/// Build a client over persistent storage, seeding the token if configured
pub(crate) async fn build_client(config: &Config) -> Result<ApiClient> {
    let storage = open_storage(config)?;
    let client = ApiClient::builder(config.client.clone())
        .storage(storage)
        .build()?;

    if let Some(token) = &config.token {
        client.token_provider().set_token(token, None).await?;
    }
    Ok(client)
}

/// Split `key=value`; the value may itself contain `=`
pub(crate) fn parse_key_value(input: &str) -> Result<(String, String)> {
    match input.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(Error::invalid_args(format!(
            "Expected KEY=VALUE, got '{}'",
            input
        ))),
    }
}
