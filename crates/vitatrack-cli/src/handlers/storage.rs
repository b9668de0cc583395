//! Local storage command handlers

use super::open_storage;
use crate::cli::{StorageAction, StorageArgs};
use crate::config::Config;
use crate::error::Result;
use crate::output::OutputWriter;
use serde_json::{json, Value};

/// Handle the storage command
pub async fn handle_storage(args: StorageArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    let storage = open_storage(config)?;

    match args.action {
        StorageAction::Cleanup => {
            let removed = storage.cleanup_expired();
            output.success(&format!("✓ Removed {} expired entr{}", removed, if removed == 1 { "y" } else { "ies" }))?;
            output.data(&json!({
                "removed": removed,
                "totalBytes": storage.total_bytes(),
                "maxBytes": storage.config().max_bytes,
            }))
        }
        StorageAction::Keys => {
            let keys = storage.keys();
            if keys.is_empty() {
                output.info("No stored keys")?;
            }
            output.data(&keys)
        }
        StorageAction::Get { key } => match storage.get_opt::<Value>(&key) {
            // Credentials are never echoed
            Some(_) if key.contains("token") => output.data(&Value::String("***".to_string())),
            Some(value) => output.data(&value),
            None => output.warning(&format!("No value stored under '{}'", key)),
        },
    }
}
