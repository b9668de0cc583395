//! Key/value persistence with TTL, transformations and quota handling
//!
//! Values are wrapped in a [`StorageItem`] envelope serialized as JSON. The
//! adapter namespaces every key with a configurable prefix and only ever
//! touches keys carrying that prefix.

mod store;
mod transform;

pub use store::{FileStore, KeyValueStore, MemoryStore, StorageError};
pub use transform::{Base64Obfuscation, Identity, ValueTransform};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{system_clock, SharedClock};

/// Storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Prefix applied to every key
    pub key_prefix: String,
    /// Upper bound for the bytes held under the prefix
    pub max_bytes: usize,
    /// Fraction of `max_bytes` above which the quota counts as exceeded
    pub warning_threshold: f64,
    pub cleanup_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            key_prefix: "vitatrack:".to_string(),
            max_bytes: 5 * 1024 * 1024,
            warning_threshold: 0.9,
            cleanup_interval_ms: 60_000,
        }
    }
}

/// Envelope persisted for each value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageItem {
    pub value: Value,
    /// Epoch milliseconds at write time
    pub timestamp: i64,
    /// Lifetime in milliseconds; `None` never expires
    pub ttl: Option<u64>,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default)]
    pub compressed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl StorageItem {
    pub fn is_expired(&self, now_millis: i64) -> bool {
        match self.ttl {
            Some(ttl) => now_millis.saturating_sub(self.timestamp) > i64::try_from(ttl).unwrap_or(i64::MAX),
            None => false,
        }
    }
}

/// Options for [`StorageAdapter::set`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetOptions {
    pub ttl_ms: Option<u64>,
    pub encrypt: bool,
    pub compress: bool,
    pub metadata: Option<Value>,
}

impl SetOptions {
    pub fn ttl(ttl_ms: u64) -> Self {
        Self {
            ttl_ms: Some(ttl_ms),
            ..Self::default()
        }
    }

    pub fn encrypted(mut self) -> Self {
        self.encrypt = true;
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compress = true;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Typed, TTL-aware access to a [`KeyValueStore`]
#[derive(Debug)]
pub struct StorageAdapter {
    store: Arc<dyn KeyValueStore>,
    config: StorageConfig,
    clock: SharedClock,
    cipher: Arc<dyn ValueTransform>,
    compressor: Arc<dyn ValueTransform>,
}

impl StorageAdapter {
    pub fn new(store: Arc<dyn KeyValueStore>, config: StorageConfig) -> Self {
        Self {
            store,
            config,
            clock: system_clock(),
            cipher: Arc::new(Base64Obfuscation),
            compressor: Arc::new(Identity),
        }
    }

    /// Adapter over a fresh [`MemoryStore`]
    pub fn in_memory(config: StorageConfig) -> Self {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cipher(mut self, cipher: Arc<dyn ValueTransform>) -> Self {
        self.cipher = cipher;
        self
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn ValueTransform>) -> Self {
        self.compressor = compressor;
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    fn prefixed_keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .store
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(&self.config.key_prefix))
            .collect())
    }

    /// Store a value under `key`
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Result<(), StorageError> {
        let value = serde_json::to_value(value).map_err(|e| StorageError::Encode {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        let value = if options.compress || options.encrypt {
            let mut text = value.to_string();
            if options.compress {
                text = self.compressor.encode(&text)?;
            }
            if options.encrypt {
                text = self.cipher.encode(&text)?;
            }
            Value::String(text)
        } else {
            value
        };

        let item = StorageItem {
            value,
            timestamp: self.clock.now_millis(),
            ttl: options.ttl_ms,
            encrypted: options.encrypt,
            compressed: options.compress,
            metadata: options.metadata,
        };
        let raw = serde_json::to_string(&item).map_err(|e| StorageError::Encode {
            key: key.to_string(),
            message: e.to_string(),
        })?;

        let full = self.full_key(key);
        match self.write(&full, &raw) {
            Err(e) if e.is_quota() => self.recover_quota(&full, &raw, e),
            other => other,
        }
    }

    /// Bytes held under `key`, counting the key itself
    fn entry_size(&self, key: &str) -> usize {
        key.len() + self.store.get(key).ok().flatten().map_or(0, |v| v.len())
    }

    fn write(&self, full: &str, raw: &str) -> Result<(), StorageError> {
        let used: usize = self
            .prefixed_keys()?
            .into_iter()
            .filter(|k| k != full)
            .map(|k| self.entry_size(&k))
            .sum();
        let needed = full.len() + raw.len();
        if used + needed > self.config.max_bytes {
            return Err(StorageError::QuotaExceeded {
                needed,
                available: self.config.max_bytes.saturating_sub(used),
            });
        }
        self.store.set(full, raw)
    }

    fn recover_quota(&self, full: &str, raw: &str, err: StorageError) -> Result<(), StorageError> {
        warn!(key = %full, error = %err, "Storage quota exceeded, cleaning up expired entries");
        self.cleanup_expired();

        let mut last = match self.write(full, raw) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_quota() => e,
            Err(e) => return Err(e),
        };

        // Pick victims oldest first and only evict once they free enough room
        let needed = full.len() + raw.len();
        let candidates: Vec<(String, usize)> = self
            .keys_by_age()?
            .into_iter()
            .filter(|k| k != full)
            .map(|k| {
                let size = self.entry_size(&k);
                (k, size)
            })
            .collect();
        let mut used: usize = candidates.iter().map(|(_, size)| size).sum();
        let mut victims = Vec::new();
        for (key, size) in candidates {
            if used + needed <= self.config.max_bytes {
                break;
            }
            used -= size;
            victims.push(key);
        }
        if used + needed > self.config.max_bytes {
            warn!(key = %full, needed, max_bytes = self.config.max_bytes, "Write cannot fit even after eviction");
            return Err(last);
        }

        for victim in victims {
            info!(key = %victim, "Evicting oldest storage entry to free space");
            self.store.remove(&victim)?;
            match self.write(full, raw) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_quota() => last = e,
                Err(e) => return Err(e),
            }
        }

        warn!(key = %full, "Storage write failed after eviction");
        Err(last)
    }

    /// Prefixed keys ordered oldest first; undecodable entries sort first
    fn keys_by_age(&self) -> Result<Vec<String>, StorageError> {
        let mut aged: Vec<(i64, String)> = self
            .prefixed_keys()?
            .into_iter()
            .map(|key| {
                let timestamp = self
                    .store
                    .get(&key)
                    .ok()
                    .flatten()
                    .and_then(|raw| serde_json::from_str::<StorageItem>(&raw).ok())
                    .map_or(i64::MIN, |item| item.timestamp);
                (timestamp, key)
            })
            .collect();
        aged.sort();
        Ok(aged.into_iter().map(|(_, key)| key).collect())
    }

    fn unwrap_value(&self, item: StorageItem) -> Result<Value, StorageError> {
        if !item.encrypted && !item.compressed {
            return Ok(item.value);
        }
        let mut text = match item.value {
            Value::String(text) => text,
            _ => {
                return Err(StorageError::Decode {
                    key: String::new(),
                    message: "transformed value is not a string".to_string(),
                })
            }
        };
        if item.encrypted {
            text = self.cipher.decode(&text)?;
        }
        if item.compressed {
            text = self.compressor.decode(&text)?;
        }
        serde_json::from_str(&text).map_err(|e| StorageError::Decode {
            key: String::new(),
            message: e.to_string(),
        })
    }

    /// Read the live value under a full key, deleting expired or corrupt entries
    fn load(&self, full: &str) -> Result<Option<Value>, StorageError> {
        let Some(raw) = self.store.get(full)? else {
            return Ok(None);
        };

        let item = match serde_json::from_str::<StorageItem>(&raw) {
            Ok(item) => item,
            Err(e) => {
                warn!(key = %full, error = %e, "Removing undecodable storage entry");
                self.store.remove(full)?;
                return Ok(None);
            }
        };

        if item.is_expired(self.clock.now_millis()) {
            debug!(key = %full, "Storage entry expired");
            self.store.remove(full)?;
            return Ok(None);
        }

        match self.unwrap_value(item) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %full, error = %e, "Removing storage entry that failed to decode");
                self.store.remove(full)?;
                Ok(None)
            }
        }
    }

    /// Read a value, or `None` when missing, expired or of another shape
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full = self.full_key(key);
        let value = match self.load(&full) {
            Ok(value) => value?,
            Err(e) => {
                warn!(key = %full, error = %e, "Storage read failed");
                return None;
            }
        };
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %full, error = %e, "Stored value has an unexpected shape");
                None
            }
        }
    }

    /// Read a value, falling back to `default`
    pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_opt(key).unwrap_or(default)
    }

    pub fn has(&self, key: &str) -> bool {
        matches!(self.load(&self.full_key(key)), Ok(Some(_)))
    }

    pub fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.store.remove(&self.full_key(key))
    }

    /// Remove every key under the prefix
    pub fn clear(&self) -> Result<(), StorageError> {
        for key in self.prefixed_keys()? {
            self.store.remove(&key)?;
        }
        Ok(())
    }

    /// Remove expired and undecodable entries, returning how many went away
    pub fn cleanup_expired(&self) -> usize {
        let keys = match self.prefixed_keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Storage cleanup could not list keys");
                return 0;
            }
        };

        let now = self.clock.now_millis();
        let mut removed = 0;
        for key in keys {
            let stale = match self.store.get(&key) {
                Ok(Some(raw)) => serde_json::from_str::<StorageItem>(&raw)
                    .map_or(true, |item| item.is_expired(now)),
                _ => false,
            };
            if stale && self.store.remove(&key).is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(removed, "Storage cleanup removed stale entries");
        }
        removed
    }

    /// Keys under the prefix, without the prefix
    pub fn keys(&self) -> Vec<String> {
        let prefix = &self.config.key_prefix;
        let mut keys: Vec<String> = self
            .prefixed_keys()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|k| k.strip_prefix(prefix.as_str()).map(str::to_string))
            .collect();
        keys.sort();
        keys
    }

    /// Bytes held under the prefix, counting keys and envelopes
    pub fn total_bytes(&self) -> usize {
        self.prefixed_keys()
            .unwrap_or_default()
            .into_iter()
            .map(|k| {
                let size = self.store.get(&k).ok().flatten().map_or(0, |v| v.len());
                k.len() + size
            })
            .sum()
    }

    pub fn is_quota_exceeded(&self) -> bool {
        self.total_bytes() as f64 > self.config.max_bytes as f64 * self.config.warning_threshold
    }

    /// Run [`Self::cleanup_expired`] every `interval` until the handle is stopped
    pub fn start_cleanup(self: &Arc<Self>, interval: Duration) -> CleanupHandle {
        let adapter: Weak<Self> = Arc::downgrade(self);
        let period = interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match adapter.upgrade() {
                    Some(adapter) => {
                        adapter.cleanup_expired();
                    }
                    None => break,
                }
            }
        });
        CleanupHandle { task: Some(task) }
    }

    /// Periodic cleanup at the configured interval
    pub fn start_default_cleanup(self: &Arc<Self>) -> CleanupHandle {
        self.start_cleanup(Duration::from_millis(self.config.cleanup_interval_ms))
    }
}

/// Handle to the periodic cleanup task; dropping it stops the task
#[derive(Debug)]
pub struct CleanupHandle {
    task: Option<JoinHandle<()>>,
}

impl CleanupHandle {
    pub fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn adapter_with_clock(config: StorageConfig) -> (StorageAdapter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let adapter = StorageAdapter::in_memory(config).with_clock(clock.clone());
        (adapter, clock)
    }

    #[test]
    fn test_ttl_expiry_deletes_on_read() {
        let (adapter, clock) = adapter_with_clock(StorageConfig::default());
        adapter.set("x", &1, SetOptions::ttl(100)).unwrap();

        clock.set(50);
        assert_eq!(adapter.get("x", 0), 1);

        clock.set(150);
        assert_eq!(adapter.get("x", 0), 0);
        assert!(adapter.keys().is_empty());
    }

    #[test]
    fn test_transformed_values_round_trip() {
        let (adapter, _) = adapter_with_clock(StorageConfig::default());
        let value = json!({"token": "abc", "exp": 5});
        adapter
            .set("auth", &value, SetOptions::default().encrypted().compressed())
            .unwrap();

        assert_eq!(adapter.get_opt::<Value>("auth"), Some(value));
    }

    #[test]
    fn test_corrupt_entry_is_a_miss_and_removed() {
        let store = Arc::new(MemoryStore::new());
        store.set("vitatrack:broken", "{not json").unwrap();
        let adapter = StorageAdapter::new(store.clone(), StorageConfig::default());

        assert_eq!(adapter.get("broken", "fallback".to_string()), "fallback");
        assert_eq!(store.get("vitatrack:broken").unwrap(), None);
    }

    #[test]
    fn test_clear_only_touches_prefixed_keys() {
        let store = Arc::new(MemoryStore::new());
        store.set("other-app", "keep").unwrap();
        let adapter = StorageAdapter::new(store.clone(), StorageConfig::default());
        adapter.set("a", &1, SetOptions::default()).unwrap();

        adapter.clear().unwrap();
        assert!(!adapter.has("a"));
        assert_eq!(store.get("other-app").unwrap(), Some("keep".to_string()));
    }

    #[test]
    fn test_cleanup_expired_counts_removed() {
        let (adapter, clock) = adapter_with_clock(StorageConfig::default());
        adapter.set("short", &1, SetOptions::ttl(10)).unwrap();
        adapter.set("long", &2, SetOptions::ttl(1_000)).unwrap();
        adapter.set("forever", &3, SetOptions::default()).unwrap();

        clock.set(500);
        assert_eq!(adapter.cleanup_expired(), 1);
        assert_eq!(adapter.keys(), vec!["forever".to_string(), "long".to_string()]);
    }

    #[test]
    fn test_quota_evicts_oldest_entries() {
        let config = StorageConfig {
            max_bytes: 500,
            ..StorageConfig::default()
        };
        let (adapter, clock) = adapter_with_clock(config);
        let payload = "x".repeat(60);

        for (i, key) in ["first", "second", "third"].iter().enumerate() {
            clock.set(i as i64 * 10);
            adapter.set(key, &payload, SetOptions::default()).unwrap();
        }
        clock.set(100);
        adapter.set("fourth", &payload, SetOptions::default()).unwrap();

        assert!(!adapter.has("first"));
        assert!(adapter.has("second"));
        assert!(adapter.has("fourth"));
        assert!(adapter.total_bytes() <= 500);
    }

    #[test]
    fn test_quota_prefers_expired_entries() {
        let config = StorageConfig {
            max_bytes: 500,
            ..StorageConfig::default()
        };
        let (adapter, clock) = adapter_with_clock(config);
        let payload = "x".repeat(60);

        adapter.set("oldest", &payload, SetOptions::default()).unwrap();
        clock.set(10);
        adapter.set("expiring", &payload, SetOptions::ttl(5)).unwrap();
        clock.set(20);
        adapter.set("recent", &payload, SetOptions::default()).unwrap();

        clock.set(100);
        adapter.set("new", &payload, SetOptions::default()).unwrap();

        assert!(adapter.has("oldest"));
        assert!(!adapter.has("expiring"));
    }

    #[test]
    fn test_oversized_write_reports_quota() {
        let config = StorageConfig {
            max_bytes: 50,
            ..StorageConfig::default()
        };
        let (adapter, _) = adapter_with_clock(config);
        let err = adapter
            .set("huge", &"y".repeat(200), SetOptions::default())
            .unwrap_err();
        assert!(err.is_quota());
    }

    #[test]
    fn test_write_that_cannot_fit_keeps_other_entries() {
        let config = StorageConfig {
            max_bytes: 500,
            ..StorageConfig::default()
        };
        let (adapter, clock) = adapter_with_clock(config);
        adapter.set("profile", &"p".repeat(50), SetOptions::default()).unwrap();
        clock.set(10);
        adapter.set("settings", &"s".repeat(50), SetOptions::default()).unwrap();

        clock.set(20);
        let err = adapter
            .set("huge", &"h".repeat(1_000), SetOptions::default())
            .unwrap_err();

        assert!(err.is_quota());
        assert!(adapter.has("profile"));
        assert!(adapter.has("settings"));
        assert!(!adapter.has("huge"));
    }

    #[test]
    fn test_unbounded_ttl_never_expires() {
        let (adapter, clock) = adapter_with_clock(StorageConfig::default());
        adapter.set("forever", &1, SetOptions::ttl(u64::MAX)).unwrap();

        clock.set(1_000_000);
        assert_eq!(adapter.get("forever", 0), 1);
    }

    #[test]
    fn test_quota_warning_threshold() {
        let config = StorageConfig {
            max_bytes: 200,
            warning_threshold: 0.5,
            ..StorageConfig::default()
        };
        let (adapter, _) = adapter_with_clock(config);
        assert!(!adapter.is_quota_exceeded());
        adapter.set("k", &"z".repeat(80), SetOptions::default()).unwrap();
        assert!(adapter.is_quota_exceeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_runs_and_stops() {
        let clock = Arc::new(ManualClock::new(0));
        let adapter = Arc::new(StorageAdapter::in_memory(StorageConfig::default()).with_clock(clock.clone()));
        adapter.set("a", &1, SetOptions::ttl(10)).unwrap();
        clock.set(100);

        let handle = adapter.start_cleanup(Duration::from_millis(1_000));
        assert!(handle.is_running());
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(adapter.keys().is_empty());

        handle.stop();
    }
}
