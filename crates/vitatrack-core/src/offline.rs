//! Persisted FIFO of mutating requests made while offline
//!
//! The queue lives in the [`StorageAdapter`] under a single key and is
//! replayed in arrival order by [`OfflineQueue::drain`]. Only one drain runs
//! at a time.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::{system_clock, SharedClock};
use crate::config::ConfigError;
use crate::error::NormalizedError;
use crate::storage::{SetOptions, StorageAdapter, StorageError};
use crate::types::{Method, RequestConfig, ResponseBody};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineQueueConfig {
    /// Storage key holding the queue
    pub storage_key: String,
    /// URL patterns whose mutating requests are queued without opting in
    pub queueable_patterns: Vec<String>,
    /// Failed replays tolerated before an entry is abandoned
    pub max_requeue: u32,
    /// Entries older than this are dropped before replay
    pub max_age_ms: u64,
}

impl Default for OfflineQueueConfig {
    fn default() -> Self {
        Self {
            storage_key: "offline_queue".to_string(),
            queueable_patterns: Vec::new(),
            max_requeue: 5,
            max_age_ms: 7 * 24 * 60 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
    pub id: Uuid,
    pub config: RequestConfig,
    pub queued_at: DateTime<Utc>,
    /// Failed replays so far
    pub attempts: u32,
}

/// Result of replaying one entry
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    Sent { id: Uuid },
    /// Retryable failure; the entry stays at the head
    Requeued { id: Uuid, attempts: u32, error: NormalizedError },
    /// Non-retryable failure; the entry was dropped
    Failed { id: Uuid, error: NormalizedError },
    /// Too many failed replays; the entry was dropped
    Abandoned { id: Uuid, error: NormalizedError },
    Expired { id: Uuid },
}

impl DrainOutcome {
    pub fn id(&self) -> Uuid {
        match self {
            DrainOutcome::Sent { id }
            | DrainOutcome::Requeued { id, .. }
            | DrainOutcome::Failed { id, .. }
            | DrainOutcome::Abandoned { id, .. }
            | DrainOutcome::Expired { id } => *id,
        }
    }
}

#[derive(Debug)]
pub struct OfflineQueue {
    storage: Arc<StorageAdapter>,
    config: OfflineQueueConfig,
    patterns: Vec<Regex>,
    clock: SharedClock,
    // Guards read-modify-write of the stored list
    entries_lock: Mutex<()>,
    drain_lock: tokio::sync::Mutex<()>,
}

impl OfflineQueue {
    pub fn new(storage: Arc<StorageAdapter>, config: OfflineQueueConfig) -> Result<Self, ConfigError> {
        let patterns = config
            .queueable_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| ConfigError::InvalidPattern {
                    pattern: p.clone(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            storage,
            config,
            patterns,
            clock: system_clock(),
            entries_lock: Mutex::new(()),
            drain_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &OfflineQueueConfig {
        &self.config
    }

    /// Mutating requests that opted in or match a configured pattern
    pub fn should_queue(&self, config: &RequestConfig) -> bool {
        matches!(config.method, Method::Post | Method::Put | Method::Patch)
            && (config.offline_queueable || self.patterns.iter().any(|p| p.is_match(&config.url)))
    }

    fn load(&self) -> Vec<QueuedRequest> {
        self.storage.get(&self.config.storage_key, Vec::new())
    }

    fn save(&self, entries: &[QueuedRequest]) -> Result<(), StorageError> {
        self.storage
            .set(&self.config.storage_key, entries, SetOptions::default())
    }

    fn modify<R>(&self, f: impl FnOnce(&mut Vec<QueuedRequest>) -> R) -> Result<R, StorageError> {
        let _guard = self.entries_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load();
        let result = f(&mut entries);
        self.save(&entries)?;
        Ok(result)
    }

    /// Append a request; the authorization header is dropped and re-applied on replay
    pub fn enqueue(&self, mut config: RequestConfig) -> Result<QueuedRequest, StorageError> {
        config.remove_header("authorization");
        let entry = QueuedRequest {
            id: Uuid::new_v4(),
            config,
            queued_at: self.clock.now(),
            attempts: 0,
        };
        let queued = entry.clone();
        let len = self.modify(move |entries| {
            entries.push(entry);
            entries.len()
        })?;
        info!(id = %queued.id, method = %queued.config.method, url = %queued.config.url, queue_len = len, "Request queued for offline replay");
        Ok(queued)
    }

    pub fn peek_all(&self) -> Vec<QueuedRequest> {
        self.load()
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.entries_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.storage.remove(&self.config.storage_key)
    }

    fn remove(&self, id: Uuid) -> Result<(), StorageError> {
        self.modify(|entries| entries.retain(|e| e.id != id))
    }

    fn evict_expired(&self) -> Result<Vec<DrainOutcome>, StorageError> {
        let now = self.clock.now_millis();
        let max_age = self.config.max_age_ms as i64;
        self.modify(|entries| {
            let mut expired = Vec::new();
            entries.retain(|e| {
                let fresh = now.saturating_sub(e.queued_at.timestamp_millis()) <= max_age;
                if !fresh {
                    expired.push(DrainOutcome::Expired { id: e.id });
                }
                fresh
            });
            expired
        })
    }

    /// Replay queued requests in order through `send`
    ///
    /// Stops at the first retryable failure so later entries never overtake
    /// an earlier one.
    pub async fn drain<F, Fut>(&self, mut send: F) -> Result<Vec<DrainOutcome>, StorageError>
    where
        F: FnMut(RequestConfig) -> Fut,
        Fut: Future<Output = Result<ResponseBody, NormalizedError>>,
    {
        let _drain = self.drain_lock.lock().await;

        let mut outcomes = self.evict_expired()?;
        if !outcomes.is_empty() {
            warn!(expired = outcomes.len(), "Dropped expired offline requests");
        }

        while let Some(front) = self.load().into_iter().next() {
            debug!(id = %front.id, url = %front.config.url, "Replaying offline request");
            match send(front.config.clone()).await {
                Ok(_) => {
                    self.remove(front.id)?;
                    outcomes.push(DrainOutcome::Sent { id: front.id });
                }
                Err(error) if error.is_retryable() => {
                    let attempts = front.attempts + 1;
                    if attempts > self.config.max_requeue {
                        warn!(id = %front.id, attempts, "Abandoning offline request after repeated failures");
                        self.remove(front.id)?;
                        outcomes.push(DrainOutcome::Abandoned { id: front.id, error });
                    } else {
                        self.modify(|entries| {
                            if let Some(entry) = entries.iter_mut().find(|e| e.id == front.id) {
                                entry.attempts = attempts;
                            }
                        })?;
                        outcomes.push(DrainOutcome::Requeued {
                            id: front.id,
                            attempts,
                            error,
                        });
                    }
                    break;
                }
                Err(error) => {
                    warn!(id = %front.id, code = %error.code, "Dropping offline request rejected by the server");
                    self.remove(front.id)?;
                    outcomes.push(DrainOutcome::Failed { id: front.id, error });
                }
            }
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{codes, ErrorKind};
    use crate::storage::StorageConfig;
    use serde_json::json;

    fn queue() -> (OfflineQueue, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let storage = Arc::new(StorageAdapter::in_memory(StorageConfig::default()).with_clock(clock.clone()));
        let config = OfflineQueueConfig {
            queueable_patterns: vec!["^/consumption".to_string()],
            ..OfflineQueueConfig::default()
        };
        let queue = OfflineQueue::new(storage, config).unwrap().with_clock(clock.clone());
        (queue, clock)
    }

    fn post(path: &str) -> RequestConfig {
        RequestConfig::post(path).with_json(json!({"path": path}))
    }

    fn server_down() -> NormalizedError {
        NormalizedError::new(ErrorKind::Api, "HTTP_503", "down").with_status(503)
    }

    #[test]
    fn test_should_queue_rules() {
        let (queue, _) = queue();
        assert!(queue.should_queue(&post("/reports").with_offline_queueable(true)));
        assert!(queue.should_queue(&post("/consumption/today")));
        assert!(!queue.should_queue(&post("/reports")));
        assert!(!queue.should_queue(&RequestConfig::get("/consumption").with_offline_queueable(true)));
        assert!(!queue.should_queue(&RequestConfig::delete("/consumption/1")));
    }

    #[test]
    fn test_enqueue_strips_authorization() {
        let (queue, _) = queue();
        let entry = queue
            .enqueue(post("/reports").with_header("Authorization", "Bearer abc"))
            .unwrap();
        assert!(!entry.config.has_header("authorization"));
        assert_eq!(queue.peek_all(), vec![entry]);
    }

    #[tokio::test]
    async fn test_retryable_failure_keeps_order() {
        let (queue, _) = queue();
        let a = queue.enqueue(post("/a")).unwrap();
        let b = queue.enqueue(post("/b")).unwrap();
        let c = queue.enqueue(post("/c")).unwrap();

        let outcomes = queue
            .drain(|config| async move {
                if config.url == "/b" {
                    Err(server_down())
                } else {
                    Ok(ResponseBody::Json(json!({"ok": true})))
                }
            })
            .await
            .unwrap();

        assert_eq!(outcomes[0], DrainOutcome::Sent { id: a.id });
        assert!(matches!(outcomes[1], DrainOutcome::Requeued { id, attempts: 1, .. } if id == b.id));
        let remaining: Vec<Uuid> = queue.peek_all().iter().map(|e| e.id).collect();
        assert_eq!(remaining, vec![b.id, c.id]);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_is_dropped() {
        let (queue, _) = queue();
        queue.enqueue(post("/a")).unwrap();
        queue.enqueue(post("/b")).unwrap();

        let outcomes = queue
            .drain(|config| async move {
                if config.url == "/a" {
                    Err(NormalizedError::new(ErrorKind::Validation, codes::VALIDATION_ERROR, "bad").with_status(422))
                } else {
                    Ok(ResponseBody::Json(json!(null)))
                }
            })
            .await
            .unwrap();

        assert!(matches!(outcomes[0], DrainOutcome::Failed { .. }));
        assert!(matches!(outcomes[1], DrainOutcome::Sent { .. }));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_entry_abandoned_after_max_requeue() {
        let (queue, _) = queue();
        let entry = queue.enqueue(post("/a")).unwrap();

        for attempt in 1..=5 {
            let outcomes = queue.drain(|_| async { Err(server_down()) }).await.unwrap();
            assert!(matches!(outcomes[0], DrainOutcome::Requeued { attempts, .. } if attempts == attempt));
        }

        let outcomes = queue.drain(|_| async { Err(server_down()) }).await.unwrap();
        assert!(matches!(outcomes[0], DrainOutcome::Abandoned { id, .. } if id == entry.id));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_expired_entries_are_not_replayed() {
        let (queue, clock) = queue();
        let old = queue.enqueue(post("/old")).unwrap();
        clock.advance(8 * 24 * 60 * 60 * 1000);
        let fresh = queue.enqueue(post("/fresh")).unwrap();

        let mut sent = Vec::new();
        let outcomes = queue
            .drain(|config| {
                sent.push(config.url.clone());
                async { Ok(ResponseBody::Json(json!(null))) }
            })
            .await
            .unwrap();

        assert_eq!(outcomes[0], DrainOutcome::Expired { id: old.id });
        assert_eq!(outcomes[1], DrainOutcome::Sent { id: fresh.id });
        assert_eq!(sent, vec!["/fresh".to_string()]);
    }

    #[test]
    fn test_queue_survives_new_instance() {
        let clock = Arc::new(ManualClock::new(0));
        let storage = Arc::new(StorageAdapter::in_memory(StorageConfig::default()).with_clock(clock.clone()));
        let first = OfflineQueue::new(storage.clone(), OfflineQueueConfig::default()).unwrap();
        first.enqueue(post("/a")).unwrap();

        let second = OfflineQueue::new(storage, OfflineQueueConfig::default()).unwrap();
        assert_eq!(second.len(), 1);
        second.clear().unwrap();
        assert!(first.is_empty());
    }
}
