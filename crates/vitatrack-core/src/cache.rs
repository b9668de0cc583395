//! TTL response cache owned by one client

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::clock::SharedClock;
use crate::types::{Method, RequestBody, ResponseBody};

/// Cache key for a resolved call: `METHOD url body`
pub fn cache_key(method: Method, resolved_url: &str, body: Option<&RequestBody>) -> String {
    let body = body.map(RequestBody::cache_fragment).unwrap_or_default();
    format!("{} {} {}", method, resolved_url, body)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub payload: ResponseBody,
    pub stored_at: i64,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn is_valid(&self, now_millis: i64) -> bool {
        now_millis.saturating_sub(self.stored_at) <= i64::try_from(self.ttl_ms).unwrap_or(i64::MAX)
    }
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    clock: SharedClock,
}

impl ResponseCache {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            entries: Mutex::default(),
            clock,
        }
    }

    /// Valid payload for `key`; an expired entry is evicted and never returned
    pub fn get(&self, key: &str) -> Option<ResponseBody> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some(entry) if entry.is_valid(now) => Some(entry.payload.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, payload: ResponseBody, ttl_ms: u64) {
        let entry = CacheEntry {
            payload,
            stored_at: self.clock.now_millis(),
            ttl_ms,
        };
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid(now));
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_key_includes_body() {
        let body = RequestBody::Json(json!({"a": 1}));
        assert_eq!(cache_key(Method::Get, "https://x/y", None), "GET https://x/y ");
        assert_eq!(
            cache_key(Method::Post, "https://x/y", Some(&body)),
            "POST https://x/y {\"a\":1}"
        );
    }

    #[test]
    fn test_entry_valid_until_ttl_inclusive() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = ResponseCache::new(clock.clone());
        cache.insert("k".into(), ResponseBody::Text("v".into()), 100);

        clock.set(100);
        assert_eq!(cache.get("k"), Some(ResponseBody::Text("v".into())));

        clock.set(101);
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unbounded_ttl_stays_valid() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = ResponseCache::new(clock.clone());
        cache.insert("k".into(), ResponseBody::Json(json!(1)), u64::MAX);

        clock.set(i64::MAX);
        assert_eq!(cache.get("k"), Some(ResponseBody::Json(json!(1))));
    }

    #[test]
    fn test_purge_expired() {
        let clock = Arc::new(ManualClock::new(0));
        let cache = ResponseCache::new(clock.clone());
        cache.insert("short".into(), ResponseBody::Json(json!(1)), 10);
        cache.insert("long".into(), ResponseBody::Json(json!(2)), 1_000);

        clock.set(50);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }
}
