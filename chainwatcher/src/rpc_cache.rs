// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read cache for idempotent upstream RPC calls.
//!
//! Entries are keyed by method name plus arguments, so anything keyed by a
//! block hash never goes stale. The map is read-mostly and guarded by a
//! read-write lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

#[derive(Debug)]
pub struct RpcCache {
    entries: RwLock<HashMap<String, serde_json::Value>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl RpcCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Build the cache key for a call. Arguments must already be normalized.
    pub fn key(method: &str, args: &[&str]) -> String {
        let mut key = String::from(method);
        for arg in args {
            key.push(':');
            key.push_str(arg);
        }
        key
    }

    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub async fn put(&self, key: String, value: serde_json::Value) {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            // Bounded map: shed an arbitrary entry rather than grow without limit.
            if let Some(evict) = entries.keys().next().cloned() {
                entries.remove(&evict);
            }
        }
        entries.insert(key, value);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn hit_and_miss_accounting() {
        let cache = RpcCache::new(10);
        let key = RpcCache::key("eth_getBlockByHash", &["0xabc"]);

        assert!(cache.get(&key).await.is_none());
        cache.put(key.clone(), json!({"number": "0x64"})).await;
        assert_eq!(cache.get(&key).await, Some(json!({"number": "0x64"})));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn capacity_is_bounded() {
        let cache = RpcCache::new(2);
        cache.put("a".into(), json!(1)).await;
        cache.put("b".into(), json!(2)).await;
        cache.put("c".into(), json!(3)).await;

        let entries = cache.entries.read().await;
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn key_includes_all_arguments() {
        let a = RpcCache::key("eth_getStorageAt", &["0xabc", "0x1"]);
        let b = RpcCache::key("eth_getStorageAt", &["0xabc", "0x2"]);
        assert_ne!(a, b);
    }
}
