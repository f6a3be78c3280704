// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;

use moka::future::Cache;

use super::{CacheEntry, PersistentStore};
use crate::CacheKey;

/// A bounded in-memory tier in front of a [`PersistentStore`].
///
/// Writes go to both tiers. Reads consult memory first, then the store. A record
/// found only in the store is returned without being copied into memory, so repeated
/// reads of it keep hitting the store until the key is written again.
#[derive(Debug)]
pub struct TieredCache<S> {
    pipeline_name: Cow<'static, str>,
    memory: Cache<CacheKey, CacheEntry>,
    store: S,
}

impl<S: PersistentStore> TieredCache<S> {
    /// Creates a tiered cache holding at most `memory_entries` entries in memory.
    pub fn new(pipeline_name: impl Into<Cow<'static, str>>, store: S, memory_entries: u64) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            memory: Cache::builder().max_capacity(memory_entries).build(),
            store,
        }
    }

    /// Returns the persistent tier.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Looks up `key`. Store failures and malformed records count as misses.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.get(key).await {
            self.emit(key, "memory_hit");
            return Some(entry);
        }

        match self.store.get(key).await {
            Ok(Some(record)) => {
                let entry = CacheEntry::from_bytes(&record);
                self.emit(key, if entry.is_some() { "disk_hit" } else { "malformed_record" });
                entry
            }
            Ok(None) => {
                self.emit(key, "miss");
                None
            }
            Err(error) => {
                tracing::event!(
                    name: "errand.cache",
                    tracing::Level::DEBUG,
                    pipeline.name = %self.pipeline_name,
                    cache.event = "read_failed",
                    cache.key = %key,
                    error = %error,
                );
                None
            }
        }
    }

    /// Writes `entry` to both tiers. A store failure is logged and otherwise ignored.
    pub async fn put(&self, key: &CacheKey, entry: CacheEntry) {
        let record = entry.to_bytes();
        self.memory.insert(key.clone(), entry).await;

        if let Err(error) = self.store.put(key, record).await {
            tracing::event!(
                name: "errand.cache",
                tracing::Level::DEBUG,
                pipeline.name = %self.pipeline_name,
                cache.event = "write_failed",
                cache.key = %key,
                error = %error,
            );
        }
    }

    fn emit(&self, key: &CacheKey, event: &'static str) {
        tracing::event!(
            name: "errand.cache",
            tracing::Level::DEBUG,
            pipeline.name = %self.pipeline_name,
            cache.event = event,
            cache.key = %key,
        );
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use bytes::Bytes;
    use http::{Method, Uri};

    use super::*;
    use crate::cache::testing::MockStore;

    fn key(path: &str) -> CacheKey {
        CacheKey::for_request(&Method::GET, &path.parse::<Uri>().unwrap())
    }

    fn entry(payload: &'static [u8]) -> CacheEntry {
        CacheEntry::new(SystemTime::UNIX_EPOCH + Duration::from_secs(60), payload)
    }

    #[tokio::test]
    async fn put_writes_both_tiers() {
        let cache = TieredCache::new("test", MockStore::default(), 25);

        cache.put(&key("/a"), entry(b"a")).await;

        assert_eq!(cache.store().puts(), 1);
        assert_eq!(cache.get(&key("/a")).await, Some(entry(b"a")));
        assert_eq!(cache.store().gets(), 0);
        assert_eq!(CacheEntry::from_bytes(&cache.store().record(&key("/a")).unwrap()), Some(entry(b"a")));
    }

    #[tokio::test]
    async fn disk_hit_does_not_populate_memory() {
        let store = MockStore::default();
        store.insert(&key("/a"), entry(b"a").to_bytes());
        let cache = TieredCache::new("test", store, 25);

        assert_eq!(cache.get(&key("/a")).await, Some(entry(b"a")));
        assert_eq!(cache.get(&key("/a")).await, Some(entry(b"a")));

        assert_eq!(cache.store().gets(), 2);
    }

    #[tokio::test]
    async fn malformed_record_is_a_miss() {
        let store = MockStore::default();
        store.insert(&key("/a"), Bytes::from_static(b"abc"));
        let cache = TieredCache::new("test", store, 25);

        assert!(cache.get(&key("/a")).await.is_none());
    }

    #[tokio::test]
    async fn store_failures_are_swallowed() {
        let cache = TieredCache::new("test", MockStore::failing(), 25);

        cache.put(&key("/a"), entry(b"a")).await;
        assert_eq!(cache.get(&key("/a")).await, Some(entry(b"a")));

        assert!(cache.get(&key("/b")).await.is_none());
    }
}
