// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{CacheKey, StoreError};

const TEMP_SUFFIX: &str = "tmp";

/// Persistent key-value storage for cache records.
///
/// Implementations must make each `put` atomic per key: a concurrent `get` observes
/// either the previous record or the new one, never a partial write.
pub trait PersistentStore: Send + Sync {
    /// Reads the record stored under `key`.
    fn get(&self, key: &CacheKey) -> impl Future<Output = Result<Option<Bytes>, StoreError>> + Send;

    /// Stores `record` under `key`, replacing any previous record.
    fn put(&self, key: &CacheKey, record: Bytes) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// A [`PersistentStore`] keeping one file per key in a directory.
///
/// Records are written to a temporary file and renamed into place. The total size of
/// all records is bounded; once it is exceeded the least recently used records are
/// deleted. Records left by a previous process are picked up when the store is opened,
/// ordered by their modification time.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use errand::{CacheKey, FileStore, PersistentStore};
/// use http::{Method, Uri};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let directory = tempfile::tempdir()?;
/// let store = FileStore::open(directory.path(), 1024 * 1024).await?;
/// let key = CacheKey::for_request(&Method::GET, &Uri::from_static("https://example.com/a"));
///
/// store.put(&key, Bytes::from_static(b"record")).await?;
/// assert_eq!(store.get(&key).await?, Some(Bytes::from_static(b"record")));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct FileStore {
    directory: PathBuf,
    capacity: u64,
    index: Mutex<Index>,
    // Held while a record is renamed into place, indexed, and evictions are deleted.
    commit: tokio::sync::Mutex<()>,
    temp_sequence: AtomicU64,
}

#[derive(Debug, Default)]
struct Index {
    records: HashMap<CacheKey, Record>,
    total: u64,
    clock: u64,
}

#[derive(Debug, Clone, Copy)]
struct Record {
    size: u64,
    last_used: u64,
}

impl Index {
    fn touch(&mut self, key: &CacheKey) -> bool {
        self.clock += 1;
        match self.records.get_mut(key) {
            Some(record) => {
                record.last_used = self.clock;
                true
            }
            None => false,
        }
    }

    fn insert(&mut self, key: CacheKey, size: u64) {
        self.clock += 1;
        let record = Record {
            size,
            last_used: self.clock,
        };
        if let Some(previous) = self.records.insert(key, record) {
            self.total -= previous.size;
        }
        self.total += size;
    }

    fn remove(&mut self, key: &CacheKey) {
        if let Some(record) = self.records.remove(key) {
            self.total -= record.size;
        }
    }

    /// Removes least recently used records until the total fits `capacity`.
    fn evict(&mut self, capacity: u64) -> Vec<CacheKey> {
        let mut evicted = Vec::new();

        while self.total > capacity {
            let Some(oldest) = self
                .records
                .iter()
                .min_by_key(|(_, record)| record.last_used)
                .map(|(key, _)| key.clone())
            else {
                break;
            };

            self.remove(&oldest);
            evicted.push(oldest);
        }

        evicted
    }
}

impl FileStore {
    /// Opens the store in `directory`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or listed.
    pub async fn open(directory: impl AsRef<Path>, capacity: u64) -> Result<Self, StoreError> {
        let directory = directory.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&directory).await.map_err(StoreError::from_io)?;

        let mut found = Vec::new();
        let mut entries = tokio::fs::read_dir(&directory).await.map_err(StoreError::from_io)?;

        while let Some(entry) = entries.next_entry().await.map_err(StoreError::from_io)? {
            let path = entry.path();

            if path.extension().is_some_and(|extension| extension == TEMP_SUFFIX) {
                // leftover of an interrupted write
                let _ = tokio::fs::remove_file(&path).await;
                continue;
            }

            let Some(key) = path.file_name().and_then(|name| name.to_str()).and_then(CacheKey::from_hex) else {
                continue;
            };

            let metadata = entry.metadata().await.map_err(StoreError::from_io)?;
            if metadata.is_file() {
                let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                found.push((modified, key, metadata.len()));
            }
        }

        found.sort_by_key(|(modified, ..)| *modified);

        let mut index = Index::default();
        for (_, key, size) in found {
            index.insert(key, size);
        }

        let store = Self {
            directory,
            capacity,
            index: Mutex::new(Index::default()),
            commit: tokio::sync::Mutex::new(()),
            temp_sequence: AtomicU64::new(0),
        };

        let evicted = index.evict(capacity);
        *store.index.lock() = index;
        store.delete(evicted).await;

        tracing::event!(
            name: "errand.cache",
            tracing::Level::DEBUG,
            cache.event = "store_opened",
            cache.directory = %store.directory.display(),
            cache.records = store.len(),
        );

        Ok(store)
    }

    /// Returns the number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.lock().records.len()
    }

    /// Returns `true` if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the total size of all stored records in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.index.lock().total
    }

    fn path(&self, key: &CacheKey) -> PathBuf {
        self.directory.join(key.as_str())
    }

    async fn delete(&self, keys: Vec<CacheKey>) {
        for key in keys {
            match tokio::fs::remove_file(self.path(&key)).await {
                Ok(()) => {}
                Err(error) if error.kind() == ErrorKind::NotFound => {}
                Err(error) => tracing::event!(
                    name: "errand.cache",
                    tracing::Level::DEBUG,
                    cache.event = "evict_failed",
                    cache.key = %key,
                    error = %error,
                ),
            }
        }
    }
}

impl PersistentStore for FileStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        if !self.index.lock().touch(key) {
            return Ok(None);
        }

        match tokio::fs::read(self.path(key)).await {
            Ok(record) => Ok(Some(Bytes::from(record))),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                self.index.lock().remove(key);
                Ok(None)
            }
            Err(error) => Err(StoreError::from_io(error)),
        }
    }

    async fn put(&self, key: &CacheKey, record: Bytes) -> Result<(), StoreError> {
        let sequence = self.temp_sequence.fetch_add(1, Ordering::Relaxed);
        let temp = self.directory.join(format!("{key}.{sequence}.{TEMP_SUFFIX}"));

        if let Err(error) = tokio::fs::write(&temp, &record).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StoreError::from_io(error));
        }

        let _commit = self.commit.lock().await;

        if let Err(error) = tokio::fs::rename(&temp, self.path(key)).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(StoreError::from_io(error));
        }

        let evicted = {
            let mut index = self.index.lock();
            index.insert(key.clone(), u64::try_from(record.len()).unwrap_or(u64::MAX));
            index.evict(self.capacity)
        };

        self.delete(evicted).await;
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http::{Method, Uri};

    use super::*;

    fn key(path: &str) -> CacheKey {
        CacheKey::for_request(&Method::GET, &path.parse::<Uri>().unwrap())
    }

    #[test]
    fn static_assertions() {
        static_assertions::assert_impl_all!(FileStore: Send, Sync);
    }

    #[tokio::test]
    async fn put_then_get() {
        let directory = tempfile::tempdir().unwrap();
        let store = FileStore::open(directory.path(), 1024).await.unwrap();

        store.put(&key("/a"), Bytes::from_static(b"first")).await.unwrap();
        store.put(&key("/a"), Bytes::from_static(b"second")).await.unwrap();

        assert_eq!(store.get(&key("/a")).await.unwrap(), Some(Bytes::from_static(b"second")));
        assert_eq!(store.get(&key("/b")).await.unwrap(), None);
        assert_eq!(store.len(), 1);
        assert_eq!(store.size(), 6);
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let directory = tempfile::tempdir().unwrap();
        let store = FileStore::open(directory.path(), 10).await.unwrap();

        store.put(&key("/a"), Bytes::from_static(b"aaaa")).await.unwrap();
        store.put(&key("/b"), Bytes::from_static(b"bbbb")).await.unwrap();
        assert!(store.get(&key("/a")).await.unwrap().is_some());

        store.put(&key("/c"), Bytes::from_static(b"cccc")).await.unwrap();

        assert!(store.get(&key("/a")).await.unwrap().is_some());
        assert!(store.get(&key("/b")).await.unwrap().is_none());
        assert!(store.get(&key("/c")).await.unwrap().is_some());
        assert!(!directory.path().join(key("/b").as_str()).exists());
        assert_eq!(store.size(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_keep_index_in_step_with_files() {
        let directory = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(directory.path(), 1024).await.unwrap());

        for _ in 0..20 {
            let puts = (1..=8).map(|len| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.put(&key("/shared"), Bytes::from(vec![b'x'; len])).await })
            });
            for put in futures::future::join_all(puts).await {
                put.unwrap().unwrap();
            }

            let on_disk = std::fs::metadata(directory.path().join(key("/shared").as_str())).unwrap().len();
            assert_eq!(store.size(), on_disk);
            assert_eq!(store.len(), 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_eviction_keeps_indexed_files() {
        let directory = tempfile::tempdir().unwrap();
        let store = Arc::new(FileStore::open(directory.path(), 8).await.unwrap());

        for round in 0..20 {
            let puts = (0..6).map(|index| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.put(&key(&format!("/{round}/{index}")), Bytes::from_static(b"data")).await })
            });
            for put in futures::future::join_all(puts).await {
                put.unwrap().unwrap();
            }

            let files = std::fs::read_dir(directory.path()).unwrap().count();
            assert_eq!(files, store.len());
            assert!(store.size() <= 8);
        }
    }

    #[tokio::test]
    async fn oversized_record_is_not_kept() {
        let directory = tempfile::tempdir().unwrap();
        let store = FileStore::open(directory.path(), 4).await.unwrap();

        store.put(&key("/big"), Bytes::from_static(b"too large")).await.unwrap();

        assert!(store.is_empty());
        assert!(store.get(&key("/big")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reopen_indexes_existing_records() {
        let directory = tempfile::tempdir().unwrap();

        {
            let store = FileStore::open(directory.path(), 1024).await.unwrap();
            store.put(&key("/kept"), Bytes::from_static(b"kept")).await.unwrap();
        }
        std::fs::write(directory.path().join("not-a-key"), b"ignored").unwrap();
        std::fs::write(directory.path().join(format!("{}.0.tmp", key("/partial"))), b"partial").unwrap();

        let store = FileStore::open(directory.path(), 1024).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key("/kept")).await.unwrap(), Some(Bytes::from_static(b"kept")));
        assert!(!directory.path().join(format!("{}.0.tmp", key("/partial"))).exists());
        assert!(directory.path().join("not-a-key").exists());
    }

    #[tokio::test]
    async fn reopen_with_smaller_capacity_evicts() {
        let directory = tempfile::tempdir().unwrap();

        {
            let store = FileStore::open(directory.path(), 1024).await.unwrap();
            store.put(&key("/one"), Bytes::from_static(b"11111")).await.unwrap();
            store.put(&key("/two"), Bytes::from_static(b"22222")).await.unwrap();
        }

        let store = FileStore::open(directory.path(), 5).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.size(), 5);
    }

    #[tokio::test]
    async fn externally_deleted_record_is_a_miss() {
        let directory = tempfile::tempdir().unwrap();
        let store = FileStore::open(directory.path(), 1024).await.unwrap();
        store.put(&key("/gone"), Bytes::from_static(b"gone")).await.unwrap();

        std::fs::remove_file(directory.path().join(key("/gone").as_str())).unwrap();

        assert!(store.get(&key("/gone")).await.unwrap().is_none());
        assert!(store.is_empty());
    }
}
