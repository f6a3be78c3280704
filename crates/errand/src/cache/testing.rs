// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use super::PersistentStore;
use crate::{CacheKey, StoreError};

/// An in-memory [`PersistentStore`] that counts its operations.
#[derive(Debug, Default)]
pub(crate) struct MockStore {
    records: Mutex<HashMap<CacheKey, Bytes>>,
    gets: AtomicUsize,
    puts: AtomicUsize,
    fail: bool,
}

impl MockStore {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub(crate) fn insert(&self, key: &CacheKey, record: Bytes) {
        self.records.lock().insert(key.clone(), record);
    }

    pub(crate) fn record(&self, key: &CacheKey) -> Option<Bytes> {
        self.records.lock().get(key).cloned()
    }

    pub(crate) fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub(crate) fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }
}

impl PersistentStore for MockStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StoreError::from_io(std::io::Error::other("store unavailable")));
        }
        Ok(self.record(key))
    }

    async fn put(&self, key: &CacheKey, record: Bytes) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(StoreError::from_io(std::io::Error::other("store unavailable")));
        }
        self.insert(key, record);
        Ok(())
    }
}
