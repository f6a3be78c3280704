// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_DISK_CAPACITY, DEFAULT_MEMORY_ENTRIES};

/// Deserializable settings for [`CacheEngine::open`][super::CacheEngine::open].
///
/// ```
/// use errand::CacheConfig;
///
/// let config: CacheConfig = serde_json::from_str(r#"{"directory":"/var/cache/app"}"#).unwrap();
///
/// assert_eq!(config.memory_entries, 25);
/// assert_eq!(config.disk_capacity, 1024 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct CacheConfig {
    /// Capacity of the in-memory tier, in entries.
    pub memory_entries: u64,

    /// Capacity of the file store, in bytes.
    pub disk_capacity: u64,

    /// Directory of the file store. Defaults to `errand` under the system temporary directory.
    pub directory: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_entries: DEFAULT_MEMORY_ENTRIES,
            disk_capacity: DEFAULT_DISK_CAPACITY,
            directory: std::env::temp_dir().join("errand"),
        }
    }
}

impl CacheConfig {
    /// Creates the default settings with the file store in `directory`.
    #[must_use]
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }
}
