// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_DEBOUNCE, DEFAULT_MAX_AGE};

/// Per-endpoint staleness windows.
///
/// With `age` being the time since an entry was written:
///
/// - `age < debounce`: serve the cached payload and skip the network call;
/// - `age < max_age`: serve the cached payload, then call the network and deliver again;
/// - otherwise: ignore the cache.
///
/// A zero `debounce` or `max_age` disables the corresponding window.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use errand::{CacheAction, CachePolicy};
///
/// let policy = CachePolicy::new(Duration::from_millis(100), Duration::from_secs(1));
///
/// assert_eq!(policy.decide(Duration::from_millis(50)), CacheAction::Suppress);
/// assert_eq!(policy.decide(Duration::from_millis(500)), CacheAction::ServeAndRefresh);
/// assert_eq!(policy.decide(Duration::from_secs(2)), CacheAction::Refetch);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct CachePolicy {
    /// Window during which the network call is suppressed.
    #[serde(with = "crate::millis")]
    pub debounce: Duration,

    /// Window during which cached data is served while a refresh runs.
    #[serde(with = "crate::millis")]
    pub max_age: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

/// What to do with a cached entry of a given age.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheAction {
    /// Serve the cached payload only.
    Suppress,
    /// Serve the cached payload, then refresh it from the network.
    ServeAndRefresh,
    /// Ignore the cached payload.
    Refetch,
}

impl CachePolicy {
    /// Creates a policy with the given windows.
    #[must_use]
    pub fn new(debounce: Duration, max_age: Duration) -> Self {
        Self { debounce, max_age }
    }

    /// Decides how to treat an entry of the given age.
    #[must_use]
    pub fn decide(&self, age: Duration) -> CacheAction {
        if !self.debounce.is_zero() && age < self.debounce {
            return CacheAction::Suppress;
        }

        if !self.max_age.is_zero() && age < self.max_age {
            return CacheAction::ServeAndRefresh;
        }

        CacheAction::Refetch
    }

    /// Decides how to treat an entry written at `written` when the time is `now`.
    ///
    /// Entries from the future are treated as brand new.
    pub(crate) fn decide_at(&self, written: SystemTime, now: SystemTime) -> CacheAction {
        self.decide(now.duration_since(written).unwrap_or(Duration::ZERO))
    }
}
