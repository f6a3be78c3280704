// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use serde::{Deserialize, Serialize};

use super::Backoff;
use crate::constants::DEFAULT_MAX_RETRIES;

/// Deserializable settings for a [`Retry`][super::Retry].
///
/// Missing fields fall back to their defaults:
///
/// ```
/// use errand::{Backoff, RetryConfig};
///
/// let config: RetryConfig = serde_json::from_str(r#"{"max_retries":5}"#).unwrap();
///
/// assert_eq!(config.max_retries, 5);
/// assert_eq!(config.backoff, Backoff::default());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[non_exhaustive]
pub struct RetryConfig {
    /// Retries granted after the first attempt.
    pub max_retries: u32,

    /// The delay strategy between attempts.
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::default(),
        }
    }
}
