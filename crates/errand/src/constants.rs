// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use http::StatusCode;

/// Name used for telemetry when a [`Context`][crate::Context] is not named explicitly.
pub(crate) const DEFAULT_CONTEXT_NAME: &str = "errand";

/// Retries granted by the retry engine unless configured otherwise.
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;

/// Status code renewed by the default renewal predicate.
pub(crate) const DEFAULT_RENEW_STATUS: StatusCode = StatusCode::UNAUTHORIZED;

pub(crate) const DEFAULT_BACKOFF_MIN: Duration = Duration::from_millis(50);
pub(crate) const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(500);

pub(crate) const DEFAULT_REFRESH_BACKOFF_MIN: Duration = Duration::from_millis(50);
pub(crate) const DEFAULT_REFRESH_BACKOFF_MAX: Duration = Duration::from_millis(200);

pub(crate) const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);
pub(crate) const DEFAULT_MAX_AGE: Duration = Duration::from_secs(5 * 60);

pub(crate) const DEFAULT_MEMORY_ENTRIES: u64 = 25;
pub(crate) const DEFAULT_DISK_CAPACITY: u64 = 1024 * 1024;
