// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Serializes a [`Duration`] as a whole number of milliseconds.
//!
//! Used with `#[serde(with = "crate::millis")]` so that configuration files read
//! `"debounce": 2000` rather than a `{ secs, nanos }` pair.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

pub(crate) fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}
