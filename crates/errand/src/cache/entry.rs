// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, SystemTime};

use bytes::{BufMut, Bytes, BytesMut};

const TIMESTAMP_LEN: usize = size_of::<u64>();

/// An encoded payload together with the time it was written.
///
/// Persisted as the write time in milliseconds since the UNIX epoch (8 bytes, big
/// endian) followed by the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    timestamp: SystemTime,
    payload: Bytes,
}

impl CacheEntry {
    /// Creates an entry written at `timestamp`.
    #[must_use]
    pub fn new(timestamp: SystemTime, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            payload: payload.into(),
        }
    }

    /// Returns the write time.
    #[must_use]
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Returns the encoded payload.
    #[must_use]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub(crate) fn to_bytes(&self) -> Bytes {
        let millis = self
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_or(0, |since| u64::try_from(since.as_millis()).unwrap_or(u64::MAX));

        let mut buffer = BytesMut::with_capacity(TIMESTAMP_LEN + self.payload.len());
        buffer.put_u64(millis);
        buffer.put_slice(&self.payload);
        buffer.freeze()
    }

    /// Returns `None` for records too short to hold a timestamp.
    pub(crate) fn from_bytes(record: &Bytes) -> Option<Self> {
        let header = record.first_chunk::<TIMESTAMP_LEN>()?;
        let millis = u64::from_be_bytes(*header);

        Some(Self {
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_millis(millis),
            payload: record.slice(TIMESTAMP_LEN..),
        })
    }
}
