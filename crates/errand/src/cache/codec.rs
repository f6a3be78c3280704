// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::CodecError;

/// Converts payloads to and from the bytes kept in the cache.
pub trait Codec: Send + Sync {
    /// Encodes `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError>;

    /// Decodes a value previously produced by [`encode`][Self::encode].
    ///
    /// # Errors
    ///
    /// Returns an error if `bytes` do not hold a valid `T`.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// A [`Codec`] that stores payloads as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError> {
        serde_json::to_vec(value).map(Bytes::from).map_err(CodecError::caused_by)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::caused_by)
    }
}
