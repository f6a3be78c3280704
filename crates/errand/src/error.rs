// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types raised by the collaborators that the orchestration engine composes.

/// A failure of the underlying transport to produce a response.
///
/// Transports report connection and I/O problems through this type. A transport that
/// observes a caller-initiated abort should construct the error with
/// [`TransportError::cancelled`] so that the retry engine surfaces
/// [`Outcome::Cancelled`][crate::Outcome::Cancelled] instead of an error.
///
/// # Examples
///
/// ```
/// use errand::TransportError;
///
/// let error = TransportError::io("connection reset");
/// assert!(!error.is_cancelled());
///
/// let cancelled = TransportError::cancelled();
/// assert!(cancelled.is_cancelled());
/// ```
#[ohno::error]
pub struct TransportError {
    cancelled: bool,
}

impl TransportError {
    /// Creates an error describing a call that was cancelled by its caller.
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(true)
    }

    /// Creates an error from an I/O or connection failure.
    pub fn io(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(false, cause)
    }

    /// Returns `true` if the call was aborted on request of the caller.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

/// A failure to encode or decode a cached payload.
///
/// Never surfaced to callers of the cache engine: a failed encode skips the cache
/// write and a failed decode is treated as a cache miss.
#[ohno::error]
pub struct CodecError;

/// A failure of the persistent cache store.
#[ohno::error]
pub struct StoreError;

impl StoreError {
    pub(crate) fn from_io(error: std::io::Error) -> Self {
        Self::caused_by(error)
    }
}
