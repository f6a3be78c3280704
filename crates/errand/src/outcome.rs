// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;

use crate::{Response, TransportError};

/// The terminal result of an orchestrated call.
///
/// Every entry point of this crate reports through an `Outcome`: exactly one variant
/// is produced per completed attempt and it is never mutated afterwards.
///
/// # Examples
///
/// ```
/// use errand::Outcome;
///
/// let outcome: Outcome<u32> = Outcome::Success(Some(21));
/// let doubled = outcome.map(|value| value * 2);
///
/// assert!(doubled.is_success());
/// assert_eq!(doubled.data(), Some(&42));
/// ```
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    /// The call succeeded. The payload is absent when the response had no body.
    Success(Option<T>),

    /// A well-formed response with a failing status.
    NoSuccess {
        /// The status of the failing response.
        code: StatusCode,
        /// The error body of the failing response, if any.
        body: Option<Bytes>,
    },

    /// The call was cancelled by its caller.
    Cancelled,

    /// The transport failed to produce a response.
    Error(Arc<TransportError>),
}

impl<T> Outcome<T> {
    /// Builds a [`NoSuccess`][Outcome::NoSuccess] from a failing response.
    #[must_use]
    pub fn no_success<B>(response: &Response<B>) -> Self {
        Self::NoSuccess {
            code: response.status(),
            body: response.error_body().cloned(),
        }
    }

    /// Classifies a transport failure, mapping cancellations to [`Cancelled`][Outcome::Cancelled].
    #[must_use]
    pub fn from_transport_error(error: TransportError) -> Self {
        if error.is_cancelled() {
            Self::Cancelled
        } else {
            Self::Error(Arc::new(error))
        }
    }

    /// Returns `true` for [`Success`][Outcome::Success].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns `true` for [`NoSuccess`][Outcome::NoSuccess].
    #[must_use]
    pub fn is_no_success(&self) -> bool {
        matches!(self, Self::NoSuccess { .. })
    }

    /// Returns `true` for [`Cancelled`][Outcome::Cancelled].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns `true` for [`Error`][Outcome::Error].
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Returns the status code of a [`NoSuccess`][Outcome::NoSuccess] outcome.
    #[must_use]
    pub fn code(&self) -> Option<StatusCode> {
        match self {
            Self::NoSuccess { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns the success payload, if any.
    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success(data) => data.as_ref(),
            _ => None,
        }
    }

    /// Consumes the outcome and returns the success payload, if any.
    #[must_use]
    pub fn into_data(self) -> Option<T> {
        match self {
            Self::Success(data) => data,
            _ => None,
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::NoSuccess { .. } => "no_success",
            Self::Cancelled => "cancelled",
            Self::Error(_) => "error",
        }
    }

    /// Maps the success payload, passing every other variant through unchanged.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Success(data) => Outcome::Success(data.map(f)),
            Self::NoSuccess { code, body } => Outcome::NoSuccess { code, body },
            Self::Cancelled => Outcome::Cancelled,
            Self::Error(error) => Outcome::Error(error),
        }
    }
}
