// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The transport abstraction the orchestration engine composes.
//!
//! The engine never performs network I/O itself. It drives implementations of
//! [`Call`], which represent one logical request that can be issued any number of
//! times, and interprets the [`Response`] they produce.

use std::borrow::Cow;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};

use crate::TransportError;

/// A response produced by the transport.
///
/// `body` holds the decoded payload of a successful response, while `error_body`
/// keeps the raw bytes of a failing one.
#[derive(Debug, Clone)]
pub struct Response<T> {
    status: StatusCode,
    body: Option<T>,
    error_body: Option<Bytes>,
    headers: HeaderMap,
}

impl<T> Response<T> {
    /// Creates a response with the given status and no body.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            body: None,
            error_body: None,
            headers: HeaderMap::new(),
        }
    }

    /// Creates a `200 OK` response carrying `body`.
    #[must_use]
    pub fn ok(body: T) -> Self {
        Self::new(StatusCode::OK).with_body(body)
    }

    /// Sets the decoded payload.
    #[must_use]
    pub fn with_body(mut self, body: T) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the raw error body.
    #[must_use]
    pub fn with_error_body(mut self, error_body: impl Into<Bytes>) -> Self {
        self.error_body = Some(error_body.into());
        self
    }

    /// Sets the response headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Returns `true` if the status is in the `2xx` range.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns the response status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the decoded payload, if any.
    #[must_use]
    pub fn body(&self) -> Option<&T> {
        self.body.as_ref()
    }

    /// Consumes the response and returns the decoded payload, if any.
    #[must_use]
    pub fn into_body(self) -> Option<T> {
        self.body
    }

    /// Returns the raw error body, if any.
    #[must_use]
    pub fn error_body(&self) -> Option<&Bytes> {
        self.error_body.as_ref()
    }

    /// Returns the response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// One logical request that the engine may issue several times.
///
/// `invoke` borrows the call immutably so that every retry re-issues the same
/// request. Dropping the returned future cancels the request.
pub trait Call<T>: Send + Sync {
    /// The request method. Only `GET` calls are eligible for caching.
    fn method(&self) -> &Method;

    /// The normalized request URI, used to derive the cache key.
    fn uri(&self) -> &Uri;

    /// Issues the request once.
    fn invoke(&self) -> impl Future<Output = Result<Response<T>, TransportError>> + Send;
}

/// A [`Call`] backed by an async closure.
///
/// Created with [`call_fn`].
#[derive(Debug, Clone)]
pub struct FnCall<F> {
    method: Method,
    uri: Uri,
    invoke: F,
}

/// Creates a [`Call`] that runs `invoke` for every attempt.
///
/// # Examples
///
/// ```
/// use errand::{Call, Response, call_fn};
/// use http::{Method, Uri};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let call = call_fn(Method::GET, Uri::from_static("https://example.com/posts"), || async {
///     Ok(Response::ok(vec!["first post".to_string()]))
/// });
///
/// let response = call.invoke().await.unwrap();
/// assert!(response.is_success());
/// # }
/// ```
pub fn call_fn<F, Fut, T>(method: Method, uri: Uri, invoke: F) -> FnCall<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<T>, TransportError>> + Send,
{
    FnCall { method, uri, invoke }
}

impl<F, Fut, T> Call<T> for FnCall<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response<T>, TransportError>> + Send,
{
    fn method(&self) -> &Method {
        &self.method
    }

    fn uri(&self) -> &Uri {
        &self.uri
    }

    fn invoke(&self) -> impl Future<Output = Result<Response<T>, TransportError>> + Send {
        (self.invoke)()
    }
}

/// A [`Call`] decorator that logs every request and its response.
///
/// Requests are logged before they are issued and responses after they arrive, as
/// `errand.call` events at `DEBUG` level.
#[derive(Debug, Clone)]
pub struct Logged<C> {
    name: Cow<'static, str>,
    inner: C,
}

impl<C> Logged<C> {
    /// Wraps `inner`, tagging its events with `name`.
    pub fn new(name: impl Into<Cow<'static, str>>, inner: C) -> Self {
        Self { name: name.into(), inner }
    }

    /// Returns the wrapped call.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<T, C> Call<T> for Logged<C>
where
    C: Call<T>,
{
    fn method(&self) -> &Method {
        self.inner.method()
    }

    fn uri(&self) -> &Uri {
        self.inner.uri()
    }

    async fn invoke(&self) -> Result<Response<T>, TransportError> {
        tracing::event!(
            name: "errand.call.request",
            tracing::Level::DEBUG,
            call.name = %self.name,
            http.method = %self.inner.method(),
            http.uri = %self.inner.uri(),
        );

        let result = self.inner.invoke().await;

        match &result {
            Ok(response) => tracing::event!(
                name: "errand.call.response",
                tracing::Level::DEBUG,
                call.name = %self.name,
                http.status = response.status().as_u16(),
                http.headers = ?response.headers(),
            ),
            Err(error) => tracing::event!(
                name: "errand.call.failure",
                tracing::Level::DEBUG,
                call.name = %self.name,
                error = %error,
            ),
        }

        result
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn response_builders() {
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", "17".parse().unwrap());

        let response = Response::<u32>::new(StatusCode::CONFLICT)
            .with_error_body(&b"taken"[..])
            .with_headers(headers);

        assert!(!response.is_success());
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert!(response.body().is_none());
        assert_eq!(response.error_body().map(|body| &body[..]), Some(&b"taken"[..]));
        assert_eq!(response.headers()["x-request-id"], "17");
    }

    #[test]
    fn ok_response_is_success() {
        let response = Response::ok("value");

        assert!(response.is_success());
        assert_eq!(response.into_body(), Some("value"));
    }

    #[tokio::test]
    async fn fn_call_invokes_every_time() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);
        let call = call_fn(Method::GET, Uri::from_static("https://example.com/items"), move || {
            let counter = Arc::clone(&counter_clone);
            async move { Ok(Response::ok(counter.fetch_add(1, Ordering::SeqCst))) }
        });

        assert_eq!(call.invoke().await.unwrap().into_body(), Some(0));
        assert_eq!(call.invoke().await.unwrap().into_body(), Some(1));
        assert_eq!(call.method(), Method::GET);
        assert_eq!(call.uri(), "https://example.com/items");
    }

    #[tokio::test]
    async fn logged_call_forwards() {
        let call = Logged::new(
            "items",
            call_fn(Method::POST, Uri::from_static("https://example.com/items"), || async {
                Err::<Response<()>, _>(TransportError::io("unreachable"))
            }),
        );

        assert_eq!(call.method(), Method::POST);
        assert_eq!(call.inner().uri(), "https://example.com/items");
        assert!(call.invoke().await.is_err());
    }
}
