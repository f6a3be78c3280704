// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bounded retry of a single call.
//!
//! [`Retry`] issues a call up to `max_retries + 1` times. A transport failure ends the
//! loop immediately, a successful response ends it with
//! [`Outcome::Success`], and a failing response is retried only while retries
//! remain and the renewal predicate agrees. When the budget runs out, the last failing
//! response is reported as [`Outcome::NoSuccess`].
//!
//! # Defaults
//!
//! | Parameter | Default Value | Configured By |
//! |-----------|---------------|---------------|
//! | Max retries | `3` (4 attempts) | [`max_retries`][RetryBuilder::max_retries] |
//! | Backoff | random delay in `[50 ms, 500 ms]` | [`backoff`][RetryBuilder::backoff] |
//! | Renewal predicate | renew on `401 Unauthorized` | [`should_renew`][RetryBuilder::should_renew] |
//!
//! # Examples
//!
//! ```
//! use errand::{Context, Response, Retry, call_fn};
//! use http::{Method, Uri};
//! use tick::Clock;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let context = Context::new(tokio::runtime::Handle::current(), Clock::new_tokio());
//! let retry = Retry::builder(&context)
//!     .max_retries(2)
//!     .should_renew(|response, _| response.status().is_server_error())
//!     .build();
//!
//! let call = call_fn(Method::GET, Uri::from_static("https://example.com/me"), || async {
//!     Ok(Response::ok("me".to_string()))
//! });
//!
//! let outcome = retry.execute(&call).await;
//! assert_eq!(outcome.data().map(String::as_str), Some("me"));
//! # }
//! ```

mod args;
mod backoff;
mod config;

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

pub use args::RenewArgs;
pub use backoff::Backoff;
pub use config::RetryConfig;
use futures::future::{AbortRegistration, Abortable};
use http::StatusCode;
use tick::Clock;
use tokio::task::JoinHandle;

use crate::callbacks::define_fn_wrapper;
use crate::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RENEW_STATUS};
use crate::rnd::Rnd;
use crate::{Call, Context, Outcome, Response, TransportError};

define_fn_wrapper!(ShouldRenew<T>(Fn(response: &Response<T>, args: RenewArgs) -> bool));

/// Retries a call with backoff.
///
/// Cloning is cheap: clones share their configuration.
#[derive(Debug)]
pub struct Retry<T> {
    shared: Arc<RetryShared<T>>,
}

#[derive(Debug)]
struct RetryShared<T> {
    clock: Clock,
    pipeline_name: Cow<'static, str>,
    max_retries: u32,
    backoff: Backoff,
    rnd: Rnd,
    should_renew: Option<ShouldRenew<T>>,
}

impl<T> Clone for Retry<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Retry<T> {
    /// Creates a retry engine with default settings.
    #[must_use]
    pub fn new(context: &Context) -> Self {
        Self::builder(context).build()
    }

    /// Starts configuring a retry engine.
    #[must_use]
    pub fn builder(context: &Context) -> RetryBuilder<T> {
        RetryBuilder::new(context)
    }

    /// Returns the number of retries granted after the first attempt.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.shared.max_retries
    }

    /// Issues `call` until it succeeds, fails terminally, or the retry budget runs out.
    pub async fn execute<C>(&self, call: &C) -> Outcome<T>
    where
        C: Call<T>,
    {
        self.run(|| call.invoke(), |_| {}).await
    }

    /// Like [`execute`][Self::execute], but obtains every attempt from `producer`.
    pub async fn execute_with<F, Fut>(&self, producer: F) -> Outcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Response<T>, TransportError>>,
    {
        self.run(producer, |_| {}).await
    }

    /// Like [`execute_with`][Self::execute_with], but stops as soon as `registration` is aborted.
    ///
    /// Aborting drops the pending attempt or backoff delay and yields [`Outcome::Cancelled`].
    /// No further attempts are made.
    pub async fn execute_abortable<F, Fut>(&self, producer: F, registration: AbortRegistration) -> Outcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Response<T>, TransportError>>,
    {
        Abortable::new(self.run(producer, |_| {}), registration)
            .await
            .unwrap_or(Outcome::Cancelled)
    }

    /// Runs `call` on the runtime of `context` and returns a handle to its outcome.
    pub fn spawn<C>(&self, context: &Context, call: C) -> JoinHandle<Outcome<T>>
    where
        C: Call<T> + 'static,
        T: Send + 'static,
    {
        let retry = self.clone();
        context.handle().spawn(async move { retry.execute(&call).await })
    }

    /// The retry loop. `on_renew` runs right before each backoff delay.
    pub(crate) async fn run<F, Fut>(&self, mut producer: F, mut on_renew: impl FnMut(RenewArgs)) -> Outcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Response<T>, TransportError>>,
    {
        let shared = &*self.shared;
        let mut attempt = 0;

        loop {
            let response = match producer().await {
                Ok(response) => response,
                Err(error) => return Outcome::from_transport_error(error),
            };

            if response.is_success() {
                return Outcome::Success(response.into_body());
            }

            let args = RenewArgs {
                attempt,
                max_retries: shared.max_retries,
            };

            if attempt >= shared.max_retries || !shared.should_renew(&response, args) {
                return Outcome::no_success(&response);
            }

            let delay = shared.backoff.delay(attempt, shared.rnd);
            self.emit_retry(attempt, delay, response.status());
            drop(response);

            on_renew(args);
            shared.clock.delay(delay).await;
            attempt += 1;
        }
    }

    fn emit_retry(&self, attempt: u32, delay: Duration, status: StatusCode) {
        tracing::event!(
            name: "errand.retry",
            tracing::Level::WARN,
            pipeline.name = %self.shared.pipeline_name,
            retry.attempt.index = attempt,
            retry.attempt.is_last = attempt + 1 >= self.shared.max_retries,
            retry.delay = delay.as_secs_f32(),
            http.status = status.as_u16(),
        );
    }
}

impl<T> RetryShared<T> {
    fn should_renew(&self, response: &Response<T>, args: RenewArgs) -> bool {
        match &self.should_renew {
            Some(should_renew) => should_renew.call(response, args),
            None => response.status() == DEFAULT_RENEW_STATUS,
        }
    }
}

/// Configures a [`Retry`].
///
/// Created by [`Retry::builder`].
#[derive(Debug)]
pub struct RetryBuilder<T> {
    clock: Clock,
    pipeline_name: Cow<'static, str>,
    max_retries: u32,
    backoff: Backoff,
    rnd: Rnd,
    should_renew: Option<ShouldRenew<T>>,
}

impl<T> RetryBuilder<T> {
    fn new(context: &Context) -> Self {
        Self {
            clock: context.clock().clone(),
            pipeline_name: Cow::Owned(context.pipeline_name().to_owned()),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::default(),
            rnd: Rnd::default(),
            should_renew: None,
        }
    }

    /// Sets the number of retries after the first attempt. `0` disables retrying.
    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the delay strategy between attempts.
    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the predicate that decides whether a failing response is retried.
    ///
    /// The predicate only runs while retries remain.
    #[must_use]
    pub fn should_renew(mut self, should_renew: impl Fn(&Response<T>, RenewArgs) -> bool + Send + Sync + 'static) -> Self {
        self.should_renew = Some(ShouldRenew::new(should_renew));
        self
    }

    /// Applies deserialized settings.
    #[must_use]
    pub fn config(self, config: &RetryConfig) -> Self {
        self.max_retries(config.max_retries).backoff(config.backoff)
    }

    #[cfg(test)]
    pub(crate) fn rnd(mut self, rnd: Rnd) -> Self {
        self.rnd = rnd;
        self
    }

    /// Builds the retry engine.
    #[must_use]
    pub fn build(self) -> Retry<T> {
        Retry {
            shared: Arc::new(RetryShared {
                clock: self.clock,
                pipeline_name: self.pipeline_name,
                max_retries: self.max_retries,
                backoff: self.backoff,
                rnd: self.rnd,
                should_renew: self.should_renew,
            }),
        }
    }
}
