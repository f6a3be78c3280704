// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Listings that refresh an expired credential before giving up.
//!
//! When a call fails with a non-success response, [`TokenRefresh`] asks for a refresh
//! call, issues it (retrying it as configured), lets a validator inspect the new
//! credential, and re-issues the original call exactly once. Every path that gives up
//! on the refresh reports the original failing response, not the refresh failure.
//!
//! Two counters bound the chain: `outer` counts transport failures of the original
//! call and `refresh` counts failed refresh calls. Both reset when their call succeeds,
//! and `refresh` also resets whenever the original call is issued anew.

use std::borrow::Cow;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use futures::future::BoxFuture;
use tick::Clock;

use crate::callbacks::define_fn_wrapper;
use crate::constants::{DEFAULT_REFRESH_BACKOFF_MAX, DEFAULT_REFRESH_BACKOFF_MIN};
use crate::listing::{Driver, Progress};
use crate::rnd::Rnd;
use crate::{Backoff, Call, Context, Listing, Outcome, Response, TransportError};

/// A pending refresh call, as produced by the factory passed to [`TokenRefresh::builder`].
pub type RefreshCall<R> = BoxFuture<'static, Result<Response<R>, TransportError>>;

define_fn_wrapper!(ShouldRetry<T>(Fn(counter: u32, response: Option<&Response<T>>, error: Option<&TransportError>) -> bool));
define_fn_wrapper!(CreateRefresh<T, R>(Fn(counter: u32, response: &Response<T>) -> Option<RefreshCall<R>>));
define_fn_wrapper!(Validate<R>(Fn(payload: Option<&R>) -> bool));

/// A snapshot of the retry counters of a [`RefreshListing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshCounters {
    /// Transport failures of the original call since its last success.
    pub outer: u32,
    /// Failed refresh calls since the last successful refresh or new original call.
    pub refresh: u32,
}

#[derive(Debug, Default)]
struct Counters {
    outer: AtomicU32,
    refresh: AtomicU32,
}

impl Counters {
    fn snapshot(&self) -> RefreshCounters {
        RefreshCounters {
            outer: self.outer.load(Ordering::Acquire),
            refresh: self.refresh.load(Ordering::Acquire),
        }
    }

    fn reset(&self) {
        self.outer.store(0, Ordering::Release);
        self.refresh.store(0, Ordering::Release);
    }
}

#[derive(Debug)]
enum Step<T> {
    Main,
    RefreshToken(Response<T>),
    RetryOriginal,
}

impl<T> Step<T> {
    fn name(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::RefreshToken(_) => "refresh_token",
            Self::RetryOriginal => "retry_original",
        }
    }
}

/// Creates listings whose calls refresh a credential on failure.
///
/// Cloning is cheap: clones share their configuration.
///
/// # Examples
///
/// ```
/// use errand::{Context, RefreshCall, Response, TokenRefresh, call_fn};
/// use http::{Method, StatusCode, Uri};
/// use tick::Clock;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let context = Context::new(tokio::runtime::Handle::current(), Clock::new_tokio());
/// let refresh = TokenRefresh::builder(&context, |_, _: &Response<String>| -> Option<RefreshCall<String>> {
///     Some(Box::pin(async { Ok(Response::ok("new-token".to_string())) }))
/// })
/// .validate(|token| token.is_some_and(|token| !token.is_empty()))
/// .build();
///
/// let call = call_fn(Method::GET, Uri::from_static("https://example.com/me"), || async {
///     Ok(Response::ok("me".to_string()))
/// });
///
/// let listing = refresh.listing(call);
/// listing.listing().state().wait_for(|state| state.is_finished()).await.unwrap();
/// assert!(listing.listing().current_result().unwrap().is_success());
/// # }
/// ```
pub struct TokenRefresh<T, R> {
    shared: Arc<RefreshShared<T, R>>,
}

struct RefreshShared<T, R> {
    context: Context,
    pipeline_name: Cow<'static, str>,
    clock: Clock,
    backoff: Backoff,
    rnd: Rnd,
    launch_now: bool,
    should_retry: Option<ShouldRetry<T>>,
    create_refresh: CreateRefresh<T, R>,
    should_retry_refresh: Option<ShouldRetry<R>>,
    validate: Option<Validate<R>>,
}

impl<T, R> Clone for TokenRefresh<T, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, R> Debug for TokenRefresh<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRefresh")
            .field("pipeline_name", &self.shared.pipeline_name)
            .field("backoff", &self.shared.backoff)
            .field("launch_now", &self.shared.launch_now)
            .finish_non_exhaustive()
    }
}

impl<T, R> TokenRefresh<T, R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Starts configuring a refresh chain.
    ///
    /// `create_refresh` receives the refresh counter and the failing response of the
    /// original call. Returning `None` gives up and reports that response.
    pub fn builder(
        context: &Context,
        create_refresh: impl Fn(u32, &Response<T>) -> Option<RefreshCall<R>> + Send + Sync + 'static,
    ) -> TokenRefreshBuilder<T, R> {
        TokenRefreshBuilder {
            context: context.clone(),
            backoff: Backoff::Jittered {
                min: DEFAULT_REFRESH_BACKOFF_MIN,
                max: DEFAULT_REFRESH_BACKOFF_MAX,
            },
            rnd: Rnd::default(),
            launch_now: true,
            should_retry: None,
            create_refresh: CreateRefresh::new(create_refresh),
            should_retry_refresh: None,
            validate: None,
        }
    }

    /// Creates a listing that issues `call` through this refresh chain.
    pub fn listing<C>(&self, call: C) -> RefreshListing<T>
    where
        C: Call<T> + 'static,
    {
        let counters = Arc::new(Counters::default());
        let call = Arc::new(call);
        let shared = Arc::clone(&self.shared);
        let driver_counters = Arc::clone(&counters);

        let driver: Driver<T> = Arc::new(move |progress: Progress<T>| -> BoxFuture<'static, Outcome<T>> {
            let shared = Arc::clone(&shared);
            let call = Arc::clone(&call);
            let counters = Arc::clone(&driver_counters);
            Box::pin(async move { shared.run(&*call, &counters, &progress).await })
        });

        RefreshListing {
            listing: Listing::from_driver(&self.shared.context, driver, self.shared.launch_now),
            counters,
        }
    }
}

impl<T, R> RefreshShared<T, R> {
    async fn run<C: Call<T>>(&self, call: &C, counters: &Counters, progress: &Progress<T>) -> Outcome<T> {
        let mut step = Step::Main;

        loop {
            self.emit(&step, counters);

            step = match step {
                Step::Main => {
                    counters.refresh.store(0, Ordering::Release);

                    match call.invoke().await {
                        Ok(response) if response.is_success() => {
                            counters.reset();
                            return Outcome::Success(response.into_body());
                        }
                        Ok(response) => Step::RefreshToken(response),
                        Err(error) => {
                            let counter = counters.outer.fetch_add(1, Ordering::AcqRel);
                            if !self.should_retry(counter, &error) {
                                return Outcome::from_transport_error(error);
                            }

                            drop(error);
                            self.pause(counter, progress).await;
                            Step::Main
                        }
                    }
                }
                Step::RefreshToken(original) => {
                    let counter = counters.refresh.load(Ordering::Acquire);
                    let Some(refresh) = self.create_refresh.call(counter, &original) else {
                        return Outcome::no_success(&original);
                    };

                    match refresh.await {
                        Ok(response) if response.is_success() => {
                            counters.refresh.store(0, Ordering::Release);
                            if !self.validate(response.body()) {
                                return Outcome::no_success(&original);
                            }
                            Step::RetryOriginal
                        }
                        Err(error) if error.is_cancelled() => return Outcome::Cancelled,
                        failure => {
                            let counter = counters.refresh.fetch_add(1, Ordering::AcqRel);
                            if !self.should_retry_refresh(counter, &failure) {
                                return Outcome::no_success(&original);
                            }

                            drop(failure);
                            self.pause(counter, progress).await;
                            Step::RefreshToken(original)
                        }
                    }
                }
                Step::RetryOriginal => {
                    return match call.invoke().await {
                        Ok(response) if response.is_success() => {
                            counters.reset();
                            Outcome::Success(response.into_body())
                        }
                        Ok(response) => Outcome::no_success(&response),
                        Err(error) => Outcome::from_transport_error(error),
                    };
                }
            };
        }
    }

    fn should_retry(&self, counter: u32, error: &TransportError) -> bool {
        !error.is_cancelled()
            && self
                .should_retry
                .as_ref()
                .is_some_and(|should_retry| should_retry.call(counter, None, Some(error)))
    }

    fn should_retry_refresh(&self, counter: u32, failure: &Result<Response<R>, TransportError>) -> bool {
        let Some(should_retry) = &self.should_retry_refresh else {
            return false;
        };

        match failure {
            Ok(response) => should_retry.call(counter, Some(response), None),
            Err(error) => should_retry.call(counter, None, Some(error)),
        }
    }

    fn validate(&self, payload: Option<&R>) -> bool {
        self.validate.as_ref().is_none_or(|validate| validate.call(payload))
    }

    async fn pause(&self, counter: u32, progress: &Progress<T>) {
        let delay = self.backoff.delay(counter, self.rnd);

        tracing::event!(
            name: "errand.token",
            tracing::Level::WARN,
            pipeline.name = %self.pipeline_name,
            token.counter = counter,
            token.delay = delay.as_secs_f32(),
        );

        progress.retrying();
        self.clock.delay(delay).await;
    }

    fn emit(&self, step: &Step<T>, counters: &Counters) {
        let counters = counters.snapshot();

        tracing::event!(
            name: "errand.token",
            tracing::Level::DEBUG,
            pipeline.name = %self.pipeline_name,
            token.step = step.name(),
            token.counter.outer = counters.outer,
            token.counter.refresh = counters.refresh,
        );
    }
}

/// Configures a [`TokenRefresh`].
///
/// Created by [`TokenRefresh::builder`].
pub struct TokenRefreshBuilder<T, R> {
    context: Context,
    backoff: Backoff,
    rnd: Rnd,
    launch_now: bool,
    should_retry: Option<ShouldRetry<T>>,
    create_refresh: CreateRefresh<T, R>,
    should_retry_refresh: Option<ShouldRetry<R>>,
    validate: Option<Validate<R>>,
}

impl<T, R> Debug for TokenRefreshBuilder<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRefreshBuilder")
            .field("backoff", &self.backoff)
            .field("launch_now", &self.launch_now)
            .finish_non_exhaustive()
    }
}

impl<T, R> TokenRefreshBuilder<T, R> {
    /// Decides whether a transport failure of the original call is retried.
    ///
    /// Receives the `outer` counter. By default transport failures are not retried.
    #[must_use]
    pub fn should_retry(
        mut self,
        should_retry: impl Fn(u32, Option<&Response<T>>, Option<&TransportError>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(ShouldRetry::new(should_retry));
        self
    }

    /// Decides whether a failed refresh call is retried.
    ///
    /// Receives the `refresh` counter and either the failing response or the transport
    /// error. By default failed refresh calls are not retried.
    #[must_use]
    pub fn should_retry_refresh(
        mut self,
        should_retry: impl Fn(u32, Option<&Response<R>>, Option<&TransportError>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry_refresh = Some(ShouldRetry::new(should_retry));
        self
    }

    /// Inspects the payload of a successful refresh call, typically storing the new
    /// credential. Returning `false` reports the original failing response.
    ///
    /// By default every successful refresh is accepted.
    #[must_use]
    pub fn validate(mut self, validate: impl Fn(Option<&R>) -> bool + Send + Sync + 'static) -> Self {
        self.validate = Some(Validate::new(validate));
        self
    }

    /// Sets the delay strategy between retries. Defaults to a random delay in `[50 ms, 200 ms]`.
    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether listings start their first attempt when created. Defaults to `true`.
    #[must_use]
    pub fn launch_now(mut self, launch_now: bool) -> Self {
        self.launch_now = launch_now;
        self
    }

    #[cfg(test)]
    pub(crate) fn rnd(mut self, rnd: Rnd) -> Self {
        self.rnd = rnd;
        self
    }

    /// Builds the refresh chain.
    #[must_use]
    pub fn build(self) -> TokenRefresh<T, R> {
        TokenRefresh {
            shared: Arc::new(RefreshShared {
                pipeline_name: Cow::Owned(self.context.pipeline_name().to_owned()),
                clock: self.context.clock().clone(),
                context: self.context,
                backoff: self.backoff,
                rnd: self.rnd,
                launch_now: self.launch_now,
                should_retry: self.should_retry,
                create_refresh: self.create_refresh,
                should_retry_refresh: self.should_retry_refresh,
                validate: self.validate,
            }),
        }
    }
}

/// A [`Listing`] driven by a [`TokenRefresh`] chain.
pub struct RefreshListing<T> {
    listing: Listing<T>,
    counters: Arc<Counters>,
}

impl<T> RefreshListing<T> {
    /// Returns the underlying listing.
    #[must_use]
    pub fn listing(&self) -> &Listing<T> {
        &self.listing
    }

    /// Returns the current retry counters.
    #[must_use]
    pub fn counters(&self) -> RefreshCounters {
        self.counters.snapshot()
    }
}

impl<T> Debug for RefreshListing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshListing")
            .field("listing", &self.listing)
            .field("counters", &self.counters.snapshot())
            .finish()
    }
}
