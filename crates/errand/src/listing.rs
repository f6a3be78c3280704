// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Re-triggerable, cancellable requests with observable result and state.

use std::borrow::Cow;
use std::fmt::{self, Debug};
use std::sync::{Arc, Weak};

use futures::future::{AbortHandle, Abortable, BoxFuture};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::{Call, Context, Outcome, Retry};

/// Lifecycle of a [`Listing`].
///
/// Every attempt moves through `Running`, optionally `Retrying` (once per renewal), and
/// ends in `Finished`. `Cancelled` is published when an in-flight attempt is abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ListingState {
    /// No attempt has been started yet.
    #[default]
    Idle,
    /// The in-flight attempt was abandoned.
    Cancelled,
    /// An attempt is in flight.
    Running,
    /// An attempt is waiting to be retried.
    Retrying,
    /// The latest attempt published its result.
    Finished,
}

impl ListingState {
    /// Returns `true` for `Running` and `Retrying`.
    #[must_use]
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running | Self::Retrying)
    }

    /// Returns `true` for `Finished`.
    #[must_use]
    pub fn is_finished(self) -> bool {
        self == Self::Finished
    }
}

/// Produces the future of one attempt.
pub(crate) type Driver<T> = Arc<dyn Fn(Progress<T>) -> BoxFuture<'static, Outcome<T>> + Send + Sync>;

/// Receives progress notifications for one generation of attempts.
pub(crate) trait StateGate<T>: Send + Sync {
    fn publish_retrying(&self, generation: u64);

    fn publish_early(&self, generation: u64, outcome: Outcome<T>);
}

/// Handed to every attempt so that it can report renewals and early results.
///
/// Reports from superseded attempts are ignored.
pub(crate) struct Progress<T> {
    gate: Weak<dyn StateGate<T>>,
    generation: u64,
}

impl<T> Progress<T> {
    pub(crate) fn retrying(&self) {
        if let Some(gate) = self.gate.upgrade() {
            gate.publish_retrying(self.generation);
        }
    }

    /// Publishes `outcome` as the result while the attempt keeps running.
    pub(crate) fn publish(&self, outcome: Outcome<T>) {
        if let Some(gate) = self.gate.upgrade() {
            gate.publish_early(self.generation, outcome);
        }
    }
}

impl<T> Clone for Progress<T> {
    fn clone(&self) -> Self {
        Self {
            gate: Weak::clone(&self.gate),
            generation: self.generation,
        }
    }
}

impl<T> Debug for Progress<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress").field("generation", &self.generation).finish_non_exhaustive()
    }
}

/// A single logical request that can be re-triggered and cancelled.
///
/// The listing owns at most one in-flight attempt. [`update`][Self::update] abandons
/// the current attempt before starting the next one, so an abandoned attempt can never
/// overwrite the result of its successor. Results and states are published through
/// [`watch`] channels, which keep the latest value for any number of observers.
///
/// Dropping the listing cancels it.
///
/// # Examples
///
/// ```
/// use errand::{Context, Listing, ListingState, Response, Retry, call_fn};
/// use http::{Method, Uri};
/// use tick::Clock;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let context = Context::new(tokio::runtime::Handle::current(), Clock::new_tokio());
/// let call = call_fn(Method::GET, Uri::from_static("https://example.com/inbox"), || async {
///     Ok(Response::ok(3_u32))
/// });
///
/// let listing = Listing::new(&context, Retry::new(&context), call);
/// assert_eq!(listing.current_state(), ListingState::Running);
///
/// listing.state().wait_for(|state| state.is_finished()).await.unwrap();
/// assert_eq!(listing.current_result().and_then(|outcome| outcome.into_data()), Some(3));
/// # }
/// ```
pub struct Listing<T> {
    inner: Arc<ListingInner<T>>,
}

struct ListingInner<T> {
    pipeline_name: Cow<'static, str>,
    handle: Handle,
    driver: Driver<T>,
    result: watch::Sender<Option<Outcome<T>>>,
    state: watch::Sender<ListingState>,
    slot: Mutex<Slot>,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    in_flight: Option<AbortHandle>,
}

impl<T> Listing<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a listing for `call` and starts the first attempt.
    pub fn new<C>(context: &Context, retry: Retry<T>, call: C) -> Self
    where
        C: Call<T> + 'static,
    {
        Self::builder(context, retry, call).build()
    }

    /// Starts configuring a listing for `call`.
    pub fn builder<C>(context: &Context, retry: Retry<T>, call: C) -> ListingBuilder<T, C>
    where
        C: Call<T> + 'static,
    {
        ListingBuilder {
            context: context.clone(),
            retry,
            call,
            launch_now: true,
        }
    }

    pub(crate) fn from_driver(context: &Context, driver: Driver<T>, launch_now: bool) -> Self {
        let listing = Self {
            inner: Arc::new(ListingInner {
                pipeline_name: Cow::Owned(context.pipeline_name().to_owned()),
                handle: context.handle().clone(),
                driver,
                result: watch::Sender::new(None),
                state: watch::Sender::new(ListingState::Idle),
                slot: Mutex::new(Slot::default()),
            }),
        };

        if launch_now {
            listing.update();
        }

        listing
    }

    /// Abandons the in-flight attempt, if any, and starts a new one.
    ///
    /// `Cancelled` (when an attempt was abandoned) and `Running` are published before
    /// this method returns.
    pub fn update(&self) {
        let inner = &self.inner;
        let mut slot = inner.slot.lock();

        if let Some(in_flight) = slot.in_flight.take() {
            in_flight.abort();
            inner.state.send_replace(ListingState::Cancelled);
        }

        slot.generation = slot.generation.wrapping_add(1);
        let generation = slot.generation;
        let (abort, registration) = AbortHandle::new_pair();
        slot.in_flight = Some(abort);
        inner.state.send_replace(ListingState::Running);

        let gate: Weak<dyn StateGate<T>> = Arc::downgrade(&(Arc::clone(inner) as Arc<dyn StateGate<T>>));
        let attempt = (inner.driver)(Progress { gate, generation });
        let weak = Arc::downgrade(inner);

        inner.handle.spawn(async move {
            if let Ok(outcome) = Abortable::new(attempt, registration).await
                && let Some(inner) = weak.upgrade()
            {
                inner.finish(generation, outcome);
            }
        });
    }

    /// Abandons the in-flight attempt, if any, without starting a new one.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Observes the result of the latest finished attempt.
    #[must_use]
    pub fn result(&self) -> watch::Receiver<Option<Outcome<T>>> {
        self.inner.result.subscribe()
    }

    /// Observes the lifecycle state.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ListingState> {
        self.inner.state.subscribe()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn current_state(&self) -> ListingState {
        *self.inner.state.borrow()
    }
}

impl<T: Clone> Listing<T> {
    /// Returns the result of the latest finished attempt.
    #[must_use]
    pub fn current_result(&self) -> Option<Outcome<T>> {
        self.inner.result.borrow().clone()
    }
}

impl<T> Drop for Listing<T> {
    fn drop(&mut self) {
        self.inner.cancel();
    }
}

impl<T> Debug for Listing<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listing")
            .field("pipeline_name", &self.inner.pipeline_name)
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl<T> ListingInner<T> {
    fn cancel(&self) {
        let mut slot = self.slot.lock();
        slot.generation = slot.generation.wrapping_add(1);

        if let Some(in_flight) = slot.in_flight.take() {
            in_flight.abort();
            self.state.send_replace(ListingState::Cancelled);
        }
    }

    fn finish(&self, generation: u64, outcome: Outcome<T>) {
        let mut slot = self.slot.lock();
        if slot.generation != generation {
            return;
        }
        slot.in_flight = None;

        tracing::event!(
            name: "errand.listing",
            tracing::Level::DEBUG,
            pipeline.name = %self.pipeline_name,
            listing.generation = generation,
            listing.outcome = outcome.label(),
        );

        self.result.send_replace(Some(outcome));
        self.state.send_replace(ListingState::Finished);
    }
}

impl<T: Send + Sync> StateGate<T> for ListingInner<T> {
    fn publish_retrying(&self, generation: u64) {
        let slot = self.slot.lock();
        if slot.generation == generation && slot.in_flight.is_some() {
            self.state.send_replace(ListingState::Retrying);
        }
    }

    fn publish_early(&self, generation: u64, outcome: Outcome<T>) {
        let slot = self.slot.lock();
        if slot.generation == generation && slot.in_flight.is_some() {
            self.result.send_replace(Some(outcome));
        }
    }
}

/// Configures a [`Listing`].
///
/// Created by [`Listing::builder`].
#[derive(Debug)]
pub struct ListingBuilder<T, C> {
    context: Context,
    retry: Retry<T>,
    call: C,
    launch_now: bool,
}

impl<T, C> ListingBuilder<T, C>
where
    T: Send + Sync + 'static,
    C: Call<T> + 'static,
{
    /// Whether the first attempt starts when the listing is built. Defaults to `true`.
    #[must_use]
    pub fn launch_now(mut self, launch_now: bool) -> Self {
        self.launch_now = launch_now;
        self
    }

    /// Builds the listing.
    pub fn build(self) -> Listing<T> {
        let call = Arc::new(self.call);
        let retry = self.retry;

        let driver: Driver<T> = Arc::new(move |progress: Progress<T>| -> BoxFuture<'static, Outcome<T>> {
            let call = Arc::clone(&call);
            let retry = retry.clone();
            Box::pin(async move { retry.run(|| call.invoke(), |_| progress.retrying()).await })
        });

        Listing::from_driver(&self.context, driver, self.launch_now)
    }
}
