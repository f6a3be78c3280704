// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Incremental loading of keyed pages.
//!
//! A [`PagedListing`] fetches pages through the retry engine and reports them as
//! [`PageEvent`] values on its [`Pages`] stream. The first page and all later pages
//! have separate state and retry slots, so a failed initial load can be retried
//! independently of a failed "load more".

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context as TaskContext, Poll};

use futures::Stream;
use futures::future::{AbortHandle, Abortable, BoxFuture};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::{Context, ListingState, Outcome, Response, Retry, TransportError};

/// Derives page keys.
///
/// The first page is loaded when a [`PagedListing`] is built. The keys of its
/// neighbours are attached to every [`PageEvent`], and `None` means there is no
/// further page in that direction.
pub trait PageProvider: Send + Sync + 'static {
    /// Identifies a page.
    type Key: Clone + Debug + Send + Sync + 'static;

    /// Returns the key of the first page.
    fn first_page(&self) -> Self::Key;

    /// Returns the key of the page after `current`.
    fn next_page(&self, current: &Self::Key) -> Option<Self::Key>;

    /// Returns the key of the page before `current`.
    fn previous_page(&self, current: &Self::Key) -> Option<Self::Key>;
}

/// Numbered pages starting at `0`, loaded forward only.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPageProvider;

impl PageProvider for DefaultPageProvider {
    type Key = u32;

    fn first_page(&self) -> u32 {
        0
    }

    fn next_page(&self, current: &u32) -> Option<u32> {
        current.checked_add(1)
    }

    fn previous_page(&self, _current: &u32) -> Option<u32> {
        None
    }
}

/// A loaded page, or the end of the current page sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent<K, T> {
    /// The first page, with the keys of both neighbours.
    Initial {
        /// The page that was loaded.
        key: K,
        /// The items of the page. Empty when the response carried no payload.
        items: Vec<T>,
        /// The page before this one.
        previous: Option<K>,
        /// The page after this one.
        next: Option<K>,
    },
    /// A page loaded by [`PagedListing::load_after`].
    After {
        /// The page that was loaded.
        key: K,
        /// The items of the page.
        items: Vec<T>,
        /// The page after this one.
        next: Option<K>,
    },
    /// A page loaded by [`PagedListing::load_before`].
    Before {
        /// The page that was loaded.
        key: K,
        /// The items of the page.
        items: Vec<T>,
        /// The page before this one.
        previous: Option<K>,
    },
    /// All previously delivered pages are stale. A new `Initial` page follows.
    Invalidated,
}

/// The events of a [`PagedListing`].
///
/// The stream ends once the listing is cancelled or dropped.
#[derive(Debug)]
pub struct Pages<K, T> {
    receiver: mpsc::UnboundedReceiver<PageEvent<K, T>>,
}

impl<K, T> Stream for Pages<K, T> {
    type Item = PageEvent<K, T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

/// Re-issues exactly the page load that failed.
///
/// Handles become inert once their listing is refreshed, cancelled, or dropped.
#[derive(Clone)]
pub struct RetryHandle {
    reissue: Arc<dyn Fn() + Send + Sync>,
}

impl RetryHandle {
    /// Starts the failed load again.
    ///
    /// A handle and its clones start at most one load. A failure of that load
    /// publishes a new handle.
    pub fn retry(&self) {
        (self.reissue)();
    }
}

impl Debug for RetryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryHandle").finish_non_exhaustive()
    }
}

type PageFetch<K, T> = Arc<dyn Fn(K) -> BoxFuture<'static, Result<Response<Vec<T>>, TransportError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Initial,
    After,
    Before,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::After => "after",
            Self::Before => "before",
        }
    }
}

#[derive(Debug, Clone)]
struct Load<K> {
    direction: Direction,
    key: K,
}

/// A sequence of pages fetched on demand.
///
/// # Examples
///
/// ```
/// use errand::{Context, DefaultPageProvider, ListingState, PageEvent, PagedListing, Response};
/// use futures::StreamExt;
/// use tick::Clock;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let context = Context::new(tokio::runtime::Handle::current(), Clock::new_tokio());
/// let (listing, mut pages) = PagedListing::builder(&context, DefaultPageProvider)
///     .build(|page| async move { Ok(Response::ok(vec![page * 10, page * 10 + 1])) });
///
/// let Some(PageEvent::Initial { items, next, .. }) = pages.next().await else {
///     panic!("expected the first page");
/// };
/// assert_eq!(items, vec![0, 1]);
///
/// listing.load_after(next.unwrap());
/// let Some(PageEvent::After { key, items, .. }) = pages.next().await else {
///     panic!("expected the second page");
/// };
/// assert_eq!((key, items), (1, vec![10, 11]));
/// # }
/// ```
pub struct PagedListing<P: PageProvider, T> {
    inner: Arc<PagingInner<P, T>>,
}

struct PagingInner<P: PageProvider, T> {
    pipeline_name: Cow<'static, str>,
    handle: Handle,
    provider: P,
    retry: Retry<Vec<T>>,
    fetch: PageFetch<P::Key, T>,
    initial_state: watch::Sender<ListingState>,
    load_state: watch::Sender<ListingState>,
    initial_retry: watch::Sender<Option<RetryHandle>>,
    load_retry: watch::Sender<Option<RetryHandle>>,
    slot: Mutex<PagingSlot<P::Key, T>>,
}

struct PagingSlot<K, T> {
    generation: u64,
    next_id: u64,
    in_flight: HashMap<u64, AbortHandle>,
    // `None` once cancelled.
    events: Option<mpsc::UnboundedSender<PageEvent<K, T>>>,
}

impl<P, T> PagedListing<P, T>
where
    P: PageProvider,
    T: Send + Sync + 'static,
{
    /// Starts configuring a paged listing over the keys of `provider`.
    pub fn builder(context: &Context, provider: P) -> PagedListingBuilder<P, T> {
        PagedListingBuilder {
            context: context.clone(),
            provider,
            retry: None,
            _items: PhantomData,
        }
    }

    /// Loads the page with `key`, typically the `next` key of a delivered page.
    pub fn load_after(&self, key: P::Key) {
        self.inner.start(
            Load {
                direction: Direction::After,
                key,
            },
            None,
        );
    }

    /// Loads the page with `key`, typically the `previous` key of a delivered page.
    pub fn load_before(&self, key: P::Key) {
        self.inner.start(
            Load {
                direction: Direction::Before,
                key,
            },
            None,
        );
    }

    /// Re-issues the failed first-page load, if there is one.
    pub fn retry_initial(&self) {
        let handle = self.inner.initial_retry.borrow().clone();
        if let Some(handle) = handle {
            handle.retry();
        }
    }

    /// Re-issues the most recent failed subsequent load, if there is one.
    pub fn retry_load(&self) {
        let handle = self.inner.load_retry.borrow().clone();
        if let Some(handle) = handle {
            handle.retry();
        }
    }

    /// Abandons all outstanding loads, emits [`PageEvent::Invalidated`], and loads the
    /// first page again.
    pub fn refresh(&self) {
        let inner = &self.inner;

        {
            let mut slot = inner.slot.lock();
            if slot.events.is_none() {
                return;
            }

            for (_, in_flight) in slot.in_flight.drain() {
                in_flight.abort();
            }
            slot.generation = slot.generation.wrapping_add(1);

            inner.initial_retry.send_replace(None);
            inner.load_retry.send_replace(None);
            if let Some(events) = &slot.events {
                let _ = events.send(PageEvent::Invalidated);
            }
        }

        tracing::event!(
            name: "errand.paging",
            tracing::Level::DEBUG,
            pipeline.name = %inner.pipeline_name,
            paging.event = "invalidated",
        );

        inner.start(
            Load {
                direction: Direction::Initial,
                key: inner.provider.first_page(),
            },
            None,
        );
    }

    /// Abandons all outstanding loads and ends the [`Pages`] stream.
    ///
    /// Nothing is published after this call.
    pub fn cancel(&self) {
        self.inner.cancel();
    }

    /// Observes the state of the first-page load.
    #[must_use]
    pub fn initial_state(&self) -> watch::Receiver<ListingState> {
        self.inner.initial_state.subscribe()
    }

    /// Observes the state of the most recent load, including first-page loads.
    #[must_use]
    pub fn load_state(&self) -> watch::Receiver<ListingState> {
        self.inner.load_state.subscribe()
    }

    /// Observes the retry handle of a failed first-page load.
    #[must_use]
    pub fn initial_retry(&self) -> watch::Receiver<Option<RetryHandle>> {
        self.inner.initial_retry.subscribe()
    }

    /// Observes the retry handle of a failed subsequent load.
    #[must_use]
    pub fn load_retry(&self) -> watch::Receiver<Option<RetryHandle>> {
        self.inner.load_retry.subscribe()
    }

    /// Returns the state of the first-page load.
    #[must_use]
    pub fn current_initial_state(&self) -> ListingState {
        *self.inner.initial_state.borrow()
    }

    /// Returns the state of the most recent load.
    #[must_use]
    pub fn current_load_state(&self) -> ListingState {
        *self.inner.load_state.borrow()
    }
}

impl<P: PageProvider, T> Drop for PagedListing<P, T> {
    fn drop(&mut self) {
        self.inner.cancel();
    }
}

impl<P: PageProvider, T> Debug for PagedListing<P, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedListing")
            .field("pipeline_name", &self.inner.pipeline_name)
            .field("initial_state", &*self.inner.initial_state.borrow())
            .field("load_state", &*self.inner.load_state.borrow())
            .finish_non_exhaustive()
    }
}

impl<P: PageProvider, T> PagingInner<P, T> {
    fn cancel(&self) {
        let mut slot = self.slot.lock();
        slot.generation = slot.generation.wrapping_add(1);
        slot.events = None;

        for (_, in_flight) in slot.in_flight.drain() {
            in_flight.abort();
        }
    }

    fn publish_state(&self, direction: Direction, state: ListingState) {
        if direction == Direction::Initial {
            self.initial_state.send_replace(state);
        }
        self.load_state.send_replace(state);
    }

    fn retry_slot(&self, direction: Direction) -> &watch::Sender<Option<RetryHandle>> {
        if direction == Direction::Initial {
            &self.initial_retry
        } else {
            &self.load_retry
        }
    }

    fn event(&self, load: Load<P::Key>, items: Vec<T>) -> PageEvent<P::Key, T> {
        let Load { direction, key } = load;

        match direction {
            Direction::Initial => PageEvent::Initial {
                previous: self.provider.previous_page(&key),
                next: self.provider.next_page(&key),
                key,
                items,
            },
            Direction::After => PageEvent::After {
                next: self.provider.next_page(&key),
                key,
                items,
            },
            Direction::Before => PageEvent::Before {
                previous: self.provider.previous_page(&key),
                key,
                items,
            },
        }
    }
}

impl<P, T> PagingInner<P, T>
where
    P: PageProvider,
    T: Send + Sync + 'static,
{
    /// Starts `load` unless the listing is cancelled or `expected_generation` is stale.
    fn start(self: &Arc<Self>, load: Load<P::Key>, expected_generation: Option<u64>) {
        let mut slot = self.slot.lock();
        if slot.events.is_none() || expected_generation.is_some_and(|expected| expected != slot.generation) {
            return;
        }

        let generation = slot.generation;
        let id = slot.next_id;
        slot.next_id = slot.next_id.wrapping_add(1);

        let (abort, registration) = AbortHandle::new_pair();
        slot.in_flight.insert(id, abort);
        self.publish_state(load.direction, ListingState::Running);

        tracing::event!(
            name: "errand.paging",
            tracing::Level::DEBUG,
            pipeline.name = %self.pipeline_name,
            paging.event = "load_started",
            paging.direction = load.direction.as_str(),
            paging.key = ?load.key,
        );

        let retry = self.retry.clone();
        let fetch = Arc::clone(&self.fetch);
        let key = load.key.clone();
        let weak = Arc::downgrade(self);

        self.handle.spawn(async move {
            let attempt = async move { retry.execute_with(|| fetch(key.clone())).await };

            if let Ok(outcome) = Abortable::new(attempt, registration).await
                && let Some(inner) = weak.upgrade()
            {
                inner.complete(generation, id, load, outcome);
            }
        });
    }

    fn complete(self: &Arc<Self>, generation: u64, id: u64, load: Load<P::Key>, outcome: Outcome<Vec<T>>) {
        let mut slot = self.slot.lock();
        if slot.generation != generation || slot.in_flight.remove(&id).is_none() {
            return;
        }
        let Some(events) = &slot.events else {
            return;
        };

        let direction = load.direction;

        tracing::event!(
            name: "errand.paging",
            tracing::Level::DEBUG,
            pipeline.name = %self.pipeline_name,
            paging.event = "load_completed",
            paging.direction = direction.as_str(),
            paging.key = ?load.key,
            paging.outcome = outcome.label(),
        );

        if let Outcome::Success(items) = outcome {
            let _ = events.send(self.event(load, items.unwrap_or_default()));
            self.retry_slot(direction).send_replace(None);
            self.publish_state(direction, ListingState::Finished);
        } else {
            let handle = self.retry_handle(generation, load);
            self.retry_slot(direction).send_replace(Some(handle));
            self.publish_state(direction, ListingState::Idle);
        }
    }

    fn retry_handle(self: &Arc<Self>, generation: u64, load: Load<P::Key>) -> RetryHandle {
        let weak: Weak<Self> = Arc::downgrade(self);
        let used = AtomicBool::new(false);

        RetryHandle {
            reissue: Arc::new(move || {
                if used.swap(true, Ordering::AcqRel) {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    inner.start(load.clone(), Some(generation));
                }
            }),
        }
    }
}

/// Configures a [`PagedListing`].
///
/// Created by [`PagedListing::builder`].
#[derive(Debug)]
pub struct PagedListingBuilder<P, T> {
    context: Context,
    provider: P,
    retry: Option<Retry<Vec<T>>>,
    _items: PhantomData<fn() -> T>,
}

impl<P, T> PagedListingBuilder<P, T>
where
    P: PageProvider,
    T: Send + Sync + 'static,
{
    /// Sets the retry engine every page fetch runs through.
    #[must_use]
    pub fn retry(mut self, retry: Retry<Vec<T>>) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Builds the listing and starts loading the first page.
    pub fn build<F, Fut>(self, fetch: F) -> (PagedListing<P, T>, Pages<P::Key, T>)
    where
        F: Fn(P::Key) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response<Vec<T>>, TransportError>> + Send + 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let fetch: PageFetch<P::Key, T> =
            Arc::new(move |key| -> BoxFuture<'static, Result<Response<Vec<T>>, TransportError>> { Box::pin(fetch(key)) });

        let inner = Arc::new(PagingInner {
            pipeline_name: Cow::Owned(self.context.pipeline_name().to_owned()),
            handle: self.context.handle().clone(),
            retry: self.retry.unwrap_or_else(|| Retry::new(&self.context)),
            fetch,
            initial_state: watch::Sender::new(ListingState::Idle),
            load_state: watch::Sender::new(ListingState::Idle),
            initial_retry: watch::Sender::new(None),
            load_retry: watch::Sender::new(None),
            slot: Mutex::new(PagingSlot {
                generation: 0,
                next_id: 0,
                in_flight: HashMap::new(),
                events: Some(sender),
            }),
            provider: self.provider,
        });

        inner.start(
            Load {
                direction: Direction::Initial,
                key: inner.provider.first_page(),
            },
            None,
        );

        (PagedListing { inner }, Pages { receiver })
    }
}
