// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Client-side request orchestration.
//!
//! This crate sits between application code and an asynchronous call primitive and adds
//! the behavior most client calls need, without performing any I/O of its own:
//!
//! - [`retry`]: bounded retries with backoff, driven by a renewal predicate.
//! - [`cache`]: staleness-aware caching of `GET` calls in a memory tier and a file store.
//! - [`Listing`]: a re-triggerable, cancellable request with an observable result and state.
//! - [`paging`]: incremental page loading with separate retry of the first page and later pages.
//! - [`token`]: listings that refresh a credential and re-issue the call once.
//!
//! # Core Types
//!
//! - [`Call`]: the transport collaborator. Implement it for your HTTP client, or adapt a closure
//!   with [`call_fn`].
//! - [`Outcome`]: the single result channel of every orchestrated call.
//! - [`Context`]: the clock, runtime handle, and name shared by all components.
//!
//! # Quick Start
//!
//! ```
//! use errand::{Context, Listing, Response, Retry, call_fn};
//! use http::{Method, StatusCode, Uri};
//! use tick::Clock;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let context = Context::new(tokio::runtime::Handle::current(), Clock::new_tokio()).name("inbox");
//!
//! let retry = Retry::builder(&context)
//!     .max_retries(2)
//!     .should_renew(|response, _| response.status() == StatusCode::SERVICE_UNAVAILABLE)
//!     .build();
//!
//! let call = call_fn(Method::GET, Uri::from_static("https://example.com/inbox"), || async {
//!     Ok(Response::ok(vec!["hello".to_string()]))
//! });
//!
//! let listing = Listing::new(&context, retry, call);
//! listing.state().wait_for(|state| state.is_finished()).await.unwrap();
//!
//! let messages = listing.current_result().and_then(|outcome| outcome.into_data());
//! assert_eq!(messages, Some(vec!["hello".to_string()]));
//! # }
//! ```
//!
//! # Logging
//!
//! Components emit [`tracing`] events named `errand.retry`, `errand.cache`,
//! `errand.listing`, `errand.paging`, `errand.token`, and `errand.call`. Every event
//! carries the context name as `pipeline.name`.

mod callbacks;
mod constants;
mod context;
mod error;
mod hash;
mod listing;
mod millis;
mod outcome;
mod rnd;
mod transport;

pub mod cache;
pub mod paging;
pub mod retry;
pub mod token;

#[doc(inline)]
pub use cache::{
    CacheAction, CacheConfig, CacheEngine, CacheEngineBuilder, CacheEntry, CachePolicy, CachedListingBuilder, Codec, Delivery, FileStore, JsonCodec, Origin,
    PersistentStore, TieredCache,
};
pub use context::Context;
pub use error::{CodecError, StoreError, TransportError};
pub use hash::CacheKey;
pub use listing::{Listing, ListingBuilder, ListingState};
pub use outcome::Outcome;
#[doc(inline)]
pub use paging::{DefaultPageProvider, PageEvent, PageProvider, PagedListing, PagedListingBuilder, Pages, RetryHandle};
#[doc(inline)]
pub use retry::{Backoff, RenewArgs, Retry, RetryBuilder, RetryConfig};
#[doc(inline)]
pub use token::{RefreshCall, RefreshCounters, RefreshListing, TokenRefresh, TokenRefreshBuilder};
pub use transport::{Call, FnCall, Logged, Response, call_fn};
