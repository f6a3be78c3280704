// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Staleness-aware caching of `GET` calls.
//!
//! Payloads are encoded by a [`Codec`] and kept in a [`TieredCache`]: a bounded
//! in-memory tier in front of a [`PersistentStore`]. For every fetch the
//! [`CacheEngine`] consults the cache, decides with a [`CachePolicy`] how fresh the
//! entry is, and yields a stream of one or two [`Delivery`] values.
//! [`CacheEngine::listing`] puts the same flow behind a [`Listing`][crate::Listing],
//! publishing the cached payload first and the refreshed one when it arrives.
//!
//! Cache failures never reach the caller: a missing, malformed, or undecodable entry
//! is treated as a miss and failed writes are logged and dropped.
//!
//! # Defaults
//!
//! | Parameter | Default Value | Configured By |
//! |-----------|---------------|---------------|
//! | Debounce window | 2 s | [`CachePolicy::debounce`] |
//! | Maximum age | 5 min | [`CachePolicy::max_age`] |
//! | Memory tier | 25 entries | [`CacheEngineBuilder::memory_entries`] |
//! | File store | 1 MiB | [`CacheConfig::disk_capacity`] |
//! | Codec | JSON | [`CacheEngineBuilder::codec`] |
//!
//! # Examples
//!
//! ```
//! use errand::{CacheConfig, CacheEngine, CachePolicy, Context, Origin, Response, Retry, call_fn};
//! use futures::StreamExt;
//! use http::{Method, Uri};
//! use tick::Clock;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let directory = tempfile::tempdir()?;
//! let context = Context::new(tokio::runtime::Handle::current(), Clock::new_tokio());
//! let engine = CacheEngine::open(&context, &CacheConfig::in_directory(directory.path())).await?;
//!
//! let retry = Retry::new(&context);
//! let call = call_fn(Method::GET, Uri::from_static("https://example.com/posts"), || async {
//!     Ok(Response::ok(vec!["first post".to_string()]))
//! });
//!
//! let first: Vec<_> = engine.fetch(&call, &retry, CachePolicy::default()).collect().await;
//! assert_eq!(first[0].origin(), Origin::Network);
//!
//! // Within the debounce window the cached payload is served without a network call.
//! let second: Vec<_> = engine.fetch(&call, &retry, CachePolicy::default()).collect().await;
//! assert_eq!(second.len(), 1);
//! assert_eq!(second[0].origin(), Origin::Cache);
//! # Ok(())
//! # }
//! ```

mod codec;
mod config;
mod engine;
mod entry;
mod listing;
mod policy;
mod store;
#[cfg(test)]
pub(crate) mod testing;
mod tiered;

pub use codec::{Codec, JsonCodec};
pub use config::CacheConfig;
pub use engine::{CacheEngine, CacheEngineBuilder, Delivery, Origin};
pub use entry::CacheEntry;
pub use listing::CachedListingBuilder;
pub use policy::{CacheAction, CachePolicy};
pub use store::{FileStore, PersistentStore};
pub use tiered::TieredCache;
