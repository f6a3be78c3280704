// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::Arc;

use futures::future::BoxFuture;
use http::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::engine::EngineShared;
use super::{CacheAction, CacheEngine, CachePolicy, Codec, PersistentStore};
use crate::listing::{Driver, Progress};
use crate::{CacheKey, Call, Listing, Outcome, RenewArgs, Retry};

impl<S, C> CacheEngine<S, C>
where
    S: PersistentStore + 'static,
    C: Codec + 'static,
{
    /// Creates a [`Listing`] whose attempts go through this engine, and starts the first one.
    ///
    /// A cached payload is published as the listing's result while the attempt is still
    /// running. When `policy` asks for a refresh, the network outcome replaces it once
    /// the call completes. Within the debounce window the cached payload is the final
    /// result and no call is issued.
    pub fn listing<T, K>(&self, retry: Retry<T>, call: K, policy: CachePolicy) -> Listing<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        K: Call<T> + 'static,
    {
        self.listing_builder(retry, call).policy(policy).build()
    }

    /// Starts configuring a cached listing for `call`.
    pub fn listing_builder<T, K>(&self, retry: Retry<T>, call: K) -> CachedListingBuilder<S, C, T, K>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        K: Call<T> + 'static,
    {
        CachedListingBuilder {
            shared: Arc::clone(&self.shared),
            retry,
            call,
            policy: CachePolicy::default(),
            launch_now: true,
        }
    }
}

/// Configures a [`Listing`] served through a [`CacheEngine`].
///
/// Created by [`CacheEngine::listing_builder`].
#[derive(Debug)]
pub struct CachedListingBuilder<S, C, T, K> {
    shared: Arc<EngineShared<S, C>>,
    retry: Retry<T>,
    call: K,
    policy: CachePolicy,
    launch_now: bool,
}

impl<S, C, T, K> CachedListingBuilder<S, C, T, K>
where
    S: PersistentStore + 'static,
    C: Codec + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    K: Call<T> + 'static,
{
    /// Sets the staleness windows. Defaults to [`CachePolicy::default`].
    #[must_use]
    pub fn policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether the first attempt starts when the listing is built. Defaults to `true`.
    #[must_use]
    pub fn launch_now(mut self, launch_now: bool) -> Self {
        self.launch_now = launch_now;
        self
    }

    /// Builds the listing.
    pub fn build(self) -> Listing<T> {
        let context = self.shared.context.clone();
        let shared = self.shared;
        let call = Arc::new(self.call);
        let retry = self.retry;
        let policy = self.policy;

        let driver: Driver<T> = Arc::new(move |progress: Progress<T>| -> BoxFuture<'static, Outcome<T>> {
            let shared = Arc::clone(&shared);
            let call = Arc::clone(&call);
            let retry = retry.clone();
            Box::pin(async move { shared.drive(&*call, &retry, policy, &progress).await })
        });

        Listing::from_driver(&context, driver, self.launch_now)
    }
}

impl<S, C> EngineShared<S, C>
where
    S: PersistentStore,
    C: Codec,
{
    async fn drive<T, K>(&self, call: &K, retry: &Retry<T>, policy: CachePolicy, progress: &Progress<T>) -> Outcome<T>
    where
        T: Serialize + DeserializeOwned,
        K: Call<T>,
    {
        let on_renew = |_: RenewArgs| progress.retrying();

        if call.method() != Method::GET {
            return self.network(call, retry, None, on_renew).await.into_outcome();
        }

        let key = CacheKey::for_request(call.method(), call.uri());
        match self.lookup::<T>(&key, policy).await {
            Some((value, CacheAction::Suppress)) => Outcome::Success(Some(value)),
            Some((value, _)) => {
                progress.publish(Outcome::Success(Some(value)));
                self.network(call, retry, Some(key), on_renew).await.into_outcome()
            }
            None => self.network(call, retry, Some(key), on_renew).await.into_outcome(),
        }
    }
}
