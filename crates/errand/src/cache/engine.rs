// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::borrow::Cow;
use std::sync::Arc;

use futures::Stream;
use futures::stream;
use http::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tick::Clock;

use super::{CacheAction, CacheConfig, CacheEntry, CachePolicy, Codec, FileStore, JsonCodec, PersistentStore, TieredCache};
use crate::constants::DEFAULT_MEMORY_ENTRIES;
use crate::{CacheKey, Call, Context, Outcome, RenewArgs, Retry, StoreError};

/// Where a [`Delivery`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Decoded from a cached entry.
    Cache,
    /// Produced by issuing the call.
    Network,
}

/// One outcome emitted by [`CacheEngine::fetch`].
#[derive(Debug, Clone)]
pub struct Delivery<T> {
    origin: Origin,
    outcome: Outcome<T>,
}

impl<T> Delivery<T> {
    /// Returns where the outcome came from.
    #[must_use]
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Returns the outcome.
    #[must_use]
    pub fn outcome(&self) -> &Outcome<T> {
        &self.outcome
    }

    /// Consumes the delivery and returns the outcome.
    #[must_use]
    pub fn into_outcome(self) -> Outcome<T> {
        self.outcome
    }
}

/// Serves `GET` calls from a [`TieredCache`] according to a [`CachePolicy`].
///
/// Cloning is cheap: clones share both cache tiers.
#[derive(Debug)]
pub struct CacheEngine<S, C = JsonCodec> {
    pub(super) shared: Arc<EngineShared<S, C>>,
}

#[derive(Debug)]
pub(super) struct EngineShared<S, C> {
    pub(super) context: Context,
    pipeline_name: Cow<'static, str>,
    clock: Clock,
    tiered: TieredCache<S>,
    codec: C,
}

impl<S, C> Clone for CacheEngine<S, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[derive(Debug)]
enum Step {
    Lookup,
    Network(Option<CacheKey>),
    Done,
}

impl CacheEngine<FileStore> {
    /// Opens a [`FileStore`] as configured and builds an engine over it.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be prepared.
    pub async fn open(context: &Context, config: &CacheConfig) -> Result<Self, StoreError> {
        let store = FileStore::open(&config.directory, config.disk_capacity).await?;
        Ok(Self::builder(context, store).memory_entries(config.memory_entries).build())
    }
}

impl<S: PersistentStore> CacheEngine<S> {
    /// Creates an engine over `store` with default settings.
    #[must_use]
    pub fn new(context: &Context, store: S) -> Self {
        Self::builder(context, store).build()
    }

    /// Starts configuring an engine over `store`.
    #[must_use]
    pub fn builder(context: &Context, store: S) -> CacheEngineBuilder<S> {
        CacheEngineBuilder {
            context: context.clone(),
            store,
            codec: JsonCodec,
            memory_entries: DEFAULT_MEMORY_ENTRIES,
        }
    }
}

impl<S, C> CacheEngine<S, C>
where
    S: PersistentStore,
    C: Codec,
{
    /// Returns both cache tiers.
    #[must_use]
    pub fn tiered(&self) -> &TieredCache<S> {
        &self.shared.tiered
    }

    /// Issues `call` through `retry`, serving cached payloads as `policy` allows.
    ///
    /// The stream yields one or two deliveries:
    ///
    /// - only a [`Origin::Cache`] delivery when the entry is younger than the debounce window;
    /// - a cache delivery followed by a network delivery when the entry is younger than
    ///   the maximum age;
    /// - only a network delivery otherwise, or when there is no usable entry.
    ///
    /// Calls other than `GET` always go to the network and never touch the cache.
    /// Successful network payloads of `GET` calls are written to both tiers.
    pub fn fetch<'a, T, K>(&'a self, call: &'a K, retry: &'a Retry<T>, policy: CachePolicy) -> impl Stream<Item = Delivery<T>> + Send + 'a
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'a,
        K: Call<T>,
    {
        let shared = &*self.shared;

        stream::unfold(Step::Lookup, move |step| async move {
            match step {
                Step::Lookup if call.method() != Method::GET => Some((shared.network(call, retry, None, |_| {}).await, Step::Done)),
                Step::Lookup => {
                    let key = CacheKey::for_request(call.method(), call.uri());
                    match shared.lookup::<T>(&key, policy).await {
                        Some((value, CacheAction::Suppress)) => Some((Delivery::cached(value), Step::Done)),
                        Some((value, _)) => Some((Delivery::cached(value), Step::Network(Some(key)))),
                        None => Some((shared.network(call, retry, Some(key), |_| {}).await, Step::Done)),
                    }
                }
                Step::Network(key) => Some((shared.network(call, retry, key, |_| {}).await, Step::Done)),
                Step::Done => None,
            }
        })
    }
}

impl<T> Delivery<T> {
    fn cached(value: T) -> Self {
        Self {
            origin: Origin::Cache,
            outcome: Outcome::Success(Some(value)),
        }
    }
}

impl<S, C> EngineShared<S, C>
where
    S: PersistentStore,
    C: Codec,
{
    /// Returns the cached value unless the entry is missing, stale, or undecodable.
    pub(super) async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey, policy: CachePolicy) -> Option<(T, CacheAction)> {
        let entry = self.tiered.get(key).await?;
        let action = policy.decide_at(entry.timestamp(), self.clock.system_time());
        self.emit(key, action_label(action));

        if action == CacheAction::Refetch {
            return None;
        }

        match self.codec.decode(entry.payload()) {
            Ok(value) => Some((value, action)),
            Err(error) => {
                tracing::event!(
                    name: "errand.cache",
                    tracing::Level::DEBUG,
                    pipeline.name = %self.pipeline_name,
                    cache.event = "decode_failed",
                    cache.key = %key,
                    error = %error,
                );
                None
            }
        }
    }

    /// Issues `call` and stores a successful payload under `key`. `on_renew` runs before
    /// every retry delay.
    pub(super) async fn network<T, K>(&self, call: &K, retry: &Retry<T>, key: Option<CacheKey>, on_renew: impl FnMut(RenewArgs)) -> Delivery<T>
    where
        T: Serialize,
        K: Call<T>,
    {
        let outcome = retry.run(|| call.invoke(), on_renew).await;

        if let Some(key) = key
            && let Outcome::Success(Some(value)) = &outcome
        {
            self.store(&key, value).await;
        }

        Delivery {
            origin: Origin::Network,
            outcome,
        }
    }

    async fn store<T: Serialize>(&self, key: &CacheKey, value: &T) {
        match self.codec.encode(value) {
            Ok(payload) => {
                let entry = CacheEntry::new(self.clock.system_time(), payload);
                self.tiered.put(key, entry).await;
            }
            Err(error) => tracing::event!(
                name: "errand.cache",
                tracing::Level::DEBUG,
                pipeline.name = %self.pipeline_name,
                cache.event = "encode_failed",
                cache.key = %key,
                error = %error,
            ),
        }
    }

    fn emit(&self, key: &CacheKey, event: &'static str) {
        tracing::event!(
            name: "errand.cache",
            tracing::Level::DEBUG,
            pipeline.name = %self.pipeline_name,
            cache.event = event,
            cache.key = %key,
        );
    }
}

fn action_label(action: CacheAction) -> &'static str {
    match action {
        CacheAction::Suppress => "suppress",
        CacheAction::ServeAndRefresh => "serve_and_refresh",
        CacheAction::Refetch => "refetch",
    }
}

/// Configures a [`CacheEngine`].
///
/// Created by [`CacheEngine::builder`].
#[derive(Debug)]
pub struct CacheEngineBuilder<S, C = JsonCodec> {
    context: Context,
    store: S,
    codec: C,
    memory_entries: u64,
}

impl<S, C> CacheEngineBuilder<S, C>
where
    S: PersistentStore,
    C: Codec,
{
    /// Replaces the codec used to encode cached payloads.
    #[must_use]
    pub fn codec<C2: Codec>(self, codec: C2) -> CacheEngineBuilder<S, C2> {
        CacheEngineBuilder {
            context: self.context,
            store: self.store,
            codec,
            memory_entries: self.memory_entries,
        }
    }

    /// Sets the capacity of the in-memory tier. Defaults to 25 entries.
    #[must_use]
    pub fn memory_entries(mut self, memory_entries: u64) -> Self {
        self.memory_entries = memory_entries;
        self
    }

    /// Builds the engine.
    #[must_use]
    pub fn build(self) -> CacheEngine<S, C> {
        let pipeline_name: Cow<'static, str> = Cow::Owned(self.context.pipeline_name().to_owned());

        CacheEngine {
            shared: Arc::new(EngineShared {
                context: self.context.clone(),
                tiered: TieredCache::new(pipeline_name.clone(), self.store, self.memory_entries),
                pipeline_name,
                clock: self.context.clock().clone(),
                codec: self.codec,
            }),
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use futures::StreamExt;
    use http::{StatusCode, Uri};
    use rstest::rstest;
    use serde::Serializer;
    use tick::ClockControl;
    use tokio::runtime::Handle;

    use super::*;
    use crate::cache::testing::MockStore;
    use crate::{CodecError, Response, call_fn};

    const URI: &str = "https://example.com/posts";

    fn context(control: &ClockControl) -> Context {
        Context::new(Handle::current(), control.to_clock()).name("cache_tests")
    }

    fn counting_call(method: Method, counter: &Arc<AtomicU32>) -> impl Call<String> + use<> {
        let counter = Arc::clone(counter);
        call_fn(method, Uri::from_static(URI), move || {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(Response::ok(format!("network-{index}"))) }
        })
    }

    async fn collect<T>(stream: impl Stream<Item = Delivery<T>>) -> Vec<(Origin, Option<T>)> {
        stream
            .map(|delivery| (delivery.origin(), delivery.into_outcome().into_data()))
            .collect()
            .await
    }

    #[test]
    fn static_assertions() {
        static_assertions::assert_impl_all!(CacheEngine<MockStore>: Send, Sync, Clone);
        static_assertions::assert_impl_all!(Delivery<String>: Send, Sync, Clone);
    }

    #[rstest]
    #[case::within_debounce(50, vec![Origin::Cache])]
    #[case::within_max_age(500, vec![Origin::Cache, Origin::Network])]
    #[case::expired(2000, vec![Origin::Network])]
    #[tokio::test]
    async fn staleness_decides_deliveries(#[case] age_millis: u64, #[case] expected: Vec<Origin>) {
        let control = ClockControl::new();
        let context = context(&control);
        let engine = CacheEngine::new(&context, MockStore::default());
        let retry = Retry::new(&context);
        let counter = Arc::new(AtomicU32::new(0));
        let call = counting_call(Method::GET, &counter);
        let policy = CachePolicy::new(Duration::from_millis(100), Duration::from_millis(1000));

        let first = collect(engine.fetch(&call, &retry, policy)).await;
        assert_eq!(first, vec![(Origin::Network, Some("network-0".to_string()))]);

        control.advance(Duration::from_millis(age_millis));
        let second = collect(engine.fetch(&call, &retry, policy)).await;

        let origins: Vec<_> = second.iter().map(|(origin, _)| *origin).collect();
        assert_eq!(origins, expected);
        if expected[0] == Origin::Cache {
            assert_eq!(second[0].1.as_deref(), Some("network-0"));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1 + u32::from(expected.contains(&Origin::Network)));
    }

    #[tokio::test]
    async fn refresh_rewrites_entry() {
        let control = ClockControl::new();
        let context = context(&control);
        let engine = CacheEngine::new(&context, MockStore::default());
        let retry = Retry::new(&context);
        let counter = Arc::new(AtomicU32::new(0));
        let call = counting_call(Method::GET, &counter);
        let policy = CachePolicy::new(Duration::from_millis(100), Duration::from_millis(1000));

        let _ = collect(engine.fetch(&call, &retry, policy)).await;
        control.advance(Duration::from_millis(500));
        let _ = collect(engine.fetch(&call, &retry, policy)).await;

        let third = collect(engine.fetch(&call, &retry, policy)).await;
        assert_eq!(third, vec![(Origin::Cache, Some("network-1".to_string()))]);
    }

    #[tokio::test]
    async fn non_get_bypasses_cache() {
        let control = ClockControl::new();
        let context = context(&control);
        let engine = CacheEngine::new(&context, MockStore::default());
        let retry = Retry::new(&context);
        let counter = Arc::new(AtomicU32::new(0));
        let call = counting_call(Method::POST, &counter);

        let first = collect(engine.fetch(&call, &retry, CachePolicy::default())).await;
        let second = collect(engine.fetch(&call, &retry, CachePolicy::default())).await;

        assert_eq!(first, vec![(Origin::Network, Some("network-0".to_string()))]);
        assert_eq!(second, vec![(Origin::Network, Some("network-1".to_string()))]);
        assert_eq!(engine.tiered().store().gets(), 0);
        assert_eq!(engine.tiered().store().puts(), 0);
    }

    #[tokio::test]
    async fn undecodable_entry_goes_to_network() {
        let control = ClockControl::new();
        let context = context(&control);
        let store = MockStore::default();
        let key = CacheKey::for_request(&Method::GET, &Uri::from_static(URI));
        store.insert(&key, CacheEntry::new(control.to_clock().system_time(), Bytes::from_static(b"{not json")).to_bytes());
        let engine = CacheEngine::new(&context, store);
        let retry = Retry::new(&context);
        let counter = Arc::new(AtomicU32::new(0));
        let call = counting_call(Method::GET, &counter);

        let deliveries = collect(engine.fetch(&call, &retry, CachePolicy::default())).await;

        assert_eq!(deliveries, vec![(Origin::Network, Some("network-0".to_string()))]);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let control = ClockControl::new();
        let context = context(&control);
        let engine = CacheEngine::new(&context, MockStore::default());
        let retry = Retry::builder(&context).max_retries(0).build();
        let call = call_fn(Method::GET, Uri::from_static(URI), || async {
            Ok(Response::<String>::new(StatusCode::NOT_FOUND))
        });

        let deliveries: Vec<_> = engine.fetch(&call, &retry, CachePolicy::default()).collect().await;

        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].outcome().code(), Some(StatusCode::NOT_FOUND));
        assert_eq!(engine.tiered().store().puts(), 0);
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let control = ClockControl::new();
        let context = context(&control);
        let engine = CacheEngine::new(&context, MockStore::failing());
        let retry = Retry::new(&context);
        let counter = Arc::new(AtomicU32::new(0));
        let call = counting_call(Method::GET, &counter);

        let deliveries = collect(engine.fetch(&call, &retry, CachePolicy::default())).await;

        assert_eq!(deliveries, vec![(Origin::Network, Some("network-0".to_string()))]);
        assert_eq!(engine.tiered().store().puts(), 1);
    }

    #[derive(Debug, Clone, Copy)]
    struct Unencodable;

    impl Serialize for Unencodable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(serde::ser::Error::custom("not encodable"))
        }
    }

    impl<'de> serde::Deserialize<'de> for Unencodable {
        fn deserialize<D: serde::Deserializer<'de>>(_deserializer: D) -> Result<Self, D::Error> {
            Ok(Self)
        }
    }

    #[tokio::test]
    async fn encode_failure_is_swallowed() {
        let control = ClockControl::new();
        let context = context(&control);
        let engine = CacheEngine::new(&context, MockStore::default());
        let retry = Retry::new(&context);
        let call = call_fn(Method::GET, Uri::from_static(URI), || async { Ok(Response::ok(Unencodable)) });

        let deliveries: Vec<_> = engine.fetch(&call, &retry, CachePolicy::default()).collect().await;

        assert_eq!(deliveries.len(), 1);
        assert!(deliveries[0].outcome().is_success());
        assert_eq!(engine.tiered().store().puts(), 0);
    }

    #[derive(Debug, Clone, Copy)]
    struct Reversed;

    impl Codec for Reversed {
        fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes, CodecError> {
            let mut bytes = JsonCodec.encode(value)?.to_vec();
            bytes.reverse();
            Ok(Bytes::from(bytes))
        }

        fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
            let mut bytes = bytes.to_vec();
            bytes.reverse();
            JsonCodec.decode(&bytes)
        }
    }

    #[tokio::test]
    async fn custom_codec_is_used() {
        let control = ClockControl::new();
        let context = context(&control);
        let engine = CacheEngine::builder(&context, MockStore::default())
            .codec(Reversed)
            .memory_entries(1)
            .build();
        let retry = Retry::new(&context);
        let counter = Arc::new(AtomicU32::new(0));
        let call = counting_call(Method::GET, &counter);

        let _ = collect(engine.fetch(&call, &retry, CachePolicy::default())).await;
        let cached = collect(engine.fetch(&call, &retry, CachePolicy::default())).await;

        let key = CacheKey::for_request(&Method::GET, &Uri::from_static(URI));
        let record = engine.tiered().store().record(&key).unwrap();
        assert_eq!(&CacheEntry::from_bytes(&record).unwrap().payload()[..], br#""0-krowten""#);
        assert_eq!(cached, vec![(Origin::Cache, Some("network-0".to_string()))]);
    }

    #[tokio::test]
    async fn open_uses_file_store() {
        let directory = tempfile::tempdir().unwrap();
        let control = ClockControl::new();
        let context = context(&control);
        let config = CacheConfig::in_directory(directory.path());

        let engine = CacheEngine::open(&context, &config).await.unwrap();
        let retry = Retry::new(&context);
        let counter = Arc::new(AtomicU32::new(0));
        let call = counting_call(Method::GET, &counter);
        let _ = collect(engine.fetch(&call, &retry, CachePolicy::default())).await;

        assert_eq!(engine.tiered().store().len(), 1);
    }
}
