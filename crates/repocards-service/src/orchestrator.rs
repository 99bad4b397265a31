//! Coordinates one context's attempt to render the showcased resources.
//!
//! Every run walks an explicit [`State`] machine:
//!
//! ```text
//! CheckCache --hit--> RenderDone
//!     |miss
//! AcquireLock --acquired--> Fetch -> WriteCache -> ReleaseLock -> Notify -> RenderDone
//!     |busy                   ^
//!    Wait ----timed out-------+
//!     |cache ready
//! CheckCache
//! ```
//!
//! A run never fails. Fetch errors become error cards, and problems with the store, the lock or
//! the render surface are logged and otherwise ignored.

use std::collections::BTreeMap;
use std::future::Future;

use futures::future;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::caching::{
    CacheEntry, CrossContextLock, FreshnessPolicy, LocalCache, LockGuard, Notification,
    NotificationChannel, WaitOutcome, wait_for_release_or_cache,
};
use crate::clock::ClockRef;
use crate::config::{CacheConfig, WaitConfig};
use crate::fetch::FetchError;
use crate::render::{Card, RenderSurface};
use crate::store::StoreRef;

/// Where the cards of a run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CardSource {
    /// A usable entry was already cached.
    CacheHit,
    /// A sibling context filled the cache while this one waited.
    CacheFromSibling,
    /// This context fetched the resources itself.
    Fetched,
}

impl CardSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CacheHit => "cache-hit",
            Self::CacheFromSibling => "cache-from-sibling",
            Self::Fetched => "fetched",
        }
    }
}

/// The outcome of [`FetchOrchestrator::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport<T> {
    /// The rendered cards, one per requested key, in request order.
    pub cards: Vec<Card<T>>,
    pub source: CardSource,
    /// Whether this run acquired the cross-context lock.
    pub lock_held: bool,
    /// Whether this run wrote a new cache entry.
    pub cache_written: bool,
}

#[derive(Debug)]
enum State<T> {
    CheckCache,
    AcquireLock,
    Wait,
    Fetch,
    WriteCache(Vec<Result<T, FetchError>>),
    ReleaseLock(Vec<Result<T, FetchError>>),
    Notify(Vec<Result<T, FetchError>>),
    RenderDone(Vec<Card<T>>),
}

/// Runs the cache, lock, fetch and render steps for one context.
///
/// Contexts that should coordinate share the same store and, optionally, the same
/// [`NotificationChannel`]. Without a channel, waiting contexts rely on polling alone.
#[derive(Debug, Clone)]
pub struct FetchOrchestrator {
    cache: LocalCache,
    lock: CrossContextLock,
    policy: FreshnessPolicy,
    clock: ClockRef,
    channel: Option<NotificationChannel>,
    wait: WaitConfig,
}

impl FetchOrchestrator {
    pub fn new(
        store: StoreRef,
        clock: ClockRef,
        config: &CacheConfig,
        channel: Option<NotificationChannel>,
    ) -> Self {
        Self {
            cache: LocalCache::new(store.clone(), clock.clone(), config.key.as_str()),
            lock: CrossContextLock::new(store, config.lock_key.as_str(), config.lock_ttl),
            policy: FreshnessPolicy::new(config.ttl),
            clock,
            channel,
            wait: config.wait,
        }
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn lock(&self) -> &CrossContextLock {
        &self.lock
    }

    /// Removes the cached entry, forcing the next run to fetch.
    pub fn clear_cache(&self) {
        tracing::info!("Clearing cache");
        self.cache.clear();
    }

    fn read_usable<T: DeserializeOwned>(
        &self,
        keys: &[String],
        endpoint: &str,
    ) -> Option<CacheEntry<T>> {
        let entry = self.cache.read();
        self.policy
            .is_usable(entry.as_ref(), keys, endpoint, self.clock.now_ms())
            .then_some(entry)
            .flatten()
    }

    /// Renders `keys` onto `surface`, from the cache if possible and by calling `fetch_one` for
    /// every key otherwise.
    ///
    /// The returned future can be dropped at any point. A lock held at that time is released.
    pub async fn run<T, F, Fut, S>(
        &self,
        keys: &[String],
        endpoint: &str,
        fetch_one: F,
        surface: &mut S,
    ) -> RunReport<T>
    where
        T: Clone + Serialize + DeserializeOwned,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
        S: RenderSurface<T> + ?Sized,
    {
        // Subscribe before the first cache check so a notification sent in between is not lost.
        let mut subscription = self.channel.as_ref().map(NotificationChannel::subscribe);

        let mut guard: Option<LockGuard> = None;
        let mut wait_started: Option<Instant> = None;
        let mut source = CardSource::Fetched;
        let mut cache_written = false;
        let mut lock_held = false;

        let mut state = State::CheckCache;
        let cards = loop {
            state = match state {
                State::CheckCache => {
                    metric!(counter("caches.access") += 1);
                    match self.read_usable::<T>(keys, endpoint) {
                        Some(entry) => {
                            metric!(counter("caches.hit") += 1);
                            source = match wait_started {
                                Some(_) => CardSource::CacheFromSibling,
                                None => CardSource::CacheHit,
                            };
                            State::RenderDone(cards_from_entry(&entry, keys))
                        }
                        None => State::AcquireLock,
                    }
                }
                State::AcquireLock => match self.lock.try_acquire(self.clock.now_ms()) {
                    Some(acquired) => {
                        guard = Some(acquired);
                        lock_held = true;
                        State::Fetch
                    }
                    None => State::Wait,
                },
                State::Wait => {
                    // Repeated waits share one budget, so a run never waits longer than
                    // `max_wait` in total.
                    let started = *wait_started.get_or_insert_with(Instant::now);
                    let config = WaitConfig {
                        max_wait: self.wait.max_wait.saturating_sub(started.elapsed()),
                        ..self.wait
                    };
                    let outcome = wait_for_release_or_cache(
                        &config,
                        || self.read_usable::<T>(keys, endpoint).is_some(),
                        subscription.as_mut(),
                    )
                    .await;
                    match outcome {
                        WaitOutcome::CacheReady => State::CheckCache,
                        WaitOutcome::TimedOut => {
                            tracing::info!("Gave up waiting for sibling context, fetching anyway");
                            State::Fetch
                        }
                    }
                }
                State::Fetch => {
                    if let Err(err) = surface.show_loading(keys) {
                        tracing::error!(error = %err, "Failed to show loading state");
                    }
                    let results =
                        future::join_all(keys.iter().map(|key| fetch_one(key.clone()))).await;
                    State::WriteCache(results)
                }
                State::WriteCache(results) => {
                    let successes: BTreeMap<_, _> = keys
                        .iter()
                        .zip(&results)
                        .filter_map(|(key, result)| {
                            let item = result.as_ref().ok()?;
                            Some((key.clone(), Some(item.clone())))
                        })
                        .collect();
                    if successes.is_empty() {
                        tracing::warn!("All fetches failed, not caching");
                    } else {
                        cache_written = self.cache.write(keys, endpoint, successes);
                    }
                    State::ReleaseLock(results)
                }
                State::ReleaseLock(results) => {
                    if let Some(guard) = guard.take() {
                        guard.release();
                    }
                    State::Notify(results)
                }
                State::Notify(results) => {
                    if cache_written {
                        if let Some(ref channel) = self.channel {
                            channel.publish(Notification::CacheReady);
                        }
                    }
                    State::RenderDone(cards_from_results(keys, results))
                }
                State::RenderDone(cards) => break cards,
            };
        };

        if let Err(err) = surface.render(&cards) {
            tracing::error!(error = %err, "Failed to render cards");
        }
        let loaded = cards.iter().filter(|card| card.is_loaded()).count();
        metric!(gauge("render.cards_loaded") = loaded as u64, "source" => source.as_str());

        tracing::debug!(
            source = source.as_str(),
            lock_held,
            cache_written,
            "Finished run"
        );
        RunReport {
            cards,
            source,
            lock_held,
            cache_written,
        }
    }

    /// Refreshes after the context becomes visible again.
    ///
    /// If the stored entry outlived the cache TTL while the context was hidden, it is cleared and
    /// a full run follows. Otherwise nothing happens and `None` is returned.
    pub async fn on_visibility_regained<T, F, Fut, S>(
        &self,
        keys: &[String],
        endpoint: &str,
        fetch_one: F,
        surface: &mut S,
    ) -> Option<RunReport<T>>
    where
        T: Clone + Serialize + DeserializeOwned,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
        S: RenderSurface<T> + ?Sized,
    {
        let timestamp = self.cache.read_timestamp()?;
        if !self.policy.is_expired(timestamp, self.clock.now_ms()) {
            return None;
        }
        tracing::info!("Cache went stale while hidden, refreshing");
        self.cache.clear();
        Some(self.run(keys, endpoint, fetch_one, surface).await)
    }
}

fn cards_from_entry<T: Clone>(entry: &CacheEntry<T>, keys: &[String]) -> Vec<Card<T>> {
    keys.iter()
        .map(|key| match entry.get(key) {
            Some(item) => Card::Loaded {
                key: key.clone(),
                item: item.clone(),
            },
            None => Card::Failed {
                key: key.clone(),
                reason: None,
            },
        })
        .collect()
}

fn cards_from_results<T>(keys: &[String], results: Vec<Result<T, FetchError>>) -> Vec<Card<T>> {
    keys.iter()
        .zip(results)
        .map(|(key, result)| match result {
            Ok(item) => Card::Loaded {
                key: key.clone(),
                item,
            },
            Err(err) => Card::Failed {
                key: key.clone(),
                reason: Some(err.to_string()),
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::FutureExt;
    use futures::future::BoxFuture;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::render::CollectingSurface;
    use crate::store::{KeyValueStore, MemoryStore};

    const ENDPOINT: &str = "https://api.github.com/repos/UiASub/";
    const CACHE_KEY: &str = "github_repos_cache";
    const LOCK_KEY: &str = "github_repos_lock";

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    struct Harness {
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        channel: NotificationChannel,
        calls: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::new()),
                clock: Arc::new(ManualClock::new(1_700_000_000_000)),
                channel: NotificationChannel::new("github_repos_channel"),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn orchestrator(&self) -> FetchOrchestrator {
            FetchOrchestrator::new(
                self.store.clone(),
                self.clock.clone(),
                &CacheConfig::default(),
                Some(self.channel.clone()),
            )
        }

        /// A fetcher that fails for `failing` keys and takes `delay` per key.
        fn fetcher(
            &self,
            failing: &'static [&'static str],
            delay: Duration,
        ) -> impl Fn(String) -> BoxFuture<'static, Result<String, FetchError>> + use<> {
            let calls = self.calls.clone();
            move |key| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    if failing.contains(&key.as_str()) {
                        Err(FetchError::NotFound)
                    } else {
                        Ok(format!("repo {key}"))
                    }
                }
                .boxed()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn loaded(key: &str) -> Card<String> {
        Card::Loaded {
            key: key.into(),
            item: format!("repo {key}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_renders_in_key_order() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator();
        let keys = keys(&["A", "B", "C"]);
        let mut surface = CollectingSurface::default();

        let report = orchestrator
            .run(
                &keys,
                ENDPOINT,
                harness.fetcher(&["B"], Duration::ZERO),
                &mut surface,
            )
            .await;

        let expected = vec![
            loaded("A"),
            Card::Failed {
                key: "B".into(),
                reason: Some("not found".into()),
            },
            loaded("C"),
        ];
        assert_eq!(report.cards, expected);
        assert_eq!(surface.rendered, expected);
        assert_eq!(surface.loading, vec![keys.clone()]);
        assert_eq!(report.source, CardSource::Fetched);
        assert!(report.lock_held);
        assert!(report.cache_written);
        assert_eq!(harness.store.get(LOCK_KEY).unwrap(), None);
        assert_eq!(harness.calls(), 3);
    }

    #[tokio::test]
    async fn test_second_run_hits_cache() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator();
        let keys = keys(&["A", "B", "C"]);

        orchestrator
            .run(
                &keys,
                ENDPOINT,
                harness.fetcher(&["B"], Duration::ZERO),
                &mut CollectingSurface::default(),
            )
            .await;
        harness.clock.advance(Duration::from_millis(599_999));

        let mut surface = CollectingSurface::default();
        let report = orchestrator
            .run(
                &keys,
                ENDPOINT,
                harness.fetcher(&[], Duration::ZERO),
                &mut surface,
            )
            .await;

        assert_eq!(report.source, CardSource::CacheHit);
        assert!(!report.lock_held);
        assert!(!report.cache_written);
        assert!(surface.loading.is_empty());
        // failures replayed from the cache carry no reason
        assert_eq!(
            report.cards,
            vec![
                loaded("A"),
                Card::Failed {
                    key: "B".into(),
                    reason: None,
                },
                loaded("C"),
            ]
        );
        assert_eq!(harness.calls(), 3);
    }

    #[tokio::test]
    async fn test_expired_or_foreign_cache_is_refetched() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator();
        let keys = keys(&["A", "B"]);
        let run = |endpoint: &'static str| {
            let orchestrator = orchestrator.clone();
            let keys = keys.clone();
            let fetcher = harness.fetcher(&[], Duration::ZERO);
            async move {
                orchestrator
                    .run(&keys, endpoint, fetcher, &mut CollectingSurface::default())
                    .await
            }
        };

        assert_eq!(run(ENDPOINT).await.source, CardSource::Fetched);
        assert_eq!(run(ENDPOINT).await.source, CardSource::CacheHit);
        assert_eq!(run("http://localhost/repos/").await.source, CardSource::Fetched);

        harness.clock.advance(Duration::from_millis(600_000));
        assert_eq!(
            run("http://localhost/repos/").await.source,
            CardSource::Fetched
        );
        assert_eq!(harness.calls(), 6);
    }

    #[tokio::test]
    async fn test_total_failure() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator();
        let mut subscription = harness.channel.subscribe();
        let keys = keys(&["A", "B"]);

        let report = orchestrator
            .run(
                &keys,
                ENDPOINT,
                harness.fetcher(&["A", "B"], Duration::ZERO),
                &mut CollectingSurface::default(),
            )
            .await;

        assert!(report.lock_held);
        assert!(!report.cache_written);
        assert!(report.cards.iter().all(|card| !card.is_loaded()));
        assert_eq!(report.cards[1].key(), "B");
        assert_eq!(harness.store.get(LOCK_KEY).unwrap(), None);
        assert_eq!(harness.store.get(CACHE_KEY).unwrap(), None);

        // nothing was written, so nothing was announced
        let notified = tokio::time::timeout(Duration::from_millis(10), subscription.next()).await;
        assert!(notified.is_err());
    }

    #[tokio::test]
    async fn test_successful_fetch_notifies() {
        let harness = Harness::new();
        let mut subscription = harness.channel.subscribe();

        harness
            .orchestrator()
            .run(
                &keys(&["A"]),
                ENDPOINT,
                harness.fetcher(&[], Duration::ZERO),
                &mut CollectingSurface::default(),
            )
            .await;

        assert_eq!(subscription.next().await, Some(Notification::CacheReady));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_contexts_fetch_once() {
        let harness = Harness::new();
        let keys = keys(&["A", "B", "C"]);
        let first = harness.orchestrator();
        let second = harness.orchestrator();
        let mut first_surface = CollectingSurface::default();
        let mut second_surface = CollectingSurface::default();

        let (first, second) = tokio::join!(
            first.run(
                &keys,
                ENDPOINT,
                harness.fetcher(&[], Duration::from_secs(1)),
                &mut first_surface,
            ),
            second.run(
                &keys,
                ENDPOINT,
                harness.fetcher(&[], Duration::from_secs(1)),
                &mut second_surface,
            ),
        );

        assert_eq!(harness.calls(), 3);
        assert_eq!(first.source, CardSource::Fetched);
        assert_eq!(second.source, CardSource::CacheFromSibling);
        assert!(!second.lock_held);
        assert_eq!(first.cards, second.cards);
        assert!(second_surface.loading.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_contexts_without_channel() {
        let harness = Harness::new();
        let keys = keys(&["A", "B"]);
        let orchestrator = || {
            FetchOrchestrator::new(
                harness.store.clone(),
                harness.clock.clone(),
                &CacheConfig::default(),
                None,
            )
        };
        let (first_context, second_context) = (orchestrator(), orchestrator());
        let mut first_surface = CollectingSurface::default();
        let mut second_surface = CollectingSurface::default();

        let (first, second) = tokio::join!(
            first_context.run(
                &keys,
                ENDPOINT,
                harness.fetcher(&[], Duration::from_secs(2)),
                &mut first_surface,
            ),
            second_context.run(
                &keys,
                ENDPOINT,
                harness.fetcher(&[], Duration::from_secs(2)),
                &mut second_surface,
            ),
        );

        assert_eq!(harness.calls(), 2);
        assert_eq!(first.source, CardSource::Fetched);
        assert_eq!(second.source, CardSource::CacheFromSibling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_waiter_keeps_foreign_lock() {
        let harness = Harness::new();
        let token = format!(r#"{{"timestamp":{}}}"#, harness.clock.now_ms());
        harness.store.set(LOCK_KEY, &token).unwrap();

        let start = Instant::now();
        let report = harness
            .orchestrator()
            .run(
                &keys(&["A"]),
                ENDPOINT,
                harness.fetcher(&[], Duration::ZERO),
                &mut CollectingSurface::default(),
            )
            .await;

        assert!(start.elapsed() >= Duration::from_millis(5_000));
        assert_eq!(report.source, CardSource::Fetched);
        assert!(!report.lock_held);
        assert!(report.cache_written);
        assert_eq!(harness.store.get(LOCK_KEY).unwrap(), Some(token));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_run_releases_lock() {
        let harness = Harness::new();
        let store = harness.store.clone();
        let fetch_one = move |_key: String| {
            let store = store.clone();
            async move {
                assert!(store.get(LOCK_KEY).unwrap().is_some());
                future::pending::<Result<String, FetchError>>().await
            }
        };

        let orchestrator = harness.orchestrator();
        let keys = keys(&["A"]);
        let mut surface = CollectingSurface::default();
        let run = orchestrator.run(&keys, ENDPOINT, fetch_one, &mut surface);
        let result = tokio::time::timeout(Duration::from_secs(1), run).await;

        assert!(result.is_err());
        assert_eq!(harness.store.get(LOCK_KEY).unwrap(), None);
        assert_eq!(harness.store.get(CACHE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_visibility_regained() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator();
        let keys = keys(&["A"]);
        let mut surface = CollectingSurface::default();

        // nothing cached, nothing to refresh
        let report = orchestrator
            .on_visibility_regained(
                &keys,
                ENDPOINT,
                harness.fetcher(&[], Duration::ZERO),
                &mut surface,
            )
            .await;
        assert!(report.is_none());

        orchestrator
            .run(
                &keys,
                ENDPOINT,
                harness.fetcher(&[], Duration::ZERO),
                &mut surface,
            )
            .await;
        harness.clock.advance(Duration::from_millis(599_999));
        let report = orchestrator
            .on_visibility_regained(
                &keys,
                ENDPOINT,
                harness.fetcher(&[], Duration::ZERO),
                &mut surface,
            )
            .await;
        assert!(report.is_none());
        assert_eq!(harness.calls(), 1);

        harness.clock.advance(Duration::from_millis(1));
        let report = orchestrator
            .on_visibility_regained(
                &keys,
                ENDPOINT,
                harness.fetcher(&[], Duration::ZERO),
                &mut surface,
            )
            .await
            .unwrap();
        assert_eq!(report.source, CardSource::Fetched);
        assert_eq!(harness.calls(), 2);
        let timestamp = orchestrator.cache().read_timestamp().unwrap();
        assert_eq!(timestamp, harness.clock.now_ms());
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator();
        let keys = keys(&["A"]);

        orchestrator
            .run(
                &keys,
                ENDPOINT,
                harness.fetcher(&[], Duration::ZERO),
                &mut CollectingSurface::default(),
            )
            .await;
        orchestrator.clear_cache();
        assert_eq!(harness.store.get(CACHE_KEY).unwrap(), None);

        let report = orchestrator
            .run(
                &keys,
                ENDPOINT,
                harness.fetcher(&[], Duration::ZERO),
                &mut CollectingSurface::default(),
            )
            .await;
        assert_eq!(report.source, CardSource::Fetched);
    }
}
