use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use repocards_service::caching::NotificationChannel;
use repocards_service::clock::SystemClock;
use repocards_service::config::{CacheConfig, SourceConfig};
use repocards_service::fetch::{FetchError, Resource, ResourceFetcher, create_client};
use repocards_service::orchestrator::FetchOrchestrator;
use repocards_service::store::StoreRef;
use repocards_test::ResourceServer;

/// Creates a fetcher talking to the given test server.
pub fn setup_fetcher<F>(server: &ResourceServer, update_config: F) -> ResourceFetcher
where
    F: FnOnce(&mut SourceConfig),
{
    repocards_test::setup();

    let mut config = SourceConfig {
        endpoint: server.endpoint(),
        ..Default::default()
    };
    update_config(&mut config);

    let client = create_client(&config).unwrap();
    ResourceFetcher::new(client, &config)
}

/// Creates an orchestrator for one context on the shared `store`.
pub fn context(store: StoreRef, channel: Option<NotificationChannel>) -> FetchOrchestrator {
    FetchOrchestrator::new(
        store,
        Arc::new(SystemClock),
        &CacheConfig::default(),
        channel,
    )
}

/// Adapts [`ResourceFetcher::fetch`] to the orchestrator's per-key callback.
pub fn fetch_with<'a>(
    fetcher: &'a ResourceFetcher,
) -> impl Fn(String) -> BoxFuture<'a, Result<Resource, FetchError>> + 'a {
    move |key| async move { fetcher.fetch(&key).await }.boxed()
}

pub fn keys(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}
