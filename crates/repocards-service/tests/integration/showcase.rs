use std::sync::Arc;

use futures::future;
use repocards_service::caching::NotificationChannel;
use repocards_service::config::RenderConfig;
use repocards_service::orchestrator::CardSource;
use repocards_service::render::{Card, CollectingSurface, HtmlRenderer, HtmlSurface, Locale};
use repocards_service::store::{FilesystemStore, KeyValueStore, MemoryStore};
use repocards_test::{KEYS, RATE_LIMITED, resource_server, tempdir};

use crate::{context, fetch_with, keys, setup_fetcher};

#[tokio::test]
async fn test_render_showcase() {
    let server = resource_server();
    let fetcher = setup_fetcher(&server, |_| {});
    let endpoint = fetcher.endpoint().to_string();
    let store = Arc::new(MemoryStore::new());
    let keys = keys(&["Topside", RATE_LIMITED, "joystick-arduino"]);

    let config = RenderConfig {
        locale: Locale::En,
        ..Default::default()
    };
    let mut surface = HtmlSurface::new(HtmlRenderer::new(&config));
    let report = context(store.clone(), None)
        .run(&keys, &endpoint, fetch_with(&fetcher), &mut surface)
        .await;

    assert_eq!(report.source, CardSource::Fetched);
    assert!(report.cache_written);
    assert!(!surface.is_busy());

    let html = surface.html();
    let topside = html.find("UiASub/Topside").unwrap();
    let limited = html.find("API rate limit exceeded").unwrap();
    let joystick = html.find("UiASub/joystick-arduino").unwrap();
    assert!(topside < limited && limited < joystick);
    assert!(html.contains("The Topside repository"));
    assert!(html.contains("Could not load data"));

    // the second render is served from the cache, the failure without its reason
    let mut surface = HtmlSurface::new(HtmlRenderer::new(&config));
    let report = context(store, None)
        .run(&keys, &endpoint, fetch_with(&fetcher), &mut surface)
        .await;
    assert_eq!(report.source, CardSource::CacheHit);
    assert!(surface.html().contains("Could not load data"));
    assert!(!surface.html().contains("API rate limit exceeded"));
    assert_eq!(server.accesses(), 3);
}

#[tokio::test]
async fn test_concurrent_contexts_share_one_fetch() {
    let server = resource_server();
    let fetcher = setup_fetcher(&server, |_| {});
    let endpoint = fetcher.endpoint().to_string();
    let store = Arc::new(MemoryStore::new());
    let channel = NotificationChannel::new("github_repos_channel");
    let keys = keys(KEYS);

    let contexts: Vec<_> = (0..4)
        .map(|_| context(store.clone(), Some(channel.clone())))
        .collect();
    let reports = future::join_all(contexts.iter().map(|context| {
        let keys = &keys;
        let endpoint = &endpoint;
        let fetch_one = fetch_with(&fetcher);
        async move {
            let mut surface = CollectingSurface::default();
            context.run(keys, endpoint, fetch_one, &mut surface).await
        }
    }))
    .await;

    let fetched = reports
        .iter()
        .filter(|report| report.source == CardSource::Fetched)
        .count();
    assert_eq!(fetched, 1);
    assert!(reports.iter().all(|report| report.cards == reports[0].cards));
    assert!(reports[0].cards.iter().all(Card::is_loaded));

    insta::assert_debug_snapshot!(server.all_hits(), @r#"
[
    (
        "K2-Zephyr",
        1,
    ),
    (
        "Topside",
        1,
    ),
    (
        "joystick-arduino",
        1,
    ),
    (
        "uiasub.github.io",
        1,
    ),
    (
        "wiki.uiasub.no",
        1,
    ),
]
"#);
}

#[tokio::test]
async fn test_processes_share_filesystem_store() {
    let server = resource_server();
    let fetcher = setup_fetcher(&server, |_| {});
    let endpoint = fetcher.endpoint().to_string();
    let storage_dir = tempdir();
    let keys = keys(KEYS);

    let first = Arc::new(FilesystemStore::open(storage_dir.path()).unwrap());
    let second = Arc::new(FilesystemStore::open(storage_dir.path()).unwrap());

    let report = context(first.clone(), None)
        .run(
            &keys,
            &endpoint,
            fetch_with(&fetcher),
            &mut CollectingSurface::default(),
        )
        .await;
    assert_eq!(report.source, CardSource::Fetched);
    assert_eq!(server.accesses(), 5);
    assert!(first.get("github_repos_lock").unwrap().is_none());

    let report = context(second, None)
        .run(
            &keys,
            &endpoint,
            fetch_with(&fetcher),
            &mut CollectingSurface::default(),
        )
        .await;
    assert_eq!(report.source, CardSource::CacheHit);
    assert_eq!(server.accesses(), 0);
}

#[tokio::test]
async fn test_total_failure_is_not_cached() {
    let server = resource_server();
    let fetcher = setup_fetcher(&server, |_| {});
    let endpoint = fetcher.endpoint().to_string();
    let store = Arc::new(MemoryStore::new());
    let keys = keys(&[RATE_LIMITED, "does-not-exist"]);

    for _ in 0..2 {
        let report = context(store.clone(), None)
            .run(
                &keys,
                &endpoint,
                fetch_with(&fetcher),
                &mut CollectingSurface::default(),
            )
            .await;
        assert_eq!(report.source, CardSource::Fetched);
        assert!(!report.cache_written);
        assert_eq!(
            report.cards[1],
            Card::Failed {
                key: "does-not-exist".into(),
                reason: Some("not found".into()),
            }
        );
    }

    assert_eq!(server.accesses(), 4);
    assert!(store.get("github_repos_cache").unwrap().is_none());
}
