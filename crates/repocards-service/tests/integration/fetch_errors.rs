use std::time::Duration;

use repocards_service::fetch::FetchError;
use repocards_test::{BROKEN, GARBAGE, RATE_LIMITED, SLOW, resource_server};

use crate::setup_fetcher;

#[tokio::test]
async fn test_fetch_resource() {
    let server = resource_server();
    let fetcher = setup_fetcher(&server, |_| {});

    let resource = fetcher.fetch("K2-Zephyr").await.unwrap();
    assert_eq!(resource.name, "K2-Zephyr");
    assert_eq!(resource.stargazers_count, 11);
    assert_eq!(resource.forks_count, 1);
    assert_eq!(resource.language.as_deref(), Some("C++"));
    assert_eq!(
        resource.html_url.as_deref(),
        Some("https://github.com/UiASub/K2-Zephyr")
    );

    let resource = fetcher.fetch("wiki.uiasub.no").await.unwrap();
    assert_eq!(resource.name, "wiki.uiasub.no");
    assert_eq!(server.hits("wiki.uiasub.no"), 1);
}

#[tokio::test]
async fn test_fetch_errors() {
    let server = resource_server();
    let fetcher = setup_fetcher(&server, |_| {});

    assert_eq!(
        fetcher.fetch("does-not-exist").await,
        Err(FetchError::NotFound)
    );
    assert_eq!(
        fetcher.fetch(RATE_LIMITED).await,
        Err(FetchError::PermissionDenied(
            "API rate limit exceeded for 127.0.0.1.".into()
        ))
    );
    assert_eq!(fetcher.fetch(BROKEN).await, Err(FetchError::Status(500)));
    assert!(matches!(
        fetcher.fetch(GARBAGE).await,
        Err(FetchError::Malformed(_))
    ));

    insta::assert_debug_snapshot!(server.all_hits(), @r#"
[
    (
        "broken",
        1,
    ),
    (
        "does-not-exist",
        1,
    ),
    (
        "garbage",
        1,
    ),
    (
        "rate-limited",
        1,
    ),
]
"#);
}

#[tokio::test]
async fn test_fetch_timeout() {
    let server = resource_server();
    let fetcher = setup_fetcher(&server, |config| {
        config.timeout = Duration::from_millis(100);
    });

    assert_eq!(
        fetcher.fetch(SLOW).await,
        Err(FetchError::Timeout(Duration::from_millis(100)))
    );
}

#[tokio::test]
async fn test_fetch_server_gone() {
    let server = resource_server();
    let fetcher = setup_fetcher(&server, |_| {});
    drop(server);
    // let the runtime drop the aborted server task
    tokio::task::yield_now().await;

    let result = fetcher.fetch("Topside").await;
    assert!(matches!(result, Err(FetchError::Transport(_))), "{result:?}");
}
