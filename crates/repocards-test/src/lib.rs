//! Helpers for testing the fetch cache.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], hold on to the returned handle for the entire test. The directory
//!    is deleted as soon as it is dropped.
//!
//!  - When using [`resource_server`], keep the server alive until all requests to it have been
//!    made. Dropping it stops serving, and requests to it will fail with a transport error.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::json;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use url::Url;

pub use tempfile::TempDir;

/// The keys the showcase is configured with by default.
pub const KEYS: &[&str] = &[
    "Topside",
    "K2-Zephyr",
    "joystick-arduino",
    "wiki.uiasub.no",
    "uiasub.github.io",
];

/// A key for which the [`resource_server`] answers like a rate limited GitHub API.
pub const RATE_LIMITED: &str = "rate-limited";
/// A key for which the [`resource_server`] answers with an internal server error.
pub const BROKEN: &str = "broken";
/// A key for which the [`resource_server`] answers with a body that is not JSON.
pub const GARBAGE: &str = "garbage";
/// A key for which the [`resource_server`] takes [`SLOW_DELAY`] to answer.
pub const SLOW: &str = "slow";
pub const SLOW_DELAY: Duration = Duration::from_secs(2);

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `repocards` crates and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("repocards_service=trace,repocards=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Builds the resource description the [`resource_server`] returns for `name`.
pub fn resource_json(name: &str) -> serde_json::Value {
    let index = KEYS.iter().position(|key| *key == name).unwrap_or_default() as u64;
    json!({
        "id": 1000 + index,
        "name": name,
        "full_name": format!("UiASub/{name}"),
        "description": format!("The {name} repository"),
        "stargazers_count": 10 + index,
        "forks_count": index,
        "updated_at": "2025-05-29T12:00:00Z",
        "language": if index % 2 == 0 { "Python" } else { "C++" },
        "html_url": format!("https://github.com/UiASub/{name}"),
    })
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

type Hits = Arc<Mutex<BTreeMap<String, usize>>>;

/// A fake GitHub repository API that counts requests per resource.
#[derive(Debug)]
pub struct ResourceServer {
    server: Server,
    hits: Hits,
}

impl ResourceServer {
    /// The endpoint to configure, with a trailing slash.
    pub fn endpoint(&self) -> Url {
        self.server.url("repos/UiASub/")
    }

    /// Returns how often `name` was requested.
    pub fn hits(&self, name: &str) -> usize {
        self.hits.lock().unwrap().get(name).copied().unwrap_or_default()
    }

    /// Returns the number of requests since the last call and resets the counter.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns the requests per resource since the last call and resets the counter.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }
}

async fn repository(State(hits): State<Hits>, Path(name): Path<String>) -> Response {
    *hits.lock().unwrap().entry(name.clone()).or_default() += 1;

    match name.as_str() {
        RATE_LIMITED => (
            StatusCode::FORBIDDEN,
            axum::Json(json!({
                "message": "API rate limit exceeded for 127.0.0.1.",
                "documentation_url": "https://docs.github.com/rest/overview/resources-in-the-rest-api#rate-limiting",
            })),
        )
            .into_response(),
        BROKEN => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        GARBAGE => (
            [(header::CONTENT_TYPE, "application/json")],
            "<html>definitely not json</html>",
        )
            .into_response(),
        SLOW => {
            tokio::time::sleep(SLOW_DELAY).await;
            axum::Json(resource_json(&name)).into_response()
        }
        name if KEYS.contains(&name) => axum::Json(resource_json(name)).into_response(),
        _ => (
            StatusCode::NOT_FOUND,
            axum::Json(json!({ "message": "Not Found" })),
        )
            .into_response(),
    }
}

/// Spawns a fake repository API on localhost.
///
/// Repositories are served under `/repos/UiASub/<name>`: the [`KEYS`] return a description built
/// by [`resource_json`], a few special names ([`RATE_LIMITED`], [`BROKEN`], [`GARBAGE`],
/// [`SLOW`]) misbehave, and everything else is not found.
pub fn resource_server() -> ResourceServer {
    let hits = Hits::default();
    let router = Router::new()
        .route("/repos/UiASub/:name", get(repository))
        .with_state(hits.clone());

    ResourceServer {
        server: Server::with_router(router),
        hits,
    }
}
