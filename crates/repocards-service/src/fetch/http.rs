//! Support to fetch resources over HTTP.

use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode, header};
use serde::Deserialize;
use url::Url;

use crate::config::SourceConfig;

use super::{FetchError, Resource};

/// Creates a [`reqwest::Client`] with the timeouts of the given source.
pub fn create_client(config: &SourceConfig) -> reqwest::Result<Client> {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .pool_idle_timeout(Duration::from_secs(30))
        .user_agent(config.user_agent.as_str())
        .build()
}

/// The error payload of GitHub-style APIs.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Fetches single resources from the configured endpoint.
#[derive(Debug, Clone)]
pub struct ResourceFetcher {
    client: Client,
    endpoint: Url,
    accept: String,
    timeout: Duration,
}

impl ResourceFetcher {
    pub fn new(client: Client, config: &SourceConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            accept: config.accept.clone(),
            timeout: config.timeout,
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Returns the URL of the resource named `key`.
    ///
    /// The key becomes a single, percent-encoded path segment.
    pub fn url_for(&self, key: &str) -> Result<Url, FetchError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| FetchError::Malformed(format!("`{}` is not a base URL", self.endpoint)))?
            .pop_if_empty()
            .push(key);
        Ok(url)
    }

    /// Fetches the resource named `key`.
    pub async fn fetch(&self, key: &str) -> Result<Resource, FetchError> {
        let url = self.url_for(key)?;
        tracing::debug!("Fetching resource from `{}`", url);

        let start = Instant::now();
        let result = self.fetch_url(url).await;

        metric!(timer("fetch.duration") = start.elapsed());
        metric!(counter("fetch.requests") += 1);
        if let Err(ref err) = result {
            metric!(counter("fetch.failures") += 1, "kind" => err.kind());
            tracing::warn!(key, error = %err, "Failed to fetch resource");
        }
        result
    }

    async fn fetch_url(&self, url: Url) -> Result<Resource, FetchError> {
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, self.accept.as_str())
            .send()
            .await
            .map_err(|err| self.map_reqwest_error(err))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| self.map_reqwest_error(err))?;

        if status.is_success() {
            return serde_json::from_slice(&body)
                .map_err(|err| FetchError::Malformed(err.to_string()));
        }

        match status {
            StatusCode::NOT_FOUND => Err(FetchError::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let details = serde_json::from_slice::<ErrorBody>(&body)
                    .map(|body| body.message)
                    .unwrap_or_else(|_| status.to_string());
                Err(FetchError::PermissionDenied(details))
            }
            _ => Err(FetchError::Status(status.as_u16())),
        }
    }

    fn map_reqwest_error(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher(endpoint: &str) -> ResourceFetcher {
        let config = SourceConfig {
            endpoint: endpoint.parse().unwrap(),
            ..Default::default()
        };
        ResourceFetcher::new(Client::new(), &config)
    }

    #[test]
    fn test_url_for() {
        let fetcher = fetcher("https://api.github.com/repos/UiASub/");
        assert_eq!(
            fetcher.url_for("Topside").unwrap().as_str(),
            "https://api.github.com/repos/UiASub/Topside"
        );
        assert_eq!(
            fetcher.url_for("wiki.uiasub.no").unwrap().as_str(),
            "https://api.github.com/repos/UiASub/wiki.uiasub.no"
        );
        assert_eq!(
            fetcher.url_for("a b/c").unwrap().as_str(),
            "https://api.github.com/repos/UiASub/a%20b%2Fc"
        );
    }

    #[test]
    fn test_url_for_without_trailing_slash() {
        let fetcher = fetcher("http://localhost:8080/repos");
        assert_eq!(
            fetcher.url_for("Topside").unwrap().as_str(),
            "http://localhost:8080/repos/Topside"
        );
    }

    #[test]
    fn test_url_for_cannot_be_base() {
        let fetcher = fetcher("mailto:someone@example.com");
        assert!(matches!(
            fetcher.url_for("Topside"),
            Err(FetchError::Malformed(_))
        ));
    }
}
