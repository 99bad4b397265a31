use std::time::Duration;

use thiserror::Error;

/// An error that happens when fetching a single resource.
///
/// These errors are shown on the resource's error card. They are never persisted; the cache only
/// remembers that the fetch failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The resource does not exist at the endpoint.
    #[error("not found")]
    NotFound,
    /// The endpoint refused to serve the resource, for example because of rate limiting.
    ///
    /// The attached string contains the endpoint's explanation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    /// The endpoint responded with another non-success status.
    #[error("HTTP {0}")]
    Status(u16),
    /// The request did not complete in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// The request failed before a response arrived, like connection loss or DNS resolution.
    #[error("request failed: {0}")]
    Transport(String),
    /// The response arrived but could not be understood.
    #[error("malformed: {0}")]
    Malformed(String),
}

impl FetchError {
    /// A short tag for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PermissionDenied(_) => "permission_denied",
            Self::Status(_) => "status",
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Malformed(_) => "malformed",
        }
    }
}
