use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The description of one showcased resource, as returned by the endpoint.
///
/// The field names follow the GitHub repository API. Fields that are not listed here are ignored,
/// and missing counters default to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// The category label, the primary language for repositories.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}
