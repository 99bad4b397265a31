use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{Deserialize, Deserializer, de};
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::render::Locale;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: env::var("STATSD_SERVER").ok(),
            prefix: "repocards".into(),
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Where the showcased resources come from.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SourceConfig {
    /// Base URL, each key is appended as a path segment.
    pub endpoint: Url,
    /// The resources to show, in display order.
    pub keys: Vec<String>,
    /// Value of the `Accept` header sent with every request.
    pub accept: String,
    /// Value of the `User-Agent` header sent with every request.
    pub user_agent: String,
    /// The timeout for establishing a connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// The timeout for a whole request, including reading the body.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse("https://api.github.com/repos/UiASub/")
                .expect("default endpoint is a valid URL"),
            keys: [
                "Topside",
                "K2-Zephyr",
                "joystick-arduino",
                "wiki.uiasub.no",
                "uiasub.github.io",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            accept: "application/vnd.github.v3+json".into(),
            user_agent: concat!("repocards/", env!("CARGO_PKG_VERSION")).into(),
            connect_timeout: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

/// How long a waiting context polls for a sibling's results.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WaitConfig {
    /// Give up waiting and fetch independently after this long.
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
    /// The first polling interval.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Factor applied to the polling interval after every poll.
    pub backoff_factor: f64,
    /// Upper bound for the polling interval.
    #[serde(with = "humantime_serde")]
    pub max_poll_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_secs(5),
            poll_interval: Duration::from_millis(200),
            backoff_factor: 1.5,
            max_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Fine-tuning of the shared cache and the cross-context lock.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    /// Store key of the cache entry.
    pub key: String,
    /// Maximum age of a usable cache entry.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Store key of the lock token.
    pub lock_key: String,
    /// Age after which a lock token counts as abandoned.
    #[serde(with = "humantime_serde")]
    pub lock_ttl: Duration,
    /// Name of the notification channel, `None` disables notifications.
    pub channel: Option<String>,
    /// Tuning of the wait for sibling contexts.
    pub wait: WaitConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key: "github_repos_cache".into(),
            ttl: Duration::from_secs(600),
            lock_key: "github_repos_lock".into(),
            lock_ttl: Duration::from_secs(60),
            channel: Some("github_repos_channel".into()),
            wait: WaitConfig::default(),
        }
    }
}

/// Controls how cards are rendered.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RenderConfig {
    pub locale: Locale,
    /// Error cards link to this URL with the key appended.
    pub repo_url_base: Url,
    /// Descriptions longer than this many characters are truncated.
    pub max_description: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            locale: Locale::default(),
            repo_url_base: Url::parse("https://github.com/UiASub/")
                .expect("default repository URL is valid"),
            max_description: 100,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory of the shared store. Without one, the store only lives in memory and is shared
    /// by the contexts of a single process.
    pub storage_dir: Option<PathBuf>,

    /// The remote endpoint and the resources to fetch from it.
    pub source: SourceConfig,

    /// Shared cache and lock settings.
    pub cache: CacheConfig,

    /// Card rendering.
    pub render: RenderConfig,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_dir: None,
            source: SourceConfig::default(),
            cache: CacheConfig::default(),
            render: RenderConfig::default(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(mut reader: impl std::io::Read) -> Result<Self> {
        let mut config = String::new();
        reader
            .read_to_string(&mut config)
            .context("failed reading config file")?;
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("config file empty");
        }
        serde_yaml::from_str(&config).context("failed to parse config YAML")
    }
}

#[derive(Debug)]
struct LevelFilterVisitor;

impl de::Visitor<'_> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::unknown_variant(
                v,
                &["off", "error", "warn", "info", "debug", "trace"],
            )),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}
