//! Exposes the command line application.
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::future;
use repocards_service::caching::{CacheEntry, FreshnessPolicy, NotificationChannel};
use repocards_service::clock::{ClockRef, SystemClock, age_ms};
use repocards_service::config::Config;
use repocards_service::fetch::{Resource, ResourceFetcher, create_client};
use repocards_service::metrics;
use repocards_service::orchestrator::FetchOrchestrator;
use repocards_service::render::{
    CollectingSurface, HtmlRenderer, HtmlSurface, JsonSurface, RenderSurface, TextSurface,
};
use repocards_service::store::{FilesystemStore, MemoryStore, StoreRef};
use tracing::Instrument;

use crate::logging;

/// How the cards are printed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// The markup of the showcase container.
    Html,
    /// One line per card.
    Text,
    /// The cards as a JSON array.
    Json,
}

/// Repocards commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Render the showcase once.
    Run {
        /// The output format.
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// The number of concurrent contexts rendering the showcase.
        ///
        /// All contexts share the store and the notification channel. Only the cards of the
        /// first context are printed.
        #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        contexts: u32,
    },

    /// Remove the cached entry.
    ClearCache,

    /// Print the cached entry and the lock state.
    Inspect,
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long = "config", short = 'c', global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: The runtime is not started yet, nothing else runs concurrently.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    let store = open_store(&config)?;
    let clock: ClockRef = Arc::new(SystemClock);

    match cli.command {
        Command::Run { format, contexts } => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start the runtime")?;
            runtime.block_on(run(&config, store, clock, format, contexts))?;
        }
        Command::ClearCache => {
            FetchOrchestrator::new(store, clock, &config.cache, None).clear_cache();
            println!("Cache cleared");
        }
        Command::Inspect => inspect(&config, store, clock)?,
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<StoreRef> {
    Ok(match config.storage_dir {
        Some(ref dir) => {
            tracing::debug!("Using store in `{}`", dir.display());
            let store = FilesystemStore::open(dir)
                .with_context(|| format!("failed to open store at `{}`", dir.display()))?;
            Arc::new(store)
        }
        None => Arc::new(MemoryStore::new()),
    })
}

async fn run(
    config: &Config,
    store: StoreRef,
    clock: ClockRef,
    format: OutputFormat,
    contexts: u32,
) -> Result<()> {
    let client = create_client(&config.source).context("failed to create HTTP client")?;
    let fetcher = ResourceFetcher::new(client, &config.source);

    match format {
        OutputFormat::Html => {
            let renderer = HtmlRenderer::new(&config.render);
            let mut surface = HtmlSurface::new(renderer);
            render_contexts(config, store, clock, &fetcher, contexts, &mut surface).await;
            println!("{}", surface.to_document());
        }
        OutputFormat::Text => {
            let mut surface = TextSurface::new(io::stdout());
            render_contexts(config, store, clock, &fetcher, contexts, &mut surface).await;
        }
        OutputFormat::Json => {
            let mut surface = JsonSurface::new(io::stdout());
            render_contexts(config, store, clock, &fetcher, contexts, &mut surface).await;
        }
    }

    Ok(())
}

/// Runs `contexts` orchestrators side by side, rendering the first one onto `surface`.
async fn render_contexts<S>(
    config: &Config,
    store: StoreRef,
    clock: ClockRef,
    fetcher: &ResourceFetcher,
    contexts: u32,
    surface: &mut S,
)
where
    S: RenderSurface<Resource>,
{
    let channel = config.cache.channel.as_deref().map(NotificationChannel::new);
    let keys = &config.source.keys;
    let endpoint = fetcher.endpoint().as_str();
    let fetch_one = move |key: String| async move { fetcher.fetch(&key).await };

    let contexts = contexts as usize;
    let mut surfaces: Vec<&mut dyn RenderSurface<Resource>> = Vec::with_capacity(contexts);
    surfaces.push(surface);
    let mut collecting: Vec<CollectingSurface<Resource>> =
        (1..contexts).map(|_| CollectingSurface::default()).collect();
    surfaces.extend(
        collecting
            .iter_mut()
            .map(|surface| surface as &mut dyn RenderSurface<Resource>),
    );

    let runs = surfaces.into_iter().enumerate().map(|(index, surface)| {
        let orchestrator =
            FetchOrchestrator::new(store.clone(), clock.clone(), &config.cache, channel.clone());
        async move {
            let report = orchestrator.run(keys, endpoint, fetch_one, surface).await;
            let loaded = report.cards.iter().filter(|card| card.is_loaded()).count();
            tracing::info!(
                source = report.source.as_str(),
                lock_held = report.lock_held,
                cache_written = report.cache_written,
                "Rendered {}/{} cards",
                loaded,
                report.cards.len()
            );
        }
        .instrument(tracing::info_span!("context", context = index))
    });

    future::join_all(runs).await;
}

fn inspect(config: &Config, store: StoreRef, clock: ClockRef) -> Result<()> {
    let orchestrator = FetchOrchestrator::new(store, clock.clone(), &config.cache, None);
    let now = clock.now_ms();
    let policy = FreshnessPolicy::new(config.cache.ttl);

    let entry: Option<CacheEntry<serde_json::Value>> = orchestrator.cache().read();
    let cache = match entry {
        Some(ref entry) => serde_json::json!({
            "timestamp": entry.timestamp,
            "age_ms": age_ms(entry.timestamp, now),
            "usable": policy.is_usable(
                Some(entry),
                &config.source.keys,
                config.source.endpoint.as_str(),
                now,
            ),
            "meta": entry.meta,
            "failed": entry
                .data
                .iter()
                .filter(|(_, result)| result.is_none())
                .map(|(key, _)| key)
                .collect::<Vec<_>>(),
        }),
        None => serde_json::Value::Null,
    };
    let lock = match orchestrator.lock().current() {
        Some(token) => serde_json::json!({
            "timestamp": token.timestamp,
            "age_ms": age_ms(token.timestamp, now),
            "held": orchestrator.lock().is_held(now),
        }),
        None => serde_json::Value::Null,
    };

    let state = serde_json::json!({ "cache": cache, "lock": lock });
    let output = serde_json::to_string_pretty(&state).context("failed to serialize state")?;
    println!("{output}");
    Ok(())
}
