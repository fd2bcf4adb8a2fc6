mod auth;
mod cache;
mod config;
mod download_client;
mod error;
mod events;
mod health;
mod indexer;
mod metrics;
mod models;
mod query;
mod queue;
mod repository;
mod search;
mod server;
mod utils;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use cache::CacheManager;
use config::Config;
use download_client::{Downloader, QbittorrentDownloader, TorrServerDownloader};
use events::EventPublisher;
use health::HealthMonitor;
use indexer::IndexerRegistry;
use metrics::MetricsRegistry;
use queue::QueueScheduler;
use repository::sqlite::SqliteRepositories;
use search::{RegistryIndexerLookup, SearchAggregator};
use server::AppState;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn as_filter(&self) -> &str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser)]
#[command(name = "foliofox")]
#[command(about = "Self-hosted ebook metadata search aggregation and download orchestration engine")]
#[command(version)]
struct Cli {
    #[arg(long, value_enum, default_value_t = LogLevel::Info, global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the long-running HTTP API server.
    Serve {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Hash a password for use as a user credential, printing the hash to stdout.
    HashPassword { password: String },
}

fn init_tracing(cli_level: &LogLevel) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(cli_level.as_filter())
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_thread_ids(false))
        .with(filter)
        .init();
}

fn build_downloader(config: &config::DownloadsConfig) -> Arc<dyn Downloader> {
    match config.backend_kind.to_ascii_lowercase().as_str() {
        "torrserver" => Arc::new(TorrServerDownloader::new(&config.backend_url)),
        _ => Arc::new(QbittorrentDownloader::new(
            &config.backend_url,
            config.backend_username.clone(),
            config.backend_password.clone(),
        )),
    }
}

async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path.as_ref()).context("failed to load configuration")?;

    let repos = Arc::new(
        SqliteRepositories::open(&config.store.dsn).context("failed to open durable store")?,
    );

    let mut registry = IndexerRegistry::new();
    registry.register_backends(&config.backends);
    if let Some(dir) = &config.indexer_definitions_dir {
        registry
            .register_definitions_dir(std::path::Path::new(dir), None)
            .context("failed to load indexer definitions")?;
    }
    let registry = Arc::new(registry);

    let events = Arc::new(EventPublisher::new());
    let metrics = Arc::new(MetricsRegistry::new());

    let health = Arc::new(HealthMonitor::new(repos.clone()));
    health
        .reconcile()
        .await
        .context("failed to reconcile health cache from durable store")?;

    let cache = Arc::new(CacheManager::new(
        repos.clone(),
        config.fast_cache.cap_mb,
        config.search.cache_ttl_minutes,
    ));

    let lookup = Arc::new(RegistryIndexerLookup {
        registry: registry.clone(),
        configs: repos.clone(),
    });
    let aggregator = Arc::new(SearchAggregator::new(
        registry.clone(),
        health.clone(),
        cache.clone(),
        lookup,
        repos.clone(),
        config.search.max_concurrent,
    ));

    let downloader = build_downloader(&config.downloads);
    let scheduler = Arc::new(QueueScheduler::new(
        repos.clone(),
        downloader,
        events.clone(),
        config.downloads.max_concurrent,
    ));

    let health_loop = {
        let health = health.clone();
        let targets = registry
            .adapters()
            .into_iter()
            .map(|(indexer_id, adapter)| health::ProbeTarget { indexer_id, adapter })
            .collect::<Vec<_>>();
        tokio::spawn(async move { health.run(targets).await })
    };
    let scheduler_loop = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.clone().run().await })
    };

    let state = AppState {
        aggregator,
        scheduler: scheduler.clone(),
        registry,
        repos,
        events,
        health: health.clone(),
        cache,
        metrics,
        auth_shared_secret: Arc::new(if config.auth.shared_secret.is_empty() {
            None
        } else {
            Some(config.auth.shared_secret.clone())
        }),
    };

    let grace_period = Duration::from_secs(config.server.request_timeout_s);
    let result = server::serve(state, &config.server.host, config.server.port, grace_period).await;

    scheduler.stop();
    health.stop();
    health_loop.abort();
    scheduler_loop.abort();

    result.map_err(Into::into)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command {
        Command::Serve { config } => serve(config).await,
        Command::HashPassword { password } => {
            let hashed = auth::hash_password(&password)?;
            println!("{hashed}");
            Ok(())
        }
    }
}
