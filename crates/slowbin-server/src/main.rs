//! Slowbin - serve remote files slowly.
//!
//! This binary runs the HTTP server on top of the slowbin-core library, with a
//! SQLite-backed cache and a background janitor for expired entries.

use anyhow::{Context, Result};
use clap::Parser;
use slowbin_core::{
    format_size, ReqwestOrigin, ServerConfig, SqliteStore, SystemResolver, ThrottleConfig,
    Throttler,
};
use slowbin_server::{spawn_janitor, start_server, AppState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "slowbin")]
#[command(about = "Serve remote files slowly")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value_t = ServerConfig::DEFAULT_PORT)]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = ServerConfig::DEFAULT_HOST)]
    host: String,

    /// Cache database path (defaults to the user cache directory)
    #[arg(long)]
    cache_db: Option<PathBuf>,

    /// Largest Content-Length accepted, in bytes
    #[arg(long, default_value_t = ThrottleConfig::DEFAULT_MAX_LENGTH)]
    max_length: u64,

    /// Size of each delivered unit, in bytes
    #[arg(long, default_value_t = ThrottleConfig::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Longest duration a client may request, in seconds
    #[arg(long, default_value_t = ThrottleConfig::DEFAULT_MAX_RATE)]
    max_rate: u64,

    /// Cache entry lifetime, in seconds
    #[arg(long, default_value_t = ThrottleConfig::DEFAULT_CACHE_TTL.as_secs())]
    cache_ttl: u64,

    /// Content type used when the origin sends none
    #[arg(long, default_value = ThrottleConfig::DEFAULT_MIMETYPE)]
    default_mimetype: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn throttle_config(&self) -> ThrottleConfig {
        ThrottleConfig::default()
            .with_max_length(self.max_length)
            .with_chunk_size(self.chunk_size)
            .with_max_rate(self.max_rate)
            .with_cache_ttl(Duration::from_secs(self.cache_ttl))
            .with_default_mimetype(self.default_mimetype.clone())
    }

    fn cache_db_path(&self) -> Result<PathBuf> {
        match &self.cache_db {
            Some(path) => Ok(path.clone()),
            None => dirs::cache_dir()
                .map(|dir| dir.join("slowbin").join(ServerConfig::CACHE_DB_FILENAME))
                .context("No user cache directory; pass --cache-db"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting Slowbin");

    let config = args.throttle_config();
    info!(
        "Limits: {} max, {} byte units, {}s max rate, cache TTL {}s",
        format_size(config.max_length),
        config.chunk_size,
        config.max_rate,
        config.cache_ttl.as_secs()
    );

    let db_path = args.cache_db_path()?;
    info!("Cache database: {}", db_path.display());
    let store = Arc::new(
        SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open cache at {}", db_path.display()))?,
    );

    let throttler = Throttler::new(
        config,
        store.clone(),
        Arc::new(ReqwestOrigin::new()?),
        Arc::new(SystemResolver),
    )?;

    let janitor = spawn_janitor(store, ServerConfig::JANITOR_INTERVAL);

    let server = start_server(AppState::new(throttler), &args.host, args.port, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
        info!("Shutdown signal received, draining connections");
    })
    .await?;

    // Machine-readable line for process supervisors and tests
    println!("SLOWBIN_PORT={}", server.addr.port());
    info!("Slowbin running on http://{}", server.addr);

    server.wait().await;
    janitor.abort();
    info!("Slowbin stopped");

    Ok(())
}
