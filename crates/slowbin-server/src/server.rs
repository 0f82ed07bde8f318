//! HTTP server implementation using Axum.

use crate::handler::{handle_fetch, handle_health};
use axum::{routing::get, Router};
use slowbin_core::{CacheStore, Throttler};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Application state shared across handlers.
pub struct AppState {
    pub throttler: Throttler,
}

impl AppState {
    pub fn new(throttler: Throttler) -> Arc<Self> {
        Arc::new(Self { throttler })
    }
}

/// A server running in the background.
pub struct RunningServer {
    /// Address the server is bound to (useful when port=0).
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl RunningServer {
    /// Wait for the server to finish serving.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            error!("Server task failed: {}", e);
        }
    }
}

/// Build the router with every route and layer.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/:rate/*url", get(handle_fetch))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the HTTP server.
///
/// Serving stops once `shutdown` completes; in-flight streams are allowed to
/// finish first.
pub async fn start_server(
    state: Arc<AppState>,
    host: &str,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<RunningServer> {
    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Server listening on {}", actual_addr);

    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("Server error: {}", e);
        }
    });

    Ok(RunningServer {
        addr: actual_addr,
        task,
    })
}

/// Periodically remove expired cache entries.
pub fn spawn_janitor(store: Arc<dyn CacheStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match store.cleanup_expired() {
                Ok(0) => {}
                Ok(removed) => debug!("Janitor removed {} expired cache keys", removed),
                Err(e) => warn!("Cache cleanup failed: {}", e),
            }
        }
    })
}
