//! Integration tests over real sockets.
//!
//! A local axum app plays the origin. Admission needs a non-loopback address,
//! so the fixture resolver hands out a public address for `origin.test`
//! while the reqwest client is pointed at the local listener.

mod common;

use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use common::{sample, REMOTE_ADDR};
use futures::StreamExt;
use serde_json::Value;
use slowbin_core::{
    CacheStore, OriginFetcher, ReqwestOrigin, SlowbinError, SqliteStore, StaticResolver, ThrottleConfig,
    Throttler,
};
use slowbin_server::{start_server, AppState};
use std::net::SocketAddr;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;

const FILE_LEN: usize = 8192;
const LARGE_LEN: usize = 16 * 4096;

async fn serve_file() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "text/csv".to_string()),
            (header::CONTENT_LENGTH, FILE_LEN.to_string()),
        ],
        sample(FILE_LEN),
    )
}

async fn serve_large_file() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_LENGTH, LARGE_LEN.to_string()),
        ],
        sample(LARGE_LEN),
    )
}

/// Start the fake origin and return its address.
async fn start_origin() -> SocketAddr {
    let app = Router::new()
        .route("/file.bin", get(serve_file))
        .route("/large.bin", get(serve_large_file));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Origin client that sends `origin.test` to the local listener.
fn origin_client(origin: SocketAddr) -> ReqwestOrigin {
    origin_client_with_timeout(origin, Duration::from_secs(10))
}

fn origin_client_with_timeout(origin: SocketAddr, timeout: Duration) -> ReqwestOrigin {
    ReqwestOrigin::with_builder(timeout, |builder| {
        builder.resolve("origin.test", origin).no_proxy()
    })
    .unwrap()
}

fn local_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[tokio::test]
async fn test_reqwest_origin_head_and_stream() {
    let origin_addr = start_origin().await;
    let origin = origin_client(origin_addr);
    let url = format!("http://origin.test:{}/file.bin", origin_addr.port());

    let head = origin.head(&url).await.unwrap();
    assert!(head.is_success());
    assert_eq!(head.content_type(), Some("text/csv"));
    assert_eq!(head.content_length(), Some("8192"));

    let mut body = origin.get_stream(&url).await.unwrap();
    let mut received = Vec::new();
    while let Some(chunk) = body.next().await {
        received.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(received, sample(FILE_LEN));
}

#[tokio::test]
async fn test_reqwest_origin_error_status() {
    let origin_addr = start_origin().await;
    let origin = origin_client(origin_addr);
    let url = format!("http://origin.test:{}/missing", origin_addr.port());

    assert_eq!(origin.head(&url).await.unwrap().status, 404);

    let items: Vec<_> = origin.get_stream(&url).await.unwrap().collect().await;
    assert_eq!(items.len(), 1);
    assert!(matches!(
        items[0],
        Err(SlowbinError::OriginStatus { status: 404 })
    ));
}

#[tokio::test]
async fn test_end_to_end_over_http() {
    let origin_addr = start_origin().await;
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let throttler = Throttler::new(
        ThrottleConfig::default(),
        store,
        Arc::new(origin_client(origin_addr)),
        Arc::new(StaticResolver::new().with_host("origin.test", REMOTE_ADDR)),
    )
    .unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let server = start_server(AppState::new(throttler), "127.0.0.1", 0, async {
        let _ = rx.await;
    })
    .await
    .unwrap();

    let target = format!("http://origin.test:{}/file.bin", origin_addr.port());
    let client = local_client();

    let start = Instant::now();
    let response = client
        .get(format!("http://{}/1/{}", server.addr, target))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "text/csv");
    assert_eq!(response.headers()["x-cache"], "MISS");
    let body = response.bytes().await.unwrap();
    let elapsed = start.elapsed();

    assert_eq!(body.as_ref(), sample(FILE_LEN).as_slice());
    assert!(elapsed >= Duration::from_millis(900), "{elapsed:?}");

    let response = client
        .get(format!("http://{}/0/{}", server.addr, target))
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()["x-cache"], "HIT");
    assert_eq!(response.bytes().await.unwrap().len(), FILE_LEN);

    tx.send(()).unwrap();
    server.wait().await;
}

#[tokio::test]
async fn test_paced_miss_outlasts_request_timeout() {
    let origin_addr = start_origin().await;
    let timeout = Duration::from_secs(1);
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let throttler = Throttler::new(
        ThrottleConfig::default(),
        store.clone(),
        Arc::new(origin_client_with_timeout(origin_addr, timeout)),
        Arc::new(StaticResolver::new().with_host("origin.test", REMOTE_ADDR)),
    )
    .unwrap();
    let url = format!("http://origin.test:{}/large.bin", origin_addr.port());

    let start = Instant::now();
    let response = throttler.handle(3, &url).await.unwrap();
    let mut body = response.body;
    let mut received = Vec::new();
    while let Some(unit) = body.next().await {
        received.extend_from_slice(&unit.unwrap());
    }
    let elapsed = start.elapsed();

    assert!(elapsed > timeout * 2, "{elapsed:?}");
    assert_eq!(received.len(), LARGE_LEN);
    assert_eq!(received, sample(LARGE_LEN));
    assert_eq!(store.string_length(&url).unwrap(), LARGE_LEN as u64);
}

/// Spawn the `slowbin` binary and read the port it reports.
async fn spawn_binary(cache_db: &std::path::Path) -> (tokio::process::Child, u16) {
    let mut child = tokio::process::Command::new(env!("CARGO_BIN_EXE_slowbin"))
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .arg("--cache-db")
        .arg(cache_db)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .expect("failed to spawn slowbin");

    let stdout = child.stdout.take().expect("stdout is piped");
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let port = tokio::time::timeout(Duration::from_secs(20), async {
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(value) = line.strip_prefix("SLOWBIN_PORT=") {
                return value.trim().parse::<u16>().ok();
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
    .expect("SLOWBIN_PORT line not emitted");

    tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    (child, port)
}

#[tokio::test]
async fn test_binary_serves_health_and_rejects_local_urls() {
    let temp_dir = TempDir::new().unwrap();
    let cache_db = temp_dir.path().join("cache").join("slowbin.sqlite");
    let (mut child, port) = spawn_binary(&cache_db).await;
    let client = local_client();

    let health: Value = client
        .get(format!("http://127.0.0.1:{port}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let response = client
        .get(format!("http://127.0.0.1:{port}/1/http://127.0.0.1/secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["reason"], "local_url");

    assert!(cache_db.exists());

    let _ = child.kill().await;
    let _ = child.wait().await;
}
