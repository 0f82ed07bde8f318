//! Shared fixtures for the server integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use slowbin_core::validate::LOOPBACK;
use slowbin_core::{
    OriginFetcher, OriginHead, Result, SqliteStore, StaticResolver, ThrottleConfig, Throttler,
};
use slowbin_server::{build_router, AppState};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Address the fixture resolver gives to every `.test` origin.
pub const REMOTE_ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34));

/// In-memory origin serving fixed resources.
#[derive(Default)]
pub struct MockOrigin {
    resources: HashMap<String, (OriginHead, Vec<u8>)>,
    heads: AtomicUsize,
}

impl MockOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` at `url` with the given content type.
    pub fn with_file(self, url: &str, content_type: &str, body: Vec<u8>) -> Self {
        let head = OriginHead::new(200)
            .with_header("Content-Type", content_type)
            .with_header("Content-Length", body.len().to_string());
        self.with_head(url, head, body)
    }

    pub fn with_head(mut self, url: &str, head: OriginHead, body: Vec<u8>) -> Self {
        self.resources.insert(url.to_string(), (head, body));
        self
    }

    pub fn head_count(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OriginFetcher for MockOrigin {
    async fn head(&self, url: &str) -> Result<OriginHead> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .resources
            .get(url)
            .map(|(head, _)| head.clone())
            .unwrap_or_else(|| OriginHead::new(404)))
    }

    async fn get_stream(&self, url: &str) -> Result<BoxStream<'static, Result<Bytes>>> {
        let body = self
            .resources
            .get(url)
            .map(|(_, body)| body.clone())
            .unwrap_or_default();
        let chunks: Vec<Result<Bytes>> = body
            .chunks(1024)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}

pub fn resolver() -> StaticResolver {
    StaticResolver::new()
        .with_host("example.test", REMOTE_ADDR)
        .with_host("localhost", LOOPBACK)
}

/// Router over an in-memory store and the given origin.
pub fn app(origin: MockOrigin) -> (Arc<SqliteStore>, Arc<MockOrigin>, Router) {
    let store = Arc::new(SqliteStore::open_in_memory().expect("in-memory store"));
    let origin = Arc::new(origin);
    let throttler = Throttler::new(
        ThrottleConfig::default(),
        store.clone(),
        origin.clone(),
        Arc::new(resolver()),
    )
    .expect("valid config");

    (store, origin, build_router(AppState::new(throttler)))
}

pub fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}
