//! Request orchestration: cache lookup, admission, origin metadata, pacing.

use crate::config::ThrottleConfig;
use crate::error::{Result, SlowbinError};
use crate::origin::OriginFetcher;
use crate::store::{mimetype_key, CacheStore};
use crate::stream::{DeliverySource, PacedStreamer};
use crate::validate::{HostResolver, UrlValidator};
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Whether a response is served from the cache or fetched from the origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Hit,
    Miss,
}

impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheState::Hit => "HIT",
            CacheState::Miss => "MISS",
        }
    }
}

/// A throttled resource ready to be sent.
///
/// Every admission and metadata failure has already been reported by the time
/// this exists; only in-stream failures can still appear in `body`.
pub struct ThrottledResponse {
    pub mimetype: String,
    /// Declared content length in bytes.
    pub length: u64,
    pub cache: CacheState,
    pub body: BoxStream<'static, Result<Bytes>>,
}

impl fmt::Debug for ThrottledResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrottledResponse")
            .field("mimetype", &self.mimetype)
            .field("length", &self.length)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Serves URLs slowly, caching what it fetches.
#[derive(Clone)]
pub struct Throttler {
    config: Arc<ThrottleConfig>,
    store: Arc<dyn CacheStore>,
    origin: Arc<dyn OriginFetcher>,
    validator: UrlValidator,
    streamer: PacedStreamer,
}

impl Throttler {
    /// Create a throttler. Fails if `config` is invalid.
    pub fn new(
        config: ThrottleConfig,
        store: Arc<dyn CacheStore>,
        origin: Arc<dyn OriginFetcher>,
        resolver: Arc<dyn HostResolver>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let streamer = PacedStreamer::new(Arc::clone(&store), Arc::clone(&config));

        Ok(Self {
            config,
            store,
            origin,
            validator: UrlValidator::new(resolver),
            streamer,
        })
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Serve `url` over roughly `rate` seconds.
    ///
    /// Rates above the configured maximum are capped. Time spent before the
    /// first byte (cache refresh, validation, HEAD) comes out of the budget.
    pub async fn handle(&self, rate: u64, url: &str) -> Result<ThrottledResponse> {
        let started = Instant::now();
        let rate = self.config.clamp_rate(rate);
        let requested = Duration::from_secs(rate);

        if self.store.exists(url)? {
            return self.serve_cached(url, requested, started);
        }

        let target = self.validator.validate(url).await?;

        let head = self.origin.head(target.as_str()).await?;
        if !head.is_success() {
            info!("Origin returned {} for {}", head.status, url);
            return Err(SlowbinError::OriginStatus {
                status: head.status,
            });
        }

        let mimetype = head
            .content_type()
            .unwrap_or(self.config.default_mimetype.as_str())
            .to_string();
        let length = self.parse_length(head.content_length())?;

        // No TTL yet: both records get one together when the stream completes,
        // so partial content never outlives its mimetype.
        self.store.set(&mimetype_key(url), mimetype.as_bytes())?;

        let body = self.origin.get_stream(target.as_str()).await?;
        let budget = requested.saturating_sub(started.elapsed());

        info!(
            "Cache miss for {}: {} bytes of {} over {:?}",
            url, length, mimetype, budget
        );

        Ok(ThrottledResponse {
            body: self
                .streamer
                .stream(url, length, budget, DeliverySource::Origin(body)),
            mimetype,
            length,
            cache: CacheState::Miss,
        })
    }

    fn serve_cached(
        &self,
        url: &str,
        requested: Duration,
        started: Instant,
    ) -> Result<ThrottledResponse> {
        let mimetype_record = mimetype_key(url);
        self.store.expire(url, self.config.cache_ttl)?;
        self.store.expire(&mimetype_record, self.config.cache_ttl)?;

        let mimetype = match self.store.get(&mimetype_record)? {
            Some(raw) => String::from_utf8_lossy(&raw).into_owned(),
            None => {
                debug!("No mimetype cached for {}, using default", url);
                self.config.default_mimetype.clone()
            }
        };
        let length = self.store.string_length(url)?;
        let budget = requested.saturating_sub(started.elapsed());

        info!(
            "Cache hit for {}: {} bytes of {} over {:?}",
            url, length, mimetype, budget
        );

        Ok(ThrottledResponse {
            body: self
                .streamer
                .stream(url, length, budget, DeliverySource::Cache),
            mimetype,
            length,
            cache: CacheState::Hit,
        })
    }

    fn parse_length(&self, raw: Option<&str>) -> Result<u64> {
        let raw = raw.ok_or(SlowbinError::ContentHeaderMissing)?;
        let length: u64 = raw
            .trim()
            .parse()
            .map_err(|_| SlowbinError::ContentHeaderNotInteger)?;

        if length > self.config.max_length {
            return Err(SlowbinError::ContentTooLarge {
                limit: self.config.max_length_human.clone(),
            });
        }

        Ok(length)
    }
}
