//! Paced delivery of a resource against a time budget.
//!
//! The streamer pulls fixed-size units from a source, hands each to the
//! caller, and sleeps between units so the whole transfer stretches over the
//! requested duration. The sleep is recomputed after every unit from the
//! remaining budget and the remaining unit count, so a slow unit shortens the
//! sleeps that follow it.
//!
//! Two sources feed the same loop:
//! - [`cache_units`] reads successive byte ranges from the cache store
//! - [`origin_units`] re-chunks an origin response body
//!
//! When the source is the origin every unit is appended to the cache as it is
//! delivered, and both cache records get their TTL once the source is
//! exhausted. A stream dropped before exhaustion never sets that TTL.

use crate::config::ThrottleConfig;
use crate::error::{Result, SlowbinError};
use crate::store::{mimetype_key, CacheStore};
use bytes::{Bytes, BytesMut};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Byte ranges of width `chunk_size` covering `[0, length)`.
///
/// The final range is shorter when `length` is not a multiple of the width.
pub fn chunk_ranges(length: u64, chunk_size: usize) -> impl Iterator<Item = Range<u64>> + Send {
    let step = chunk_size.max(1) as u64;
    (0..length)
        .step_by(step as usize)
        .map(move |start| start..(start + step).min(length))
}

/// Units read from the cache store, one range at a time.
///
/// Reading stops early if the stored value turns out shorter than `length`.
pub fn cache_units(
    store: Arc<dyn CacheStore>,
    key: String,
    length: u64,
    chunk_size: usize,
) -> BoxStream<'static, Result<Bytes>> {
    stream::iter(chunk_ranges(length, chunk_size))
        .map(move |range| {
            store
                .get_range(&key, range.start, range.end - 1)
                .map(Bytes::from)
        })
        .take_while(|unit| future::ready(!matches!(unit, Ok(bytes) if bytes.is_empty())))
        .boxed()
}

/// Re-chunk an origin body into units of `chunk_size` bytes.
///
/// Transport chunk boundaries are not preserved. Empty transport chunks are
/// dropped and the final unit may be short. An error ends the sequence.
pub fn origin_units(
    body: BoxStream<'static, Result<Bytes>>,
    chunk_size: usize,
) -> BoxStream<'static, Result<Bytes>> {
    let chunk_size = chunk_size.max(1);

    async_stream::stream! {
        let mut body = body;
        let mut pending = BytesMut::new();

        while let Some(item) = body.next().await {
            match item {
                Ok(bytes) => {
                    pending.extend_from_slice(&bytes);
                    while pending.len() >= chunk_size {
                        yield Ok(pending.split_to(chunk_size).freeze());
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }

        if !pending.is_empty() {
            yield Ok(pending.freeze());
        }
    }
    .boxed()
}

/// What the streamer should do after a unit has been delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pace {
    /// Sleep before producing the next unit.
    Sleep(Duration),
    /// Produce the next unit immediately.
    Continue,
    /// Delivered bytes passed the size limit; stop producing.
    LimitExceeded,
}

/// Per-request streaming state.
///
/// Created when delivery starts, advanced once per delivered unit and
/// discarded when the stream ends.
#[derive(Debug, Clone)]
pub struct StreamSession {
    resolved_length: u64,
    remaining_budget: Duration,
    unit_index: u64,
    total_units: u64,
    bytes_delivered: u64,
    chunk_size: u64,
    max_length: u64,
    populates_cache: bool,
}

impl StreamSession {
    pub fn new(
        resolved_length: u64,
        budget: Duration,
        chunk_size: usize,
        max_length: u64,
        populates_cache: bool,
    ) -> Self {
        let chunk_size = chunk_size.max(1) as u64;
        Self {
            resolved_length,
            remaining_budget: budget,
            unit_index: 0,
            total_units: resolved_length.div_ceil(chunk_size),
            bytes_delivered: 0,
            chunk_size,
            max_length,
            populates_cache,
        }
    }

    /// Account for one delivered unit of `bytes` that took `elapsed` since the
    /// previous mark, and decide how to pace the next one.
    ///
    /// The remaining unit count is derived from the bytes still expected, not
    /// from how many units the source has produced.
    pub fn record(&mut self, bytes: usize, elapsed: Duration) -> Pace {
        self.unit_index += 1;
        self.bytes_delivered += bytes as u64;
        self.remaining_budget = self.remaining_budget.saturating_sub(elapsed);

        if self.bytes_delivered > self.max_length {
            return Pace::LimitExceeded;
        }

        let remaining_units = self.remaining_units();
        if !self.remaining_budget.is_zero() && remaining_units > 0 {
            Pace::Sleep(self.remaining_budget.div_f64(remaining_units as f64))
        } else {
            Pace::Continue
        }
    }

    /// Units still expected from the declared length.
    pub fn remaining_units(&self) -> u64 {
        self.resolved_length
            .saturating_sub(self.bytes_delivered)
            .div_ceil(self.chunk_size)
    }

    pub fn unit_index(&self) -> u64 {
        self.unit_index
    }

    pub fn total_units(&self) -> u64 {
        self.total_units
    }

    pub fn bytes_delivered(&self) -> u64 {
        self.bytes_delivered
    }

    pub fn populates_cache(&self) -> bool {
        self.populates_cache
    }
}

/// Append one unit to the cache on the blocking pool.
async fn append_unit(store: Arc<dyn CacheStore>, key: String, unit: Bytes) -> Result<u64> {
    tokio::task::spawn_blocking(move || store.append(&key, &unit))
        .await
        .map_err(|e| SlowbinError::Store {
            message: format!("Cache append task failed: {}", e),
            source: None,
        })?
}

/// Where a paced stream takes its units from.
pub enum DeliverySource {
    /// Read the resource back from the cache store.
    Cache,
    /// Consume an origin body, writing each unit through to the cache.
    Origin(BoxStream<'static, Result<Bytes>>),
}

impl DeliverySource {
    fn populates_cache(&self) -> bool {
        matches!(self, DeliverySource::Origin(_))
    }
}

/// Paces resource delivery and populates the cache on origin fetches.
#[derive(Clone)]
pub struct PacedStreamer {
    store: Arc<dyn CacheStore>,
    config: Arc<ThrottleConfig>,
}

impl PacedStreamer {
    pub fn new(store: Arc<dyn CacheStore>, config: Arc<ThrottleConfig>) -> Self {
        Self { store, config }
    }

    /// Deliver `length` bytes of `key` from `source` over `budget`.
    ///
    /// The returned stream is lazy, finite and not restartable. Source and
    /// cache-store errors are yielded once and end the stream; the size guard
    /// ends it silently.
    pub fn stream(
        &self,
        key: &str,
        length: u64,
        budget: Duration,
        source: DeliverySource,
    ) -> BoxStream<'static, Result<Bytes>> {
        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        let key = key.to_string();
        let populate = source.populates_cache();

        async_stream::stream! {
            let mut units = match source {
                DeliverySource::Cache => {
                    cache_units(Arc::clone(&store), key.clone(), length, config.chunk_size)
                }
                DeliverySource::Origin(body) => origin_units(body, config.chunk_size),
            };

            let mut session = StreamSession::new(
                length,
                budget,
                config.chunk_size,
                config.max_length,
                populate,
            );
            let started = Instant::now();
            let mut mark = started;

            while let Some(unit) = units.next().await {
                let unit = match unit {
                    Ok(unit) => unit,
                    Err(e) => {
                        warn!("Stream for {} failed after {} bytes: {}", key, session.bytes_delivered(), e);
                        yield Err(e);
                        return;
                    }
                };
                let unit_len = unit.len();

                yield Ok(unit.clone());

                if session.populates_cache() {
                    if let Err(e) = append_unit(Arc::clone(&store), key.clone(), unit).await {
                        warn!("Failed to append to cache for {}: {}", key, e);
                        yield Err(e);
                        return;
                    }
                }

                let elapsed = mark.elapsed();
                mark = Instant::now();

                match session.record(unit_len, elapsed) {
                    Pace::LimitExceeded => {
                        warn!(
                            "Stream for {} passed the {} limit after {} bytes, stopping",
                            key, config.max_length_human, session.bytes_delivered()
                        );
                        return;
                    }
                    Pace::Sleep(delay) => {
                        debug!(
                            "Unit {}/{} of {} delivered, sleeping {:?}",
                            session.unit_index(), session.total_units(), key, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    Pace::Continue => {
                        debug!(
                            "Unit {}/{} of {} delivered",
                            session.unit_index(), session.total_units(), key
                        );
                    }
                }
            }

            if session.populates_cache() {
                let refreshed = store
                    .expire(&key, config.cache_ttl)
                    .and_then(|_| store.expire(&mimetype_key(&key), config.cache_ttl));
                if let Err(e) = refreshed {
                    warn!("Failed to set cache expiry for {}: {}", key, e);
                }
            }

            info!(
                "Delivered {} bytes of {} in {} units over {:?}{}",
                session.bytes_delivered(),
                key,
                session.unit_index(),
                started.elapsed(),
                if session.populates_cache() { " (cached)" } else { "" }
            );
        }
        .boxed()
    }
}
