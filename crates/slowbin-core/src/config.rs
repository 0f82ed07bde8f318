//! Centralized configuration for Slowbin.
//!
//! Throttling limits are carried by [`ThrottleConfig`], which is built once at
//! startup and shared with every request. Network and server constants live in
//! plain associated-constant structs.

use crate::error::{Result, SlowbinError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits and defaults applied to every throttled fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ThrottleConfig {
    /// Largest origin `Content-Length` accepted, in bytes.
    pub max_length: u64,
    /// Human-readable form of `max_length`, used in error messages.
    pub max_length_human: String,
    /// Size of one delivery unit in bytes.
    pub chunk_size: usize,
    /// Largest delivery duration a caller may request, in seconds.
    pub max_rate: u64,
    /// Mimetype used when the origin does not send `Content-Type`.
    pub default_mimetype: String,
    /// Time-to-live of a completed cache entry.
    #[serde(with = "duration_secs")]
    pub cache_ttl: Duration,
}

impl ThrottleConfig {
    /// Default maximum content length (10 MiB).
    pub const DEFAULT_MAX_LENGTH: u64 = 10 * 1024 * 1024;
    /// Default delivery unit size.
    pub const DEFAULT_CHUNK_SIZE: usize = 4096;
    /// Default maximum delivery duration in seconds.
    pub const DEFAULT_MAX_RATE: u64 = 100;
    /// Default mimetype for origins without `Content-Type`.
    pub const DEFAULT_MIMETYPE: &'static str = "application/octet-stream";
    /// Default cache entry lifetime (1 hour).
    pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

    /// Set the maximum content length, refreshing its human-readable form.
    pub fn with_max_length(mut self, max_length: u64) -> Self {
        self.max_length = max_length;
        self.max_length_human = format_size(max_length);
        self
    }

    /// Set the delivery unit size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the maximum delivery duration.
    pub fn with_max_rate(mut self, max_rate: u64) -> Self {
        self.max_rate = max_rate;
        self
    }

    /// Set the fallback mimetype.
    pub fn with_default_mimetype(mut self, mimetype: impl Into<String>) -> Self {
        self.default_mimetype = mimetype.into();
        self
    }

    /// Set the cache entry lifetime.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Check that the limits describe a usable configuration.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(SlowbinError::Config {
                message: "chunk_size must be greater than zero".to_string(),
            });
        }
        if self.max_length == 0 {
            return Err(SlowbinError::Config {
                message: "max_length must be greater than zero".to_string(),
            });
        }
        if self.cache_ttl.as_secs() == 0 {
            return Err(SlowbinError::Config {
                message: "cache_ttl must be at least one second".to_string(),
            });
        }
        Ok(())
    }

    /// Clamp a requested delivery duration to `max_rate`.
    pub fn clamp_rate(&self, requested: u64) -> u64 {
        requested.min(self.max_rate)
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_length: Self::DEFAULT_MAX_LENGTH,
            max_length_human: format_size(Self::DEFAULT_MAX_LENGTH),
            chunk_size: Self::DEFAULT_CHUNK_SIZE,
            max_rate: Self::DEFAULT_MAX_RATE,
            default_mimetype: Self::DEFAULT_MIMETYPE.to_string(),
            cache_ttl: Self::DEFAULT_CACHE_TTL,
        }
    }
}

/// Network-related configuration for origin requests.
pub struct NetworkConfig;

impl NetworkConfig {
    /// Total timeout for HEAD requests. Paced body reads are not bounded.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const USER_AGENT: &'static str = concat!("Slowbin/", env!("CARGO_PKG_VERSION"));
}

/// HTTP server defaults.
pub struct ServerConfig;

impl ServerConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 8000;
    pub const CACHE_DB_FILENAME: &'static str = "slowbin-cache.sqlite";
    pub const JANITOR_INTERVAL: Duration = Duration::from_secs(300);
}

/// Format a byte count with binary units, e.g. `10 MB` for 10 MiB.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if value.fract() == 0.0 {
        format!("{} {}", value as u64, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
