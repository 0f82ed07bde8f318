//! Slowbin Core - throttled streaming of remote resources with a write-through cache.
//!
//! A request names a duration and a URL. The resource is fetched from the
//! origin (or read back from the cache) and delivered in fixed-size units
//! spaced out so the whole transfer takes roughly the requested duration.
//! This crate has no HTTP server; see the `slowbin-server` crate for that.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use slowbin_core::{ReqwestOrigin, SqliteStore, SystemResolver, ThrottleConfig, Throttler};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> slowbin_core::Result<()> {
//!     let throttler = Throttler::new(
//!         ThrottleConfig::default(),
//!         Arc::new(SqliteStore::open("/tmp/slowbin.sqlite")?),
//!         Arc::new(ReqwestOrigin::new()?),
//!         Arc::new(SystemResolver),
//!     )?;
//!
//!     // Take about ten seconds to deliver the file
//!     let mut response = throttler.handle(10, "https://example.com/file.bin").await?;
//!     while let Some(unit) = response.body.next().await {
//!         println!("got {} bytes", unit?.len());
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod origin;
pub mod store;
pub mod stream;
pub mod validate;

// Re-export commonly used types
pub use config::{format_size, NetworkConfig, ServerConfig, ThrottleConfig};
pub use error::{Result, SlowbinError};
pub use fetch::{CacheState, ThrottledResponse, Throttler};
pub use origin::{OriginFetcher, OriginHead, ReqwestOrigin};
pub use store::{mimetype_key, CacheStore, SqliteStore};
pub use stream::{chunk_ranges, DeliverySource, PacedStreamer, Pace, StreamSession};
pub use validate::{HostResolver, StaticResolver, SystemResolver, UrlValidator};
