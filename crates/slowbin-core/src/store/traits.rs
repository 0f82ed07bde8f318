//! Cache store trait.

use crate::error::Result;
use std::time::Duration;

/// Byte-string key/value store with per-key expiry.
///
/// This is the write-through cache behind every throttled fetch. Semantics
/// follow a string-valued key/value server:
/// - `set` replaces the value and clears any expiry
/// - `append` creates the key when it is absent
/// - expired keys behave as absent for every operation
///
/// All operations are synchronous to match rusqlite's API.
pub trait CacheStore: Send + Sync {
    /// Check whether a live (unexpired) key exists.
    fn exists(&self, key: &str) -> Result<bool>;

    /// Get the full value of a key.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Read the bytes in `[start, end_inclusive]`.
    ///
    /// The window is clamped to the stored length; a missing key or an empty
    /// window yields an empty buffer.
    fn get_range(&self, key: &str, start: u64, end_inclusive: u64) -> Result<Vec<u8>>;

    /// Length of the stored value in bytes (0 for a missing key).
    fn string_length(&self, key: &str) -> Result<u64>;

    /// Replace the value of a key, clearing any expiry.
    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Append bytes to a key, returning the new length.
    fn append(&self, key: &str, value: &[u8]) -> Result<u64>;

    /// Set a key's time-to-live. Returns `false` if the key does not exist.
    fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remaining time-to-live of a key.
    ///
    /// `None` when the key is missing or has no expiry.
    fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Remove expired keys. Returns the number of keys removed.
    fn cleanup_expired(&self) -> Result<usize>;
}

/// Key of the mimetype record stored alongside a resource's content.
pub fn mimetype_key(resource_key: &str) -> String {
    format!("{}:mimetype", resource_key)
}
