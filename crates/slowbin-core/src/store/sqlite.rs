//! SQLite-based cache store implementation.

use super::traits::CacheStore;
use crate::error::{Result, SlowbinError};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// SQLite-based cache store.
///
/// Values are kept as ordered segments, one per append, so that incremental
/// population stays cheap and range reads only touch overlapping segments.
/// Thread-safe via internal mutex on the connection.
pub struct SqliteStore {
    /// Database connection (wrapped for thread safety).
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) a store at the specified database path.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Create parent directory if needed
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| SlowbinError::Io {
                    message: format!(
                        "Failed to create cache directory {}: {}",
                        parent.display(),
                        e
                    ),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(db_path).map_err(|e| SlowbinError::Store {
            message: format!("Failed to open cache database: {}", e),
            source: Some(e),
        })?;

        // Enable WAL mode for better concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| SlowbinError::Store {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        Self::with_connection(conn)
    }

    /// Create a store that lives only as long as this value.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| SlowbinError::Store {
            message: format!("Failed to open in-memory cache database: {}", e),
            source: Some(e),
        })?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- One row per live key
            CREATE TABLE IF NOT EXISTS cache_keys (
                key TEXT PRIMARY KEY,
                length INTEGER NOT NULL,
                expires_at INTEGER
            );

            -- Index for expiration sweeps
            CREATE INDEX IF NOT EXISTS idx_cache_keys_expires
                ON cache_keys(expires_at);

            -- Value bytes, one segment per write
            CREATE TABLE IF NOT EXISTS cache_segments (
                key TEXT NOT NULL,
                position INTEGER NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (key, position)
            );
            "#,
        )
        .map_err(|e| SlowbinError::Store {
            message: format!("Failed to initialize cache schema: {}", e),
            source: Some(e),
        })?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| SlowbinError::Store {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Drop `key` if its expiry has passed, so callers only ever see live keys.
    fn purge_if_expired(conn: &Connection, key: &str) -> Result<()> {
        let now = Self::now_millis();
        let expired = conn
            .query_row(
                "SELECT 1 FROM cache_keys WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
                params![key, now],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        if expired {
            conn.execute("DELETE FROM cache_segments WHERE key = ?1", params![key])?;
            conn.execute("DELETE FROM cache_keys WHERE key = ?1", params![key])?;
            debug!("Expired cache key {}", key);
        }

        Ok(())
    }

    fn length_of(conn: &Connection, key: &str) -> Result<Option<u64>> {
        let length: Option<i64> = conn
            .query_row(
                "SELECT length FROM cache_keys WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(length.map(|l| l as u64))
    }
}

impl CacheStore for SqliteStore {
    fn exists(&self, key: &str) -> Result<bool> {
        let conn = self.lock()?;
        Self::purge_if_expired(&conn, key)?;
        Ok(Self::length_of(&conn, key)?.is_some())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.lock()?;
        Self::purge_if_expired(&conn, key)?;

        let Some(length) = Self::length_of(&conn, key)? else {
            return Ok(None);
        };

        let mut stmt =
            conn.prepare("SELECT data FROM cache_segments WHERE key = ?1 ORDER BY position")?;
        let mut value = Vec::with_capacity(length as usize);
        for segment in stmt.query_map(params![key], |row| row.get::<_, Vec<u8>>(0))? {
            value.extend_from_slice(&segment?);
        }

        Ok(Some(value))
    }

    fn get_range(&self, key: &str, start: u64, end_inclusive: u64) -> Result<Vec<u8>> {
        let conn = self.lock()?;
        Self::purge_if_expired(&conn, key)?;

        let length = Self::length_of(&conn, key)?.unwrap_or(0);
        if length == 0 || start >= length || start > end_inclusive {
            return Ok(Vec::new());
        }
        let end = end_inclusive.min(length - 1) + 1;

        let mut stmt = conn.prepare(
            r#"
            SELECT position, data FROM cache_segments
            WHERE key = ?1 AND position < ?3 AND position + length(data) > ?2
            ORDER BY position
            "#,
        )?;
        let segments = stmt.query_map(params![key, start as i64, end as i64], |row| {
            Ok((row.get::<_, i64>(0)? as u64, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut value = Vec::with_capacity((end - start) as usize);
        for segment in segments {
            let (offset, data) = segment?;
            let from = start.max(offset) - offset;
            let to = end.min(offset + data.len() as u64) - offset;
            value.extend_from_slice(&data[from as usize..to as usize]);
        }

        Ok(value)
    }

    fn string_length(&self, key: &str) -> Result<u64> {
        let conn = self.lock()?;
        Self::purge_if_expired(&conn, key)?;
        Ok(Self::length_of(&conn, key)?.unwrap_or(0))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM cache_segments WHERE key = ?1", params![key])?;
        tx.execute(
            "INSERT OR REPLACE INTO cache_keys (key, length, expires_at) VALUES (?1, ?2, NULL)",
            params![key, value.len() as i64],
        )?;
        if !value.is_empty() {
            tx.execute(
                "INSERT INTO cache_segments (key, position, data) VALUES (?1, 0, ?2)",
                params![key, value],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn append(&self, key: &str, value: &[u8]) -> Result<u64> {
        let mut conn = self.lock()?;
        Self::purge_if_expired(&conn, key)?;
        let tx = conn.transaction()?;

        let offset = Self::length_of(&tx, key)?.unwrap_or(0);
        let new_length = offset + value.len() as u64;

        tx.execute(
            r#"
            INSERT INTO cache_keys (key, length, expires_at) VALUES (?1, ?2, NULL)
            ON CONFLICT(key) DO UPDATE SET length = excluded.length
            "#,
            params![key, new_length as i64],
        )?;
        if !value.is_empty() {
            tx.execute(
                "INSERT INTO cache_segments (key, position, data) VALUES (?1, ?2, ?3)",
                params![key, offset as i64, value],
            )?;
        }

        tx.commit()?;
        Ok(new_length)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let conn = self.lock()?;
        Self::purge_if_expired(&conn, key)?;

        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Self::now_millis().saturating_add(ttl_millis);
        let updated = conn.execute(
            "UPDATE cache_keys SET expires_at = ?1 WHERE key = ?2",
            params![expires_at, key],
        )?;

        Ok(updated > 0)
    }

    fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let conn = self.lock()?;
        Self::purge_if_expired(&conn, key)?;

        let expires_at: Option<Option<i64>> = conn
            .query_row(
                "SELECT expires_at FROM cache_keys WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(expires_at.flatten().map(|at| {
            let remaining = at.saturating_sub(Self::now_millis()).max(0);
            Duration::from_millis(remaining as u64)
        }))
    }

    fn cleanup_expired(&self) -> Result<usize> {
        let mut conn = self.lock()?;
        let now = Self::now_millis();
        let tx = conn.transaction()?;

        tx.execute(
            r#"
            DELETE FROM cache_segments WHERE key IN (
                SELECT key FROM cache_keys
                WHERE expires_at IS NOT NULL AND expires_at <= ?1
            )
            "#,
            params![now],
        )?;
        let deleted = tx.execute(
            "DELETE FROM cache_keys WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;

        tx.commit()?;

        if deleted > 0 {
            debug!("Cleaned up {} expired cache keys", deleted);
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, SqliteStore) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test_cache.sqlite");
        let store = SqliteStore::open(&db_path).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("cache.sqlite");
        let store = SqliteStore::open(&db_path).unwrap();
        store.set("k", b"v").unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_set_and_get() {
        let (_temp, store) = create_test_store();

        store.set("key1", b"hello world").unwrap();

        assert!(store.exists("key1").unwrap());
        assert_eq!(store.get("key1").unwrap().unwrap(), b"hello world");
        assert_eq!(store.string_length("key1").unwrap(), 11);
    }

    #[test]
    fn test_missing_key() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert!(!store.exists("nope").unwrap());
        assert!(store.get("nope").unwrap().is_none());
        assert_eq!(store.string_length("nope").unwrap(), 0);
        assert!(store.get_range("nope", 0, 10).unwrap().is_empty());
        assert!(!store.expire("nope", Duration::from_secs(10)).unwrap());
    }

    #[test]
    fn test_append_creates_and_extends() {
        let store = SqliteStore::open_in_memory().unwrap();

        assert_eq!(store.append("k", b"abc").unwrap(), 3);
        assert_eq!(store.append("k", b"defg").unwrap(), 7);
        assert_eq!(store.append("k", b"").unwrap(), 7);

        assert_eq!(store.get("k").unwrap().unwrap(), b"abcdefg");
        assert_eq!(store.string_length("k").unwrap(), 7);
    }

    #[test]
    fn test_get_range_across_segments() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.append("k", b"0123").unwrap();
        store.append("k", b"4567").unwrap();
        store.append("k", b"89").unwrap();

        assert_eq!(store.get_range("k", 0, 3).unwrap(), b"0123");
        assert_eq!(store.get_range("k", 2, 5).unwrap(), b"2345");
        assert_eq!(store.get_range("k", 3, 8).unwrap(), b"345678");
        assert_eq!(store.get_range("k", 8, 100).unwrap(), b"89");
        assert_eq!(store.get_range("k", 9, 9).unwrap(), b"9");
    }

    #[test]
    fn test_get_range_out_of_bounds() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("k", b"hello").unwrap();

        assert!(store.get_range("k", 5, 10).unwrap().is_empty());
        assert!(store.get_range("k", 3, 2).unwrap().is_empty());
    }

    #[test]
    fn test_set_replaces_segments_and_clears_ttl() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.append("k", b"old").unwrap();
        store.append("k", b"data").unwrap();
        store.expire("k", Duration::ZERO).unwrap();

        store.set("k", b"new").unwrap();
        assert_eq!(store.get("k").unwrap().unwrap(), b"new");

        // Without a TTL the key survives a sweep
        assert_eq!(store.cleanup_expired().unwrap(), 0);
        assert!(store.exists("k").unwrap());
    }

    #[test]
    fn test_expired_key_is_absent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("k", b"value").unwrap();
        assert!(store.expire("k", Duration::ZERO).unwrap());

        assert!(!store.exists("k").unwrap());
        assert!(store.get("k").unwrap().is_none());
        assert_eq!(store.string_length("k").unwrap(), 0);
    }

    #[test]
    fn test_append_after_expiry_starts_fresh() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("k", b"stale").unwrap();
        store.expire("k", Duration::ZERO).unwrap();

        assert_eq!(store.append("k", b"fresh").unwrap(), 5);
        assert_eq!(store.get("k").unwrap().unwrap(), b"fresh");
    }

    #[test]
    fn test_expire_refresh_keeps_bytes() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.append("k", b"abc").unwrap();

        for _ in 0..3 {
            assert!(store.expire("k", Duration::from_secs(3600)).unwrap());
        }

        assert_eq!(store.get("k").unwrap().unwrap(), b"abc");
        let ttl = store.ttl("k").unwrap().unwrap();
        assert!(ttl > Duration::from_secs(3590));
    }

    #[test]
    fn test_ttl_absent_without_expiry() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.ttl("missing").unwrap().is_none());

        store.append("k", b"abc").unwrap();
        assert!(store.ttl("k").unwrap().is_none());
    }

    #[test]
    fn test_cleanup_expired() {
        let (_temp, store) = create_test_store();

        store.set("old1", b"data").unwrap();
        store.set("old2", b"data").unwrap();
        store.set("new1", b"data").unwrap();
        store.expire("old1", Duration::ZERO).unwrap();
        store.expire("old2", Duration::ZERO).unwrap();
        store.expire("new1", Duration::from_secs(3600)).unwrap();

        let cleaned = store.cleanup_expired().unwrap();
        assert_eq!(cleaned, 2);

        assert!(!store.exists("old1").unwrap());
        assert!(!store.exists("old2").unwrap());
        assert!(store.exists("new1").unwrap());
    }

    #[test]
    fn test_binary_values() {
        let store = SqliteStore::open_in_memory().unwrap();
        let bytes: Vec<u8> = (0..=255).collect();
        store.append("bin", &bytes[..100]).unwrap();
        store.append("bin", &bytes[100..]).unwrap();

        assert_eq!(store.get("bin").unwrap().unwrap(), bytes);
        assert_eq!(store.get_range("bin", 250, 255).unwrap(), &bytes[250..]);
    }
}
