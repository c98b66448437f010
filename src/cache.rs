use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

const KEY_PREFIX: &str = "flag_info:";

/// Key under which the combined info for `flag_name` is stored.
pub fn cache_key(flag_name: &str) -> String {
    format!("{}{}", KEY_PREFIX, flag_name)
}

/// A shared key/value store with per-entry time-to-live.
#[async_trait]
pub trait CacheStore {
    /// Returns `None` for missing or expired keys.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    /// Inserts or overwrites `key`, restarting its TTL.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;
}

struct Entry {
    value: String,
    expires_at: Instant,
}

pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drops every expired entry, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    /// Number of entries held, expired or not.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }

        // Expired: evict unless someone rewrote it in the meantime.
        let mut entries = self.entries.write().await;
        if entries
            .get(key)
            .is_some_and(|entry| entry.expires_at <= Instant::now())
        {
            entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| format!("TTL of {:?} is out of range", ttl))?;
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }
}

#[cfg(feature = "sqlite-cache")]
pub use sqlite::SqliteStore;

#[cfg(feature = "sqlite-cache")]
mod sqlite {
    use std::path::Path;
    use std::sync::{Arc, Mutex, MutexGuard};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use rusqlite::{params, Connection, OptionalExtension};

    use super::{CacheStore, StoreError};

    /// File-backed store, usable by several processes on the same host.
    /// Queries run on the blocking thread pool.
    pub struct SqliteStore {
        conn: Arc<Mutex<Connection>>,
    }

    impl SqliteStore {
        pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
            let conn = Connection::open(path)?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS flag_cache (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    expires_at INTEGER NOT NULL
                )",
                [],
            )?;
            Ok(Self {
                conn: Arc::new(Mutex::new(conn)),
            })
        }

        /// Deletes expired rows, returning how many were removed. Blocks.
        pub fn purge_expired(&self) -> Result<usize, StoreError> {
            let conn = lock(&self.conn)?;
            let removed = conn.execute(
                "DELETE FROM flag_cache WHERE expires_at <= ?1",
                params![now_millis()],
            )?;
            Ok(removed)
        }

        async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
        where
            T: Send + 'static,
            F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        {
            let conn = self.conn.clone();
            tokio::task::spawn_blocking(move || f(&*lock(&conn)?)).await?
        }
    }

    fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
        conn.lock().map_err(|_| "sqlite cache connection poisoned".into())
    }

    fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn expiry_millis(ttl: Duration) -> Result<i64, StoreError> {
        i64::try_from(ttl.as_millis())
            .ok()
            .and_then(|ms| now_millis().checked_add(ms))
            .ok_or_else(|| format!("TTL of {:?} is out of range", ttl).into())
    }

    #[async_trait]
    impl CacheStore for SqliteStore {
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            let key = key.to_string();
            self.with_conn(move |conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM flag_cache WHERE key = ?1 AND expires_at > ?2",
                        params![key, now_millis()],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await
        }

        async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
            let expires_at = expiry_millis(ttl)?;
            let key = key.to_string();
            self.with_conn(move |conn| {
                conn.execute(
                    "INSERT INTO flag_cache (key, value, expires_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, expires_at = excluded.expires_at",
                    params![key, value, expires_at],
                )?;
                Ok(())
            })
            .await
        }
    }
}
