//! SQLite cache store implementation

use super::store::{CacheEntry, CacheStore, KindStats, Payload, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rail_query::QueryKind;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Path to SQLite database file
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,

    /// Enable WAL mode for better concurrency
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

fn default_cache_path() -> PathBuf {
    // Always use ~/.config for consistency across platforms (macOS, Linux)
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("railproxy");
    path.push("cache.db");
    path
}

fn default_wal_mode() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_cache_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

/// How long a statement waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed cache store, one table per query kind
///
/// The connection lives behind a mutex and every statement runs on the
/// blocking thread pool, so callers on the async runtime never stall.
pub struct SqliteStore {
    conn: Arc<Mutex<Option<Connection>>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create a cache database
    pub fn open(config: &CacheConfig) -> Result<Self, StoreError> {
        // Create parent directory if needed
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %config.path.display(), "Opening cache database");

        let conn = Connection::open(&config.path)?;

        // Enable WAL mode for better concurrency
        if config.wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }

        Self::from_connection(conn, Some(config.path.clone()))
    }

    /// Open a private in-memory database
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, StoreError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
            path,
        })
    }

    /// Get the database path (`None` for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            let conn = guard.as_ref().ok_or(StoreError::Closed)?;
            f(conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

/// Table holding entries of the given kind
fn table_name(kind: QueryKind) -> &'static str {
    match kind {
        QueryKind::RouteSearch => "search_train",
        QueryKind::LiveStatus => "live_train_status",
        QueryKind::BookingStatus => "pnr_status",
        QueryKind::Schedule => "train_schedule",
    }
}

/// Initialize database schema
fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    let mut sql = String::new();
    for kind in QueryKind::ALL {
        sql.push_str(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                key TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );
            "#,
            table = table_name(kind)
        ));
    }
    conn.execute_batch(&sql)?;
    Ok(())
}

fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, kind: QueryKind, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let row: Option<(String, i64)> = conn
                .query_row(
                    &format!("SELECT data, timestamp FROM {} WHERE key = ?1", table_name(kind)),
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let Some((data, timestamp)) = row else {
                return Ok(None);
            };

            // A row we cannot decode is treated as absent so the next fetch
            // overwrites it.
            let payload = match Payload::from_json_text(data) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(kind = %kind, key = %key, error = %e, "Ignoring undecodable cache entry");
                    return Ok(None);
                }
            };
            let Some(stored_at) = millis_to_datetime(timestamp) else {
                tracing::warn!(kind = %kind, key = %key, timestamp, "Ignoring cache entry with invalid timestamp");
                return Ok(None);
            };

            Ok(Some(CacheEntry {
                kind,
                key,
                payload,
                stored_at,
            }))
        })
        .await
    }

    async fn put(
        &self,
        kind: QueryKind,
        key: &str,
        payload: Payload,
    ) -> Result<CacheEntry, StoreError> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let millis = Utc::now().timestamp_millis();

            // Single statement: either the whole row is replaced or nothing is.
            conn.execute(
                &format!(
                    "INSERT INTO {} (key, data, timestamp) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET data = excluded.data, timestamp = excluded.timestamp",
                    table_name(kind)
                ),
                params![key, payload.as_str(), millis],
            )?;

            tracing::debug!(kind = %kind, key = %key, bytes = payload.len(), "Stored cache entry");

            let stored_at = millis_to_datetime(millis).unwrap_or_else(Utc::now);
            Ok(CacheEntry {
                kind,
                key,
                payload,
                stored_at,
            })
        })
        .await
    }

    async fn stats(&self) -> Result<Vec<KindStats>, StoreError> {
        self.with_conn(|conn| {
            let mut stats = Vec::with_capacity(QueryKind::ALL.len());
            for kind in QueryKind::ALL {
                let (count, newest): (i64, Option<i64>) = conn.query_row(
                    &format!("SELECT COUNT(*), MAX(timestamp) FROM {}", table_name(kind)),
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                stats.push(KindStats {
                    kind,
                    entries: count.max(0) as u64,
                    newest: newest.and_then(millis_to_datetime),
                });
            }
            Ok(stats)
        })
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            match guard.take() {
                Some(conn) => {
                    tracing::info!("Closing cache database");
                    conn.close().map_err(|(_, e)| StoreError::Database(e))
                }
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}
