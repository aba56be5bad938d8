//! Named response caches: SQLite on disk, or a map in memory.
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::http::FetchResponse;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("cache migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Storage behind the offline worker. Each cache is a map from request URL
/// to a buffered response.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create `cache` if it does not exist yet.
    async fn open(&self, cache: &str) -> Result<(), CacheError>;

    async fn cache_names(&self) -> Result<Vec<String>, CacheError>;

    /// Drop `cache` and everything in it. Returns whether it existed.
    async fn delete_cache(&self, cache: &str) -> Result<bool, CacheError>;

    async fn lookup(&self, cache: &str, key: &str) -> Result<Option<FetchResponse>, CacheError>;

    async fn put(&self, cache: &str, key: &str, response: &FetchResponse)
        -> Result<(), CacheError>;

    /// Store every entry or none of them.
    async fn put_all(
        &self,
        cache: &str,
        entries: &[(String, FetchResponse)],
    ) -> Result<(), CacheError>;
}

pub struct SqliteCacheStorage {
    pool: SqlitePool,
}

impl SqliteCacheStorage {
    /// Open (creating if needed) the database at `database_url` and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self, CacheError> {
        let normalized = prepare_sqlite_url(database_url);
        let options = SqliteConnectOptions::from_str(&normalized)?.create_if_missing(true);
        // Every connection to `:memory:` is a separate database.
        let max_connections = if normalized.starts_with("sqlite::memory") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Expand a leading `~/` in a file-backed SQLite URL and make sure the parent
/// directory exists. In-memory URLs pass through.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") || url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = format!("sqlite://{}", expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

async fn insert_entry<'e, E>(
    executor: E,
    cache: &str,
    key: &str,
    response: &FetchResponse,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO entries (cache, url, status, content_type, body, stored_at) VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(cache, url) DO UPDATE SET status = excluded.status, content_type = excluded.content_type,
             body = excluded.body, stored_at = excluded.stored_at",
    )
    .bind(cache)
    .bind(key)
    .bind(i64::from(response.status))
    .bind(response.content_type.as_deref())
    .bind(response.body.as_slice())
    .bind(Utc::now())
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl CacheStorage for SqliteCacheStorage {
    #[instrument(skip(self))]
    async fn open(&self, cache: &str) -> Result<(), CacheError> {
        sqlx::query("INSERT OR IGNORE INTO caches (name) VALUES (?)")
            .bind(cache)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn cache_names(&self) -> Result<Vec<String>, CacheError> {
        let names = sqlx::query_scalar::<_, String>("SELECT name FROM caches ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }

    #[instrument(skip(self))]
    async fn delete_cache(&self, cache: &str) -> Result<bool, CacheError> {
        let mut tx = self.pool.begin().await?;
        let entries = sqlx::query("DELETE FROM entries WHERE cache = ?")
            .bind(cache)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let deleted = sqlx::query("DELETE FROM caches WHERE name = ?")
            .bind(cache)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        debug!(entries, "deleted cache");
        Ok(deleted > 0)
    }

    async fn lookup(&self, cache: &str, key: &str) -> Result<Option<FetchResponse>, CacheError> {
        let row = sqlx::query(
            "SELECT status, content_type, body FROM entries WHERE cache = ? AND url = ?",
        )
        .bind(cache)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| FetchResponse {
            status: u16::try_from(r.get::<i64, _>("status")).unwrap_or(200),
            content_type: r.get::<Option<String>, _>("content_type"),
            body: r.get::<Vec<u8>, _>("body"),
        }))
    }

    async fn put(
        &self,
        cache: &str,
        key: &str,
        response: &FetchResponse,
    ) -> Result<(), CacheError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT OR IGNORE INTO caches (name) VALUES (?)")
            .bind(cache)
            .execute(&mut *tx)
            .await?;
        insert_entry(&mut *tx, cache, key, response).await?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all, fields(cache = %cache, count = entries.len()))]
    async fn put_all(
        &self,
        cache: &str,
        entries: &[(String, FetchResponse)],
    ) -> Result<(), CacheError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("INSERT OR IGNORE INTO caches (name) VALUES (?)")
            .bind(cache)
            .execute(&mut *tx)
            .await?;
        for (key, response) in entries {
            insert_entry(&mut *tx, cache, key, response).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

/// In-memory storage for tests and for running with `offline.enabled` but no
/// writable data directory.
#[derive(Debug, Default)]
pub struct MemoryCacheStorage {
    caches: RwLock<BTreeMap<String, HashMap<String, FetchResponse>>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, cache: &str) -> usize {
        self.caches
            .read()
            .await
            .get(cache)
            .map(HashMap::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, cache: &str) -> Result<(), CacheError> {
        self.caches
            .write()
            .await
            .entry(cache.to_string())
            .or_default();
        Ok(())
    }

    async fn cache_names(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.caches.read().await.keys().cloned().collect())
    }

    async fn delete_cache(&self, cache: &str) -> Result<bool, CacheError> {
        Ok(self.caches.write().await.remove(cache).is_some())
    }

    async fn lookup(&self, cache: &str, key: &str) -> Result<Option<FetchResponse>, CacheError> {
        Ok(self
            .caches
            .read()
            .await
            .get(cache)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(
        &self,
        cache: &str,
        key: &str,
        response: &FetchResponse,
    ) -> Result<(), CacheError> {
        self.caches
            .write()
            .await
            .entry(cache.to_string())
            .or_default()
            .insert(key.to_string(), response.clone());
        Ok(())
    }

    async fn put_all(
        &self,
        cache: &str,
        entries: &[(String, FetchResponse)],
    ) -> Result<(), CacheError> {
        let mut caches = self.caches.write().await;
        let target = caches.entry(cache.to_string()).or_default();
        for (key, response) in entries {
            target.insert(key.clone(), response.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_sqlite_url_leaves_memory_alone() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(prepare_sqlite_url("postgres://x"), "postgres://x");
    }

    #[test]
    fn prepare_sqlite_url_creates_parent_dir() {
        let td = tempfile::tempdir().unwrap();
        let db = td.path().join("nested").join("offline.db");
        let url = format!("sqlite:{}?mode=rwc", db.display());
        let prepared = prepare_sqlite_url(&url);
        assert_eq!(prepared, format!("sqlite://{}?mode=rwc", db.display()));
        assert!(td.path().join("nested").is_dir());
    }

    #[tokio::test]
    async fn sqlite_storage_replaces_and_deletes() {
        let storage = SqliteCacheStorage::connect("sqlite::memory:").await.unwrap();
        storage.open("v1").await.unwrap();
        storage
            .put("v1", "https://a.test/", &FetchResponse::new(200, Some("text/html"), "old"))
            .await
            .unwrap();
        storage
            .put("v1", "https://a.test/", &FetchResponse::new(200, Some("text/html"), "new"))
            .await
            .unwrap();
        let hit = storage.lookup("v1", "https://a.test/").await.unwrap().unwrap();
        assert_eq!(hit.text(), "new");
        assert_eq!(hit.content_type.as_deref(), Some("text/html"));

        assert!(storage.delete_cache("v1").await.unwrap());
        assert!(!storage.delete_cache("v1").await.unwrap());
        assert!(storage.lookup("v1", "https://a.test/").await.unwrap().is_none());
        assert!(storage.cache_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_storage_put_all_creates_cache() {
        let storage = MemoryCacheStorage::new();
        storage
            .put_all(
                "v1",
                &[
                    ("https://a.test/".into(), FetchResponse::new(200, None, "a")),
                    ("https://a.test/b".into(), FetchResponse::new(200, None, "b")),
                ],
            )
            .await
            .unwrap();
        assert_eq!(storage.cache_names().await.unwrap(), vec!["v1".to_string()]);
        assert_eq!(storage.len("v1").await, 2);
    }
}
