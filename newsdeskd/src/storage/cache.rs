use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};
use thiserror::Error;
use time::OffsetDateTime;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

pub const GUEST_BOOKMARKS_KEY: &str = "guest:bookmarks";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn bookmarks_key(user_id: &str) -> String {
    format!("bookmarks:{user_id}")
}

pub fn queue_key(user_id: &str) -> String {
    format!("queue:{user_id}")
}

/// Opaque key/value blob store backing the bookmark list and the pending queue.
///
/// Nothing stored here is authoritative: callers go through [`CacheStore::load_list`]
/// and [`CacheStore::store_list`], which degrade to an empty slot instead of failing.
#[derive(Clone)]
pub struct CacheStore {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Sqlite(SqlitePool),
    Memory(Arc<Mutex<HashMap<String, Vec<u8>>>>),
}

impl CacheStore {
    pub async fn open(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self, CacheError> {
        MIGRATOR.run(&pool).await?;
        Ok(Self {
            backend: Backend::Sqlite(pool),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Arc::default()),
        }
    }

    pub async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match &self.backend {
            Backend::Sqlite(pool) => {
                let row = sqlx::query("SELECT value FROM kv WHERE key = ?1")
                    .bind(key)
                    .fetch_optional(pool)
                    .await?;
                Ok(match row {
                    Some(row) => Some(row.try_get("value")?),
                    None => None,
                })
            }
            Backend::Memory(map) => {
                let slots = map.lock().unwrap_or_else(PoisonError::into_inner);
                Ok(slots.get(key).cloned())
            }
        }
    }

    pub async fn write(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        match &self.backend {
            Backend::Sqlite(pool) => {
                sqlx::query(
                    "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at",
                )
                .bind(key)
                .bind(value)
                .bind(OffsetDateTime::now_utc().unix_timestamp())
                .execute(pool)
                .await?;
            }
            Backend::Memory(map) => {
                map.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key.to_string(), value.to_vec());
            }
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match &self.backend {
            Backend::Sqlite(pool) => {
                sqlx::query("DELETE FROM kv WHERE key = ?1")
                    .bind(key)
                    .execute(pool)
                    .await?;
            }
            Backend::Memory(map) => {
                map.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(key);
            }
        }
        Ok(())
    }

    /// Drops every slot owned by `user_id`.
    pub async fn clear_user(&self, user_id: &str) -> Result<(), CacheError> {
        self.delete(&bookmarks_key(user_id)).await?;
        self.delete(&queue_key(user_id)).await
    }

    /// Reads a JSON array slot. Unreadable or malformed slots are reset to `[]`.
    pub async fn load_list<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let bytes = match self.read(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::warn!(key, error = %err, "cache read failed, resetting slot");
                self.reset(key).await;
                return Vec::new();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(items) => items,
            Err(err) => {
                tracing::warn!(key, error = %err, "malformed cache payload, resetting slot");
                self.reset(key).await;
                Vec::new()
            }
        }
    }

    /// Replaces a JSON array slot. Failures are logged; the caller's in-memory
    /// copy stays the source of truth for the session.
    pub async fn store_list<T: Serialize>(&self, key: &str, items: &[T]) {
        let bytes = match serde_json::to_vec(items) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to encode cache payload");
                return;
            }
        };
        if let Err(err) = self.write(key, &bytes).await {
            tracing::warn!(key, error = %err, "cache write failed");
        }
    }

    async fn reset(&self, key: &str) {
        if let Err(err) = self.write(key, b"[]").await {
            tracing::warn!(key, error = %err, "failed to reset cache slot");
        }
    }
}
