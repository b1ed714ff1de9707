// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed durable local store.
//!
//! A single key-value table:
//! ```sql
//! CREATE TABLE kv_store (
//!   key TEXT PRIMARY KEY,
//!   value TEXT NOT NULL,
//!   updated_at INTEGER NOT NULL
//! )
//! ```
//!
//! Every `set` is one `INSERT .. ON CONFLICT DO UPDATE` statement, so a crash
//! mid-write leaves either the old value or the new one. The queue relies on
//! this to persist its whole list atomically.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use sqlx::Row as _;
use tracing::{debug, info};

use super::traits::{LocalStore, StorageError};
use crate::resilience::retry::{retry, RetryConfig};

pub struct SqliteLocalStore {
    pool: SqlitePool,
    path: String,
}

impl SqliteLocalStore {
    /// Open (or create) the store at `path` with startup-mode retry.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_string_lossy().to_string();
        let url = format!("sqlite://{}", path);

        // WAL journal: readers never observe a half-applied write
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StorageError::Backend(format!("Invalid SQLite path {}: {}", path, e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = retry("local_store_open", &RetryConfig::startup(), || {
            let options = options.clone();
            async move {
                SqlitePoolOptions::new()
                    .max_connections(4)
                    .acquire_timeout(Duration::from_secs(10))
                    .connect_with(options)
                    .await
                    .map_err(|e| StorageError::Backend(e.to_string()))
            }
        })
        .await?;

        let store = Self { pool, path };
        store.init_schema().await?;
        info!(path = %store.path, "Local store opened");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(format!("Failed to create kv_store: {}", e)))?;
        Ok(())
    }

    /// Path of the SQLite file.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Close the pool, flushing WAL contents to the main database file.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LocalStore for SqliteLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        row.map(|r| r.try_get::<String, _>("value"))
            .transpose()
            .map_err(|e| StorageError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64;

        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Backend(e.to_string()))?;

        debug!(key, bytes = value.len(), "Local store write");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }
}
