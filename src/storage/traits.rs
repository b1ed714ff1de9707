// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// A single row from the remote store, column name → value.
pub type Row = Map<String, Value>;

/// Equality predicate on one column (`column = value`).
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Whether `row` satisfies this predicate.
    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

/// Errors from the local durable store.
///
/// None of these are retryable by the sync layer: a write that could not be
/// persisted locally is not safely queued.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found")]
    NotFound,
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Stored data under '{key}' is corrupt: {reason}")]
    Corruption { key: String, reason: String },
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the remote row store.
///
/// The split between transient and application errors decides whether a
/// failed direct write is queued for replay or rolled back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Connection refused, DNS failure, dropped socket.
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    /// Server reachable but temporarily unable to serve (5xx, rate limit).
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    /// The write was understood and refused (constraint, validation).
    #[error("rejected by remote store ({code}): {message}")]
    Rejected { code: String, message: String },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl RemoteError {
    /// Whether replaying the same write later could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout | Self::Unavailable(_))
    }

    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Row-oriented remote store addressed by table name.
///
/// "No row matched" is an empty result, never an error.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, RemoteError>;

    /// Insert a row and return it as stored (including generated columns such as `id`).
    async fn insert(&self, table: &str, row: Row) -> Result<Row, RemoteError>;

    /// Set `values` on every matching row. Returns the number of rows touched.
    async fn update(&self, table: &str, values: Row, filters: &[Filter]) -> Result<u64, RemoteError>;

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, RemoteError>;
}

/// Key-value string store that survives process restarts.
///
/// Each `set` must be atomic from a reader's point of view: a reader sees
/// either the previous value or the new one, never a partial write.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}
