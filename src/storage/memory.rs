// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory stores.
//!
//! [`MemoryLocalStore`] stands in for device storage and [`MemoryRemoteStore`]
//! for the hosted database. Both support fault injection so the offline and
//! rejection paths can be driven deterministically.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::traits::{Filter, LocalStore, RemoteError, RemoteStore, Row, StorageError};

pub struct MemoryLocalStore {
    data: DashMap<String, String>,
    fail_writes: AtomicBool,
}

impl MemoryLocalStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `set` fail as if the quota were exceeded.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Overwrite a key directly, bypassing fault injection.
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.data.insert(key.to_string(), value.to_string());
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.get(key).map(|r| r.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("local storage quota exceeded".into()));
        }
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }
}

/// One call observed by [`MemoryRemoteStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteCall {
    pub op: &'static str,
    pub table: String,
    pub filters: Vec<Filter>,
}

/// Table-addressed row store held in memory.
pub struct MemoryRemoteStore {
    tables: DashMap<String, Vec<Row>>,
    /// Returned by every call while set.
    failure: RwLock<Option<RemoteError>>,
    /// Per-table failures, checked after `failure`.
    table_failures: DashMap<String, RemoteError>,
    calls: Mutex<Vec<RemoteCall>>,
}

impl MemoryRemoteStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: DashMap::new(),
            failure: RwLock::new(None),
            table_failures: DashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Fail every call with `err` until cleared with `None`.
    pub fn set_failure(&self, err: Option<RemoteError>) {
        *self.failure.write() = err;
    }

    pub fn fail_table(&self, table: &str, err: RemoteError) {
        self.table_failures.insert(table.to_string(), err);
    }

    pub fn clear_table_failure(&self, table: &str) {
        self.table_failures.remove(table);
    }

    /// Seed a row without recording a call.
    pub fn seed(&self, table: &str, row: Row) {
        self.tables.entry(table.to_string()).or_default().push(row);
    }

    /// Snapshot of every row in `table`.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.get(table).map(|t| t.value().clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    fn record(&self, op: &'static str, table: &str, filters: &[Filter]) -> Result<(), RemoteError> {
        self.calls.lock().push(RemoteCall {
            op,
            table: table.to_string(),
            filters: filters.to_vec(),
        });

        if let Some(err) = self.failure.read().clone() {
            return Err(err);
        }
        if let Some(err) = self.table_failures.get(table) {
            return Err(err.value().clone());
        }
        Ok(())
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_all(row: &Row, filters: &[Filter]) -> bool {
    filters.iter().all(|f| f.matches(row))
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn select(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, RemoteError> {
        self.record("select", table, filters)?;
        Ok(self
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|r| matches_all(r, filters)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, RemoteError> {
        self.record("insert", table, &[])?;
        if !row.contains_key("id") {
            row.insert("id".into(), Value::String(uuid::Uuid::new_v4().to_string()));
        }
        self.tables.entry(table.to_string()).or_default().push(row.clone());
        Ok(row)
    }

    async fn update(&self, table: &str, values: Row, filters: &[Filter]) -> Result<u64, RemoteError> {
        self.record("update", table, filters)?;
        let mut touched = 0;
        if let Some(mut rows) = self.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| matches_all(r, filters)) {
                for (column, value) in &values {
                    row.insert(column.clone(), value.clone());
                }
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<u64, RemoteError> {
        self.record("delete", table, filters)?;
        let mut removed = 0;
        if let Some(mut rows) = self.tables.get_mut(table) {
            let before = rows.len();
            rows.retain(|r| !matches_all(r, filters));
            removed = (before - rows.len()) as u64;
        }
        Ok(removed)
    }
}
