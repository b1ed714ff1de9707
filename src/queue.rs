// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable FIFO of pending operations.
//!
//! The whole queue is one JSON array stored under a single key in the
//! [`LocalStore`]. Every mutation rewrites that key in one `set`, so a reader
//! after a crash sees either the old list or the new one.
//!
//! Read-modify-write cycles (`enqueue`, `commit_pass`, `clear`) are
//! serialized by an async mutex. Without it a drain committing its survivors
//! could overwrite an operation a mutator appended after the drain read the
//! queue.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::operation::{OperationKind, QueuedOperation};
use crate::storage::{LocalStore, StorageError};

/// Diagnostic snapshot of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    /// Enqueue time of the oldest pending operation (epoch millis)
    pub oldest_timestamp: Option<i64>,
}

pub struct OperationQueue {
    store: Arc<dyn LocalStore>,
    key: String,
    write_lock: Mutex<()>,
}

impl OperationQueue {
    /// Default storage key for the queue.
    pub const DEFAULT_KEY: &'static str = "fastlandz_sync_queue";

    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self::with_key(store, Self::DEFAULT_KEY)
    }

    pub fn with_key(store: Arc<dyn LocalStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append a new operation and persist the queue.
    ///
    /// Storage failures are returned to the caller: the write is not queued.
    #[tracing::instrument(skip(self, kind, payload), fields(kind = %kind))]
    pub async fn enqueue(&self, kind: OperationKind, payload: Value) -> Result<QueuedOperation, StorageError> {
        let op = QueuedOperation::new(kind, payload);

        let _guard = self.write_lock.lock().await;
        let mut ops = self.load().await?;
        ops.push(op.clone());
        self.persist(&ops).await?;

        debug!(id = %op.id, pending = ops.len(), "Operation queued");
        crate::metrics::record_enqueue(op.kind.as_str());
        crate::metrics::set_queue_depth(ops.len());
        Ok(op)
    }

    /// Current contents in FIFO order.
    pub async fn list(&self) -> Result<Vec<QueuedOperation>, StorageError> {
        self.load().await
    }

    /// Overwrite the persisted queue with `ops` in one write.
    pub async fn replace(&self, ops: &[QueuedOperation]) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.persist(ops).await?;
        crate::metrics::set_queue_depth(ops.len());
        Ok(())
    }

    /// Commit the result of a drain pass.
    ///
    /// `snapshot` is what the pass read; `survivors` is what it keeps.
    /// Operations present now but absent from `snapshot` were enqueued during
    /// the pass and are kept after the survivors. Survivors no longer present
    /// were removed during the pass (by [`clear`](Self::clear) or
    /// [`replace`](Self::replace)) and stay removed. Returns the new length.
    pub async fn commit_pass(
        &self,
        snapshot: &[QueuedOperation],
        survivors: Vec<QueuedOperation>,
    ) -> Result<usize, StorageError> {
        let _guard = self.write_lock.lock().await;

        let seen: HashSet<&str> = snapshot.iter().map(|op| op.id.as_str()).collect();
        let current = self.load().await?;
        let present: HashSet<&str> = current.iter().map(|op| op.id.as_str()).collect();

        let kept = survivors.len();
        let mut next: Vec<_> = survivors
            .into_iter()
            .filter(|op| present.contains(op.id.as_str()))
            .collect();
        if next.len() < kept {
            info!(discarded = kept - next.len(), "Survivors removed from the queue during drain");
        }

        let late: Vec<_> = current.iter().filter(|op| !seen.contains(op.id.as_str())).cloned().collect();
        if !late.is_empty() {
            debug!(late = late.len(), "Keeping operations enqueued during drain");
        }
        next.extend(late);

        self.persist(&next).await?;
        crate::metrics::set_queue_depth(next.len());
        Ok(next.len())
    }

    /// Drop every pending operation.
    pub async fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().await;
        self.store.remove(&self.key).await?;
        crate::metrics::set_queue_depth(0);
        info!(key = %self.key, "Sync queue cleared");
        Ok(())
    }

    pub async fn status(&self) -> Result<QueueStatus, StorageError> {
        let ops = self.load().await?;
        Ok(QueueStatus {
            pending: ops.len(),
            oldest_timestamp: ops.iter().map(|op| op.enqueued_at).min(),
        })
    }

    pub async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.load().await?.is_empty())
    }

    async fn load(&self) -> Result<Vec<QueuedOperation>, StorageError> {
        let Some(raw) = self.store.get(&self.key).await? else {
            return Ok(Vec::new());
        };

        serde_json::from_str(&raw).map_err(|e| {
            error!(key = %self.key, error = %e, "Sync queue in local storage is unreadable");
            StorageError::Corruption {
                key: self.key.clone(),
                reason: e.to_string(),
            }
        })
    }

    async fn persist(&self, ops: &[QueuedOperation]) -> Result<(), StorageError> {
        if ops.is_empty() {
            return self.store.remove(&self.key).await;
        }
        let raw = serde_json::to_string(ops)?;
        self.store.set(&self.key, &raw).await
    }
}
