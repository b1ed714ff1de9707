// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] drains the [`OperationQueue`] through the
//! [`OperationProcessor`] and applies the retry budget:
//!
//! ```text
//! list() ──▶ for each op (FIFO) ──▶ process ──┬─ success ──────────▶ removed
//!                                             ├─ fail, budget left ─▶ requeued (retry_count + 1)
//!                                             └─ fail, exhausted ───▶ dropped  (failed += 1)
//!                                   ──▶ commit survivors in one write
//! ```
//!
//! Passes are serialized: at most one `list → process → commit` cycle is in
//! flight per engine.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fastlandz_sync::{
//!     NetworkMonitor, OperationProcessor, OperationQueue, SyncConfig, SyncEngine,
//!     storage::memory::{MemoryLocalStore, MemoryRemoteStore},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let queue = Arc::new(OperationQueue::new(Arc::new(MemoryLocalStore::new())));
//! let processor = OperationProcessor::new(Arc::new(MemoryRemoteStore::new()));
//! let monitor = Arc::new(NetworkMonitor::new(true));
//!
//! let engine = SyncEngine::new(queue, processor, monitor, &SyncConfig::default());
//! let result = engine.drain().await.expect("local storage failed");
//! println!("processed {} failed {}", result.processed, result.failed);
//! # }
//! ```

mod types;
mod drain;

pub use types::{DrainResult, SyncState, SyncStats};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::processor::OperationProcessor;
use crate::queue::{OperationQueue, QueueStatus};
use crate::storage::StorageError;

pub struct SyncEngine {
    pub(super) queue: Arc<OperationQueue>,
    pub(super) processor: OperationProcessor,
    pub(super) connectivity: Arc<dyn Connectivity>,
    pub(super) max_retries: u32,

    /// Held for the whole of a pass
    pub(super) drain_lock: Mutex<()>,

    pub(super) state: watch::Sender<SyncState>,
    pub(super) state_rx: watch::Receiver<SyncState>,

    pub(super) total_processed: AtomicU64,
    pub(super) total_failed: AtomicU64,
    pub(super) passes: AtomicU64,
}

impl SyncEngine {
    pub fn new(
        queue: Arc<OperationQueue>,
        processor: OperationProcessor,
        connectivity: Arc<dyn Connectivity>,
        config: &SyncConfig,
    ) -> Self {
        let (state, state_rx) = watch::channel(SyncState::Idle);
        Self {
            queue,
            processor,
            connectivity,
            max_retries: config.max_retries,
            drain_lock: Mutex::new(()),
            state,
            state_rx,
            total_processed: AtomicU64::new(0),
            total_failed: AtomicU64::new(0),
            passes: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        *self.state_rx.borrow()
    }

    /// Receiver to watch `Idle ⇄ Draining` transitions.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<SyncState> {
        self.state_rx.clone()
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    pub fn connectivity(&self) -> &Arc<dyn Connectivity> {
        &self.connectivity
    }

    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Check whether the remote store answers and feed the result to the
    /// connectivity oracle. Returns the resulting reachability.
    pub async fn probe(&self) -> bool {
        if let Some(result) = self.processor.health_check().await {
            crate::connectivity::observe(self.connectivity.as_ref(), &result);
        }
        self.connectivity.is_online()
    }

    /// Queue diagnostics. May lag behind concurrent enqueues.
    pub async fn status(&self) -> Result<QueueStatus, StorageError> {
        self.queue.status().await
    }

    #[must_use]
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            total_processed: self.total_processed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            passes: self.passes.load(Ordering::Relaxed),
            draining: self.state() == SyncState::Draining,
        }
    }
}
