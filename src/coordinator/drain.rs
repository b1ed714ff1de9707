// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Drain passes.

use std::sync::atomic::Ordering;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::connectivity::Connectivity;
use crate::operation::Settled;
use crate::processor::{FailureReason, ProcessOutcome};
use crate::storage::StorageError;

use super::{DrainResult, SyncEngine, SyncState};

impl SyncEngine {
    /// Run one pass over the queue.
    ///
    /// Returns `{0, 0}` without touching the processor when offline or when
    /// the queue is empty. An overlapping call waits for the pass in flight
    /// and then runs its own.
    ///
    /// Errors only when local storage cannot be read or the surviving queue
    /// cannot be written. Remote writes already applied in that pass will be
    /// replayed on the next one.
    #[tracing::instrument(skip(self))]
    pub async fn drain(&self) -> Result<DrainResult, StorageError> {
        let _guard = self.drain_lock.lock().await;
        self.drain_pass().await
    }

    /// Like [`drain`](Self::drain), but returns `None` immediately if a pass
    /// is already in flight.
    pub async fn try_drain(&self) -> Option<Result<DrainResult, StorageError>> {
        let _guard = self.drain_lock.try_lock().ok()?;
        Some(self.drain_pass().await)
    }

    async fn drain_pass(&self) -> Result<DrainResult, StorageError> {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping drain");
            return Ok(DrainResult::default());
        }

        let snapshot = self.queue.list().await?;
        if snapshot.is_empty() {
            return Ok(DrainResult::default());
        }

        let _ = self.state.send(SyncState::Draining);
        let _idle = IdleGuard(&self.state);

        let start = Instant::now();
        info!(pending = snapshot.len(), "Draining sync queue");

        let mut result = DrainResult::default();
        let mut survivors = Vec::with_capacity(snapshot.len());

        for op in snapshot.iter().cloned() {
            let attempt = op.begin();
            let outcome = self.processor.process(attempt.operation()).await;
            report_reachability(self.connectivity.as_ref(), &outcome);

            match attempt.settle(outcome.is_success(), self.max_retries) {
                Settled::Succeeded(_) => result.processed += 1,
                Settled::Requeued(op) => {
                    result.requeued += 1;
                    survivors.push(op);
                }
                Settled::Dropped(op) => {
                    result.failed += 1;
                    error!(
                        id = %op.id,
                        kind = %op.kind,
                        retry_count = op.retry_count,
                        enqueued_at = op.enqueued_at,
                        "Operation exceeded max retries, dropping"
                    );
                    crate::metrics::record_dropped(op.kind.as_str());
                }
            }
        }

        let remaining = self.queue.commit_pass(&snapshot, survivors).await?;

        self.total_processed.fetch_add(result.processed as u64, Ordering::Relaxed);
        self.total_failed.fetch_add(result.failed as u64, Ordering::Relaxed);
        self.passes.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_drain(result.processed, result.failed, start.elapsed());

        if result.failed > 0 {
            warn!(failed = result.failed, remaining, "Drain pass dropped operations");
        }
        info!(
            processed = result.processed,
            failed = result.failed,
            requeued = result.requeued,
            remaining,
            elapsed = ?start.elapsed(),
            "Drain pass complete"
        );

        Ok(result)
    }
}

/// Only remote outcomes say anything about the network.
fn report_reachability(connectivity: &dyn Connectivity, outcome: &ProcessOutcome) {
    match outcome {
        ProcessOutcome::Success => connectivity.record_success(),
        ProcessOutcome::Failure(FailureReason::Remote(e)) if e.is_transient() => connectivity.record_failure(),
        // Reached the server; it refused the write
        ProcessOutcome::Failure(FailureReason::Remote(_)) => connectivity.record_success(),
        ProcessOutcome::Failure(_) => {}
    }
}

/// Puts the engine back to `Idle` however the pass ends.
struct IdleGuard<'a>(&'a watch::Sender<SyncState>);

impl Drop for IdleGuard<'_> {
    fn drop(&mut self) {
        let _ = self.0.send(SyncState::Idle);
    }
}
