// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Domain mutators: optimistic local writes with queue fallback.
//!
//! Every tracker follows the same sequence for a write:
//!
//! ```text
//! apply locally ──▶ online? ──no──────────────────────────▶ enqueue ──▶ Queued
//!                      │
//!                     yes ──▶ direct write ──ok───────────▶ Applied
//!                                  │
//!                                  ├── transient error ───▶ enqueue ──▶ Queued
//!                                  └── application error ─▶ roll back ─▶ Err(Rejected)
//! ```
//!
//! A tracker never retries on its own. Once a write is queued the sync
//! engine owns it. If the enqueue itself fails the local change is rolled
//! back and the caller gets [`MutationError::Storage`].

pub mod progress;
pub mod journal;
pub mod fast_session;
pub mod migration;

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::connectivity::Connectivity;
use crate::operation::OperationKind;
use crate::queue::OperationQueue;
use crate::storage::{LocalStore, RemoteError, RemoteStore, StorageError};

/// How a write was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written to the remote store directly
    Applied,
    /// Handed to the sync queue
    Queued,
    /// Kept on the device and not sent anywhere: there is no signed-in user
    /// or remote store, or the write targets a fast session that has no
    /// remote row yet (see [`session_id`](fast_session::FastSessionTracker::session_id)).
    LocalOnly,
}

impl WriteOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Queued => "queued",
            Self::LocalOnly => "local_only",
        }
    }
}

#[derive(Error, Debug)]
pub enum MutationError {
    /// The remote store refused the write; local state was rolled back.
    #[error("write rejected: {0}")]
    Rejected(#[source] RemoteError),
    /// A direct-only write hit a transient error; local state was rolled back.
    #[error("remote store unreachable: {0}")]
    Unreachable(#[source] RemoteError),
    /// A direct-only write was attempted while offline.
    #[error("offline")]
    Offline,
    /// Local storage failed; the write is not safely queued.
    #[error("local storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl MutationError {
    /// Classify a failed direct-only call.
    pub(crate) fn from_remote(err: RemoteError) -> Self {
        if err.is_transient() {
            Self::Unreachable(err)
        } else {
            Self::Rejected(err)
        }
    }
}

/// Everything a tracker needs to write: the signed-in user, the remote
/// store, the queue and the connectivity oracle.
pub struct SyncContext {
    local: Arc<dyn LocalStore>,
    queue: Arc<OperationQueue>,
    connectivity: Arc<dyn Connectivity>,
    remote: Option<Arc<dyn RemoteStore>>,
    user_id: Option<String>,
}

impl SyncContext {
    /// Context without a remote store or user: all writes stay local.
    pub fn new(
        local: Arc<dyn LocalStore>,
        queue: Arc<OperationQueue>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            local,
            queue,
            connectivity,
            remote: None,
            user_id: None,
        }
    }

    #[must_use]
    pub fn with_remote(mut self, remote: Arc<dyn RemoteStore>) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn queue(&self) -> &Arc<OperationQueue> {
        &self.queue
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// User and remote store, when both are present.
    pub(crate) fn session(&self) -> Option<(&str, &Arc<dyn RemoteStore>)> {
        match (&self.user_id, &self.remote) {
            (Some(user), Some(remote)) => Some((user.as_str(), remote)),
            _ => None,
        }
    }

    /// Run one queueable write.
    ///
    /// `payload` is what gets queued if the direct write cannot happen now;
    /// `direct` performs the same write against the remote store.
    pub(crate) async fn dispatch<F, Fut>(
        &self,
        kind: OperationKind,
        payload: Value,
        direct: F,
    ) -> Result<WriteOutcome, MutationError>
    where
        F: FnOnce(Arc<dyn RemoteStore>) -> Fut,
        Fut: Future<Output = Result<(), RemoteError>>,
    {
        let Some((_, remote)) = self.session() else {
            crate::metrics::record_write(kind.as_str(), WriteOutcome::LocalOnly.as_str());
            return Ok(WriteOutcome::LocalOnly);
        };

        let result = if !self.is_online() {
            debug!(kind = %kind, "Offline, queueing write");
            self.enqueue(kind.clone(), payload).await
        } else {
            let written = direct(remote.clone()).await;
            self.observe(&written);
            match written {
                Ok(()) => Ok(WriteOutcome::Applied),
                Err(e) if e.is_transient() => {
                    debug!(kind = %kind, error = %e, "Direct write failed transiently, queueing");
                    self.enqueue(kind.clone(), payload).await
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Write rejected by remote store");
                    crate::metrics::record_write(kind.as_str(), "rejected");
                    return Err(MutationError::Rejected(e));
                }
            }
        };

        if let Ok(outcome) = &result {
            crate::metrics::record_write(kind.as_str(), outcome.as_str());
        }
        result
    }

    /// Report a remote call made on behalf of a tracker to the connectivity oracle.
    pub(crate) fn observe<T>(&self, result: &Result<T, RemoteError>) {
        crate::connectivity::observe(self.connectivity.as_ref(), result);
    }

    async fn enqueue(&self, kind: OperationKind, payload: Value) -> Result<WriteOutcome, MutationError> {
        self.queue.enqueue(kind, payload).await?;
        Ok(WriteOutcome::Queued)
    }

    /// Read a tracker's display snapshot. Unreadable snapshots are ignored.
    pub(crate) async fn load_snapshot<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.local.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key, error = %e, "Discarding unreadable local snapshot");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "Failed to read local snapshot");
                None
            }
        }
    }

    /// Whether anything is stored under `key`, readable or not.
    pub(crate) async fn has_snapshot(&self, key: &str) -> bool {
        matches!(self.local.get(key).await, Ok(Some(_)))
    }

    /// Persist a tracker's display snapshot. Failure only costs the cache.
    pub(crate) async fn save_snapshot<T: Serialize>(&self, key: &str, value: &T) {
        let result = match serde_json::to_string(value) {
            Ok(raw) => self.local.set(key, &raw).await,
            Err(e) => Err(StorageError::from(e)),
        };
        if let Err(e) = result {
            warn!(key, error = %e, "Failed to persist local snapshot");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::Fixture;
    use super::*;
    use crate::connectivity::NetworkMonitor;

    async fn noop_write(_: Arc<dyn RemoteStore>) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn must_not_write(_: Arc<dyn RemoteStore>) -> Result<(), RemoteError> {
        panic!("direct write attempted while offline")
    }

    #[tokio::test]
    async fn test_dispatch_online_success() {
        let fx = Fixture::new();
        let ctx = fx.context("u1");

        let outcome = ctx.dispatch(OperationKind::ProgressUpdate, Value::Null, noop_write).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Applied);
        assert!(fx.queue.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_offline_skips_direct_write() {
        let fx = Fixture::new();
        fx.monitor.set_online(false);
        let ctx = fx.context("u1");

        let outcome = ctx
            .dispatch(OperationKind::ProgressUpdate, Value::Null, must_not_write)
            .await
            .unwrap();

        assert_eq!(outcome, WriteOutcome::Queued);
        assert_eq!(fx.queue.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_transient_error_queues() {
        let fx = Fixture::new();
        let ctx = fx.context("u1");

        let outcome = ctx
            .dispatch(OperationKind::JournalCreate, Value::Null, |_| async {
                Err::<(), _>(RemoteError::Network("fetch failed".into()))
            })
            .await
            .unwrap();

        assert_eq!(outcome, WriteOutcome::Queued);
        assert_eq!(fx.queue.list().await.unwrap()[0].kind, OperationKind::JournalCreate);
    }

    #[tokio::test]
    async fn test_dispatch_application_error_not_queued() {
        let fx = Fixture::new();
        let ctx = fx.context("u1");

        let err = ctx
            .dispatch(OperationKind::JournalCreate, Value::Null, |_| async {
                Err::<(), _>(RemoteError::rejected("23502", "null value in column"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, MutationError::Rejected(_)));
        assert!(fx.queue.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failures_switch_offline() {
        let fx = Fixture::new();
        let ctx = fx.context("u1");
        let timed_out = |_: Arc<dyn RemoteStore>| async { Err::<(), _>(RemoteError::Timeout) };

        for _ in 0..NetworkMonitor::DEFAULT_FAILURE_THRESHOLD {
            assert!(ctx.is_online());
            let outcome = ctx.dispatch(OperationKind::ProgressUpdate, Value::Null, timed_out).await.unwrap();
            assert_eq!(outcome, WriteOutcome::Queued);
        }
        assert!(!ctx.is_online());

        // Offline now: no further direct attempts
        let outcome = ctx
            .dispatch(OperationKind::ProgressUpdate, Value::Null, must_not_write)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Queued);
        assert_eq!(fx.queue.list().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_success_resets_failure_run() {
        let fx = Fixture::new();
        let ctx = fx.context("u1");

        for _ in 0..2 {
            ctx.dispatch(OperationKind::ProgressUpdate, Value::Null, |_| async {
                Err::<(), _>(RemoteError::Network("reset".into()))
            })
            .await
            .unwrap();
        }
        assert_eq!(fx.monitor.failure_count(), 2);

        ctx.dispatch(OperationKind::ProgressUpdate, Value::Null, noop_write).await.unwrap();
        assert_eq!(fx.monitor.failure_count(), 0);

        // A refusal still proves the server is reachable
        let _ = ctx
            .dispatch(OperationKind::ProgressUpdate, Value::Null, |_| async {
                Err::<(), _>(RemoteError::rejected("23514", "check violation"))
            })
            .await;
        assert_eq!(fx.monitor.failure_count(), 0);
        assert!(ctx.is_online());
    }

    #[tokio::test]
    async fn test_dispatch_storage_failure_surfaces() {
        let fx = Fixture::new();
        fx.monitor.set_online(false);
        fx.local.set_fail_writes(true);
        let ctx = fx.context("u1");

        let err = ctx.dispatch(OperationKind::ProgressUpdate, Value::Null, noop_write).await.unwrap_err();
        assert!(matches!(err, MutationError::Storage(_)));
    }

    #[tokio::test]
    async fn test_dispatch_without_session_is_local() {
        let fx = Fixture::new();
        let ctx = fx.anonymous();

        let outcome = ctx.dispatch(OperationKind::ProgressUpdate, Value::Null, noop_write).await.unwrap();
        assert_eq!(outcome, WriteOutcome::LocalOnly);
        assert!(fx.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_and_corrupt() {
        let fx = Fixture::new();
        let ctx = fx.anonymous();

        ctx.save_snapshot("k", &vec![1, 2, 3]).await;
        assert_eq!(ctx.load_snapshot::<Vec<i32>>("k").await, Some(vec![1, 2, 3]));

        fx.local.insert_raw("k", "{not json");
        assert_eq!(ctx.load_snapshot::<Vec<i32>>("k").await, None);
    }
}
