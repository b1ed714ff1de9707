// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replays one queued operation against the remote store.
//!
//! The processor is stateless and makes exactly one remote call per
//! operation. Every problem, whether an unknown kind, a bad payload or a
//! remote error, comes back as [`ProcessOutcome::Failure`] so a drain pass
//! can carry on with the rest of the queue.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::operation::{
    FastSessionUpdatePayload, JournalUpdatePayload, OperationKind, ProgressUpdatePayload, QueuedOperation,
};
use crate::storage::{Filter, RemoteError, RemoteStore, Row};

pub const USER_PROGRESS_TABLE: &str = "user_progress";
pub const JOURNAL_ENTRIES_TABLE: &str = "journal_entries";
pub const FAST_SESSIONS_TABLE: &str = "fast_sessions";

/// Why a processing attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No remote store configured
    NoRemote,
    UnknownKind(String),
    InvalidPayload(String),
    Remote(RemoteError),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoRemote => write!(f, "no remote store configured"),
            Self::UnknownKind(kind) => write!(f, "unknown operation type '{}'", kind),
            Self::InvalidPayload(e) => write!(f, "invalid payload: {}", e),
            Self::Remote(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Success,
    Failure(FailureReason),
}

impl ProcessOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

pub struct OperationProcessor {
    remote: Option<Arc<dyn RemoteStore>>,
}

impl OperationProcessor {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self { remote: Some(remote) }
    }

    /// Processor with no backend: every operation fails and stays queued.
    #[must_use]
    pub fn disconnected() -> Self {
        Self { remote: None }
    }

    #[must_use]
    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Round trip to the remote store, if there is one.
    pub async fn health_check(&self) -> Option<Result<(), RemoteError>> {
        let remote = self.remote.as_deref()?;
        Some(crate::connectivity::health_check(remote).await)
    }

    /// Apply `op` with a single remote call.
    pub async fn process(&self, op: &QueuedOperation) -> ProcessOutcome {
        let Some(remote) = self.remote.as_deref() else {
            return ProcessOutcome::Failure(FailureReason::NoRemote);
        };

        let result = match &op.kind {
            OperationKind::ProgressUpdate => Self::apply_progress_update(remote, op).await,
            OperationKind::JournalCreate => Self::apply_journal_create(remote, op).await,
            OperationKind::JournalUpdate => Self::apply_journal_update(remote, op).await,
            OperationKind::FastSessionUpdate => Self::apply_fast_session_update(remote, op).await,
            OperationKind::Unknown(kind) => {
                warn!(id = %op.id, kind = %kind, "Unknown operation type");
                Err(FailureReason::UnknownKind(kind.clone()))
            }
        };

        match result {
            Ok(()) => {
                debug!(id = %op.id, kind = %op.kind, "Operation applied");
                crate::metrics::record_operation(op.kind.as_str(), "success");
                ProcessOutcome::Success
            }
            Err(reason) => {
                warn!(
                    id = %op.id,
                    kind = %op.kind,
                    retry_count = op.retry_count,
                    reason = %reason,
                    "Failed to process operation"
                );
                crate::metrics::record_operation(op.kind.as_str(), "failure");
                ProcessOutcome::Failure(reason)
            }
        }
    }

    async fn apply_progress_update(remote: &dyn RemoteStore, op: &QueuedOperation) -> Result<(), FailureReason> {
        let p: ProgressUpdatePayload = decode(op)?;
        remote
            .update(USER_PROGRESS_TABLE, p.updates, &[Filter::eq("user_id", p.user_id)])
            .await
            .map_err(FailureReason::Remote)?;
        Ok(())
    }

    async fn apply_journal_create(remote: &dyn RemoteStore, op: &QueuedOperation) -> Result<(), FailureReason> {
        let row: Row = decode(op)?;
        if !row.contains_key("user_id") {
            return Err(FailureReason::InvalidPayload("missing user_id".into()));
        }
        remote.insert(JOURNAL_ENTRIES_TABLE, row).await.map_err(FailureReason::Remote)?;
        Ok(())
    }

    async fn apply_journal_update(remote: &dyn RemoteStore, op: &QueuedOperation) -> Result<(), FailureReason> {
        let p: JournalUpdatePayload = decode(op)?;
        remote
            .update(
                JOURNAL_ENTRIES_TABLE,
                p.updates,
                &[Filter::eq("user_id", p.user_id), Filter::eq("day", p.day)],
            )
            .await
            .map_err(FailureReason::Remote)?;
        Ok(())
    }

    async fn apply_fast_session_update(remote: &dyn RemoteStore, op: &QueuedOperation) -> Result<(), FailureReason> {
        let p: FastSessionUpdatePayload = decode(op)?;
        remote
            .update(FAST_SESSIONS_TABLE, p.updates, &[Filter::eq("id", p.session_id)])
            .await
            .map_err(FailureReason::Remote)?;
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(op: &QueuedOperation) -> Result<T, FailureReason> {
    serde_json::from_value(op.payload.clone()).map_err(|e| FailureReason::InvalidPayload(e.to_string()))
}
