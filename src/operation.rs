// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Queued write operations.
//!
//! A [`QueuedOperation`] is a self-contained record of one remote write that
//! could not be applied directly. It moves through a small state machine
//! while the sync engine works on it:
//!
//! ```text
//! Pending ──begin()──▶ InFlight ──settle()──┬──▶ Succeeded   (removed)
//!                                           ├──▶ Requeued    (retry_count + 1)
//!                                           └──▶ Dropped     (budget exhausted)
//! ```
//!
//! # Example
//!
//! ```
//! use fastlandz_sync::{OperationKind, QueuedOperation, Settled};
//! use serde_json::json;
//!
//! let op = QueuedOperation::new(OperationKind::ProgressUpdate, json!({"userId": "u1"}));
//! assert_eq!(op.retry_count, 0);
//!
//! match op.begin().settle(false, 3) {
//!     Settled::Requeued(op) => assert_eq!(op.retry_count, 1),
//!     other => panic!("unexpected {:?}", other),
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::Row;

/// Kind of a queued write.
///
/// The known set is closed. Anything else read back from storage becomes
/// [`OperationKind::Unknown`] so the record survives loading and is rejected
/// by the processor instead of vanishing during deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationKind {
    ProgressUpdate,
    JournalCreate,
    JournalUpdate,
    FastSessionUpdate,
    Unknown(String),
}

impl OperationKind {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::ProgressUpdate => "progress_update",
            Self::JournalCreate => "journal_create",
            Self::JournalUpdate => "journal_update",
            Self::FastSessionUpdate => "fast_session_update",
            Self::Unknown(s) => s,
        }
    }
}

impl From<String> for OperationKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "progress_update" => Self::ProgressUpdate,
            "journal_create" => Self::JournalCreate,
            "journal_update" => Self::JournalUpdate,
            "fast_session_update" => Self::FastSessionUpdate,
            _ => Self::Unknown(s),
        }
    }
}

impl From<OperationKind> for String {
    fn from(kind: OperationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle position of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    InFlight,
    Succeeded,
    Requeued,
    Dropped,
}

impl std::fmt::Display for OperationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::InFlight => write!(f, "InFlight"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Requeued => write!(f, "Requeued"),
            Self::Dropped => write!(f, "Dropped"),
        }
    }
}

/// One buffered remote write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    /// `{kind}_{epoch_millis}_{random}`, unique even for same-millisecond enqueues
    pub id: String,
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Everything needed to replay the write
    pub payload: Value,
    /// Enqueue timestamp (epoch millis)
    pub enqueued_at: i64,
    /// Failed processing attempts so far
    #[serde(default)]
    pub retry_count: u32,
}

impl QueuedOperation {
    pub fn new(kind: OperationKind, payload: Value) -> Self {
        let enqueued_at = now_millis();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}_{}_{}", kind, enqueued_at, &suffix[..12]),
            kind,
            payload,
            enqueued_at,
            retry_count: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> OperationState {
        OperationState::Pending
    }

    /// Take the operation in flight for one processing attempt.
    #[must_use]
    pub fn begin(self) -> Attempt {
        Attempt { op: self }
    }
}

/// An operation currently being processed.
#[derive(Debug)]
pub struct Attempt {
    op: QueuedOperation,
}

impl Attempt {
    #[must_use]
    pub fn operation(&self) -> &QueuedOperation {
        &self.op
    }

    #[must_use]
    pub fn state(&self) -> OperationState {
        OperationState::InFlight
    }

    /// Resolve the attempt against the retry budget.
    ///
    /// A failure always bumps `retry_count`; the operation is dropped once
    /// the count reaches `max_retries`.
    #[must_use]
    pub fn settle(self, succeeded: bool, max_retries: u32) -> Settled {
        if succeeded {
            return Settled::Succeeded(self.op);
        }

        let mut op = self.op;
        op.retry_count = op.retry_count.saturating_add(1);
        if op.retry_count < max_retries {
            Settled::Requeued(op)
        } else {
            Settled::Dropped(op)
        }
    }
}

/// Terminal outcome of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    Succeeded(QueuedOperation),
    Requeued(QueuedOperation),
    Dropped(QueuedOperation),
}

impl Settled {
    #[must_use]
    pub fn state(&self) -> OperationState {
        match self {
            Self::Succeeded(_) => OperationState::Succeeded,
            Self::Requeued(_) => OperationState::Requeued,
            Self::Dropped(_) => OperationState::Dropped,
        }
    }

    #[must_use]
    pub fn operation(&self) -> &QueuedOperation {
        match self {
            Self::Succeeded(op) | Self::Requeued(op) | Self::Dropped(op) => op,
        }
    }
}

// Typed payloads. Stored as JSON in `QueuedOperation::payload` and decoded
// again at processing time.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdatePayload {
    pub user_id: String,
    pub updates: Row,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalUpdatePayload {
    pub user_id: String,
    pub day: u32,
    pub updates: Row,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FastSessionUpdatePayload {
    pub session_id: String,
    pub updates: Row,
}

pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
