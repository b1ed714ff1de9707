// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Challenge progress: current day, unlocked days, completed and failed days.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{MutationError, SyncContext, WriteOutcome};
use crate::operation::{OperationKind, ProgressUpdatePayload};
use crate::processor::USER_PROGRESS_TABLE;
use crate::storage::{Filter, Row, StorageError};

pub const PROGRESS_SNAPSHOT_KEY: &str = "fastlandz_progress";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub current_day: u32,
    pub unlocked_days: u32,
    pub completed_days: Vec<u32>,
    pub failed_days: Vec<u32>,
}

impl Default for UserProgress {
    fn default() -> Self {
        Self {
            current_day: 1,
            unlocked_days: 1,
            completed_days: Vec::new(),
            failed_days: Vec::new(),
        }
    }
}

impl UserProgress {
    /// Parse a `user_progress` row. Missing columns keep their defaults.
    pub fn from_row(row: &Row) -> Self {
        let mut progress = Self::default();
        if let Some(day) = row.get("current_day").and_then(as_u32) {
            progress.current_day = day;
        }
        if let Some(days) = row.get("unlocked_days").and_then(as_u32) {
            progress.unlocked_days = days;
        }
        if let Some(days) = row.get("completed_days").and_then(as_days) {
            progress.completed_days = days;
        }
        if let Some(days) = row.get("failed_days").and_then(as_days) {
            progress.failed_days = days;
        }
        progress
    }

    /// Every `user_progress` column except `user_id`.
    pub fn to_columns(&self) -> Row {
        ProgressPatch {
            current_day: Some(self.current_day),
            unlocked_days: Some(self.unlocked_days),
            completed_days: Some(self.completed_days.clone()),
            failed_days: Some(self.failed_days.clone()),
        }
        .to_columns()
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}

fn as_days(value: &Value) -> Option<Vec<u32>> {
    value.as_array().map(|days| days.iter().filter_map(as_u32).collect())
}

/// Partial progress change. Unset fields are left alone locally and omitted
/// from the remote write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressPatch {
    pub current_day: Option<u32>,
    pub unlocked_days: Option<u32>,
    pub completed_days: Option<Vec<u32>>,
    pub failed_days: Option<Vec<u32>>,
}

impl ProgressPatch {
    #[must_use]
    pub fn current_day(day: u32) -> Self {
        Self {
            current_day: Some(day),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    fn apply(&self, progress: &mut UserProgress) {
        if let Some(day) = self.current_day {
            progress.current_day = day;
        }
        if let Some(days) = self.unlocked_days {
            progress.unlocked_days = days;
        }
        if let Some(days) = &self.completed_days {
            progress.completed_days = days.clone();
        }
        if let Some(days) = &self.failed_days {
            progress.failed_days = days.clone();
        }
    }

    /// Undo this patch field by field. A field goes back to `previous` only
    /// while it still holds the value this patch wrote, so a later write that
    /// landed in the meantime survives.
    fn revert(&self, previous: &UserProgress, progress: &mut UserProgress) {
        if self.current_day == Some(progress.current_day) {
            progress.current_day = previous.current_day;
        }
        if self.unlocked_days == Some(progress.unlocked_days) {
            progress.unlocked_days = previous.unlocked_days;
        }
        if self.completed_days.as_ref() == Some(&progress.completed_days) {
            progress.completed_days = previous.completed_days.clone();
        }
        if self.failed_days.as_ref() == Some(&progress.failed_days) {
            progress.failed_days = previous.failed_days.clone();
        }
    }

    /// Column values for the `user_progress` update.
    fn to_columns(&self) -> Row {
        let mut row = Row::new();
        if let Some(day) = self.current_day {
            row.insert("current_day".into(), day.into());
        }
        if let Some(days) = self.unlocked_days {
            row.insert("unlocked_days".into(), days.into());
        }
        if let Some(days) = &self.completed_days {
            row.insert("completed_days".into(), days.clone().into());
        }
        if let Some(days) = &self.failed_days {
            row.insert("failed_days".into(), days.clone().into());
        }
        row
    }
}

pub struct ProgressTracker {
    ctx: Arc<SyncContext>,
    state: RwLock<UserProgress>,
}

impl ProgressTracker {
    /// Build a tracker, restoring the last persisted snapshot if any.
    pub async fn load(ctx: Arc<SyncContext>) -> Self {
        let state = ctx.load_snapshot(PROGRESS_SNAPSHOT_KEY).await.unwrap_or_default();
        Self {
            ctx,
            state: RwLock::new(state),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> UserProgress {
        self.state.read().clone()
    }

    /// Apply `patch` locally, then write it through or queue it.
    ///
    /// On [`MutationError::Rejected`] or [`MutationError::Storage`] the fields
    /// this patch set are back to what they were before the call, unless an
    /// overlapping update has changed them since.
    #[tracing::instrument(skip(self, patch))]
    pub async fn update(&self, patch: ProgressPatch) -> Result<WriteOutcome, MutationError> {
        if patch.is_empty() {
            return Ok(WriteOutcome::LocalOnly);
        }

        let previous = {
            let mut state = self.state.write();
            let previous = state.clone();
            patch.apply(&mut state);
            previous
        };
        self.persist().await;

        let Some((user_id, _)) = self.ctx.session() else {
            debug!("No signed-in user, progress kept locally");
            return Ok(WriteOutcome::LocalOnly);
        };
        let user_id = user_id.to_string();
        let updates = patch.to_columns();

        let payload = serde_json::to_value(ProgressUpdatePayload {
            user_id: user_id.clone(),
            updates: updates.clone(),
        })
        .map_err(StorageError::from)?;

        let result = self
            .ctx
            .dispatch(OperationKind::ProgressUpdate, payload, move |remote| async move {
                remote
                    .update(USER_PROGRESS_TABLE, updates, &[Filter::eq("user_id", user_id)])
                    .await
                    .map(|_| ())
            })
            .await;

        if result.is_err() {
            patch.revert(&previous, &mut self.state.write());
            self.persist().await;
        }
        result
    }

    /// Replace local state with the remote row.
    ///
    /// Returns `Ok(None)` when there is no session or no row for the user.
    pub async fn fetch(&self) -> Result<Option<UserProgress>, MutationError> {
        let Some((user_id, remote)) = self.ctx.session() else {
            return Ok(None);
        };
        if !self.ctx.is_online() {
            return Err(MutationError::Offline);
        }

        let selected = remote.select(USER_PROGRESS_TABLE, &[Filter::eq("user_id", user_id)]).await;
        self.ctx.observe(&selected);
        let rows = selected.map_err(MutationError::from_remote)?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let progress = UserProgress::from_row(row);
        *self.state.write() = progress.clone();
        self.persist().await;
        info!(current_day = progress.current_day, "Progress refreshed from remote");
        Ok(Some(progress))
    }

    async fn persist(&self) {
        let snapshot = self.snapshot();
        self.ctx.save_snapshot(PROGRESS_SNAPSHOT_KEY, &snapshot).await;
    }
}
