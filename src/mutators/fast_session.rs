// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The running fast: timer state and its `fast_sessions` row.
//!
//! Timestamps are epoch milliseconds locally and RFC 3339 strings in the
//! remote row. Starting a session is a direct insert (its generated id is
//! needed by every later update); pause, resume, complete and fail are
//! queueable updates against that id.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{MutationError, SyncContext, WriteOutcome};
use crate::operation::{FastSessionUpdatePayload, OperationKind};
use crate::processor::FAST_SESSIONS_TABLE;
use crate::storage::{Filter, Row, StorageError};

pub const FAST_STATE_SNAPSHOT_KEY: &str = "fastlandz_faststate";

const MS_PER_HOUR: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FastState {
    pub is_active: bool,
    pub start_time: Option<i64>,
    pub target_end_time: Option<i64>,
    pub duration_hours: u32,
    pub is_paused: bool,
    pub paused_at: Option<i64>,
    #[serde(rename = "totalPausedTime")]
    pub total_paused_ms: i64,
    /// Id of the remote `fast_sessions` row, once known
    #[serde(default)]
    pub session_id: Option<String>,
}

impl FastState {
    #[must_use]
    pub fn started(start_time: i64, duration_hours: u32) -> Self {
        Self {
            is_active: true,
            start_time: Some(start_time),
            target_end_time: Some(start_time + i64::from(duration_hours) * MS_PER_HOUR),
            duration_hours,
            ..Self::default()
        }
    }

    pub fn duration_ms(&self) -> i64 {
        i64::from(self.duration_hours) * MS_PER_HOUR
    }

    /// Fasting time so far, excluding every pause. Frozen while paused.
    pub fn elapsed_ms(&self, now: i64) -> i64 {
        let Some(start) = self.start_time else {
            return 0;
        };
        let until = match (self.is_paused, self.paused_at) {
            (true, Some(paused_at)) => paused_at,
            _ => now,
        };
        (until - start - self.total_paused_ms).max(0)
    }

    /// Time left, clamped at zero.
    pub fn remaining_ms(&self, now: i64) -> i64 {
        if !self.is_active {
            return 0;
        }
        (self.duration_ms() - self.elapsed_ms(now)).max(0)
    }

    pub fn is_finished(&self, now: i64) -> bool {
        self.is_active && self.remaining_ms(now) == 0
    }

    /// Paused at `now`. Unchanged if inactive or already paused.
    #[must_use]
    pub fn paused(&self, now: i64) -> Self {
        if !self.is_active || self.is_paused {
            return self.clone();
        }
        Self {
            is_paused: true,
            paused_at: Some(now),
            ..self.clone()
        }
    }

    /// Resumed at `now`, adding the pause to the running total.
    #[must_use]
    pub fn resumed(&self, now: i64) -> Self {
        if !self.is_paused {
            return self.clone();
        }
        let pause = self.paused_at.map_or(0, |at| (now - at).max(0));
        Self {
            is_paused: false,
            paused_at: None,
            total_paused_ms: self.total_paused_ms + pause,
            ..self.clone()
        }
    }

    /// Parse a `fast_sessions` row.
    pub fn from_row(row: &Row) -> Self {
        let time = |column: &str| row.get(column).and_then(Value::as_str).and_then(parse_timestamp);
        Self {
            is_active: row.get("is_active").and_then(Value::as_bool).unwrap_or(false),
            start_time: time("start_time"),
            target_end_time: time("target_end_time"),
            duration_hours: row
                .get("duration_hours")
                .and_then(Value::as_u64)
                .and_then(|h| u32::try_from(h).ok())
                .unwrap_or(0),
            is_paused: row.get("is_paused").and_then(Value::as_bool).unwrap_or(false),
            paused_at: time("paused_at"),
            total_paused_ms: row.get("total_paused_time").and_then(Value::as_i64).unwrap_or(0),
            session_id: row.get("id").and_then(Value::as_str).map(str::to_string),
        }
    }

    /// New `fast_sessions` row for this timer.
    pub fn to_row(&self, user_id: &str, day: u32) -> Row {
        let mut row = self.pause_columns();
        row.insert("user_id".into(), user_id.into());
        row.insert("day".into(), day.into());
        row.insert("start_time".into(), self.start_time.and_then(format_timestamp).into());
        row.insert("target_end_time".into(), self.target_end_time.and_then(format_timestamp).into());
        row.insert("duration_hours".into(), self.duration_hours.into());
        row.insert("is_active".into(), self.is_active.into());
        row
    }

    /// Pause columns for the remote row.
    fn pause_columns(&self) -> Row {
        let mut row = Row::new();
        row.insert("is_paused".into(), self.is_paused.into());
        row.insert("total_paused_time".into(), self.total_paused_ms.into());
        row.insert("paused_at".into(), self.paused_at.and_then(format_timestamp).into());
        row
    }
}

/// Partial timer change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FastPatch {
    pub is_paused: Option<bool>,
    pub paused_at: Option<Option<i64>>,
    pub total_paused_ms: Option<i64>,
}

impl FastPatch {
    fn apply(&self, state: &FastState) -> FastState {
        let mut next = state.clone();
        if let Some(paused) = self.is_paused {
            next.is_paused = paused;
        }
        if let Some(paused_at) = self.paused_at {
            next.paused_at = paused_at;
        }
        if let Some(total) = self.total_paused_ms {
            next.total_paused_ms = total;
        }
        next
    }
}

pub(crate) fn format_timestamp(ms: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp_millis(ms).map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(raw).ok().map(|t| t.timestamp_millis())
}

pub struct FastSessionTracker {
    ctx: Arc<SyncContext>,
    state: RwLock<FastState>,
}

impl FastSessionTracker {
    pub async fn load(ctx: Arc<SyncContext>) -> Self {
        let state = ctx.load_snapshot(FAST_STATE_SNAPSHOT_KEY).await.unwrap_or_default();
        Self {
            ctx,
            state: RwLock::new(state),
        }
    }

    #[must_use]
    pub fn state(&self) -> FastState {
        self.state.read().clone()
    }

    /// Id of the remote `fast_sessions` row for the running fast.
    ///
    /// `None` while the fast exists only on this device: it was started
    /// offline, anonymously, or the insert failed transiently. Until a session
    /// exists every pause, resume, complete or fail of this fast also stays
    /// local, so a host that wants it recorded remotely should call
    /// [`start`](Self::start) again once back online.
    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.state.read().session_id.clone()
    }

    /// Start a fast and create its remote session.
    ///
    /// When the insert cannot happen (offline or a transient error) the timer
    /// still runs locally without a session id, and later changes to it stay
    /// local. An application error rolls the timer back.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self, start_time: i64, duration_hours: u32, day: u32) -> Result<WriteOutcome, MutationError> {
        let next = FastState::started(start_time, duration_hours);
        let previous = std::mem::replace(&mut *self.state.write(), next.clone());
        self.persist().await;

        let Some((user_id, remote)) = self.ctx.session() else {
            return Ok(WriteOutcome::LocalOnly);
        };
        if !self.ctx.is_online() {
            warn!("Offline, fast session started locally only");
            return Ok(WriteOutcome::LocalOnly);
        }

        let row = next.to_row(user_id, day);

        let inserted = remote.insert(FAST_SESSIONS_TABLE, row).await;
        self.ctx.observe(&inserted);
        match inserted {
            Ok(stored) => {
                let session_id = stored.get("id").and_then(Value::as_str).map(str::to_string);
                {
                    let mut state = self.state.write();
                    if state.start_time == next.start_time {
                        state.session_id = session_id.clone();
                    }
                }
                self.persist().await;
                info!(session_id = ?session_id, day, "Fast session started");
                Ok(WriteOutcome::Applied)
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Could not create fast session, timer kept locally");
                Ok(WriteOutcome::LocalOnly)
            }
            Err(e) => {
                self.roll_back(previous, &next).await;
                Err(MutationError::Rejected(e))
            }
        }
    }

    pub async fn pause(&self, now: i64) -> Result<WriteOutcome, MutationError> {
        self.transition(|s| s.paused(now)).await
    }

    pub async fn resume(&self, now: i64) -> Result<WriteOutcome, MutationError> {
        self.transition(|s| s.resumed(now)).await
    }

    /// Apply an arbitrary pause-field change to the active fast.
    pub async fn update(&self, patch: FastPatch) -> Result<WriteOutcome, MutationError> {
        self.transition(|s| if s.is_active { patch.apply(s) } else { s.clone() }).await
    }

    pub async fn complete(&self, now: i64) -> Result<WriteOutcome, MutationError> {
        self.finish("completed", now).await
    }

    pub async fn fail(&self, now: i64) -> Result<WriteOutcome, MutationError> {
        self.finish("failed", now).await
    }

    /// Load the newest active session for the user from the remote store.
    pub async fn fetch_active(&self) -> Result<Option<FastState>, MutationError> {
        let Some((user_id, remote)) = self.ctx.session() else {
            return Ok(None);
        };
        if !self.ctx.is_online() {
            return Err(MutationError::Offline);
        }

        let selected = remote
            .select(
                FAST_SESSIONS_TABLE,
                &[Filter::eq("user_id", user_id), Filter::eq("is_active", true)],
            )
            .await;
        self.ctx.observe(&selected);
        let rows = selected.map_err(MutationError::from_remote)?;

        let newest = rows.iter().max_by(|a, b| {
            let created = |r: &Row| r.get("created_at").and_then(Value::as_str).map(str::to_string);
            created(a).cmp(&created(b))
        });
        let Some(row) = newest else {
            return Ok(None);
        };

        let state = FastState::from_row(row);
        *self.state.write() = state.clone();
        self.persist().await;
        Ok(Some(state))
    }

    async fn transition<F>(&self, f: F) -> Result<WriteOutcome, MutationError>
    where
        F: FnOnce(&FastState) -> FastState,
    {
        let (previous, next) = {
            let mut state = self.state.write();
            let next = f(&state);
            if next == *state {
                return Ok(WriteOutcome::LocalOnly);
            }
            (std::mem::replace(&mut *state, next.clone()), next)
        };
        self.persist().await;

        let session_id = next.session_id.clone();
        let columns = next.pause_columns();
        self.sync(previous, next, session_id, columns).await
    }

    async fn finish(&self, flag: &'static str, now: i64) -> Result<WriteOutcome, MutationError> {
        let previous = std::mem::take(&mut *self.state.write());
        self.persist().await;
        if !previous.is_active {
            return Ok(WriteOutcome::LocalOnly);
        }

        let mut columns = Row::new();
        columns.insert("is_active".into(), false.into());
        columns.insert(flag.into(), true.into());
        columns.insert("actual_end_time".into(), format_timestamp(now).into());

        let session_id = previous.session_id.clone();
        let outcome = self.sync(previous, FastState::default(), session_id, columns).await?;
        info!(outcome = ?outcome, flag, "Fast session ended");
        Ok(outcome)
    }

    /// Write `columns` to the session row. On failure `previous` comes back,
    /// unless another change has replaced `written` in the meantime.
    async fn sync(
        &self,
        previous: FastState,
        written: FastState,
        session_id: Option<String>,
        columns: Row,
    ) -> Result<WriteOutcome, MutationError> {
        if self.ctx.session().is_none() {
            return Ok(WriteOutcome::LocalOnly);
        }
        let Some(session_id) = session_id else {
            debug!("No remote session for this fast, change kept locally");
            return Ok(WriteOutcome::LocalOnly);
        };

        let payload = serde_json::to_value(FastSessionUpdatePayload {
            session_id: session_id.clone(),
            updates: columns.clone(),
        })
        .map_err(StorageError::from)?;

        let result = self
            .ctx
            .dispatch(OperationKind::FastSessionUpdate, payload, move |remote| async move {
                remote
                    .update(FAST_SESSIONS_TABLE, columns, &[Filter::eq("id", session_id)])
                    .await
                    .map(|_| ())
            })
            .await;

        if result.is_err() {
            self.roll_back(previous, &written).await;
        }
        result
    }

    async fn roll_back(&self, previous: FastState, written: &FastState) {
        {
            let mut state = self.state.write();
            if *state != *written {
                debug!("Fast state changed since the failed write, keeping it");
                return;
            }
            *state = previous;
        }
        self.persist().await;
    }

    async fn persist(&self) {
        let state = self.state();
        self.ctx.save_snapshot(FAST_STATE_SNAPSHOT_KEY, &state).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutators::test_support::Fixture;
    use crate::storage::RemoteError;

    const MIN: i64 = 60 * 1000;
    const T0: i64 = 1_767_225_600_000; // 2026-01-01T00:00:00Z

    #[test]
    fn test_timer_excludes_pauses() {
        let s = FastState::started(T0, 1);
        assert_eq!(s.remaining_ms(T0 + 30 * MIN), 30 * MIN);

        let paused = s.paused(T0 + 30 * MIN);
        assert_eq!(paused.remaining_ms(T0 + 50 * MIN), 30 * MIN);

        let resumed = paused.resumed(T0 + 50 * MIN);
        assert_eq!(resumed.total_paused_ms, 20 * MIN);
        assert_eq!(resumed.remaining_ms(T0 + 60 * MIN), 20 * MIN);
        assert!(!resumed.is_finished(T0 + 60 * MIN));
        assert!(resumed.is_finished(T0 + 80 * MIN));
    }

    #[test]
    fn test_timer_clamps() {
        let s = FastState::started(T0, 16);
        assert_eq!(s.remaining_ms(T0 - 5 * MIN), s.duration_ms());
        assert_eq!(s.remaining_ms(T0 + 48 * 60 * MIN), 0);
        assert_eq!(FastState::default().remaining_ms(T0), 0);
    }

    #[test]
    fn test_pause_resume_are_idempotent() {
        let s = FastState::started(T0, 1);
        assert_eq!(s.resumed(T0 + MIN), s);

        let paused = s.paused(T0 + MIN);
        assert_eq!(paused.paused(T0 + 2 * MIN), paused);
        assert_eq!(FastState::default().paused(T0), FastState::default());
    }

    #[test]
    fn test_timestamp_format() {
        assert_eq!(format_timestamp(T0).as_deref(), Some("2026-01-01T00:00:00.000Z"));
        assert_eq!(parse_timestamp("2026-01-01T00:00:00.000Z"), Some(T0));
        assert_eq!(parse_timestamp("2026-01-01T01:00:00+01:00"), Some(T0));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[tokio::test]
    async fn test_start_captures_session_id() {
        let fx = Fixture::new();
        let fast = FastSessionTracker::load(fx.context("u1")).await;

        assert_eq!(fast.start(T0, 16, 2).await.unwrap(), WriteOutcome::Applied);

        let rows = fx.remote.rows(FAST_SESSIONS_TABLE);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["start_time"], "2026-01-01T00:00:00.000Z");
        assert_eq!(fast.state().session_id.as_deref(), rows[0]["id"].as_str());
    }

    #[tokio::test]
    async fn test_start_offline_is_local_only() {
        let fx = Fixture::new();
        fx.monitor.set_online(false);
        let fast = FastSessionTracker::load(fx.context("u1")).await;

        assert_eq!(fast.start(T0, 16, 1).await.unwrap(), WriteOutcome::LocalOnly);
        assert!(fast.state().is_active);
        assert!(fast.session_id().is_none());

        // Without a session id, pause stays local too
        assert_eq!(fast.pause(T0 + MIN).await.unwrap(), WriteOutcome::LocalOnly);
        assert!(fast.state().is_paused);
        assert!(fx.queue.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_transient_failure_can_be_retried() {
        let fx = Fixture::new();
        fx.remote.set_failure(Some(RemoteError::Unavailable("503".into())));
        let fast = FastSessionTracker::load(fx.context("u1")).await;

        assert_eq!(fast.start(T0, 16, 1).await.unwrap(), WriteOutcome::LocalOnly);
        assert!(fast.state().is_active);
        assert!(fast.session_id().is_none());

        fx.remote.set_failure(None);
        assert_eq!(fast.start(T0, 16, 1).await.unwrap(), WriteOutcome::Applied);
        assert!(fast.session_id().is_some());
        assert_eq!(fast.pause(T0 + MIN).await.unwrap(), WriteOutcome::Applied);
    }

    #[tokio::test]
    async fn test_start_rejected_rolls_back() {
        let fx = Fixture::new();
        fx.remote.set_failure(Some(RemoteError::rejected("23503", "foreign key violation")));
        let fast = FastSessionTracker::load(fx.context("u1")).await;

        assert!(matches!(fast.start(T0, 16, 1).await, Err(MutationError::Rejected(_))));
        assert_eq!(fast.state(), FastState::default());
    }

    #[tokio::test]
    async fn test_pause_online_updates_row() {
        let fx = Fixture::new();
        let fast = FastSessionTracker::load(fx.context("u1")).await;
        fast.start(T0, 16, 1).await.unwrap();

        assert_eq!(fast.pause(T0 + 10 * MIN).await.unwrap(), WriteOutcome::Applied);

        let row = &fx.remote.rows(FAST_SESSIONS_TABLE)[0];
        assert_eq!(row["is_paused"], true);
        assert_eq!(row["paused_at"], "2026-01-01T00:10:00.000Z");
    }

    #[tokio::test]
    async fn test_pause_offline_is_queued() {
        let fx = Fixture::new();
        let fast = FastSessionTracker::load(fx.context("u1")).await;
        fast.start(T0, 16, 1).await.unwrap();
        let session_id = fast.state().session_id.unwrap();

        fx.monitor.set_online(false);
        assert_eq!(fast.pause(T0 + 10 * MIN).await.unwrap(), WriteOutcome::Queued);
        assert_eq!(fast.resume(T0 + 25 * MIN).await.unwrap(), WriteOutcome::Queued);

        let queued = fx.queue.list().await.unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[1].kind, OperationKind::FastSessionUpdate);
        assert_eq!(queued[1].payload["sessionId"], session_id.as_str());
        assert_eq!(queued[1].payload["updates"]["total_paused_time"], 15 * MIN);
        assert_eq!(queued[1].payload["updates"]["paused_at"], Value::Null);
    }

    #[tokio::test]
    async fn test_update_patch() {
        let fx = Fixture::new();
        let fast = FastSessionTracker::load(fx.context("u1")).await;
        fast.start(T0, 16, 1).await.unwrap();

        let patch = FastPatch {
            total_paused_ms: Some(5 * MIN),
            ..FastPatch::default()
        };
        assert_eq!(fast.update(patch).await.unwrap(), WriteOutcome::Applied);
        assert_eq!(fx.remote.rows(FAST_SESSIONS_TABLE)[0]["total_paused_time"], 5 * MIN);
    }

    #[tokio::test]
    async fn test_complete_marks_row() {
        let fx = Fixture::new();
        let fast = FastSessionTracker::load(fx.context("u1")).await;
        fast.start(T0, 16, 1).await.unwrap();

        assert_eq!(fast.complete(T0 + 16 * 60 * MIN).await.unwrap(), WriteOutcome::Applied);
        assert_eq!(fast.state(), FastState::default());

        let row = &fx.remote.rows(FAST_SESSIONS_TABLE)[0];
        assert_eq!(row["is_active"], false);
        assert_eq!(row["completed"], true);
        assert_eq!(row["actual_end_time"], "2026-01-01T16:00:00.000Z");
    }

    #[tokio::test]
    async fn test_fail_rejected_restores_timer() {
        let fx = Fixture::new();
        let fast = FastSessionTracker::load(fx.context("u1")).await;
        fast.start(T0, 16, 1).await.unwrap();
        let running = fast.state();

        fx.remote.set_failure(Some(RemoteError::Unauthorized("session expired".into())));
        assert!(fast.fail(T0 + MIN).await.is_err());
        assert_eq!(fast.state(), running);
    }

    #[tokio::test]
    async fn test_fetch_active_picks_newest() {
        let fx = Fixture::new();
        for (id, created) in [("s1", "2026-01-01T00:00:00Z"), ("s2", "2026-01-02T00:00:00Z")] {
            fx.remote.seed(
                FAST_SESSIONS_TABLE,
                serde_json::json!({
                    "id": id, "user_id": "u1", "is_active": true, "created_at": created,
                    "start_time": "2026-01-01T00:00:00.000Z", "duration_hours": 24,
                    "is_paused": false, "paused_at": null, "total_paused_time": 0
                })
                .as_object()
                .cloned()
                .unwrap(),
            );
        }

        let fast = FastSessionTracker::load(fx.context("u1")).await;
        let state = fast.fetch_active().await.unwrap().unwrap();
        assert_eq!(state.session_id.as_deref(), Some("s2"));
        assert_eq!(state.start_time, Some(T0));
        assert_eq!(state.duration_hours, 24);

        let restored = FastSessionTracker::load(fx.context("u1")).await;
        assert_eq!(restored.state(), state);
    }
}
