// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! One-time upload of data recorded before sign-in.
//!
//! Anonymous writes only reach the trackers' local snapshots
//! ([`WriteOutcome::LocalOnly`](super::WriteOutcome::LocalOnly)). After the
//! first sign-in, [`migrate_local_data`] pushes those snapshots to the
//! remote store:
//!
//! ```text
//! fastlandz_progress  ──▶ insert, or update the user's existing row
//! fastlandz_journal   ──▶ insert entries for days with no remote row
//! fastlandz_faststate ──▶ insert the running fast unless one is already active
//! ```
//!
//! Each part fails on its own and the others still run. Re-running is safe:
//! parts already uploaded are skipped or overwritten with the same values.
//! The migrated flag is set only when every part succeeded.
//!
//! Run it before loading the trackers. A tracker loaded earlier keeps its
//! in-memory state and will not see the session id written back for the fast.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::fast_session::{FastState, FAST_STATE_SNAPSHOT_KEY};
use super::journal::{JournalEntry, JOURNAL_SNAPSHOT_KEY};
use super::progress::{UserProgress, PROGRESS_SNAPSHOT_KEY};
use super::SyncContext;
use crate::processor::{FAST_SESSIONS_TABLE, JOURNAL_ENTRIES_TABLE, USER_PROGRESS_TABLE};
use crate::storage::{Filter, RemoteError, RemoteStore};

pub const MIGRATED_FLAG_KEY: &str = "fastlandz_migrated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationPart {
    Progress,
    Journal,
    FastSession,
}

impl fmt::Display for MigrationPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progress => write!(f, "progress"),
            Self::Journal => write!(f, "journal"),
            Self::FastSession => write!(f, "fast session"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MigrationError {
    #[error("no signed-in user or remote store")]
    NoSession,
    #[error("offline")]
    Offline,
    #[error("{part} migration failed: {source}")]
    Remote {
        part: MigrationPart,
        #[source]
        source: RemoteError,
    },
}

/// What a migration run uploaded, and what went wrong.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationResult {
    pub progress_migrated: bool,
    pub journal_entries_migrated: usize,
    pub fast_session_migrated: bool,
    pub errors: Vec<MigrationError>,
}

impl MigrationResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    fn fail(&mut self, part: MigrationPart, source: RemoteError) {
        warn!(%part, error = %source, "Local data migration step failed");
        self.errors.push(MigrationError::Remote { part, source });
    }
}

/// Whether local snapshots exist that have not been migrated yet.
pub async fn needs_migration(ctx: &SyncContext) -> bool {
    if ctx.load_snapshot::<bool>(MIGRATED_FLAG_KEY).await == Some(true) {
        return false;
    }
    for key in [PROGRESS_SNAPSHOT_KEY, JOURNAL_SNAPSHOT_KEY, FAST_STATE_SNAPSHOT_KEY] {
        if ctx.has_snapshot(key).await {
            return true;
        }
    }
    false
}

/// Upload the local progress, journal and running fast for the signed-in user.
#[tracing::instrument(skip(ctx))]
pub async fn migrate_local_data(ctx: &SyncContext) -> MigrationResult {
    let mut result = MigrationResult::default();

    let Some((user_id, remote)) = ctx.session() else {
        result.errors.push(MigrationError::NoSession);
        return result;
    };
    if !ctx.is_online() {
        result.errors.push(MigrationError::Offline);
        return result;
    }
    let remote = remote.as_ref();

    let progress: Option<UserProgress> = ctx.load_snapshot(PROGRESS_SNAPSHOT_KEY).await;
    if let Some(progress) = &progress {
        match migrate_progress(ctx, remote, user_id, progress).await {
            Ok(()) => result.progress_migrated = true,
            Err(e) => result.fail(MigrationPart::Progress, e),
        }
    }

    if let Some(entries) = ctx.load_snapshot::<Vec<JournalEntry>>(JOURNAL_SNAPSHOT_KEY).await {
        let (migrated, outcome) = migrate_journal(ctx, remote, user_id, &entries).await;
        result.journal_entries_migrated = migrated;
        if let Err(e) = outcome {
            result.fail(MigrationPart::Journal, e);
        }
    }

    if let Some(state) = ctx.load_snapshot::<FastState>(FAST_STATE_SNAPSHOT_KEY).await {
        let day = progress.as_ref().map_or(1, |p| p.current_day);
        match migrate_fast_session(ctx, remote, user_id, state, day).await {
            Ok(migrated) => result.fast_session_migrated = migrated,
            Err(e) => result.fail(MigrationPart::FastSession, e),
        }
    }

    if result.is_success() {
        ctx.save_snapshot(MIGRATED_FLAG_KEY, &true).await;
    }
    info!(
        progress = result.progress_migrated,
        journal_entries = result.journal_entries_migrated,
        fast_session = result.fast_session_migrated,
        errors = result.errors.len(),
        "Local data migration finished"
    );
    result
}

async fn migrate_progress(
    ctx: &SyncContext,
    remote: &dyn RemoteStore,
    user_id: &str,
    progress: &UserProgress,
) -> Result<(), RemoteError> {
    let filter = [Filter::eq("user_id", user_id)];
    let existing = tracked(ctx, remote.select(USER_PROGRESS_TABLE, &filter)).await?;

    let mut columns = progress.to_columns();
    if existing.is_empty() {
        columns.insert("user_id".into(), user_id.into());
        tracked(ctx, remote.insert(USER_PROGRESS_TABLE, columns)).await?;
    } else {
        tracked(ctx, remote.update(USER_PROGRESS_TABLE, columns, &filter)).await?;
    }
    Ok(())
}

/// Returns how many entries were inserted before any failure.
async fn migrate_journal(
    ctx: &SyncContext,
    remote: &dyn RemoteStore,
    user_id: &str,
    entries: &[JournalEntry],
) -> (usize, Result<(), RemoteError>) {
    let existing = match tracked(ctx, remote.select(JOURNAL_ENTRIES_TABLE, &[Filter::eq("user_id", user_id)])).await {
        Ok(rows) => rows,
        Err(e) => return (0, Err(e)),
    };
    let mut days: HashSet<u64> = existing.iter().filter_map(|r| r.get("day").and_then(Value::as_u64)).collect();

    let mut migrated = 0;
    for entry in entries {
        if !days.insert(u64::from(entry.day)) {
            continue;
        }
        if let Err(e) = tracked(ctx, remote.insert(JOURNAL_ENTRIES_TABLE, entry.to_row(user_id))).await {
            return (migrated, Err(e));
        }
        migrated += 1;
    }
    (migrated, Ok(()))
}

/// Returns whether a session row was created.
async fn migrate_fast_session(
    ctx: &SyncContext,
    remote: &dyn RemoteStore,
    user_id: &str,
    mut state: FastState,
    day: u32,
) -> Result<bool, RemoteError> {
    if !state.is_active || state.start_time.is_none() || state.target_end_time.is_none() {
        return Ok(false);
    }
    if state.session_id.is_some() {
        debug!("Running fast already has a remote session");
        return Ok(false);
    }

    let active = tracked(
        ctx,
        remote.select(
            FAST_SESSIONS_TABLE,
            &[Filter::eq("user_id", user_id), Filter::eq("is_active", true)],
        ),
    )
    .await?;
    if !active.is_empty() {
        debug!(active = active.len(), "User already has an active fast, keeping it");
        return Ok(false);
    }

    let stored = tracked(ctx, remote.insert(FAST_SESSIONS_TABLE, state.to_row(user_id, day))).await?;
    state.session_id = stored.get("id").and_then(Value::as_str).map(str::to_string);
    ctx.save_snapshot(FAST_STATE_SNAPSHOT_KEY, &state).await;
    Ok(true)
}

async fn tracked<T, F>(ctx: &SyncContext, call: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    let result = call.await;
    ctx.observe(&result);
    result
}
