// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Daily journal entries, newest first.
//!
//! Creates and updates go through the sync queue when the remote store is
//! out of reach. Deletes are direct-only: there is no queued delete, so an
//! offline or failed delete puts the entry back and reports the error.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{MutationError, SyncContext, WriteOutcome};
use crate::operation::{JournalUpdatePayload, OperationKind};
use crate::processor::JOURNAL_ENTRIES_TABLE;
use crate::storage::{Filter, Row, StorageError};

pub const JOURNAL_SNAPSHOT_KEY: &str = "fastlandz_journal";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub day: u32,
    /// Calendar date, `YYYY-MM-DD`
    pub date: String,
    pub mood: String,
    pub symptoms: String,
    pub pre_fast_meal: String,
    pub notes: String,
    pub completed: bool,
}

impl JournalEntry {
    /// `journal_entries` row for `user_id`.
    pub fn to_row(&self, user_id: &str) -> Row {
        let mut row = Row::new();
        row.insert("user_id".into(), user_id.into());
        row.insert("day".into(), self.day.into());
        row.insert("date".into(), self.date.clone().into());
        row.insert("mood".into(), self.mood.clone().into());
        row.insert("symptoms".into(), self.symptoms.clone().into());
        row.insert("pre_fast_meal".into(), self.pre_fast_meal.clone().into());
        row.insert("notes".into(), self.notes.clone().into());
        row.insert("completed".into(), self.completed.into());
        row
    }

    /// Parse a `journal_entries` row. Null text columns read as empty.
    pub fn from_row(row: &Row) -> Option<Self> {
        let day = row.get("day")?.as_u64().and_then(|d| u32::try_from(d).ok())?;
        let text = |column: &str| row.get(column).and_then(Value::as_str).unwrap_or_default().to_string();
        Some(Self {
            day,
            date: text("date"),
            mood: text("mood"),
            symptoms: text("symptoms"),
            pre_fast_meal: text("pre_fast_meal"),
            notes: text("notes"),
            completed: row.get("completed").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalPatch {
    pub mood: Option<String>,
    pub symptoms: Option<String>,
    pub pre_fast_meal: Option<String>,
    pub notes: Option<String>,
    pub completed: Option<bool>,
}

impl JournalPatch {
    fn apply(&self, entry: &mut JournalEntry) {
        if let Some(mood) = &self.mood {
            entry.mood = mood.clone();
        }
        if let Some(symptoms) = &self.symptoms {
            entry.symptoms = symptoms.clone();
        }
        if let Some(meal) = &self.pre_fast_meal {
            entry.pre_fast_meal = meal.clone();
        }
        if let Some(notes) = &self.notes {
            entry.notes = notes.clone();
        }
        if let Some(completed) = self.completed {
            entry.completed = completed;
        }
    }

    /// Undo this patch on `entry`, sparing fields changed since.
    fn revert(&self, previous: &JournalEntry, entry: &mut JournalEntry) {
        if self.mood.as_ref() == Some(&entry.mood) {
            entry.mood = previous.mood.clone();
        }
        if self.symptoms.as_ref() == Some(&entry.symptoms) {
            entry.symptoms = previous.symptoms.clone();
        }
        if self.pre_fast_meal.as_ref() == Some(&entry.pre_fast_meal) {
            entry.pre_fast_meal = previous.pre_fast_meal.clone();
        }
        if self.notes.as_ref() == Some(&entry.notes) {
            entry.notes = previous.notes.clone();
        }
        if self.completed == Some(entry.completed) {
            entry.completed = previous.completed;
        }
    }

    fn to_columns(&self) -> Row {
        let mut row = Row::new();
        if let Some(mood) = &self.mood {
            row.insert("mood".into(), mood.clone().into());
        }
        if let Some(symptoms) = &self.symptoms {
            row.insert("symptoms".into(), symptoms.clone().into());
        }
        if let Some(meal) = &self.pre_fast_meal {
            row.insert("pre_fast_meal".into(), meal.clone().into());
        }
        if let Some(notes) = &self.notes {
            row.insert("notes".into(), notes.clone().into());
        }
        if let Some(completed) = self.completed {
            row.insert("completed".into(), completed.into());
        }
        row
    }
}

pub struct JournalTracker {
    ctx: Arc<SyncContext>,
    entries: RwLock<Vec<JournalEntry>>,
}

impl JournalTracker {
    pub async fn load(ctx: Arc<SyncContext>) -> Self {
        let entries = ctx.load_snapshot(JOURNAL_SNAPSHOT_KEY).await.unwrap_or_default();
        Self {
            ctx,
            entries: RwLock::new(entries),
        }
    }

    #[must_use]
    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries.read().clone()
    }

    #[must_use]
    pub fn entry(&self, day: u32) -> Option<JournalEntry> {
        self.entries.read().iter().find(|e| e.day == day).cloned()
    }

    #[tracing::instrument(skip(self, entry), fields(day = entry.day))]
    pub async fn add_entry(&self, entry: JournalEntry) -> Result<WriteOutcome, MutationError> {
        self.entries.write().insert(0, entry.clone());
        self.persist().await;

        let Some((user_id, _)) = self.ctx.session() else {
            return Ok(WriteOutcome::LocalOnly);
        };
        let row = entry.to_row(user_id);
        let payload = Value::Object(row.clone());

        let result = self
            .ctx
            .dispatch(OperationKind::JournalCreate, payload, move |remote| async move {
                remote.insert(JOURNAL_ENTRIES_TABLE, row).await.map(|_| ())
            })
            .await;

        if result.is_err() {
            {
                let mut entries = self.entries.write();
                if let Some(pos) = entries.iter().position(|e| e == &entry) {
                    entries.remove(pos);
                }
            }
            self.persist().await;
        }
        result
    }

    #[tracing::instrument(skip(self, patch))]
    pub async fn update_entry(&self, day: u32, patch: JournalPatch) -> Result<WriteOutcome, MutationError> {
        let previous = {
            let mut entries = self.entries.write();
            let previous = entries.iter().find(|e| e.day == day).cloned();
            entries.iter_mut().filter(|e| e.day == day).for_each(|e| patch.apply(e));
            previous
        };
        self.persist().await;

        let Some((user_id, _)) = self.ctx.session() else {
            return Ok(WriteOutcome::LocalOnly);
        };
        let user_id = user_id.to_string();
        let updates = patch.to_columns();

        let payload = serde_json::to_value(JournalUpdatePayload {
            user_id: user_id.clone(),
            day,
            updates: updates.clone(),
        })
        .map_err(StorageError::from)?;

        let result = self
            .ctx
            .dispatch(OperationKind::JournalUpdate, payload, move |remote| async move {
                remote
                    .update(
                        JOURNAL_ENTRIES_TABLE,
                        updates,
                        &[Filter::eq("user_id", user_id), Filter::eq("day", day)],
                    )
                    .await
                    .map(|_| ())
            })
            .await;

        if let (Err(_), Some(previous)) = (&result, &previous) {
            self.entries
                .write()
                .iter_mut()
                .filter(|e| e.day == day)
                .for_each(|e| patch.revert(previous, e));
            self.persist().await;
        }
        result
    }

    /// Remove the entry for `day` locally and remotely.
    ///
    /// Requires the remote store: offline returns [`MutationError::Offline`]
    /// and any remote error is surfaced, both with the entry restored.
    #[tracing::instrument(skip(self))]
    pub async fn delete_entry(&self, day: u32) -> Result<WriteOutcome, MutationError> {
        let removed: Vec<(usize, JournalEntry)> = {
            let mut entries = self.entries.write();
            let (removed, kept): (Vec<_>, Vec<_>) =
                entries.drain(..).enumerate().partition(|(_, e)| e.day == day);
            *entries = kept.into_iter().map(|(_, e)| e).collect();
            removed
        };
        self.persist().await;

        let Some((user_id, remote)) = self.ctx.session() else {
            return Ok(WriteOutcome::LocalOnly);
        };

        let result = if !self.ctx.is_online() {
            Err(MutationError::Offline)
        } else {
            let deleted = remote
                .delete(JOURNAL_ENTRIES_TABLE, &[Filter::eq("user_id", user_id), Filter::eq("day", day)])
                .await;
            self.ctx.observe(&deleted);
            deleted.map(|_| WriteOutcome::Applied).map_err(MutationError::from_remote)
        };

        if let Err(e) = &result {
            warn!(day, error = %e, "Journal delete failed, restoring entry");
            {
                let mut entries = self.entries.write();
                for (index, entry) in removed {
                    let index = index.min(entries.len());
                    entries.insert(index, entry);
                }
            }
            self.persist().await;
        }
        result
    }

    /// Replace local entries with the remote ones, newest date first.
    pub async fn fetch(&self) -> Result<Vec<JournalEntry>, MutationError> {
        let Some((user_id, remote)) = self.ctx.session() else {
            return Ok(self.entries());
        };
        if !self.ctx.is_online() {
            return Err(MutationError::Offline);
        }

        let selected = remote.select(JOURNAL_ENTRIES_TABLE, &[Filter::eq("user_id", user_id)]).await;
        self.ctx.observe(&selected);
        let rows = selected.map_err(MutationError::from_remote)?;

        let mut fetched: Vec<JournalEntry> = rows.iter().filter_map(JournalEntry::from_row).collect();
        if fetched.len() < rows.len() {
            debug!(skipped = rows.len() - fetched.len(), "Skipped journal rows without a day");
        }
        fetched.sort_by(|a, b| b.date.cmp(&a.date));

        *self.entries.write() = fetched.clone();
        self.persist().await;
        info!(count = fetched.len(), "Journal refreshed from remote");
        Ok(fetched)
    }

    async fn persist(&self) {
        let entries = self.entries();
        self.ctx.save_snapshot(JOURNAL_SNAPSHOT_KEY, &entries).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutators::test_support::Fixture;
    use crate::storage::RemoteError;

    fn entry(day: u32, date: &str) -> JournalEntry {
        JournalEntry {
            day,
            date: date.into(),
            mood: "good".into(),
            completed: false,
            ..JournalEntry::default()
        }
    }

    #[tokio::test]
    async fn test_add_entry_online() {
        let fx = Fixture::new();
        let journal = JournalTracker::load(fx.context("u1")).await;

        let outcome = journal.add_entry(entry(1, "2026-01-01")).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Applied);

        let rows = fx.remote.rows(JOURNAL_ENTRIES_TABLE);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["user_id"], "u1");
        assert_eq!(rows[0]["pre_fast_meal"], "");
    }

    #[tokio::test]
    async fn test_add_entry_offline_queues_row() {
        let fx = Fixture::new();
        fx.monitor.set_online(false);
        let journal = JournalTracker::load(fx.context("u1")).await;

        journal.add_entry(entry(2, "2026-01-02")).await.unwrap();

        let queued = fx.queue.list().await.unwrap();
        assert_eq!(queued[0].kind, OperationKind::JournalCreate);
        assert_eq!(queued[0].payload["user_id"], "u1");
        assert_eq!(queued[0].payload["day"], 2);
        assert_eq!(journal.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_add_entry_rejected_rolls_back() {
        let fx = Fixture::new();
        fx.remote.fail_table(JOURNAL_ENTRIES_TABLE, RemoteError::rejected("23505", "duplicate key"));
        let journal = JournalTracker::load(fx.context("u1")).await;
        journal.entries.write().push(entry(1, "2026-01-01"));

        let err = journal.add_entry(entry(2, "2026-01-02")).await.unwrap_err();
        assert!(matches!(err, MutationError::Rejected(_)));
        assert_eq!(journal.entries(), vec![entry(1, "2026-01-01")]);
        assert!(fx.queue.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_entry_offline_payload() {
        let fx = Fixture::new();
        fx.monitor.set_online(false);
        let journal = JournalTracker::load(fx.context("u1")).await;
        journal.add_entry(entry(3, "2026-01-03")).await.unwrap();

        let patch = JournalPatch {
            notes: Some("headache".into()),
            completed: Some(true),
            ..JournalPatch::default()
        };
        assert_eq!(journal.update_entry(3, patch).await.unwrap(), WriteOutcome::Queued);

        let updated = journal.entry(3).unwrap();
        assert_eq!(updated.notes, "headache");
        assert!(updated.completed);

        let queued = fx.queue.list().await.unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[1].kind, OperationKind::JournalUpdate);
        assert_eq!(
            queued[1].payload,
            serde_json::json!({"userId": "u1", "day": 3, "updates": {"notes": "headache", "completed": true}})
        );
    }

    #[tokio::test]
    async fn test_update_entry_rejected_rolls_back() {
        let fx = Fixture::new();
        let journal = JournalTracker::load(fx.context("u1")).await;
        journal.add_entry(entry(1, "2026-01-01")).await.unwrap();

        fx.remote.set_failure(Some(RemoteError::Unauthorized("jwt expired".into())));
        let patch = JournalPatch {
            mood: Some("tired".into()),
            ..JournalPatch::default()
        };
        assert!(journal.update_entry(1, patch).await.is_err());
        assert_eq!(journal.entry(1).unwrap().mood, "good");
    }

    #[tokio::test]
    async fn test_delete_entry_online() {
        let fx = Fixture::new();
        let journal = JournalTracker::load(fx.context("u1")).await;
        journal.add_entry(entry(1, "2026-01-01")).await.unwrap();

        assert_eq!(journal.delete_entry(1).await.unwrap(), WriteOutcome::Applied);
        assert!(journal.entries().is_empty());
        assert!(fx.remote.rows(JOURNAL_ENTRIES_TABLE).is_empty());
    }

    #[tokio::test]
    async fn test_delete_entry_offline_restores() {
        let fx = Fixture::new();
        let journal = JournalTracker::load(fx.context("u1")).await;
        journal.add_entry(entry(1, "2026-01-01")).await.unwrap();
        fx.monitor.set_online(false);

        assert!(matches!(journal.delete_entry(1).await, Err(MutationError::Offline)));
        assert_eq!(journal.entries().len(), 1);
        assert!(fx.queue.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_position() {
        let fx = Fixture::new();
        let journal = JournalTracker::load(fx.context("u1")).await;
        for (day, date) in [(1, "2026-01-01"), (2, "2026-01-02"), (3, "2026-01-03")] {
            journal.add_entry(entry(day, date)).await.unwrap();
        }
        fx.monitor.set_online(false);

        assert!(journal.delete_entry(2).await.is_err());
        let days: Vec<u32> = journal.entries().iter().map(|e| e.day).collect();
        assert_eq!(days, vec![3, 2, 1]);
    }

    #[test]
    fn test_revert_spares_later_fields() {
        let before = entry(1, "2026-01-01");
        let rejected = JournalPatch {
            mood: Some("tired".into()),
            notes: Some("dizzy".into()),
            ..JournalPatch::default()
        };
        let mut current = before.clone();
        rejected.apply(&mut current);
        JournalPatch { notes: Some("better now".into()), ..JournalPatch::default() }.apply(&mut current);

        rejected.revert(&before, &mut current);
        assert_eq!(current.mood, "good");
        assert_eq!(current.notes, "better now");
    }

    #[tokio::test]
    async fn test_delete_entry_transient_error_restores() {
        let fx = Fixture::new();
        let journal = JournalTracker::load(fx.context("u1")).await;
        journal.add_entry(entry(1, "2026-01-01")).await.unwrap();
        fx.remote.set_failure(Some(RemoteError::Timeout));

        assert!(matches!(journal.delete_entry(1).await, Err(MutationError::Unreachable(_))));
        assert_eq!(journal.entry(1).unwrap().date, "2026-01-01");
    }

    #[tokio::test]
    async fn test_fetch_orders_by_date_desc() {
        let fx = Fixture::new();
        for (day, date) in [(1, "2026-01-01"), (3, "2026-01-03"), (2, "2026-01-02")] {
            fx.remote.seed(JOURNAL_ENTRIES_TABLE, entry(day, date).to_row("u1"));
        }
        fx.remote.seed(JOURNAL_ENTRIES_TABLE, entry(9, "2026-01-09").to_row("someone-else"));

        let journal = JournalTracker::load(fx.context("u1")).await;
        let days: Vec<u32> = journal.fetch().await.unwrap().iter().map(|e| e.day).collect();
        assert_eq!(days, vec![3, 2, 1]);

        let restored = JournalTracker::load(fx.context("u1")).await;
        assert_eq!(restored.entries().len(), 3);
    }

    #[test]
    fn test_from_row_null_text() {
        let row = serde_json::json!({"day": 4, "date": "2026-01-04", "mood": null, "completed": true})
            .as_object()
            .cloned()
            .unwrap();
        let entry = JournalEntry::from_row(&row).unwrap();
        assert_eq!(entry.mood, "");
        assert!(entry.completed);
    }
}
