//! In-memory state of a single generation set.
//!
//! [`JobStatusStore`] folds snapshots and per-item updates into one
//! [`GenerationView`]. Once the set reaches a terminal status the store is
//! frozen: every later write reports [`ApplyOutcome::IgnoredTerminal`] and
//! leaves both status and items untouched.

use chrono::Utc;
use serde::Serialize;

use crate::error::CoreError;
use crate::item::{GenerationItem, ItemPatch};
use crate::snapshot::NormalizedSnapshot;
use crate::status::GenerationStatus;
use crate::types::{SetId, Timestamp};

/// Result of applying one observation to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// State changed; still non-terminal.
    Applied,
    /// The observation matched the current state.
    Unchanged,
    /// The set was already terminal; nothing was written.
    IgnoredTerminal,
    /// This observation moved the set into a terminal status.
    BecameTerminal(GenerationStatus),
}

/// What the UI should render for the set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayState {
    Loading,
    Processing,
    Ready,
    Failed { reason: Option<String> },
}

/// Render-friendly projection of the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationView {
    pub set_id: SetId,
    pub items: Vec<GenerationItem>,
    pub status: GenerationStatus,
    pub is_loading: bool,
    pub is_processing: bool,
    pub is_error: bool,
    /// Last transient error, if the most recent operation failed.
    pub error: Option<String>,
    /// Reason reported by the backend for a `FAILED` set.
    pub failure_reason: Option<String>,
    pub updated_at: Option<Timestamp>,
}

impl GenerationView {
    /// Collapse the flags into the single screen the UI should show.
    ///
    /// Transient errors keep the processing view; only a backend failure
    /// produces [`DisplayState::Failed`].
    pub fn display_state(&self) -> DisplayState {
        if self.is_loading {
            DisplayState::Loading
        } else if self.status == GenerationStatus::Failed {
            DisplayState::Failed {
                reason: self.failure_reason.clone(),
            }
        } else if self.is_processing {
            DisplayState::Processing
        } else {
            DisplayState::Ready
        }
    }

    /// True once no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Latest known state of one generation set.
#[derive(Debug, Clone)]
pub struct JobStatusStore {
    set_id: SetId,
    status: GenerationStatus,
    items: Vec<GenerationItem>,
    is_loading: bool,
    last_error: Option<String>,
    failure_reason: Option<String>,
    updated_at: Option<Timestamp>,
}

impl JobStatusStore {
    /// A fresh store in the loading state.
    pub fn new(set_id: impl Into<SetId>) -> Self {
        Self {
            set_id: set_id.into(),
            status: GenerationStatus::Pending,
            items: Vec::new(),
            is_loading: true,
            last_error: None,
            failure_reason: None,
            updated_at: None,
        }
    }

    pub fn set_id(&self) -> &str {
        &self.set_id
    }

    pub fn status(&self) -> GenerationStatus {
        self.status
    }

    pub fn items(&self) -> &[GenerationItem] {
        &self.items
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a full status snapshot.
    ///
    /// Non-terminal snapshots upsert their items by id. A `COMPLETED`
    /// snapshot that carries items is authoritative and replaces the item
    /// list, dropping placeholders. A `COMPLETED` snapshot with no items
    /// while nothing has been observed yet is held at `PROCESSING`.
    pub fn apply_snapshot(&mut self, snapshot: &NormalizedSnapshot) -> ApplyOutcome {
        if self.is_terminal() {
            return ApplyOutcome::IgnoredTerminal;
        }
        let before = self.fingerprint();

        let mut status = snapshot.status;
        if status == GenerationStatus::Completed && snapshot.items.is_empty() && self.items.is_empty() {
            status = GenerationStatus::Processing;
        }

        if status == GenerationStatus::Completed && !snapshot.items.is_empty() {
            self.items.clone_from(&snapshot.items);
        } else {
            for item in &snapshot.items {
                self.upsert(item.clone());
            }
        }
        self.status = status;
        self.mark_observed();

        self.finish(before)
    }

    /// Merge a partial update into the item with `item_id`, appending a new
    /// item when none matches. `item_id` may also be the job id of an item
    /// already listed under its real id.
    pub fn apply_item_update(&mut self, item_id: &str, patch: &ItemPatch) -> ApplyOutcome {
        if self.is_terminal() {
            return ApplyOutcome::IgnoredTerminal;
        }
        let before = self.fingerprint();

        let existing = self
            .items
            .iter()
            .position(|item| item.id == item_id)
            .or_else(|| {
                self.items
                    .iter()
                    .position(|item| item.job_id.as_deref() == Some(item_id))
            });
        match existing {
            Some(index) => patch.apply_to(&mut self.items[index]),
            None => self.items.push(patch.clone().into_item(item_id)),
        }
        self.mark_observed();

        self.finish(before)
    }

    /// Move a `PENDING`/`QUEUED` set to `PROCESSING`.
    pub fn promote_to_processing(&mut self) -> ApplyOutcome {
        if self.is_terminal() {
            return ApplyOutcome::IgnoredTerminal;
        }
        let before = self.fingerprint();
        if matches!(self.status, GenerationStatus::Pending | GenerationStatus::Queued) {
            self.status = GenerationStatus::Processing;
        }
        self.mark_observed();
        self.finish(before)
    }

    /// Force the set into a terminal status.
    ///
    /// `reason` is kept only for `FAILED`. Passing a non-terminal status is
    /// a validation error.
    pub fn mark_terminal(
        &mut self,
        status: GenerationStatus,
        reason: Option<String>,
    ) -> Result<ApplyOutcome, CoreError> {
        if !status.is_terminal() {
            return Err(CoreError::Validation(format!(
                "{status} is not a terminal status"
            )));
        }
        if self.is_terminal() {
            return Ok(ApplyOutcome::IgnoredTerminal);
        }

        self.status = status;
        if status == GenerationStatus::Failed {
            self.failure_reason = reason;
        }
        self.mark_observed();
        self.updated_at = Some(Utc::now());
        Ok(ApplyOutcome::BecameTerminal(status))
    }

    /// Record a failed fetch or connect.
    ///
    /// Leaves the loading state so the UI stops spinning, but does not
    /// touch status or items.
    pub fn record_error(&mut self, message: impl Into<String>) -> ApplyOutcome {
        if self.is_terminal() {
            return ApplyOutcome::IgnoredTerminal;
        }
        self.is_loading = false;
        self.last_error = Some(message.into());
        self.updated_at = Some(Utc::now());
        ApplyOutcome::Applied
    }

    /// Project the current state for rendering.
    pub fn view(&self) -> GenerationView {
        let is_processing = !self.is_terminal()
            || (self.items.is_empty() && self.status != GenerationStatus::Failed);
        let is_error = self.status == GenerationStatus::Failed || self.last_error.is_some();

        GenerationView {
            set_id: self.set_id.clone(),
            items: self.items.clone(),
            status: self.status,
            is_loading: self.is_loading,
            is_processing,
            is_error,
            error: self.last_error.clone(),
            failure_reason: self.failure_reason.clone(),
            updated_at: self.updated_at,
        }
    }

    // ---- private helpers ----

    /// Insert or replace by id. An item carrying a `job_id` also takes over
    /// the placeholder that a started event keyed by that job id.
    fn upsert(&mut self, item: GenerationItem) {
        let by_id = self.items.iter().position(|existing| existing.id == item.id);
        let by_job = item
            .job_id
            .as_deref()
            .filter(|job_id| *job_id != item.id)
            .and_then(|job_id| self.items.iter().position(|existing| existing.id == job_id));

        match (by_id, by_job) {
            (Some(index), Some(placeholder)) => {
                self.items[index] = item;
                self.items.remove(placeholder);
            }
            (Some(index), None) | (None, Some(index)) => self.items[index] = item,
            (None, None) => self.items.push(item),
        }
    }

    /// A successful observation ends loading and clears transient errors.
    fn mark_observed(&mut self) {
        self.is_loading = false;
        self.last_error = None;
    }

    fn fingerprint(&self) -> Fingerprint {
        Fingerprint {
            status: self.status,
            items: self.items.clone(),
            is_loading: self.is_loading,
            has_error: self.last_error.is_some(),
        }
    }

    fn finish(&mut self, before: Fingerprint) -> ApplyOutcome {
        if self.fingerprint() == before {
            return ApplyOutcome::Unchanged;
        }
        self.updated_at = Some(Utc::now());
        if self.is_terminal() {
            ApplyOutcome::BecameTerminal(self.status)
        } else {
            ApplyOutcome::Applied
        }
    }
}

#[derive(PartialEq)]
struct Fingerprint {
    status: GenerationStatus,
    items: Vec<GenerationItem>,
    is_loading: bool,
    has_error: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::normalize_snapshot;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> NormalizedSnapshot {
        normalize_snapshot(&value)
    }

    fn thumb(id: &str, image: Option<&str>) -> serde_json::Value {
        json!({"id": id, "title": id, "aspectRatio": "1:1", "image": image})
    }

    #[test]
    fn new_store_is_loading_and_processing() {
        let view = JobStatusStore::new("set-1").view();
        assert!(view.is_loading);
        assert!(view.is_processing);
        assert!(!view.is_error);
        assert_eq!(view.display_state(), DisplayState::Loading);
    }

    #[test]
    fn applying_same_snapshot_twice_is_idempotent() {
        let mut store = JobStatusStore::new("set-1");
        let snap = snapshot(json!({"status": "PROCESSING", "thumbnails": [thumb("a", None), thumb("b", None)]}));

        assert_eq!(store.apply_snapshot(&snap), ApplyOutcome::Applied);
        let first = store.view();
        assert_eq!(store.apply_snapshot(&snap), ApplyOutcome::Unchanged);
        let second = store.view();

        assert_eq!(first.items, second.items);
        assert_eq!(first.status, second.status);
        assert_eq!(second.items.len(), 2);
    }

    #[test]
    fn nonterminal_snapshots_never_remove_items() {
        let mut store = JobStatusStore::new("set-1");
        store.apply_snapshot(&snapshot(json!({"status": "PROCESSING", "thumbnails": [thumb("a", None), thumb("b", None)]})));
        store.apply_snapshot(&snapshot(json!({"status": "PROCESSING", "thumbnails": [thumb("b", Some("https://cdn/b.png"))]})));

        let ids: Vec<_> = store.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.items()[1].image.as_deref(), Some("https://cdn/b.png"));
    }

    #[test]
    fn normal_completion_sequence() {
        let mut store = JobStatusStore::new("set-1");
        store.apply_snapshot(&snapshot(json!({"status": "PENDING", "thumbnails": []})));
        assert!(store.view().is_processing);

        store.apply_snapshot(&snapshot(json!({"status": "PROCESSING", "thumbnails": [thumb("a", None), thumb("b", None)]})));
        assert!(store.view().is_processing);

        let outcome = store.apply_snapshot(&snapshot(json!({
            "status": "COMPLETED",
            "thumbnails": [thumb("a", Some("https://cdn/a.png")), thumb("b", Some("https://cdn/b.png"))],
        })));
        assert_eq!(outcome, ApplyOutcome::BecameTerminal(GenerationStatus::Completed));

        let view = store.view();
        assert!(!view.is_processing);
        assert!(!view.is_error);
        assert_eq!(view.items.len(), 2);
        assert!(view.items.iter().all(|i| i.image.is_some()));
        assert_eq!(view.display_state(), DisplayState::Ready);
    }

    #[test]
    fn terminal_state_is_frozen() {
        let mut store = JobStatusStore::new("set-1");
        store.apply_snapshot(&snapshot(json!([thumb("a", Some("https://cdn/a.png"))])));
        let frozen = store.view();

        let late = snapshot(json!({"status": "PROCESSING", "thumbnails": [thumb("z", None)]}));
        assert_eq!(store.apply_snapshot(&late), ApplyOutcome::IgnoredTerminal);
        let patch = ItemPatch {
            title: Some("changed".into()),
            ..Default::default()
        };
        assert_eq!(store.apply_item_update("a", &patch), ApplyOutcome::IgnoredTerminal);
        assert_eq!(store.record_error("late failure"), ApplyOutcome::IgnoredTerminal);
        assert_eq!(store.promote_to_processing(), ApplyOutcome::IgnoredTerminal);

        assert_eq!(store.view(), frozen);
    }

    #[test]
    fn failed_snapshot_surfaces_error() {
        let mut store = JobStatusStore::new("set-1");
        let outcome = store.apply_snapshot(&snapshot(json!({"status": "failed"})));
        assert_eq!(outcome, ApplyOutcome::BecameTerminal(GenerationStatus::Failed));

        let view = store.view();
        assert!(view.is_error);
        assert!(!view.is_processing);
        assert_matches!(view.display_state(), DisplayState::Failed { .. });
    }

    #[test]
    fn item_updates_upsert_by_id() {
        let mut store = JobStatusStore::new("set-1");
        let first = ItemPatch {
            title: Some("draft".into()),
            status: Some("active".into()),
            ..Default::default()
        };
        let second = ItemPatch {
            title: Some("final".into()),
            image: Some("https://cdn/a.png".into()),
            ..Default::default()
        };

        store.apply_item_update("a", &first);
        store.apply_item_update("b", &first);
        store.apply_item_update("a", &second);

        assert_eq!(store.items().len(), 2);
        let a = &store.items()[0];
        assert_eq!(a.id, "a");
        assert_eq!(a.title, "final");
        assert_eq!(a.status.as_deref(), Some("active"));
        assert_eq!(a.image.as_deref(), Some("https://cdn/a.png"));
    }

    #[test]
    fn polled_item_takes_over_job_placeholder() {
        let mut store = JobStatusStore::new("set-1");
        let started = ItemPatch {
            job_id: Some("job-1".into()),
            ..Default::default()
        };
        store.apply_item_update("job-1", &started);

        store.apply_snapshot(&snapshot(json!({
            "status": "PROCESSING",
            "thumbnails": [{"id": "a", "title": "A", "jobId": "job-1"}],
        })));

        assert_eq!(store.items().len(), 1);
        assert_eq!(store.items()[0].id, "a");
        assert_eq!(store.items()[0].job_id.as_deref(), Some("job-1"));

        // A late started event for the same job updates the real item.
        let progress = ItemPatch {
            job_id: Some("job-1".into()),
            progress: Some(0.5),
            ..Default::default()
        };
        store.apply_item_update("job-1", &progress);

        assert_eq!(store.items().len(), 1);
        assert_eq!(store.items()[0].id, "a");
        assert_eq!(store.items()[0].progress, Some(0.5));
    }

    #[test]
    fn item_listed_by_id_and_job_collapses_to_one() {
        let mut store = JobStatusStore::new("set-1");
        store.apply_snapshot(&snapshot(json!({"status": "PROCESSING", "thumbnails": [{"id": "a"}]})));
        store.apply_item_update("job-1", &ItemPatch::default());
        assert_eq!(store.items().len(), 2);

        store.apply_snapshot(&snapshot(json!({
            "status": "PROCESSING",
            "thumbnails": [{"id": "a", "jobId": "job-1", "title": "A"}],
        })));

        let ids: Vec<_> = store.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
        assert_eq!(store.items()[0].title, "A");
    }

    #[test]
    fn completed_snapshot_replaces_placeholders() {
        let mut store = JobStatusStore::new("set-1");
        let started = ItemPatch {
            job_id: Some("job-9".into()),
            status: Some("active".into()),
            ..Default::default()
        };
        store.apply_item_update("job-9", &started);

        store.apply_snapshot(&snapshot(json!({
            "status": "COMPLETED",
            "thumbnails": [thumb("t-1", Some("https://cdn/1.png"))],
        })));

        let ids: Vec<_> = store.items().iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["t-1"]);
    }

    #[test]
    fn empty_completion_stays_processing() {
        let mut store = JobStatusStore::new("set-1");
        let outcome = store.apply_snapshot(&snapshot(json!({"status": "COMPLETED", "thumbnails": []})));
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(store.status(), GenerationStatus::Processing);
        assert!(store.view().is_processing);
    }

    #[test]
    fn mark_terminal_rejects_nonterminal_status() {
        let mut store = JobStatusStore::new("set-1");
        assert_matches!(
            store.mark_terminal(GenerationStatus::Queued, None),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn mark_terminal_keeps_failure_reason() {
        let mut store = JobStatusStore::new("set-1");
        let outcome = store
            .mark_terminal(GenerationStatus::Failed, Some("gpu exploded".into()))
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::BecameTerminal(GenerationStatus::Failed));
        assert_eq!(
            store.view().display_state(),
            DisplayState::Failed {
                reason: Some("gpu exploded".into())
            }
        );
        assert_eq!(
            store.mark_terminal(GenerationStatus::Completed, None).unwrap(),
            ApplyOutcome::IgnoredTerminal
        );
    }

    #[test]
    fn transient_error_leaves_loading_but_keeps_processing_view() {
        let mut store = JobStatusStore::new("set-1");
        store.record_error("connection refused");

        let view = store.view();
        assert!(!view.is_loading);
        assert!(view.is_error);
        assert!(view.is_processing);
        assert_eq!(view.display_state(), DisplayState::Processing);

        store.apply_snapshot(&snapshot(json!({"status": "QUEUED"})));
        let view = store.view();
        assert!(!view.is_error);
        assert!(view.error.is_none());
    }

    #[test]
    fn promote_moves_queued_to_processing_only() {
        let mut store = JobStatusStore::new("set-1");
        store.apply_snapshot(&snapshot(json!({"status": "QUEUED"})));
        assert_eq!(store.promote_to_processing(), ApplyOutcome::Applied);
        assert_eq!(store.status(), GenerationStatus::Processing);
        assert_eq!(store.promote_to_processing(), ApplyOutcome::Unchanged);
    }
}
