//! Merges polling and push observations into one generation set state.
//!
//! Rules:
//!
//! 1. A terminal status from either channel wins immediately; the
//!    reconciliation that produced it carries `halt = true` so the caller
//!    tears down both channels. Everything after that is ignored.
//! 2. Non-terminal updates from both channels are applied in arrival
//!    order, last write wins per field.
//! 3. Loading ends on the first observation, successful or not, and never
//!    comes back.

use thumbmaker_core::status::GenerationStatus;
use thumbmaker_core::store::{ApplyOutcome, GenerationView, JobStatusStore};
use thumbmaker_core::types::SetId;

use crate::messages::PushEvent;
use crate::polling::PollOutcome;

/// An observation from one of the channels.
#[derive(Debug, Clone)]
pub enum ChannelUpdate {
    Poll(PollOutcome),
    Push(PushEvent),
}

/// Result of reconciling one update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub outcome: ApplyOutcome,
    /// Set exactly once, on the first terminal observation.
    pub halt: bool,
}

/// Owns the store for one generation set and applies channel updates to it.
#[derive(Debug)]
pub struct Reconciler {
    store: JobStatusStore,
    halted: bool,
}

impl Reconciler {
    pub fn new(set_id: impl Into<SetId>) -> Self {
        Self {
            store: JobStatusStore::new(set_id),
            halted: false,
        }
    }

    pub fn set_id(&self) -> &str {
        self.store.set_id()
    }

    pub fn store(&self) -> &JobStatusStore {
        &self.store
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn view(&self) -> GenerationView {
        self.store.view()
    }

    /// Apply one update and report whether tracking should halt.
    pub fn apply(&mut self, update: &ChannelUpdate) -> Reconciliation {
        let outcome = match update {
            ChannelUpdate::Poll(PollOutcome::Snapshot(snapshot)) => self.store.apply_snapshot(snapshot),
            ChannelUpdate::Poll(PollOutcome::Failed(error)) => self.store.record_error(error.clone()),
            ChannelUpdate::Push(event) => self.apply_push(event),
        };

        let halt = matches!(outcome, ApplyOutcome::BecameTerminal(_)) && !self.halted;
        if halt {
            self.halted = true;
            tracing::info!(
                set_id = %self.store.set_id(),
                status = %self.store.status(),
                items = self.store.items().len(),
                "Generation set reached terminal status",
            );
        }

        Reconciliation { outcome, halt }
    }

    fn apply_push(&mut self, event: &PushEvent) -> ApplyOutcome {
        if event.set_id() != self.store.set_id() {
            tracing::trace!(
                set_id = %self.store.set_id(),
                other = %event.set_id(),
                event = event.name(),
                "Ignoring push event for another set",
            );
            return ApplyOutcome::Unchanged;
        }

        match event {
            PushEvent::Started(data) => {
                let Some(key) = data.item.key() else {
                    tracing::warn!(
                        set_id = %self.store.set_id(),
                        "Started event carried neither id nor jobId",
                    );
                    return self.store.promote_to_processing();
                };
                let key = key.to_string();
                let promoted = self.store.promote_to_processing();
                let updated = self.store.apply_item_update(&key, &data.item);
                combine(promoted, updated)
            }
            PushEvent::Completed(data) => self.store.apply_snapshot(&data.snapshot()),
            PushEvent::Failed(data) => self
                .store
                .mark_terminal(GenerationStatus::Failed, data.reason.clone())
                .unwrap_or(ApplyOutcome::IgnoredTerminal),
        }
    }
}

/// Outcome of two writes applied back to back.
fn combine(first: ApplyOutcome, second: ApplyOutcome) -> ApplyOutcome {
    if second == ApplyOutcome::Unchanged {
        first
    } else {
        second
    }
}
