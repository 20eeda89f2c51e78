//! Interval polling of a generation set's status.
//!
//! [`PollingChannel`] runs one Tokio task per set: fetch immediately, then
//! once per interval, forwarding each normalized snapshot (or fetch error)
//! to the reconciler. Fetches are strictly sequential inside the task, so
//! a slow response delays the next tick instead of overlapping it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thumbmaker_core::snapshot::{normalize_snapshot, NormalizedSnapshot};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::StatusSource;
use crate::reconciler::ChannelUpdate;

/// Shortest accepted polling period; shorter ones are raised to it.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Result of one polling tick.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    Snapshot(NormalizedSnapshot),
    /// The fetch failed; polling continues on the next tick.
    Failed(String),
}

/// Periodic status fetcher for one generation set.
///
/// Stops on its own after forwarding a terminal snapshot. Dropping the
/// channel stops it as well.
pub struct PollingChannel {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    fetches: Arc<AtomicU64>,
}

impl PollingChannel {
    /// Spawn the polling task. Must be called within a Tokio runtime.
    ///
    /// `interval` is raised to [`MIN_POLL_INTERVAL`] if shorter.
    pub fn start(
        source: Arc<dyn StatusSource>,
        set_id: impl Into<String>,
        interval: Duration,
        updates: mpsc::UnboundedSender<ChannelUpdate>,
    ) -> Self {
        let set_id: String = set_id.into();
        if interval < MIN_POLL_INTERVAL {
            tracing::warn!(
                set_id = %set_id,
                interval_ms = interval.as_millis() as u64,
                min_ms = MIN_POLL_INTERVAL.as_millis() as u64,
                "Poll interval too short, using minimum",
            );
        }
        let interval = interval.max(MIN_POLL_INTERVAL);
        let cancel = CancellationToken::new();
        let fetches = Arc::new(AtomicU64::new(0));

        let handle = tokio::spawn(run_poll_loop(
            source,
            set_id,
            interval,
            updates,
            cancel.clone(),
            Arc::clone(&fetches),
        ));

        Self {
            cancel,
            handle: Some(handle),
            fetches,
        }
    }

    /// Stop polling. Idempotent. A fetch still in flight is discarded.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Wait for the polling task to exit.
    pub async fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PollingChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_poll_loop(
    source: Arc<dyn StatusSource>,
    set_id: String,
    interval: Duration,
    updates: mpsc::UnboundedSender<ChannelUpdate>,
    cancel: CancellationToken,
    fetches: Arc<AtomicU64>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::debug!(
        set_id = %set_id,
        interval_ms = interval.as_millis() as u64,
        "Status polling started",
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        fetches.fetch_add(1, Ordering::SeqCst);
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = source.fetch_status(&set_id) => result,
        };

        let outcome = match result {
            Ok(raw) => {
                let snapshot = normalize_snapshot(&raw);
                if snapshot.dropped_items > 0 {
                    tracing::warn!(
                        set_id = %set_id,
                        dropped = snapshot.dropped_items,
                        "Status response contained unparsable items",
                    );
                }
                tracing::debug!(
                    set_id = %set_id,
                    status = %snapshot.status,
                    items = snapshot.items.len(),
                    shape = ?snapshot.shape,
                    "Status polled",
                );
                PollOutcome::Snapshot(snapshot)
            }
            Err(e) => {
                tracing::warn!(set_id = %set_id, error = %e, "Status poll failed");
                PollOutcome::Failed(e.to_string())
            }
        };

        let terminal = matches!(&outcome, PollOutcome::Snapshot(s) if s.is_terminal());
        if updates.send(ChannelUpdate::Poll(outcome)).is_err() {
            tracing::debug!(set_id = %set_id, "Update receiver dropped, stopping poll");
            break;
        }
        if terminal {
            tracing::info!(set_id = %set_id, "Terminal status polled, stopping poll");
            break;
        }
    }

    tracing::debug!(set_id = %set_id, "Status polling stopped");
}
