//! End-to-end tracking of one generation set.
//!
//! [`GenerationTracker`] holds the shared pieces (status source, push
//! connector, timings, telemetry channel). [`GenerationTracker::track`]
//! spawns a task that starts a [`PollingChannel`] and, when push is
//! configured, a [`PushChannel`], drains both through a [`Reconciler`], and
//! publishes every changed [`GenerationView`] on a `watch` channel.
//!
//! Both channels are torn down on the first terminal observation, on
//! [`TrackerHandle::shutdown`], or when the handle is dropped.

use std::sync::Arc;
use std::time::Duration;

use thumbmaker_core::status::GenerationStatus;
use thumbmaker_core::store::{ApplyOutcome, GenerationView};
use thumbmaker_core::types::SetId;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, GenerationApi, StatusSource};
use crate::config::{TrackerConfig, DEFAULT_POLL_INTERVAL};
use crate::events::{self, EventSender, TrackerEvent};
use crate::polling::{PollOutcome, PollingChannel};
use crate::push::PushChannel;
use crate::reconciler::{ChannelUpdate, Reconciler};
use crate::reconnect::ReconnectConfig;
use crate::transport::{NegotiatingConnector, TransportConnector};

/// Factory for per-set trackers sharing one API client and event channel.
#[derive(Clone)]
pub struct GenerationTracker {
    source: Arc<dyn StatusSource>,
    connector: Option<Arc<dyn TransportConnector>>,
    poll_interval: Duration,
    reconnect: ReconnectConfig,
    events: EventSender,
}

impl GenerationTracker {
    /// Polling-only tracker with default timings.
    pub fn new(source: Arc<dyn StatusSource>) -> Self {
        Self {
            source,
            connector: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect: ReconnectConfig::default(),
            events: events::channel(),
        }
    }

    /// Build a tracker backed by [`GenerationApi`], with push enabled when
    /// the configuration names a push endpoint.
    pub fn from_config(config: TrackerConfig) -> Result<Self, ApiError> {
        let api = GenerationApi::new(config.clone())?;
        let mut tracker = Self::new(Arc::new(api.clone()))
            .with_poll_interval(config.poll_interval)
            .with_reconnect(config.reconnect.clone());

        if config.push_enabled() {
            let connector = NegotiatingConnector::new(api).with_events(tracker.events.clone());
            tracker = tracker.with_push(Arc::new(connector));
        } else {
            tracing::info!("No push endpoint configured, tracking by polling only");
        }
        Ok(tracker)
    }

    pub fn with_push(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Subscribe to telemetry for every set tracked by this tracker.
    pub fn subscribe_events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Start tracking `set_id`. Must be called within a Tokio runtime.
    pub fn track(&self, set_id: impl Into<SetId>) -> TrackerHandle {
        let set_id = set_id.into();
        let reconciler = Reconciler::new(set_id.clone());
        let (view_tx, view_rx) = watch::channel(reconciler.view());
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let polling = PollingChannel::start(
            Arc::clone(&self.source),
            set_id.clone(),
            self.poll_interval,
            updates_tx.clone(),
        );
        let push = self.connector.as_ref().map(|connector| {
            PushChannel::connect(
                Arc::clone(connector),
                set_id.clone(),
                self.reconnect.clone(),
                updates_tx.clone(),
                Some(self.events.clone()),
            )
        });
        drop(updates_tx);

        tracing::info!(set_id = %set_id, push = push.is_some(), "Tracking generation set");

        let run = TrackerRun {
            reconciler,
            polling,
            push,
            updates: updates_rx,
            view: view_tx,
            events: self.events.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(run.run());

        TrackerHandle {
            set_id,
            view: view_rx,
            events: self.events.clone(),
            cancel,
        }
    }
}

/// Handle to one tracked set. Dropping it stops tracking.
pub struct TrackerHandle {
    set_id: SetId,
    view: watch::Receiver<GenerationView>,
    events: EventSender,
    cancel: CancellationToken,
}

impl TrackerHandle {
    pub fn set_id(&self) -> &str {
        &self.set_id
    }

    /// Current view of the set.
    pub fn view(&self) -> GenerationView {
        self.view.borrow().clone()
    }

    /// Watch view changes.
    pub fn subscribe(&self) -> watch::Receiver<GenerationView> {
        self.view.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Wait until the set is terminal.
    ///
    /// Returns `None` if tracking stopped first (shutdown or drop).
    pub async fn wait_terminal(&self) -> Option<GenerationView> {
        let mut rx = self.view.clone();
        let view = rx.wait_for(GenerationView::is_terminal).await.ok()?;
        Some(view.clone())
    }

    /// Stop polling and close the push transport. Idempotent.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(set_id = %self.set_id, "Tracker shutdown requested");
        }
        self.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// State owned by the background task of one tracked set.
struct TrackerRun {
    reconciler: Reconciler,
    polling: PollingChannel,
    push: Option<PushChannel>,
    updates: mpsc::UnboundedReceiver<ChannelUpdate>,
    view: watch::Sender<GenerationView>,
    events: EventSender,
    cancel: CancellationToken,
}

impl TrackerRun {
    async fn run(mut self) {
        loop {
            let update = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!(set_id = %self.reconciler.set_id(), "Tracker cancelled");
                    break;
                }
                update = self.updates.recv() => match update {
                    Some(update) => update,
                    None => break,
                },
            };

            if self.handle(update) {
                break;
            }
        }

        self.teardown().await;
    }

    /// Apply one update. Returns `true` once tracking should halt.
    fn handle(&mut self, update: ChannelUpdate) -> bool {
        let set_id = self.reconciler.set_id().to_string();
        if let ChannelUpdate::Poll(PollOutcome::Failed(error)) = &update {
            events::emit(
                &self.events,
                TrackerEvent::PollFailed {
                    set_id: set_id.clone(),
                    error: error.clone(),
                },
            );
        }

        let reconciliation = self.reconciler.apply(&update);
        if matches!(
            reconciliation.outcome,
            ApplyOutcome::Applied | ApplyOutcome::BecameTerminal(_)
        ) {
            self.view.send_replace(self.reconciler.view());
        }

        if !reconciliation.halt {
            return false;
        }

        let view = self.reconciler.view();
        if view.status == GenerationStatus::Failed {
            tracing::error!(
                set_id = %set_id,
                reason = view.failure_reason.as_deref().unwrap_or("unknown"),
                "Generation failed",
            );
        }
        events::emit(
            &self.events,
            TrackerEvent::Terminal {
                set_id,
                status: view.status,
            },
        );
        true
    }

    async fn teardown(mut self) {
        self.polling.stop();
        if let Some(push) = &self.push {
            push.disconnect();
        }
        self.polling.wait().await;
        if let Some(push) = self.push.as_mut() {
            push.wait().await;
        }
        tracing::debug!(set_id = %self.reconciler.set_id(), "Tracker stopped");
    }
}
