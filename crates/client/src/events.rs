//! Telemetry events emitted by generation trackers.
//!
//! These are observational only: correctness never depends on anyone
//! listening. They are broadcast via a [`tokio::sync::broadcast`] channel;
//! call [`crate::tracker::TrackerHandle::subscribe_events`] to receive them.

use serde::Serialize;
use thumbmaker_core::status::GenerationStatus;
use thumbmaker_core::types::SetId;
use tokio::sync::broadcast;

use crate::transport::TransportKind;

/// Broadcast channel capacity for tracker events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A tracker-level event for one generation set.
#[derive(Debug, Clone, Serialize)]
pub enum TrackerEvent {
    /// A push transport was established.
    TransportConnected {
        set_id: SetId,
        transport: TransportKind,
    },

    /// The preferred transport failed and a fallback is being tried.
    TransportFallback {
        set_id: SetId,
        from: TransportKind,
        to: TransportKind,
        /// Why the preferred transport failed.
        error: String,
    },

    /// No push transport could be established; polling carries on alone.
    TransportUnavailable { set_id: SetId, error: String },

    /// The push session ended (closed, errored, or torn down).
    TransportDisconnected { set_id: SetId },

    /// A status poll failed; polling continues.
    PollFailed { set_id: SetId, error: String },

    /// The set reached a terminal status and tracking stopped.
    Terminal {
        set_id: SetId,
        status: GenerationStatus,
    },
}

/// Sending half of the telemetry channel.
pub type EventSender = broadcast::Sender<TrackerEvent>;

/// Create a telemetry channel with the default capacity.
pub fn channel() -> EventSender {
    let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    tx
}

/// Publish an event, ignoring the error raised when nobody is listening.
pub fn emit(tx: &EventSender, event: TrackerEvent) {
    let _ = tx.send(event);
}
