//! Live push subscription for one generation set.
//!
//! [`PushChannel`] owns a background task that opens a [`PushTransport`]
//! through a [`TransportConnector`], forwards events for its set to the
//! reconciler, and reconnects with backoff when the session drops. The
//! channel never decides terminality itself; the tracker disconnects it
//! once the reconciler halts.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{self, EventSender, TrackerEvent};
use crate::reconciler::ChannelUpdate;
use crate::reconnect::{reconnect_loop, ReconnectConfig};
use crate::transport::{PushTransport, TransportConnector};

/// Observable state of the push subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    /// The last connect or receive attempt failed.
    Error(String),
}

/// Push subscription for one generation set.
pub struct PushChannel {
    set_id: String,
    cancel: CancellationToken,
    state_rx: watch::Receiver<ConnectionState>,
    handle: Option<JoinHandle<()>>,
}

impl PushChannel {
    /// Spawn the push task. Must be called within a Tokio runtime.
    pub fn connect(
        connector: Arc<dyn TransportConnector>,
        set_id: impl Into<String>,
        reconnect: ReconnectConfig,
        updates: mpsc::UnboundedSender<ChannelUpdate>,
        events: Option<EventSender>,
    ) -> Self {
        let set_id = set_id.into();
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let session = PushSession {
            connector,
            set_id: set_id.clone(),
            reconnect,
            updates,
            events,
            state: state_tx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(session.run());

        Self {
            set_id,
            cancel,
            state_rx,
            handle: Some(handle),
        }
    }

    pub fn set_id(&self) -> &str {
        &self.set_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Close the transport and stop reconnecting. Idempotent.
    pub fn disconnect(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!(set_id = %self.set_id, "Disconnecting push channel");
        }
        self.cancel.cancel();
    }

    pub fn is_disconnected(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the push task to exit.
    pub async fn wait(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// How a connected session ended.
enum SessionEnd {
    /// Disconnect requested or nobody is listening any more.
    Stopped,
    /// The server closed the session or it failed; try again.
    Lost,
}

struct PushSession {
    connector: Arc<dyn TransportConnector>,
    set_id: String,
    reconnect: ReconnectConfig,
    updates: mpsc::UnboundedSender<ChannelUpdate>,
    events: Option<EventSender>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl PushSession {
    async fn run(self) {
        let first = tokio::select! {
            _ = self.cancel.cancelled() => None,
            result = self.connector.connect(&self.set_id) => Some(result),
        };

        let mut transport = match first {
            None => {
                self.set_state(ConnectionState::Disconnected);
                return;
            }
            Some(Ok(transport)) => transport,
            Some(Err(e)) => {
                tracing::warn!(
                    set_id = %self.set_id,
                    error = %e,
                    "Push transport unavailable, relying on polling",
                );
                self.set_state(ConnectionState::Error(e.to_string()));
                self.emit(TrackerEvent::TransportUnavailable {
                    set_id: self.set_id.clone(),
                    error: e.to_string(),
                });
                match self.reconnect().await {
                    Some(transport) => transport,
                    None => return,
                }
            }
        };

        loop {
            self.set_state(ConnectionState::Connected);
            self.emit(TrackerEvent::TransportConnected {
                set_id: self.set_id.clone(),
                transport: transport.kind(),
            });

            let end = self.forward(transport.as_mut()).await;
            transport.close().await;
            self.emit(TrackerEvent::TransportDisconnected {
                set_id: self.set_id.clone(),
            });

            match end {
                SessionEnd::Stopped => {
                    self.set_state(ConnectionState::Disconnected);
                    return;
                }
                SessionEnd::Lost => match self.reconnect().await {
                    Some(next) => transport = next,
                    None => return,
                },
            }
        }
    }

    /// Forward events until the session ends.
    async fn forward(&self, transport: &mut dyn PushTransport) -> SessionEnd {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Stopped,
                next = transport.next_event() => next,
            };

            match next {
                Ok(Some(event)) => {
                    if event.set_id() != self.set_id {
                        tracing::trace!(
                            set_id = %self.set_id,
                            other = %event.set_id(),
                            "Dropping push event for another set",
                        );
                        continue;
                    }
                    tracing::debug!(set_id = %self.set_id, event = event.name(), "Push event received");
                    if self.updates.send(ChannelUpdate::Push(event)).is_err() {
                        return SessionEnd::Stopped;
                    }
                }
                Ok(None) => {
                    tracing::info!(set_id = %self.set_id, "Push session closed by server");
                    self.set_state(ConnectionState::Disconnected);
                    return SessionEnd::Lost;
                }
                Err(e) => {
                    tracing::warn!(set_id = %self.set_id, error = %e, "Push session failed");
                    self.set_state(ConnectionState::Error(e.to_string()));
                    return SessionEnd::Lost;
                }
            }
        }
    }

    async fn reconnect(&self) -> Option<Box<dyn PushTransport>> {
        if self.updates.is_closed() {
            self.set_state(ConnectionState::Disconnected);
            return None;
        }
        let transport = reconnect_loop(
            self.connector.as_ref(),
            &self.set_id,
            &self.reconnect,
            &self.cancel,
        )
        .await;
        if transport.is_none() {
            self.set_state(ConnectionState::Disconnected);
        } else {
            self.set_state(ConnectionState::Connecting);
        }
        transport
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn emit(&self, event: TrackerEvent) {
        if let Some(tx) = &self.events {
            events::emit(tx, event);
        }
    }
}
