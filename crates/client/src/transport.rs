//! Push transports: WebSocket with a long-polling fallback.
//!
//! A [`PushTransport`] yields [`PushEvent`]s for one subscription. The
//! [`NegotiatingConnector`] picks the transport at connect time according
//! to [`TransportPreference`], so callers never deal with reconnection
//! heuristics of a particular socket library.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::api::GenerationApi;
use crate::config::TransportPreference;
use crate::events::{self, EventSender, TrackerEvent};
use crate::messages::{parse_message, parse_value, ClientFrame, PushEvent};

/// Pause between long-poll requests that came back empty.
const LONG_POLL_IDLE_DELAY: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Which concrete transport is carrying a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransportKind {
    WebSocket,
    LongPoll,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WebSocket => "websocket",
            Self::LongPoll => "long-poll",
        })
    }
}

/// Errors raised by push transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to establish the transport.
    #[error("Connection error: {0}")]
    Connect(String),

    /// An established transport failed while receiving.
    #[error("Receive error: {0}")]
    Receive(String),

    /// A frame could not be encoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    /// No transport could be established.
    #[error("Push transport unavailable: {0}")]
    Unavailable(String),
}

/// A live push subscription for one generation set.
#[async_trait]
pub trait PushTransport: Send {
    fn kind(&self) -> TransportKind;

    /// Wait for the next event.
    ///
    /// Returns `Ok(None)` once the server closes the session. Malformed
    /// frames are logged and skipped.
    async fn next_event(&mut self) -> Result<Option<PushEvent>, TransportError>;

    /// Close the session. Must be safe to call more than once.
    async fn close(&mut self);
}

/// Opens push transports for a generation set.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self, set_id: &str) -> Result<Box<dyn PushTransport>, TransportError>;
}

// ---------------------------------------------------------------------------
// WebSocket
// ---------------------------------------------------------------------------

/// Push subscription over a WebSocket.
pub struct WebSocketTransport {
    set_id: String,
    client_id: String,
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Connect to the push endpoint and subscribe to `set_id`.
    ///
    /// Generates a unique `clientId` (UUID v4) and appends it as a query
    /// parameter so the server can address this client.
    pub async fn connect(push_url: &str, set_id: &str) -> Result<Self, TransportError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let separator = if push_url.contains('?') { '&' } else { '?' };
        let url = format!("{push_url}{separator}clientId={client_id}");

        let (mut stream, _response) = connect_async(&url).await.map_err(|e| {
            TransportError::Connect(format!("Failed to connect to {push_url}: {e}"))
        })?;

        let subscribe = ClientFrame::Subscribe {
            set_id: set_id.to_string(),
        }
        .to_text()?;
        stream
            .send(Message::Text(subscribe))
            .await
            .map_err(|e| TransportError::Connect(format!("Failed to subscribe: {e}")))?;

        tracing::info!(
            set_id,
            client_id = %client_id,
            "Push WebSocket connected to {push_url}",
        );

        Ok(Self {
            set_id: set_id.to_string(),
            client_id,
            stream,
            closed: false,
        })
    }
}

#[async_trait]
impl PushTransport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn next_event(&mut self) -> Result<Option<PushEvent>, TransportError> {
        if self.closed {
            return Ok(None);
        }
        while let Some(msg_result) = self.stream.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match parse_message(&text) {
                    Ok(event) => return Ok(Some(event)),
                    Err(e) => {
                        tracing::warn!(
                            set_id = %self.set_id,
                            error = %e,
                            raw_message = %text,
                            "Failed to parse push message",
                        );
                    }
                },
                Ok(Message::Binary(_)) => {
                    tracing::trace!(set_id = %self.set_id, "Ignoring binary push frame");
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {
                    // Handled automatically by tungstenite.
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!(set_id = %self.set_id, ?frame, "Push WebSocket closed");
                    self.closed = true;
                    return Ok(None);
                }
                Ok(Message::Frame(_)) => {}
                Err(e) => return Err(TransportError::Receive(e.to_string())),
            }
        }
        self.closed = true;
        Ok(None)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let unsubscribe = ClientFrame::Unsubscribe {
            set_id: self.set_id.clone(),
        };
        if let Ok(text) = unsubscribe.to_text() {
            let _ = self.stream.send(Message::Text(text)).await;
        }
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(set_id = %self.set_id, error = %e, "Error while closing push WebSocket");
        }
        tracing::debug!(set_id = %self.set_id, client_id = %self.client_id, "Push WebSocket closed by client");
    }
}

// ---------------------------------------------------------------------------
// Long-poll
// ---------------------------------------------------------------------------

/// Push subscription emulated with repeated long-poll requests.
pub struct LongPollTransport {
    api: GenerationApi,
    set_id: String,
    cursor: u64,
    buffer: VecDeque<PushEvent>,
    closed: bool,
}

impl LongPollTransport {
    /// Perform the initial poll, which establishes the cursor and proves the
    /// endpoint is reachable.
    pub async fn connect(api: GenerationApi, set_id: &str) -> Result<Self, TransportError> {
        let mut transport = Self {
            api,
            set_id: set_id.to_string(),
            cursor: 0,
            buffer: VecDeque::new(),
            closed: false,
        };
        transport
            .fetch()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::info!(set_id, cursor = transport.cursor, "Push long-poll established");
        Ok(transport)
    }

    /// Fetch one batch and buffer its events. Returns how many were buffered.
    async fn fetch(&mut self) -> Result<usize, TransportError> {
        let batch = self
            .api
            .poll_events(&self.set_id, self.cursor)
            .await
            .map_err(|e| TransportError::Receive(e.to_string()))?;

        self.cursor = self.cursor.max(batch.cursor);
        let before = self.buffer.len();
        for raw in batch.events {
            match parse_value(raw) {
                Ok(event) => self.buffer.push_back(event),
                Err(e) => {
                    tracing::warn!(set_id = %self.set_id, error = %e, "Failed to parse long-poll event");
                }
            }
        }
        Ok(self.buffer.len() - before)
    }
}

#[async_trait]
impl PushTransport for LongPollTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::LongPoll
    }

    async fn next_event(&mut self) -> Result<Option<PushEvent>, TransportError> {
        loop {
            if self.closed {
                return Ok(None);
            }
            if let Some(event) = self.buffer.pop_front() {
                return Ok(Some(event));
            }
            if self.fetch().await? == 0 {
                tokio::time::sleep(LONG_POLL_IDLE_DELAY).await;
            }
        }
    }

    async fn close(&mut self) {
        self.closed = true;
        self.buffer.clear();
    }
}

// ---------------------------------------------------------------------------
// Negotiation
// ---------------------------------------------------------------------------

/// Connector that selects a transport according to a [`TransportPreference`].
///
/// In `Auto` mode a failed WebSocket connect is reported as telemetry
/// ([`TrackerEvent::TransportFallback`]) and long-polling is tried; an error
/// is returned only when both fail.
pub struct NegotiatingConnector {
    api: GenerationApi,
    preference: TransportPreference,
    events: Option<EventSender>,
}

impl NegotiatingConnector {
    pub fn new(api: GenerationApi) -> Self {
        let preference = api.config().transport;
        Self {
            api,
            preference,
            events: None,
        }
    }

    /// Report fallbacks on the given telemetry channel.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    async fn connect_websocket(&self, set_id: &str) -> Result<Box<dyn PushTransport>, TransportError> {
        let push_url = self
            .api
            .config()
            .push_url
            .as_deref()
            .ok_or_else(|| TransportError::Connect("GENERATION_PUSH_URL not configured".into()))?;
        Ok(Box::new(WebSocketTransport::connect(push_url, set_id).await?))
    }

    async fn connect_long_poll(&self, set_id: &str) -> Result<Box<dyn PushTransport>, TransportError> {
        Ok(Box::new(LongPollTransport::connect(self.api.clone(), set_id).await?))
    }
}

#[async_trait]
impl TransportConnector for NegotiatingConnector {
    async fn connect(&self, set_id: &str) -> Result<Box<dyn PushTransport>, TransportError> {
        match self.preference {
            TransportPreference::WebSocket => self.connect_websocket(set_id).await,
            TransportPreference::LongPoll => self.connect_long_poll(set_id).await,
            TransportPreference::Auto => {
                let ws_error = match self.connect_websocket(set_id).await {
                    Ok(transport) => return Ok(transport),
                    Err(e) => e,
                };

                tracing::warn!(
                    set_id,
                    error = %ws_error,
                    "WebSocket unavailable, falling back to long-polling",
                );
                if let Some(tx) = &self.events {
                    events::emit(
                        tx,
                        TrackerEvent::TransportFallback {
                            set_id: set_id.to_string(),
                            from: TransportKind::WebSocket,
                            to: TransportKind::LongPoll,
                            error: ws_error.to_string(),
                        },
                    );
                }

                self.connect_long_poll(set_id).await.map_err(|lp_error| {
                    TransportError::Unavailable(format!(
                        "websocket: {ws_error}; long-poll: {lp_error}"
                    ))
                })
            }
        }
    }
}
