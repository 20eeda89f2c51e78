//! Push event wire types and parser.
//!
//! The push service sends JSON text frames shaped
//! `{"event": "<name>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`PushEvent`] enum and builds the outbound
//! subscription frames.

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thumbmaker_core::item::ItemPatch;
use thumbmaker_core::snapshot::{normalize_snapshot, NormalizedSnapshot};

/// Event name for an item that began processing.
pub const EVENT_STARTED: &str = "thumbnail:started";
/// Event name for a finished set.
pub const EVENT_COMPLETED: &str = "thumbnail:completed";
/// Event name for a failed set.
pub const EVENT_FAILED: &str = "thumbnail:failed";

/// All known push events.
///
/// Deserialized via the adjacently-tagged `"event"` field with associated
/// `"data"` content.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PushEvent {
    /// An item began processing; upsert a placeholder.
    #[serde(rename = "thumbnail:started")]
    Started(StartedData),

    /// The full, final item list for a set.
    #[serde(rename = "thumbnail:completed")]
    Completed(CompletedData),

    /// The set failed.
    #[serde(rename = "thumbnail:failed")]
    Failed(FailedData),
}

impl PushEvent {
    /// The generation set this event belongs to.
    pub fn set_id(&self) -> &str {
        match self {
            Self::Started(data) => &data.set_id,
            Self::Completed(data) => &data.set_id,
            Self::Failed(data) => &data.set_id,
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started(_) => EVENT_STARTED,
            Self::Completed(_) => EVENT_COMPLETED,
            Self::Failed(_) => EVENT_FAILED,
        }
    }

    /// Whether this event ends the set.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started(_))
    }
}

/// Payload for `thumbnail:started`: the set id plus item metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct StartedData {
    #[serde(rename = "setId", deserialize_with = "wire_set_id")]
    pub set_id: String,
    #[serde(flatten)]
    pub item: ItemPatch,
}

/// Payload for `thumbnail:completed`.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletedData {
    #[serde(rename = "setId", deserialize_with = "wire_set_id")]
    pub set_id: String,
    /// Raw items; parsed with the same rules as a polled item list.
    #[serde(default)]
    pub thumbnails: Vec<Value>,
}

impl CompletedData {
    /// Normalize the delivered items into a completed snapshot.
    pub fn snapshot(&self) -> NormalizedSnapshot {
        normalize_snapshot(&Value::Array(self.thumbnails.clone()))
    }
}

/// Payload for `thumbnail:failed`.
#[derive(Debug, Clone, Deserialize)]
pub struct FailedData {
    #[serde(rename = "setId", deserialize_with = "wire_set_id")]
    pub set_id: String,
    #[serde(default, alias = "error")]
    pub reason: Option<String>,
}

/// Frames sent from the client to the push service.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    #[serde(rename = "subscribe")]
    Subscribe {
        #[serde(rename = "setId")]
        set_id: String,
    },
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        #[serde(rename = "setId")]
        set_id: String,
    },
}

impl ClientFrame {
    /// Serialize to a JSON text frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Parse a push text frame into a typed event.
///
/// Returns `Err` for malformed JSON or unknown event names.
/// Callers should log and continue.
pub fn parse_message(text: &str) -> Result<PushEvent, serde_json::Error> {
    serde_json::from_str(text)
}

/// Parse an already-decoded event object (long-poll responses).
pub fn parse_value(value: Value) -> Result<PushEvent, serde_json::Error> {
    serde_json::from_value(value)
}

fn wire_set_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid setId: {other}"))),
    }
}
