//! Shape-tolerant parsing of generation status responses.
//!
//! The status endpoint has answered with three different shapes over
//! time:
//!
//! ```text
//! { "status": "PROCESSING", "thumbnails": [Item, ...] }   // envelope
//! { "id": "...", "image": "...", "title": "..." }         // single item
//! [ Item, Item, ... ]                                     // bare array
//! ```
//!
//! [`normalize_snapshot`] is the single place where those shapes are told
//! apart. It never fails: an id-less object with a `title` or `image` is
//! read as one finished item, and anything else unrecognized becomes an
//! empty, still-processing snapshot.

use serde_json::{Map, Value};

use crate::item::GenerationItem;
use crate::status::GenerationStatus;

/// Which wire shape a snapshot was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotShape {
    /// `{ status, thumbnails }`.
    Envelope,
    /// A single item object carrying an `id`.
    SingleItem,
    /// A bare array of items.
    ItemList,
    /// An id-less object that still looks like an item (`title`/`image`).
    Fallback,
    /// Nothing recognizable.
    Unrecognized,
}

/// A status response reduced to the fields the store cares about.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSnapshot {
    pub shape: SnapshotShape,
    pub status: GenerationStatus,
    pub items: Vec<GenerationItem>,
    /// Entries that were present but could not be parsed as items.
    pub dropped_items: usize,
}

impl NormalizedSnapshot {
    /// An empty snapshot that keeps the set in the processing state.
    pub fn empty(shape: SnapshotShape) -> Self {
        Self {
            shape,
            status: GenerationStatus::Processing,
            items: Vec::new(),
            dropped_items: 0,
        }
    }

    /// Whether applying this snapshot ends observation of the set.
    ///
    /// A completion with no items is not terminal: an empty result is
    /// still treated as processing.
    pub fn is_terminal(&self) -> bool {
        match self.status {
            GenerationStatus::Failed => true,
            GenerationStatus::Completed => !self.items.is_empty(),
            _ => false,
        }
    }
}

/// Decode a raw status response into a [`NormalizedSnapshot`].
pub fn normalize_snapshot(value: &Value) -> NormalizedSnapshot {
    match value {
        Value::Array(entries) => {
            let (items, dropped_items) = parse_items(entries);
            NormalizedSnapshot {
                shape: SnapshotShape::ItemList,
                status: GenerationStatus::Completed,
                items,
                dropped_items,
            }
        }
        Value::Object(fields) => normalize_object(fields),
        _ => NormalizedSnapshot::empty(SnapshotShape::Unrecognized),
    }
}

fn normalize_object(fields: &Map<String, Value>) -> NormalizedSnapshot {
    let status = fields.get("status").and_then(Value::as_str);

    if let Some(thumbnails) = fields.get("thumbnails") {
        let (items, dropped_items) = match thumbnails {
            Value::Array(entries) => parse_items(entries),
            Value::Null => (Vec::new(), 0),
            _ => (Vec::new(), 1),
        };
        return NormalizedSnapshot {
            shape: SnapshotShape::Envelope,
            status: status.map_or(GenerationStatus::Processing, GenerationStatus::normalize),
            items,
            dropped_items,
        };
    }

    if fields.contains_key("id") {
        return match GenerationItem::from_value(&Value::Object(fields.clone())) {
            Ok(item) => single_item(SnapshotShape::SingleItem, item, status),
            Err(_) => NormalizedSnapshot {
                dropped_items: 1,
                ..NormalizedSnapshot::empty(SnapshotShape::SingleItem)
            },
        };
    }

    if let Some(status) = status {
        return NormalizedSnapshot {
            status: GenerationStatus::normalize(status),
            ..NormalizedSnapshot::empty(SnapshotShape::Envelope)
        };
    }

    if let Some(item) = fallback_item(fields) {
        return NormalizedSnapshot {
            shape: SnapshotShape::Fallback,
            status: GenerationStatus::Completed,
            items: vec![item],
            dropped_items: 0,
        };
    }

    NormalizedSnapshot::empty(SnapshotShape::Unrecognized)
}

/// Wrap one item as a set. An item with an image and no explicit status
/// is a finished result.
fn single_item(shape: SnapshotShape, item: GenerationItem, status: Option<&str>) -> NormalizedSnapshot {
    let status = match status {
        Some(raw) => GenerationStatus::normalize(raw),
        None if item.image.is_some() => GenerationStatus::Completed,
        None => GenerationStatus::Processing,
    };
    NormalizedSnapshot {
        shape,
        status,
        items: vec![item],
        dropped_items: 0,
    }
}

/// Build an item from an id-less object, keyed by its image URL or title.
fn fallback_item(fields: &Map<String, Value>) -> Option<GenerationItem> {
    let non_empty = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    let id = non_empty("image").or_else(|| non_empty("title"))?;

    let mut with_id = fields.clone();
    with_id.insert("id".into(), Value::String(id.to_string()));
    GenerationItem::from_value(&Value::Object(with_id)).ok()
}

fn parse_items(entries: &[Value]) -> (Vec<GenerationItem>, usize) {
    let mut items: Vec<GenerationItem> = Vec::with_capacity(entries.len());
    let mut dropped = 0;
    for entry in entries {
        match GenerationItem::from_value(entry) {
            Ok(item) => match items.iter_mut().find(|existing| existing.id == item.id) {
                // Duplicate ids within one response: the later entry wins.
                Some(existing) => *existing = item,
                None => items.push(item),
            },
            Err(_) => dropped += 1,
        }
    }
    (items, dropped)
}
