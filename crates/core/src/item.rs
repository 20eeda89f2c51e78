//! Generated thumbnails and partial updates to them.
//!
//! Field names follow the backend's camelCase JSON. Identifiers arrive as
//! either strings or integers depending on which service produced them,
//! so they are normalized to strings here.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Aspect ratios
// ---------------------------------------------------------------------------

/// Aspect ratio tags the UI knows how to lay out, in display order.
pub const KNOWN_ASPECT_RATIOS: &[&str] = &["1:1", "2:3", "3:2", "16:9", "9:16"];

/// Display rank of an aspect ratio tag. Unknown tags sort after known ones.
pub fn aspect_ratio_rank(tag: &str) -> usize {
    KNOWN_ASPECT_RATIOS
        .iter()
        .position(|known| *known == tag.trim())
        .unwrap_or(KNOWN_ASPECT_RATIOS.len())
}

/// Items sharing one aspect ratio tag.
#[derive(Debug, PartialEq)]
pub struct AspectGroup<'a> {
    pub aspect_ratio: &'a str,
    pub items: Vec<&'a GenerationItem>,
}

/// Group items by aspect ratio for display.
///
/// Groups are ordered by [`aspect_ratio_rank`]; unknown tags keep the order
/// in which they were first seen. Items keep arrival order within a group.
pub fn group_by_aspect_ratio(items: &[GenerationItem]) -> Vec<AspectGroup<'_>> {
    let mut groups: Vec<AspectGroup<'_>> = Vec::new();
    for item in items {
        let tag = item.aspect_ratio.trim();
        match groups.iter_mut().find(|g| g.aspect_ratio == tag) {
            Some(group) => group.items.push(item),
            None => groups.push(AspectGroup {
                aspect_ratio: tag,
                items: vec![item],
            }),
        }
    }
    groups.sort_by_key(|g| aspect_ratio_rank(g.aspect_ratio));
    groups
}

// ---------------------------------------------------------------------------
// GenerationItem
// ---------------------------------------------------------------------------

/// One produced thumbnail within a generation set.
///
/// `job_id`, `status` and `progress` are only populated while the item is
/// still in flight; `image` is absent until the artifact exists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationItem {
    #[serde(deserialize_with = "wire_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub aspect_ratio: String,
    #[serde(
        default,
        deserialize_with = "optional_non_empty",
        skip_serializing_if = "Option::is_none"
    )]
    pub image: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_non_empty",
        skip_serializing_if = "Option::is_none"
    )]
    pub job_id: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_non_empty",
        skip_serializing_if = "Option::is_none"
    )]
    pub status: Option<String>,
    #[serde(
        default,
        deserialize_with = "optional_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub progress: Option<f64>,
}

impl GenerationItem {
    /// An empty placeholder carrying only an identifier.
    pub fn placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            description: String::new(),
            aspect_ratio: String::new(),
            image: None,
            created_at: None,
            job_id: None,
            status: None,
            progress: None,
        }
    }

    /// Parse a single item from raw JSON.
    pub fn from_value(value: &Value) -> Result<Self, CoreError> {
        Self::deserialize(value).map_err(|e| CoreError::MalformedPayload(e.to_string()))
    }

    /// True while the artifact has not been produced yet.
    pub fn is_placeholder(&self) -> bool {
        self.image.is_none()
    }
}

// ---------------------------------------------------------------------------
// ItemPatch
// ---------------------------------------------------------------------------

/// A partial item update. Only fields that are `Some` are written.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    #[serde(default, deserialize_with = "optional_non_empty")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub aspect_ratio: Option<String>,
    #[serde(default, deserialize_with = "optional_non_empty")]
    pub image: Option<String>,
    #[serde(default, deserialize_with = "optional_scalar")]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "optional_non_empty")]
    pub job_id: Option<String>,
    #[serde(default, deserialize_with = "optional_non_empty")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "optional_number")]
    pub progress: Option<f64>,
}

impl ItemPatch {
    /// The identifier this patch targets: the item id, else the job id.
    pub fn key(&self) -> Option<&str> {
        self.id.as_deref().or(self.job_id.as_deref())
    }

    /// Overwrite the fields of `item` that this patch carries.
    pub fn apply_to(&self, item: &mut GenerationItem) {
        if let Some(title) = &self.title {
            item.title.clone_from(title);
        }
        if let Some(description) = &self.description {
            item.description.clone_from(description);
        }
        if let Some(aspect_ratio) = &self.aspect_ratio {
            item.aspect_ratio.clone_from(aspect_ratio);
        }
        if self.image.is_some() {
            item.image.clone_from(&self.image);
        }
        if self.created_at.is_some() {
            item.created_at.clone_from(&self.created_at);
        }
        if self.job_id.is_some() {
            item.job_id.clone_from(&self.job_id);
        }
        if self.status.is_some() {
            item.status.clone_from(&self.status);
        }
        if self.progress.is_some() {
            item.progress = self.progress;
        }
    }

    /// Build a fresh item with the given id from this patch.
    pub fn into_item(self, id: impl Into<String>) -> GenerationItem {
        let mut item = GenerationItem::placeholder(id);
        self.apply_to(&mut item);
        item
    }
}

// ---- serde helpers ----

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn wire_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    scalar_to_string(Value::deserialize(deserializer)?)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| de::Error::custom("id must be a non-empty string or number"))
}

fn optional_scalar<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Value>::deserialize(deserializer)?.and_then(scalar_to_string))
}

fn optional_non_empty<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(optional_scalar(deserializer)?.filter(|s| !s.trim().is_empty()))
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(optional_scalar(deserializer)?.unwrap_or_default())
}

fn optional_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: &str, aspect_ratio: &str) -> GenerationItem {
        GenerationItem {
            aspect_ratio: aspect_ratio.to_string(),
            ..GenerationItem::placeholder(id)
        }
    }

    #[test]
    fn parses_full_item() {
        let value = json!({
            "id": "t-1",
            "title": "Bold red",
            "description": "A red thumbnail",
            "aspectRatio": "1:1",
            "image": "https://cdn.example/t-1.png",
            "createdAt": "2024-05-01T10:00:00Z",
        });
        let parsed = GenerationItem::from_value(&value).unwrap();
        assert_eq!(parsed.id, "t-1");
        assert_eq!(parsed.aspect_ratio, "1:1");
        assert_eq!(parsed.image.as_deref(), Some("https://cdn.example/t-1.png"));
        assert!(!parsed.is_placeholder());
        assert!(parsed.job_id.is_none());
    }

    #[test]
    fn numeric_ids_and_null_text_are_tolerated() {
        let value = json!({"id": 42, "title": null, "jobId": 7, "progress": "35.5"});
        let parsed = GenerationItem::from_value(&value).unwrap();
        assert_eq!(parsed.id, "42");
        assert_eq!(parsed.title, "");
        assert_eq!(parsed.job_id.as_deref(), Some("7"));
        assert_eq!(parsed.progress, Some(35.5));
    }

    #[test]
    fn empty_image_is_treated_as_absent() {
        let parsed = GenerationItem::from_value(&json!({"id": "a", "image": ""})).unwrap();
        assert!(parsed.is_placeholder());
    }

    #[test]
    fn missing_id_is_malformed() {
        let err = GenerationItem::from_value(&json!({"title": "no id"})).unwrap_err();
        assert!(matches!(err, CoreError::MalformedPayload(_)));
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut target = GenerationItem {
            title: "Keep me".into(),
            status: Some("active".into()),
            ..GenerationItem::placeholder("a")
        };
        let patch = ItemPatch {
            image: Some("https://cdn.example/a.png".into()),
            status: Some("completed".into()),
            ..Default::default()
        };
        patch.apply_to(&mut target);
        assert_eq!(target.title, "Keep me");
        assert_eq!(target.image.as_deref(), Some("https://cdn.example/a.png"));
        assert_eq!(target.status.as_deref(), Some("completed"));
    }

    #[test]
    fn patch_key_prefers_id_over_job_id() {
        let patch = ItemPatch {
            id: Some("item".into()),
            job_id: Some("job".into()),
            ..Default::default()
        };
        assert_eq!(patch.key(), Some("item"));

        let job_only = ItemPatch {
            job_id: Some("job".into()),
            ..Default::default()
        };
        assert_eq!(job_only.key(), Some("job"));
        assert_eq!(ItemPatch::default().key(), None);
    }

    #[test]
    fn unknown_aspect_ratios_rank_last() {
        assert_eq!(aspect_ratio_rank("1:1"), 0);
        assert_eq!(aspect_ratio_rank("3:2"), 2);
        assert_eq!(aspect_ratio_rank("4:5"), KNOWN_ASPECT_RATIOS.len());
        assert_eq!(aspect_ratio_rank(""), KNOWN_ASPECT_RATIOS.len());
    }

    #[test]
    fn groups_follow_display_order() {
        let items = vec![
            item("a", "4:5"),
            item("b", "3:2"),
            item("c", "1:1"),
            item("d", "3:2"),
            item("e", "2:3"),
        ];
        let groups = group_by_aspect_ratio(&items);
        let tags: Vec<_> = groups.iter().map(|g| g.aspect_ratio).collect();
        assert_eq!(tags, vec!["1:1", "2:3", "3:2", "4:5"]);

        let landscape: Vec<_> = groups[2].items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(landscape, vec!["b", "d"]);
    }
}
