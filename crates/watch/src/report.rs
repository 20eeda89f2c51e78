//! Summaries of generation views for terminal output.

use serde::Serialize;
use thumbmaker_core::item::group_by_aspect_ratio;
use thumbmaker_core::status::GenerationStatus;
use thumbmaker_core::store::{DisplayState, GenerationView};

/// Exit code when the set completed.
pub const EXIT_COMPLETED: i32 = 0;
/// Exit code when the backend reported a failure.
pub const EXIT_FAILED: i32 = 1;
/// Exit code when tracking stopped before a terminal status.
pub const EXIT_INTERRUPTED: i32 = 2;

/// Item counts for one aspect ratio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub aspect_ratio: String,
    pub ready: usize,
    pub total: usize,
}

/// Condensed view used to decide whether anything worth logging changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSummary {
    pub state: &'static str,
    pub status: GenerationStatus,
    pub ready: usize,
    pub total: usize,
    pub groups: Vec<GroupSummary>,
    pub error: Option<String>,
}

impl ViewSummary {
    pub fn from_view(view: &GenerationView) -> Self {
        let groups = group_by_aspect_ratio(&view.items)
            .into_iter()
            .map(|group| GroupSummary {
                aspect_ratio: group.aspect_ratio.to_string(),
                ready: group.items.iter().filter(|item| !item.is_placeholder()).count(),
                total: group.items.len(),
            })
            .collect::<Vec<_>>();

        let error = match view.display_state() {
            DisplayState::Failed { reason } => reason,
            _ => view.error.clone(),
        };

        Self {
            state: state_name(&view.display_state()),
            status: view.status,
            ready: groups.iter().map(|g| g.ready).sum(),
            total: view.items.len(),
            groups,
            error,
        }
    }
}

/// Short label for a display state.
pub fn state_name(state: &DisplayState) -> &'static str {
    match state {
        DisplayState::Loading => "loading",
        DisplayState::Processing => "processing",
        DisplayState::Ready => "ready",
        DisplayState::Failed { .. } => "failed",
    }
}

/// Process exit code for the final view of a run.
pub fn exit_code(view: Option<&GenerationView>) -> i32 {
    match view.map(|v| v.status) {
        Some(GenerationStatus::Completed) => EXIT_COMPLETED,
        Some(GenerationStatus::Failed) => EXIT_FAILED,
        _ => EXIT_INTERRUPTED,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use thumbmaker_core::snapshot::normalize_snapshot;
    use thumbmaker_core::store::JobStatusStore;

    use super::*;

    fn view_of(raw: serde_json::Value) -> GenerationView {
        let mut store = JobStatusStore::new("set-1");
        store.apply_snapshot(&normalize_snapshot(&raw));
        store.view()
    }

    #[test]
    fn groups_follow_aspect_ratio_order() {
        let view = view_of(json!({
            "status": "PROCESSING",
            "thumbnails": [
                {"id": "a", "aspectRatio": "16:9", "image": "https://cdn/a.png"},
                {"id": "b", "aspectRatio": "1:1"},
                {"id": "c", "aspectRatio": "16:9"},
            ],
        }));

        let summary = ViewSummary::from_view(&view);
        assert_eq!(summary.state, "processing");
        assert_eq!(summary.ready, 1);
        assert_eq!(summary.total, 3);
        assert_eq!(
            summary.groups,
            vec![
                GroupSummary { aspect_ratio: "1:1".into(), ready: 0, total: 1 },
                GroupSummary { aspect_ratio: "16:9".into(), ready: 1, total: 2 },
            ]
        );
    }

    #[test]
    fn failed_summary_carries_reason() {
        let mut store = JobStatusStore::new("set-1");
        store
            .mark_terminal(GenerationStatus::Failed, Some("quota exceeded".into()))
            .unwrap();

        let summary = ViewSummary::from_view(&store.view());
        assert_eq!(summary.state, "failed");
        assert_eq!(summary.error.as_deref(), Some("quota exceeded"));
    }

    #[test]
    fn exit_codes() {
        let done = view_of(json!([{"id": "a", "image": "https://cdn/a.png"}]));
        let failed = view_of(json!({"status": "FAILED"}));
        let pending = view_of(json!({"status": "PENDING"}));

        assert_eq!(exit_code(Some(&done)), EXIT_COMPLETED);
        assert_eq!(exit_code(Some(&failed)), EXIT_FAILED);
        assert_eq!(exit_code(Some(&pending)), EXIT_INTERRUPTED);
        assert_eq!(exit_code(None), EXIT_INTERRUPTED);
    }
}
