//! `thumbmaker-watch` -- follow one thumbnail generation set until it
//! finishes.
//!
//! Polls the generation API (and subscribes to push events when a push
//! endpoint is configured), logs each visible change, and prints the final
//! view as JSON on stdout.
//!
//! # Usage
//!
//! ```text
//! thumbmaker-watch <set-id>
//! ```
//!
//! # Environment variables
//!
//! | Variable                   | Required | Default      | Description                          |
//! |----------------------------|----------|--------------|--------------------------------------|
//! | `GENERATION_API_URL`       | yes      | --           | Base URL of the generation REST API  |
//! | `GENERATION_SET_ID`        | no       | --           | Set to track when no argument given  |
//! | `GENERATION_RESOURCE`      | no       | `thumbnails` | Resource path segment                |
//! | `GENERATION_PUSH_URL`      | no       | --           | WebSocket endpoint; enables push     |
//! | `GENERATION_PUSH_HTTP_URL` | no       | derived      | Long-poll fallback endpoint          |
//! | `PUSH_TRANSPORT`           | no       | `auto`       | `auto`, `websocket` or `long-poll`   |
//! | `POLL_INTERVAL_MS`         | no       | `3000`       | Milliseconds between status polls    |
//! | `REQUEST_TIMEOUT_SECS`     | no       | `30`         | Per-request HTTP timeout             |
//!
//! Exits `0` when the set completes, `1` when it fails and `2` when
//! interrupted.

use thumbmaker_client::config::TrackerConfig;
use thumbmaker_client::events::TrackerEvent;
use thumbmaker_client::tracker::GenerationTracker;
use thumbmaker_watch::report::{self, ViewSummary};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thumbmaker_watch=info,thumbmaker_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let set_id = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GENERATION_SET_ID").ok())
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| {
            tracing::error!("Usage: thumbmaker-watch <set-id> (or set GENERATION_SET_ID)");
            std::process::exit(1);
        });

    let config = TrackerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        set_id = %set_id,
        api_url = %config.api_url,
        push = config.push_enabled(),
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "Starting thumbmaker-watch",
    );

    let tracker = GenerationTracker::from_config(config).unwrap_or_else(|e| {
        tracing::error!(error = %e, "Failed to build HTTP client");
        std::process::exit(1);
    });

    let mut events = tracker.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                TrackerEvent::TransportConnected { transport, .. } => {
                    tracing::info!(%transport, "Push connected");
                }
                TrackerEvent::TransportFallback { from, to, error, .. } => {
                    tracing::warn!(%from, %to, error = %error, "Push transport fallback");
                }
                TrackerEvent::TransportUnavailable { error, .. } => {
                    tracing::warn!(error = %error, "Push unavailable, polling only");
                }
                TrackerEvent::TransportDisconnected { .. } => {
                    tracing::info!("Push disconnected");
                }
                TrackerEvent::PollFailed { error, .. } => {
                    tracing::debug!(error = %error, "Poll failed, retrying");
                }
                TrackerEvent::Terminal { status, .. } => {
                    tracing::info!(%status, "Tracking finished");
                }
            }
        }
    });

    let handle = tracker.track(set_id);
    let mut views = handle.subscribe();
    let mut last: Option<ViewSummary> = None;

    let final_view = loop {
        let summary = ViewSummary::from_view(&views.borrow_and_update());
        if last.as_ref() != Some(&summary) {
            tracing::info!(
                state = summary.state,
                status = %summary.status,
                ready = summary.ready,
                total = summary.total,
                "Generation set updated",
            );
            last = Some(summary);
        }

        if views.borrow().is_terminal() {
            break Some(views.borrow().clone());
        }

        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break None;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, shutting down");
                handle.shutdown();
                break None;
            }
        }
    };

    if let Some(view) = &final_view {
        match serde_json::to_string_pretty(view) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::error!(error = %e, "Failed to serialize final view"),
        }
    }

    std::process::exit(report::exit_code(final_view.as_ref()));
}
