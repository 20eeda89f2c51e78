//! Tracker configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use crate::reconnect::ReconnectConfig;

/// Default delay between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);

/// Default per-request HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default REST resource holding generation sets.
pub const DEFAULT_RESOURCE: &str = "thumbnails";

/// Which push transport to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportPreference {
    /// WebSocket first, long-polling if the socket cannot be opened.
    #[default]
    Auto,
    WebSocket,
    LongPoll,
}

impl FromStr for TransportPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "websocket" | "ws" => Ok(Self::WebSocket),
            "long-poll" | "longpoll" | "polling" => Ok(Self::LongPoll),
            other => Err(other.to_string()),
        }
    }
}

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is required")]
    Missing(&'static str),

    #[error("{var} has invalid value '{value}'")]
    Invalid { var: &'static str, value: String },
}

/// Endpoints and timings for tracking generation sets.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Base URL of the generation REST API, e.g. `https://api.host`.
    pub api_url: String,
    /// Resource path segment, polled as `{api_url}/{resource}/{set_id}`.
    pub resource: String,
    /// WebSocket endpoint. Push is disabled when unset.
    pub push_url: Option<String>,
    /// HTTP endpoint for the long-poll fallback. Derived from `push_url`
    /// when unset.
    pub push_http_url: Option<String>,
    pub transport: TransportPreference,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl TrackerConfig {
    /// Configuration with defaults for everything but the API URL.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: trim_url(api_url.into()),
            resource: DEFAULT_RESOURCE.to_string(),
            push_url: None,
            push_http_url: None,
            transport: TransportPreference::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reconnect: ReconnectConfig::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Env Var                    | Default                      |
    /// |----------------------------|------------------------------|
    /// | `GENERATION_API_URL`       | required                     |
    /// | `GENERATION_RESOURCE`      | `thumbnails`                 |
    /// | `GENERATION_PUSH_URL`      | unset (push disabled)        |
    /// | `GENERATION_PUSH_HTTP_URL` | derived from the push URL    |
    /// | `PUSH_TRANSPORT`           | `auto`                       |
    /// | `POLL_INTERVAL_MS`         | `3000`                       |
    /// | `REQUEST_TIMEOUT_SECS`     | `30`                         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_url = get("GENERATION_API_URL").ok_or(ConfigError::Missing("GENERATION_API_URL"))?;
        let mut config = Self::new(api_url);

        if let Some(resource) = get("GENERATION_RESOURCE") {
            config.resource = resource.trim_matches('/').to_string();
        }
        config.push_url = get("GENERATION_PUSH_URL").map(trim_url);
        config.push_http_url = get("GENERATION_PUSH_HTTP_URL").map(trim_url);

        if let Some(raw) = get("PUSH_TRANSPORT") {
            config.transport = raw.parse().map_err(|value| ConfigError::Invalid {
                var: "PUSH_TRANSPORT",
                value,
            })?;
        }
        if let Some(raw) = get("POLL_INTERVAL_MS") {
            config.poll_interval = parse_duration("POLL_INTERVAL_MS", &raw, Duration::from_millis)?;
        }
        if let Some(raw) = get("REQUEST_TIMEOUT_SECS") {
            config.request_timeout = parse_duration("REQUEST_TIMEOUT_SECS", &raw, Duration::from_secs)?;
        }

        Ok(config)
    }

    /// Status URL for one generation set.
    pub fn status_url(&self, set_id: &str) -> String {
        format!("{}/{}/{}", self.api_url, self.resource, set_id)
    }

    /// HTTP endpoint used by the long-poll transport, if push is configured.
    ///
    /// Falls back to the WebSocket URL with its scheme swapped
    /// (`ws` -> `http`, `wss` -> `https`).
    pub fn long_poll_url(&self) -> Option<String> {
        if let Some(url) = &self.push_http_url {
            return Some(url.clone());
        }
        let ws = self.push_url.as_deref()?;
        Some(if let Some(rest) = ws.strip_prefix("wss://") {
            format!("https://{rest}")
        } else if let Some(rest) = ws.strip_prefix("ws://") {
            format!("http://{rest}")
        } else {
            ws.to_string()
        })
    }

    /// Whether a push transport is configured at all.
    pub fn push_enabled(&self) -> bool {
        self.push_url.is_some() || self.push_http_url.is_some()
    }
}

fn trim_url(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn parse_duration(
    var: &'static str,
    raw: &str,
    make: fn(u64) -> Duration,
) -> Result<Duration, ConfigError> {
    match raw.parse::<u64>() {
        Ok(n) if n > 0 => Ok(make(n)),
        _ => Err(ConfigError::Invalid {
            var,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn api_url_is_required() {
        let err = TrackerConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("GENERATION_API_URL")));
    }

    #[test]
    fn defaults_apply() {
        let config = TrackerConfig::from_lookup(lookup(&[("GENERATION_API_URL", "http://api/")])).unwrap();
        assert_eq!(config.api_url, "http://api");
        assert_eq!(config.resource, "thumbnails");
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.transport, TransportPreference::Auto);
        assert!(!config.push_enabled());
        assert_eq!(config.status_url("abc"), "http://api/thumbnails/abc");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = TrackerConfig::from_lookup(lookup(&[
            ("GENERATION_API_URL", "https://api"),
            ("GENERATION_RESOURCE", "/ad-batches/"),
            ("GENERATION_PUSH_URL", "wss://push.host/socket"),
            ("PUSH_TRANSPORT", "long-poll"),
            ("POLL_INTERVAL_MS", "5000"),
            ("REQUEST_TIMEOUT_SECS", "10"),
        ]))
        .unwrap();
        assert_eq!(config.resource, "ad-batches");
        assert_eq!(config.transport, TransportPreference::LongPoll);
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.long_poll_url().as_deref(), Some("https://push.host/socket"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = TrackerConfig::from_lookup(lookup(&[
            ("GENERATION_API_URL", "http://api"),
            ("POLL_INTERVAL_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "POLL_INTERVAL_MS", .. }));

        let err = TrackerConfig::from_lookup(lookup(&[
            ("GENERATION_API_URL", "http://api"),
            ("PUSH_TRANSPORT", "carrier-pigeon"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PUSH_TRANSPORT", .. }));
    }

    #[test]
    fn explicit_long_poll_url_wins() {
        let mut config = TrackerConfig::new("http://api");
        config.push_url = Some("ws://push".into());
        assert_eq!(config.long_poll_url().as_deref(), Some("http://push"));

        config.push_http_url = Some("http://fallback".into());
        assert_eq!(config.long_poll_url().as_deref(), Some("http://fallback"));
    }
}
