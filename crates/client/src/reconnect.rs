//! Backoff for re-opening a dropped push session.
//!
//! A push channel that loses its transport before the set is terminal hands
//! its connector to [`reconnect_loop`], which keeps asking for a fresh
//! transport for the same set until one opens or the channel is cancelled.
//! Polling keeps running the whole time, so the waits only limit how hard a
//! dead push endpoint is hit.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::transport::{PushTransport, TransportConnector};

/// Waits between push reconnect attempts.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Wait before the first attempt after a drop.
    pub initial_delay: Duration,
    /// Longest wait between two attempts.
    pub max_delay: Duration,
    /// Growth of the wait per refused attempt.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Wait before reconnect attempt `attempt` (1-based), capped at `max_delay`.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let grown = self.initial_delay.as_millis() as f64 * self.multiplier.max(1.0).powi(exponent);
        let capped = grown.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Open a new push transport for `set_id`, backing off between refusals.
///
/// Returns `None` once `cancel` fires, whether during a wait or while a
/// connect is in flight.
pub async fn reconnect_loop(
    connector: &dyn TransportConnector,
    set_id: &str,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<Box<dyn PushTransport>> {
    let mut attempt = 0u32;

    loop {
        attempt = attempt.saturating_add(1);
        let delay = config.delay_before(attempt);

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        tracing::info!(
            set_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting push transport",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(set_id, "Reconnect cancelled");
                return None;
            }
            result = connector.connect(set_id) => {
                match result {
                    Ok(transport) => {
                        tracing::info!(
                            set_id,
                            attempt,
                            transport = %transport.kind(),
                            "Push transport reconnected",
                        );
                        return Some(transport);
                    }
                    Err(e) => {
                        tracing::warn!(
                            set_id,
                            error = %e,
                            "Reconnect attempt {attempt} failed",
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::messages::PushEvent;
    use crate::transport::{TransportError, TransportKind};

    struct IdleSocket;

    #[async_trait]
    impl PushTransport for IdleSocket {
        fn kind(&self) -> TransportKind {
            TransportKind::WebSocket
        }

        async fn next_event(&mut self) -> Result<Option<PushEvent>, TransportError> {
            Ok(None)
        }

        async fn close(&mut self) {}
    }

    /// Push endpoint that refuses a fixed number of connects, then opens.
    /// Records when each connect was asked for and for which set.
    struct RefusingEndpoint {
        refusals: usize,
        started: Instant,
        calls: Mutex<Vec<(Duration, String)>>,
    }

    impl RefusingEndpoint {
        fn new(refusals: usize) -> Arc<Self> {
            Arc::new(Self {
                refusals,
                started: Instant::now(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_times(&self) -> Vec<u64> {
            self.calls.lock().unwrap().iter().map(|(at, _)| at.as_secs()).collect()
        }
    }

    #[async_trait]
    impl TransportConnector for RefusingEndpoint {
        async fn connect(&self, set_id: &str) -> Result<Box<dyn PushTransport>, TransportError> {
            let mut calls = self.calls.lock().unwrap();
            calls.push((self.started.elapsed(), set_id.to_string()));
            if calls.len() <= self.refusals {
                Err(TransportError::Connect("connection refused".into()))
            } else {
                Ok(Box::new(IdleSocket))
            }
        }
    }

    #[test]
    fn waits_grow_until_the_cap() {
        let config = ReconnectConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let waits: Vec<u64> = (1..=6).map(|n| config.delay_before(n).as_secs()).collect();
        assert_eq!(waits, [1, 2, 4, 8, 10, 10]);
        assert_eq!(config.delay_before(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn shrinking_multiplier_keeps_initial_wait() {
        let config = ReconnectConfig {
            multiplier: 0.5,
            ..Default::default()
        };
        assert_eq!(config.delay_before(4), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn refused_endpoint_is_retried_with_growing_gaps() {
        let endpoint = RefusingEndpoint::new(3);
        let cancel = CancellationToken::new();

        let transport = reconnect_loop(endpoint.as_ref(), "set-1", &ReconnectConfig::default(), &cancel).await;

        assert_eq!(transport.map(|t| t.kind()), Some(TransportKind::WebSocket));
        // 1s, then 2s, 4s and 8s after each refusal.
        assert_eq!(endpoint.call_times(), [1, 3, 7, 15]);
        assert!(endpoint.calls.lock().unwrap().iter().all(|(_, set)| set == "set-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn long_outage_retries_at_the_cap() {
        let endpoint = RefusingEndpoint::new(5);
        let cancel = CancellationToken::new();
        let config = ReconnectConfig {
            max_delay: Duration::from_secs(3),
            ..Default::default()
        };

        let transport = reconnect_loop(endpoint.as_ref(), "set-1", &config, &cancel).await;

        assert!(transport.is_some());
        assert_eq!(endpoint.call_times(), [1, 3, 6, 9, 12, 15]);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_backoff_stops_retrying() {
        let endpoint = RefusingEndpoint::new(usize::MAX);
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            let cancel = cancel.clone();
            async move { reconnect_loop(endpoint.as_ref(), "set-1", &ReconnectConfig::default(), &cancel).await }
        });

        // Attempts at 1s and 3s; the third would come at 7s.
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        cancel.cancel();

        assert!(task.await.unwrap().is_none());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(endpoint.call_times(), [1, 3]);
    }

    #[tokio::test]
    async fn cancelled_channel_never_connects() {
        let endpoint = RefusingEndpoint::new(0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = reconnect_loop(endpoint.as_ref(), "set-1", &ReconnectConfig::default(), &cancel).await;
        assert!(result.is_none());
        assert!(endpoint.call_times().is_empty());
    }
}
