//! Client session configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::constants::{
    DEFAULT_BASE_URL, DEFAULT_MAX_AGE, RECONNECT_DELAY, REQUEST_TIMEOUT, STREAM_IDLE_TIMEOUT, UNDO_WINDOW,
};

/// Tunables for a [`Session`](crate::Session). Every field has a default, so
/// a partial document deserializes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server origin, e.g. `http://127.0.0.1:4780`.
    pub base_url: String,
    pub max_age_secs: u64,
    pub reconnect_delay_ms: u64,
    /// Silence on the event stream, heartbeats included, before reconnecting.
    pub stream_idle_timeout_secs: u64,
    pub undo_window_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_age_secs: DEFAULT_MAX_AGE.as_secs(),
            reconnect_delay_ms: RECONNECT_DELAY.as_millis() as u64,
            stream_idle_timeout_secs: STREAM_IDLE_TIMEOUT.as_secs(),
            undo_window_ms: UNDO_WINDOW.as_millis() as u64,
            request_timeout_secs: REQUEST_TIMEOUT.as_secs(),
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), ..Self::default() }
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs.max(1))
    }

    pub fn undo_window(&self) -> Duration {
        Duration::from_millis(self.undo_window_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"base_url":"http://hibi.local:8080","max_age_secs":10}"#).unwrap();
        assert_eq!(config.base_url, "http://hibi.local:8080");
        assert_eq!(config.max_age(), Duration::from_secs(10));
        assert_eq!(config.reconnect_delay(), RECONNECT_DELAY);
        assert_eq!(config.stream_idle_timeout(), STREAM_IDLE_TIMEOUT);
        assert_eq!(config.undo_window(), UNDO_WINDOW);
    }
}
