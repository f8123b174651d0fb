//! # EventSub Configuration
//!
//! Runtime knobs for sessions, pools and the REST client. Binaries build an
//! [`EventSubConfig`] from their own CLI/env/file layers; tests construct it
//! directly and point the URLs at local mock servers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{EventSubError, Result};

/// Canonical WebSocket endpoint. Hard reconnects always come back here.
pub const EVENTSUB_WS_URL: &str = "wss://eventsub.wss.twitch.tv/ws";
/// Helix endpoint for creating and deleting subscriptions.
pub const SUBSCRIPTIONS_URL: &str = "https://api.twitch.tv/helix/eventsub/subscriptions";
/// The provider allows 300 per session; stay well under it.
pub const MAX_SUBSCRIPTIONS_PER_POOL: usize = 200;
const PROVIDER_SESSION_LIMIT: usize = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventSubConfig {
    pub eventsub_ws_url: String,
    pub subscriptions_url: String,
    pub client_id: String,
    pub max_subscriptions_per_pool: usize,
    #[serde(with = "millis")]
    pub welcome_timeout: Duration,
    /// Added to the advertised keepalive window to absorb network latency.
    #[serde(with = "millis")]
    pub keepalive_buffer: Duration,
    /// Window assumed when a welcome does not advertise one.
    #[serde(with = "millis")]
    pub default_keepalive: Duration,
    #[serde(with = "millis")]
    pub close_timeout: Duration,
    #[serde(with = "millis")]
    pub http_timeout: Duration,
    pub http_max_retries: u32,
    /// How many times the manager asks the registry for a pool when it loses a capacity race.
    pub subscribe_attempts: usize,
}

impl Default for EventSubConfig {
    fn default() -> Self {
        Self {
            eventsub_ws_url: EVENTSUB_WS_URL.to_string(),
            subscriptions_url: SUBSCRIPTIONS_URL.to_string(),
            client_id: String::new(),
            max_subscriptions_per_pool: MAX_SUBSCRIPTIONS_PER_POOL,
            welcome_timeout: Duration::from_secs(5),
            keepalive_buffer: Duration::from_secs(5),
            default_keepalive: Duration::from_secs(10),
            close_timeout: Duration::from_secs(3),
            http_timeout: Duration::from_secs(5),
            http_max_retries: 3,
            subscribe_attempts: 3,
        }
    }
}

impl EventSubConfig {
    pub fn with_client_id(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Default::default()
        }
    }

    /// Checks the values the rest of the crate relies on.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(EventSubError::Config("client_id must not be empty".into()));
        }
        let ws = Url::parse(&self.eventsub_ws_url)
            .map_err(|e| EventSubError::Config(format!("eventsub_ws_url: {e}")))?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            return Err(EventSubError::Config(format!(
                "eventsub_ws_url must be ws:// or wss://, got {}",
                ws.scheme()
            )));
        }
        let http = Url::parse(&self.subscriptions_url)
            .map_err(|e| EventSubError::Config(format!("subscriptions_url: {e}")))?;
        if !matches!(http.scheme(), "http" | "https") {
            return Err(EventSubError::Config(format!(
                "subscriptions_url must be http:// or https://, got {}",
                http.scheme()
            )));
        }
        if self.max_subscriptions_per_pool == 0
            || self.max_subscriptions_per_pool > PROVIDER_SESSION_LIMIT
        {
            return Err(EventSubError::Config(format!(
                "max_subscriptions_per_pool must be within 1..={PROVIDER_SESSION_LIMIT}"
            )));
        }
        if self.subscribe_attempts == 0 {
            return Err(EventSubError::Config("subscribe_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_provider_limits() {
        let config = EventSubConfig::with_client_id("abc");
        assert_eq!(config.max_subscriptions_per_pool, 200);
        assert_eq!(config.welcome_timeout, Duration::from_secs(5));
        assert_eq!(config.close_timeout, Duration::from_secs(3));
        assert_eq!(config.default_keepalive, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(EventSubConfig::default().validate().is_err());

        let mut config = EventSubConfig::with_client_id("abc");
        config.eventsub_ws_url = "https://example.com".into();
        assert!(config.validate().is_err());

        let mut config = EventSubConfig::with_client_id("abc");
        config.max_subscriptions_per_pool = 301;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: EventSubConfig =
            serde_json::from_str(r#"{"clientId":"xyz","keepaliveBuffer":3000}"#).unwrap();
        assert_eq!(config.client_id, "xyz");
        assert_eq!(config.keepalive_buffer, Duration::from_secs(3));
        assert_eq!(config.eventsub_ws_url, EVENTSUB_WS_URL);
    }
}
