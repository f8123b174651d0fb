//! Parsing of session-control frames (`session_welcome`, `session_reconnect`,
//! `revocation`).

use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::error::{EventSubError, Result};
use crate::models::wire::EventSubMessage;

/// Longest keepalive window a welcome may advertise.
pub const MAX_KEEPALIVE: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq)]
pub struct Welcome {
    pub session_id: String,
    pub keepalive: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    pub subscription_id: String,
    pub status: String,
}

fn session(message: &EventSubMessage) -> Result<&serde_json::Map<String, Value>> {
    message
        .payload
        .get("session")
        .and_then(Value::as_object)
        .ok_or_else(|| EventSubError::Protocol("payload.session is missing or not an object".into()))
}

/// `default_keepalive` applies when the welcome carries no window.
pub fn parse_welcome(message: &EventSubMessage, default_keepalive: Duration) -> Result<Welcome> {
    let session = session(message)?;
    let session_id = session
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| EventSubError::Protocol("payload.session.id is missing".into()))?;
    let keepalive = match session.get("keepalive_timeout_seconds") {
        None | Some(Value::Null) => default_keepalive,
        Some(value) => value
            .as_f64()
            .and_then(|seconds| Duration::try_from_secs_f64(seconds).ok())
            .filter(|window| *window <= MAX_KEEPALIVE)
            .ok_or_else(|| {
                EventSubError::Protocol(format!(
                    "payload.session.keepalive_timeout_seconds must be between 0 and {}, got {value}",
                    MAX_KEEPALIVE.as_secs()
                ))
            })?,
    };
    Ok(Welcome {
        session_id: session_id.to_string(),
        keepalive,
    })
}

/// Extracts and validates `payload.session.reconnect_url`.
pub fn parse_reconnect_url(message: &EventSubMessage) -> Result<String> {
    let raw = session(message)?
        .get("reconnect_url")
        .and_then(Value::as_str)
        .ok_or_else(|| EventSubError::Protocol("payload.session.reconnect_url is missing".into()))?;
    let url = Url::parse(raw)
        .map_err(|e| EventSubError::Protocol(format!("invalid reconnect_url {raw}: {e}")))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(EventSubError::Protocol(format!(
            "reconnect_url must be a websocket url, got {raw}"
        )));
    }
    Ok(raw.to_string())
}

pub fn parse_revocation(message: &EventSubMessage) -> Result<Revocation> {
    let subscription = message
        .payload
        .get("subscription")
        .and_then(Value::as_object)
        .ok_or_else(|| EventSubError::Protocol("payload.subscription is missing".into()))?;
    let subscription_id = subscription
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| EventSubError::Protocol("payload.subscription.id is missing".into()))?;
    let status = subscription
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("revoked");
    Ok(Revocation {
        subscription_id: subscription_id.to_string(),
        status: status.to_string(),
    })
}

/// Id of the live subscription a notification belongs to.
pub fn notification_subscription_id(message: &EventSubMessage) -> Option<&str> {
    message
        .payload
        .get("subscription")
        .and_then(|s| s.get("id"))
        .and_then(Value::as_str)
}
