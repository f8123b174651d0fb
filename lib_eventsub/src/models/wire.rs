//! Provider wire shapes: Helix subscription requests/responses and the
//! envelope every WebSocket frame arrives in.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Subscription, SubscriptionConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transport {
    pub method: String,
    pub session_id: String,
}

impl Transport {
    pub fn websocket(session_id: &str) -> Self {
        Self {
            method: "websocket".to_string(),
            session_id: session_id.to_string(),
        }
    }
}

/// Body of `POST /eventsub/subscriptions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    pub version: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub condition: BTreeMap<String, String>,
    pub transport: Transport,
}

impl SubscriptionRequest {
    pub fn new(config: &SubscriptionConfig, session_id: &str) -> Self {
        Self {
            version: config.version.clone(),
            subscription_type: config.subscription_type.clone(),
            condition: config.condition.clone(),
            transport: Transport::websocket(session_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionResponseData {
    pub id: String,
    pub status: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub version: String,
    pub condition: BTreeMap<String, String>,
    #[serde(default)]
    pub created_at: String,
    pub transport: Transport,
    #[serde(default)]
    pub cost: i64,
}

impl From<SubscriptionResponseData> for Subscription {
    fn from(data: SubscriptionResponseData) -> Self {
        Subscription {
            id: data.id,
            subscription_type: data.subscription_type,
            version: data.version,
            condition: data.condition,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub data: Vec<SubscriptionResponseData>,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub total_cost: i64,
    #[serde(default)]
    pub max_total_cost: i64,
}

/// Kinds of frames the provider sends over a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    SessionWelcome,
    SessionKeepalive,
    SessionReconnect,
    Revocation,
    Notification,
    Other(String),
}

impl From<&str> for MessageType {
    fn from(value: &str) -> Self {
        match value {
            "session_welcome" => MessageType::SessionWelcome,
            "session_keepalive" => MessageType::SessionKeepalive,
            "session_reconnect" => MessageType::SessionReconnect,
            "revocation" => MessageType::Revocation,
            "notification" => MessageType::Notification,
            other => MessageType::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSubMessageMetadata {
    pub message_id: String,
    pub message_type: String,
    #[serde(default)]
    pub message_timestamp: String,
    #[serde(default)]
    pub subscription_type: Option<String>,
    #[serde(default)]
    pub subscription_version: Option<String>,
}

/// One WebSocket frame. The payload stays untyped until a decoder claims it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSubMessage {
    pub metadata: EventSubMessageMetadata,
    #[serde(default)]
    pub payload: Value,
}

impl EventSubMessage {
    pub fn message_type(&self) -> MessageType {
        MessageType::from(self.metadata.message_type.as_str())
    }
}
