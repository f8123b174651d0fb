//! # Subscription Data Model
//!
//! - [`SubscriptionConfig`]: what is subscribed to (type, version, condition).
//! - [`Subscription`]: a live, provider-acknowledged registration owned by one pool.
//! - [`PersistedSubscription`]: the durable intent plus its [`LiveBinding`].
//!
//! Wire shapes for the provider's REST and WebSocket payloads live in [`wire`];
//! the supported subscription types and their constructors live in [`catalog`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::{random_id, RECORD_ID_LEN};

pub mod catalog;
pub mod wire;

/// Condition key that scopes a subscription to one channel.
pub const BROADCASTER_USER_ID: &str = "broadcaster_user_id";

/// Immutable description of a subscription intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    pub version: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub condition: BTreeMap<String, String>,
}

impl SubscriptionConfig {
    pub fn new<I, K, V>(subscription_type: &str, version: &str, condition: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            version: version.to_string(),
            subscription_type: subscription_type.to_string(),
            condition: condition
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn broadcaster_user_id(&self) -> Option<&str> {
        self.condition.get(BROADCASTER_USER_ID).map(String::as_str)
    }

    /// `(type, broadcaster_user_id)` for broadcaster-scoped types. Two live
    /// subscriptions with the same key must never coexist.
    pub fn dedupe_key(&self) -> Option<(&str, &str)> {
        self.broadcaster_user_id()
            .map(|broadcaster| (self.subscription_type.as_str(), broadcaster))
    }
}

/// A live subscription as acknowledged by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub version: String,
    pub condition: BTreeMap<String, String>,
}

impl Subscription {
    /// The intent this live subscription was created from.
    pub fn config(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            version: self.version.clone(),
            subscription_type: self.subscription_type.clone(),
            condition: self.condition.clone(),
        }
    }
}

/// Where a persisted record currently stands with respect to live delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum LiveBinding {
    /// Not currently bound to any live subscription.
    Unsubscribed,
    /// Persisted and waiting for the provider to acknowledge.
    Pending,
    /// Bound to the live subscription with this provider id.
    Subscribed(String),
    /// The last subscribe attempt failed, or the provider revoked it.
    Failed(String),
}

impl LiveBinding {
    pub fn live_id(&self) -> Option<&str> {
        match self {
            LiveBinding::Subscribed(id) => Some(id),
            _ => None,
        }
    }

    /// Pending and subscribed records both count as an active intent.
    pub fn is_active(&self) -> bool {
        matches!(self, LiveBinding::Pending | LiveBinding::Subscribed(_))
    }

    pub fn state_name(&self) -> &'static str {
        match self {
            LiveBinding::Unsubscribed => "unsubscribed",
            LiveBinding::Pending => "pending",
            LiveBinding::Subscribed(_) => "subscribed",
            LiveBinding::Failed(_) => "failed",
        }
    }
}

/// Durable subscription intent, the source of truth for what should be live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSubscription {
    pub id: String,
    pub authorizer_id: String,
    pub config: SubscriptionConfig,
    pub binding: LiveBinding,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PersistedSubscription {
    /// A fresh record in the `Pending` state.
    pub fn pending(authorizer_id: &str, config: SubscriptionConfig) -> Self {
        let now = Utc::now();
        Self {
            id: random_id(RECORD_ID_LEN),
            authorizer_id: authorizer_id.to_string(),
            config,
            binding: LiveBinding::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn set_binding(&mut self, binding: LiveBinding) {
        self.binding = binding;
        self.updated_at = Utc::now();
    }
}

/// Predicates understood by every [`crate::collaborators::SubscriptionStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionFilter {
    All,
    TypeAndBroadcaster {
        subscription_type: String,
        broadcaster_user_id: String,
    },
    LiveId(String),
    Authorizer(String),
}

impl SubscriptionFilter {
    pub fn matches(&self, record: &PersistedSubscription) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::TypeAndBroadcaster {
                subscription_type,
                broadcaster_user_id,
            } => {
                record.config.subscription_type == *subscription_type
                    && record.config.broadcaster_user_id() == Some(broadcaster_user_id.as_str())
            }
            SubscriptionFilter::LiveId(id) => record.binding.live_id() == Some(id.as_str()),
            SubscriptionFilter::Authorizer(id) => record.authorizer_id == *id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedupe_key_requires_broadcaster() {
        let scoped = SubscriptionConfig::new("stream.online", "1", [(BROADCASTER_USER_ID, "42")]);
        assert_eq!(scoped.dedupe_key(), Some(("stream.online", "42")));

        let unscoped = SubscriptionConfig::new("user.update", "1", [("user_id", "42")]);
        assert_eq!(unscoped.dedupe_key(), None);
    }

    #[test]
    fn binding_serializes_as_tagged_variant() {
        let json = serde_json::to_value(LiveBinding::Failed("revoked".into())).unwrap();
        assert_eq!(json, serde_json::json!({"state": "failed", "value": "revoked"}));

        let back: LiveBinding = serde_json::from_value(serde_json::json!({"state": "unsubscribed"})).unwrap();
        assert_eq!(back, LiveBinding::Unsubscribed);
    }

    #[test]
    fn filters_match_records() {
        let config = SubscriptionConfig::new("stream.online", "1", [(BROADCASTER_USER_ID, "7")]);
        let mut record = PersistedSubscription::pending("auth", config);
        assert!(SubscriptionFilter::All.matches(&record));
        assert!(SubscriptionFilter::Authorizer("auth".into()).matches(&record));
        assert!(!SubscriptionFilter::LiveId("x".into()).matches(&record));

        record.set_binding(LiveBinding::Subscribed("x".into()));
        assert!(SubscriptionFilter::LiveId("x".into()).matches(&record));
        assert!(SubscriptionFilter::TypeAndBroadcaster {
            subscription_type: "stream.online".into(),
            broadcaster_user_id: "7".into(),
        }
        .matches(&record));
    }
}
