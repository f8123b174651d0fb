//! Internal typed events published to the bus.

use serde::Serialize;

/// Platform tag carried by every event this crate produces.
pub const PLATFORM: &str = "twitch";

pub const EVENT_STREAM_ONLINE: &str = "stream-online";
pub const EVENT_STREAM_OFFLINE: &str = "stream-offline";
pub const EVENT_CHAT_MESSAGE: &str = "chat-message";
pub const EVENT_CHAT_MESSAGE_DELETE: &str = "chat-message-delete";
pub const EVENT_CURRENCY_SPENT: &str = "currency-spent";
pub const EVENT_SUBSCRIPTION: &str = "subscription";
pub const EVENT_SUBSCRIPTION_GIFTED: &str = "subscription-gifted";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamOnline {
    pub id: String,
    pub channel: User,
    pub started_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamOffline {
    pub channel: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessageFragment {
    #[serde(rename = "type")]
    pub fragment_type: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageReply {
    pub replied_to_message_id: String,
    pub replied_to_chatter: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub channel: User,
    pub chatter: User,
    pub reply: Option<ChatMessageReply>,
    pub text: String,
    pub color: String,
    pub fragments: Vec<ChatMessageFragment>,
    /// Non-plain message kinds, e.g. `channel_points_highlighted`.
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessageDelete {
    pub id: String,
    pub channel: User,
    pub target: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrencySpentRedeem {
    pub id: String,
    pub label: String,
    pub description: String,
    pub currency: String,
    pub cost: i64,
}

/// `status` is one of unfulfilled, fulfilled or canceled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrencySpent {
    pub id: String,
    pub channel: User,
    pub chatter: User,
    pub input: String,
    pub redeemed: CurrencySpentRedeem,
    pub status: String,
    pub redeemed_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSubscription {
    pub channel: User,
    pub chatter: User,
    pub gifted: bool,
    pub tier: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GiftedSubscription {
    pub channel: User,
    /// `None` for anonymous gifts.
    pub chatter: Option<User>,
    pub tier: String,
    pub total: i64,
}

/// Decoded event body, tagged with its stable event type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum EventData {
    StreamOnline(StreamOnline),
    StreamOffline(StreamOffline),
    ChatMessage(ChatMessage),
    ChatMessageDelete(ChatMessageDelete),
    CurrencySpent(CurrencySpent),
    Subscription(ChannelSubscription),
    SubscriptionGifted(GiftedSubscription),
}

impl EventData {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventData::StreamOnline(_) => EVENT_STREAM_ONLINE,
            EventData::StreamOffline(_) => EVENT_STREAM_OFFLINE,
            EventData::ChatMessage(_) => EVENT_CHAT_MESSAGE,
            EventData::ChatMessageDelete(_) => EVENT_CHAT_MESSAGE_DELETE,
            EventData::CurrencySpent(_) => EVENT_CURRENCY_SPENT,
            EventData::Subscription(_) => EVENT_SUBSCRIPTION,
            EventData::SubscriptionGifted(_) => EVENT_SUBSCRIPTION_GIFTED,
        }
    }
}

/// The envelope consumers receive from the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformEvent {
    /// Assigned by whichever consumer persists the event.
    pub id: Option<String>,
    pub platform: String,
    pub provider_message_id: String,
    pub subscription_id: String,
    pub occurred_at: String,
    #[serde(flatten)]
    pub data: EventData,
}

impl PlatformEvent {
    pub fn event_type(&self) -> &'static str {
        self.data.event_type()
    }
}
