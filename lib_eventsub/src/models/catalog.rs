//! Supported subscription types and their condition shapes.

use super::{SubscriptionConfig, BROADCASTER_USER_ID};

pub const STREAM_ONLINE: &str = "stream.online";
pub const STREAM_OFFLINE: &str = "stream.offline";
pub const CHANNEL_CHAT_MESSAGE: &str = "channel.chat.message";
pub const CHANNEL_CHAT_MESSAGE_DELETE: &str = "channel.chat.message_delete";
pub const CHANNEL_SUBSCRIBE: &str = "channel.subscribe";
pub const CHANNEL_SUBSCRIPTION_GIFT: &str = "channel.subscription.gift";
pub const CHANNEL_POINTS_REDEMPTION_ADD: &str =
    "channel.channel_points_custom_reward_redemption.add";
pub const CHANNEL_SHOUTOUT_CREATE: &str = "channel.shoutout.create";
pub const CHANNEL_SHOUTOUT_RECEIVE: &str = "channel.shoutout.receive";

fn broadcaster_scoped(subscription_type: &str, broadcaster_id: &str) -> SubscriptionConfig {
    SubscriptionConfig::new(subscription_type, "1", [(BROADCASTER_USER_ID, broadcaster_id)])
}

/// Broadcaster goes live.
pub fn stream_online(broadcaster_id: &str) -> SubscriptionConfig {
    broadcaster_scoped(STREAM_ONLINE, broadcaster_id)
}

/// Broadcaster goes offline.
pub fn stream_offline(broadcaster_id: &str) -> SubscriptionConfig {
    broadcaster_scoped(STREAM_OFFLINE, broadcaster_id)
}

/// Message sent in chat, read as `user_id`.
pub fn channel_chat_message(broadcaster_id: &str, user_id: &str) -> SubscriptionConfig {
    SubscriptionConfig::new(
        CHANNEL_CHAT_MESSAGE,
        "1",
        [(BROADCASTER_USER_ID, broadcaster_id), ("user_id", user_id)],
    )
}

pub fn channel_chat_message_delete(broadcaster_id: &str, user_id: &str) -> SubscriptionConfig {
    SubscriptionConfig::new(
        CHANNEL_CHAT_MESSAGE_DELETE,
        "1",
        [(BROADCASTER_USER_ID, broadcaster_id), ("user_id", user_id)],
    )
}

pub fn channel_subscribe(broadcaster_id: &str) -> SubscriptionConfig {
    broadcaster_scoped(CHANNEL_SUBSCRIBE, broadcaster_id)
}

pub fn channel_subscription_gift(broadcaster_id: &str) -> SubscriptionConfig {
    broadcaster_scoped(CHANNEL_SUBSCRIPTION_GIFT, broadcaster_id)
}

/// A viewer redeems a custom channel points reward.
pub fn channel_points_redemption_add(broadcaster_id: &str) -> SubscriptionConfig {
    broadcaster_scoped(CHANNEL_POINTS_REDEMPTION_ADD, broadcaster_id)
}

/// Broadcaster shouts someone out.
pub fn shoutout_create(broadcaster_id: &str, moderator_id: &str) -> SubscriptionConfig {
    SubscriptionConfig::new(
        CHANNEL_SHOUTOUT_CREATE,
        "1",
        [(BROADCASTER_USER_ID, broadcaster_id), ("moderator_user_id", moderator_id)],
    )
}

/// Broadcaster receives a shoutout.
pub fn shoutout_receive(broadcaster_id: &str, moderator_id: &str) -> SubscriptionConfig {
    SubscriptionConfig::new(
        CHANNEL_SHOUTOUT_RECEIVE,
        "1",
        [(BROADCASTER_USER_ID, broadcaster_id), ("moderator_user_id", moderator_id)],
    )
}

/// The set most channels want when they connect their account.
pub fn default_subscriptions(user_id: &str) -> Vec<SubscriptionConfig> {
    vec![
        channel_chat_message(user_id, user_id),
        channel_chat_message_delete(user_id, user_id),
        channel_subscribe(user_id),
        stream_offline(user_id),
        stream_online(user_id),
        channel_points_redemption_add(user_id),
    ]
}
