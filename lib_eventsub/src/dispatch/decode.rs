//! Decoders from `payload.event` trees to [`EventData`].

use std::collections::HashMap;

use serde_json::Value;

use super::events::*;
use super::fields::Fields;
use crate::error::DecodeError;
use crate::models::catalog;

pub type DecodeFn = fn(&Value) -> Result<EventData, DecodeError>;

/// The fixed subscription-type → decoder table.
pub fn default_decoders() -> HashMap<&'static str, DecodeFn> {
    let mut decoders: HashMap<&'static str, DecodeFn> = HashMap::new();
    decoders.insert(catalog::STREAM_ONLINE, stream_online);
    decoders.insert(catalog::STREAM_OFFLINE, stream_offline);
    decoders.insert(catalog::CHANNEL_CHAT_MESSAGE, chat_message);
    decoders.insert(catalog::CHANNEL_CHAT_MESSAGE_DELETE, chat_message_delete);
    decoders.insert(catalog::CHANNEL_POINTS_REDEMPTION_ADD, points_redemption_add);
    decoders.insert(catalog::CHANNEL_SUBSCRIBE, channel_subscribe);
    decoders.insert(catalog::CHANNEL_SUBSCRIPTION_GIFT, subscription_gift);
    decoders
}

/// Reads `<prefix>_id`, `<prefix>_login` and `<prefix>_name`.
fn user(event: &Fields<'_>, prefix: &str) -> Result<User, DecodeError> {
    Ok(User {
        id: event.str(&format!("{prefix}_id"))?.to_string(),
        username: event.str(&format!("{prefix}_login"))?.to_string(),
        display_name: event.str(&format!("{prefix}_name"))?.to_string(),
    })
}

fn broadcaster(event: &Fields<'_>) -> Result<User, DecodeError> {
    user(event, "broadcaster_user")
}

pub fn stream_online(payload: &Value) -> Result<EventData, DecodeError> {
    let event = Fields::root(payload, "event")?;
    Ok(EventData::StreamOnline(StreamOnline {
        id: event.str("id")?.to_string(),
        channel: broadcaster(&event)?,
        started_at: event.str("started_at")?.to_string(),
    }))
}

pub fn stream_offline(payload: &Value) -> Result<EventData, DecodeError> {
    let event = Fields::root(payload, "event")?;
    Ok(EventData::StreamOffline(StreamOffline {
        channel: broadcaster(&event)?,
    }))
}

pub fn chat_message(payload: &Value) -> Result<EventData, DecodeError> {
    let event = Fields::root(payload, "event")?;
    let message = event.object("message")?;
    let message_type = event.str("message_type")?;

    let fragments = message
        .objects("fragments")?
        .iter()
        .map(|fragment| {
            Ok(ChatMessageFragment {
                fragment_type: fragment.str("type")?.to_string(),
                text: fragment.str("text")?.to_string(),
            })
        })
        .collect::<Result<Vec<_>, DecodeError>>()?;

    let reply = match event.optional_object("reply")? {
        Some(reply) => Some(ChatMessageReply {
            replied_to_message_id: reply.str("parent_message_id")?.to_string(),
            replied_to_chatter: user(&reply, "parent_user")?,
        }),
        None => None,
    };

    let features = if message_type == "text" {
        Vec::new()
    } else {
        vec![message_type.to_string()]
    };

    Ok(EventData::ChatMessage(ChatMessage {
        id: event.str("message_id")?.to_string(),
        channel: broadcaster(&event)?,
        chatter: user(&event, "chatter_user")?,
        reply,
        text: message.str("text")?.to_string(),
        color: event.str("color")?.to_string(),
        fragments,
        features,
    }))
}

pub fn chat_message_delete(payload: &Value) -> Result<EventData, DecodeError> {
    let event = Fields::root(payload, "event")?;
    Ok(EventData::ChatMessageDelete(ChatMessageDelete {
        id: event.str("message_id")?.to_string(),
        channel: broadcaster(&event)?,
        target: user(&event, "target_user")?,
    }))
}

pub fn points_redemption_add(payload: &Value) -> Result<EventData, DecodeError> {
    let event = Fields::root(payload, "event")?;
    let reward = event.object("reward")?;
    Ok(EventData::CurrencySpent(CurrencySpent {
        id: event.str("id")?.to_string(),
        channel: broadcaster(&event)?,
        chatter: user(&event, "user")?,
        input: event.str("user_input")?.to_string(),
        redeemed: CurrencySpentRedeem {
            id: reward.str("id")?.to_string(),
            label: reward.str("title")?.to_string(),
            description: reward.str("prompt")?.to_string(),
            currency: "channel-points".to_string(),
            cost: reward.i64("cost")?,
        },
        status: event.str("status")?.to_string(),
        redeemed_at: event.str("redeemed_at")?.to_string(),
    }))
}

pub fn channel_subscribe(payload: &Value) -> Result<EventData, DecodeError> {
    let event = Fields::root(payload, "event")?;
    Ok(EventData::Subscription(ChannelSubscription {
        channel: broadcaster(&event)?,
        chatter: user(&event, "user")?,
        gifted: event.bool("is_gift")?,
        tier: event.str("tier")?.to_string(),
    }))
}

pub fn subscription_gift(payload: &Value) -> Result<EventData, DecodeError> {
    let event = Fields::root(payload, "event")?;
    let chatter = if event.bool("is_anonymous")? {
        None
    } else {
        Some(user(&event, "user")?)
    };
    Ok(EventData::SubscriptionGifted(GiftedSubscription {
        channel: broadcaster(&event)?,
        chatter,
        tier: event.str("tier")?.to_string(),
        total: event.i64("total")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat_payload() -> Value {
        json!({
            "subscription": {"id": "sub-1", "type": "channel.chat.message"},
            "event": {
                "broadcaster_user_id": "1971641",
                "broadcaster_user_login": "streamer",
                "broadcaster_user_name": "Streamer",
                "chatter_user_id": "4145994",
                "chatter_user_login": "viewer32",
                "chatter_user_name": "Viewer32",
                "message_id": "cc106a89-1814-919d-454c-f4f2f970aae7",
                "message": {
                    "text": "Hi chat",
                    "fragments": [{"type": "text", "text": "Hi chat", "cheermote": null, "emote": null}]
                },
                "color": "#00FF7F",
                "message_type": "text",
                "reply": null
            }
        })
    }

    #[test]
    fn decodes_chat_message() {
        let EventData::ChatMessage(message) = chat_message(&chat_payload()).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(message.text, "Hi chat");
        assert_eq!(message.chatter.username, "viewer32");
        assert_eq!(message.fragments.len(), 1);
        assert!(message.reply.is_none());
        assert!(message.features.is_empty());
    }

    #[test]
    fn chat_message_without_id_names_the_field() {
        let mut payload = chat_payload();
        payload["event"].as_object_mut().unwrap().remove("message_id");
        let err = chat_message(&payload).unwrap_err();
        assert_eq!(err.field(), Some("event.message_id"));
    }

    #[test]
    fn highlighted_message_gets_feature_and_reply() {
        let mut payload = chat_payload();
        payload["event"]["message_type"] = json!("channel_points_highlighted");
        payload["event"]["reply"] = json!({
            "parent_message_id": "p-1",
            "parent_user_id": "9",
            "parent_user_login": "op",
            "parent_user_name": "Op"
        });
        let EventData::ChatMessage(message) = chat_message(&payload).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(message.features, vec!["channel_points_highlighted".to_string()]);
        assert_eq!(message.reply.unwrap().replied_to_chatter.display_name, "Op");
    }

    #[test]
    fn malformed_reply_is_rejected() {
        let mut payload = chat_payload();
        payload["event"]["reply"] = json!({"parent_message_id": 5});
        let err = chat_message(&payload).unwrap_err();
        assert_eq!(err.field(), Some("event.reply.parent_message_id"));
    }

    #[test]
    fn decodes_redemption_cost() {
        let payload = json!({"event": {
            "id": "r-1",
            "broadcaster_user_id": "1", "broadcaster_user_login": "b", "broadcaster_user_name": "B",
            "user_id": "2", "user_login": "u", "user_name": "U",
            "user_input": "hello",
            "status": "unfulfilled",
            "reward": {"id": "rw", "title": "Hydrate", "cost": 100, "prompt": "Drink water"},
            "redeemed_at": "2020-07-15T17:16:03.17106713Z"
        }});
        let EventData::CurrencySpent(spent) = points_redemption_add(&payload).unwrap() else {
            panic!("wrong variant");
        };
        assert_eq!(spent.redeemed.cost, 100);
        assert_eq!(spent.redeemed.label, "Hydrate");
        assert_eq!(spent.redeemed.currency, "channel-points");
    }

    #[test]
    fn anonymous_gift_has_no_chatter() {
        let payload = json!({"event": {
            "user_id": null, "user_login": null, "user_name": null,
            "broadcaster_user_id": "1", "broadcaster_user_login": "b", "broadcaster_user_name": "B",
            "total": 2, "tier": "1000", "cumulative_total": null, "is_anonymous": true
        }});
        let EventData::SubscriptionGifted(gift) = subscription_gift(&payload).unwrap() else {
            panic!("wrong variant");
        };
        assert!(gift.chatter.is_none());
        assert_eq!(gift.total, 2);
    }

    #[test]
    fn subscribe_requires_boolean_gift_flag() {
        let payload = json!({"event": {
            "user_id": "2", "user_login": "u", "user_name": "U",
            "broadcaster_user_id": "1", "broadcaster_user_login": "b", "broadcaster_user_name": "B",
            "tier": "1000", "is_gift": "no"
        }});
        let err = channel_subscribe(&payload).unwrap_err();
        assert_eq!(
            err,
            DecodeError::WrongType {
                field: "event.is_gift".into(),
                expected: "boolean"
            }
        );
    }
}
