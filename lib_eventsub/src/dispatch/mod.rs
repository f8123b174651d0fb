//! # Notification Dispatcher
//!
//! Turns provider `notification` frames into [`PlatformEvent`]s and publishes
//! them on the [`EventBus`]. The decoder table is fixed at construction; the
//! subscription type is taken from the live [`Subscription`] the pool resolved,
//! not from the frame metadata.
//!
//! The provider may deliver the same notification more than once, so the last
//! [`DEDUP_WINDOW`] message ids are remembered and repeats are skipped.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::collaborators::EventBus;
use crate::error::DecodeError;
use crate::models::wire::EventSubMessage;
use crate::models::Subscription;
use crate::utils::lock;

pub mod decode;
pub mod events;
mod fields;

use decode::DecodeFn;
use events::{PlatformEvent, PLATFORM};

/// How many recent provider message ids are remembered for duplicate suppression.
pub const DEDUP_WINDOW: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Published,
    Duplicate,
}

#[derive(Debug, Default)]
struct RecentIds {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIds {
    /// Returns `false` if `id` was already in the window.
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == DEDUP_WINDOW {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }
}

pub struct Dispatcher {
    decoders: HashMap<&'static str, DecodeFn>,
    bus: Arc<dyn EventBus>,
    recent: Mutex<RecentIds>,
}

impl Dispatcher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self {
            decoders: decode::default_decoders(),
            bus,
            recent: Mutex::new(RecentIds::default()),
        }
    }

    pub fn supports(&self, subscription_type: &str) -> bool {
        self.decoders.contains_key(subscription_type)
    }

    /// Decodes without publishing.
    pub fn decode(
        &self,
        message: &EventSubMessage,
        subscription: &Subscription,
    ) -> Result<PlatformEvent, DecodeError> {
        let decoder = self
            .decoders
            .get(subscription.subscription_type.as_str())
            .ok_or_else(|| DecodeError::UnsupportedType {
                subscription_type: subscription.subscription_type.clone(),
            })?;
        let data = decoder(&message.payload)?;
        Ok(PlatformEvent {
            id: None,
            platform: PLATFORM.to_string(),
            provider_message_id: message.metadata.message_id.clone(),
            subscription_id: subscription.id.clone(),
            occurred_at: message.metadata.message_timestamp.clone(),
            data,
        })
    }

    /// Decodes `message` and publishes it. Nothing is published on error.
    pub fn dispatch(
        &self,
        message: &EventSubMessage,
        subscription: &Subscription,
    ) -> Result<DispatchOutcome, DecodeError> {
        let message_id = message.metadata.message_id.as_str();
        if !message_id.is_empty() && !lock(&self.recent).insert(message_id) {
            tracing::debug!(message_id, "skipping redelivered notification");
            return Ok(DispatchOutcome::Duplicate);
        }
        let event = self.decode(message, subscription)?;
        tracing::debug!(
            event_type = event.event_type(),
            subscription_id = %subscription.id,
            "publishing event"
        );
        self.bus.publish(event);
        Ok(DispatchOutcome::Published)
    }
}

/// Convenience for callers holding only the raw payload tree.
pub fn decode_payload(subscription_type: &str, payload: &Value) -> Result<events::EventData, DecodeError> {
    let decoders = decode::default_decoders();
    match decoders.get(subscription_type) {
        Some(decoder) => decoder(payload),
        None => Err(DecodeError::UnsupportedType {
            subscription_type: subscription_type.to_string(),
        }),
    }
}
