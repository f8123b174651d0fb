//! # Event Bus
//!
//! In-process [`EventBus`] with an explicit listener list. Each listener gets
//! its own unbounded channel; a published event is wrapped in an `Arc` once and
//! every listener receives a pointer to the same allocation.
//!
//! Listeners that dropped their receiver are pruned on the next publish.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::collaborators::EventBus;
use crate::dispatch::events::PlatformEvent;
use crate::utils::lock;

pub type EventReceiver = mpsc::UnboundedReceiver<Arc<PlatformEvent>>;

struct Listener {
    name: String,
    sender: mpsc::UnboundedSender<Arc<PlatformEvent>>,
}

#[derive(Default)]
pub struct BroadcastBus {
    listeners: Mutex<Vec<Listener>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener and returns the receiving half of its channel.
    pub fn subscribe(&self, name: &str) -> EventReceiver {
        let (sender, receiver) = mpsc::unbounded_channel();
        lock(&self.listeners).push(Listener {
            name: name.to_string(),
            sender,
        });
        tracing::info!(listener = name, "event listener registered");
        receiver
    }

    pub fn unsubscribe(&self, name: &str) {
        lock(&self.listeners).retain(|listener| listener.name != name);
        tracing::info!(listener = name, "event listener removed");
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }
}

impl EventBus for BroadcastBus {
    fn publish(&self, event: PlatformEvent) {
        let event = Arc::new(event);
        let mut listeners = lock(&self.listeners);
        if listeners.is_empty() {
            tracing::debug!(event_type = event.event_type(), "no listeners for event");
            return;
        }
        listeners.retain(|listener| match listener.sender.send(Arc::clone(&event)) {
            Ok(()) => true,
            Err(_) => {
                tracing::info!(listener = %listener.name, "listener disconnected, removing");
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::events::{EventData, StreamOffline, User, PLATFORM};

    fn event() -> PlatformEvent {
        PlatformEvent {
            id: None,
            platform: PLATFORM.to_string(),
            provider_message_id: "m".into(),
            subscription_id: "s".into(),
            occurred_at: String::new(),
            data: EventData::StreamOffline(StreamOffline {
                channel: User {
                    id: "1".into(),
                    username: "b".into(),
                    display_name: "B".into(),
                },
            }),
        }
    }

    #[tokio::test]
    async fn every_listener_gets_the_same_allocation() {
        let bus = BroadcastBus::new();
        let mut a = bus.subscribe("persistence");
        let mut b = bus.subscribe("realtime");
        bus.publish(event());

        let first = a.recv().await.unwrap();
        let second = b.recv().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn dropped_listeners_are_pruned() {
        let bus = BroadcastBus::new();
        let kept = bus.subscribe("kept");
        drop(bus.subscribe("gone"));
        assert_eq!(bus.listener_count(), 2);

        bus.publish(event());
        assert_eq!(bus.listener_count(), 1);
        drop(kept);

        bus.unsubscribe("kept");
        assert_eq!(bus.listener_count(), 0);
    }
}
