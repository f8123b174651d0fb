use std::sync::Arc;

use lib_eventsub::{BroadcastBus, SubscriptionManager};

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SubscriptionManager>,
    // Held for the listener count; consumers subscribe at startup
    pub bus: Arc<BroadcastBus>,
}

impl AppState {
    pub fn new(manager: Arc<SubscriptionManager>, bus: Arc<BroadcastBus>) -> Self {
        Self { manager, bus }
    }
}
