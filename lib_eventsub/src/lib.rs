//! EventSub session pooling: WebSocket sessions grouped into capacity-bounded
//! pools, persisted subscription intents reconciled against live provider
//! subscriptions, and notifications decoded into typed events.

// Core modules, always built
pub mod bus;
pub mod collaborators;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod manager;
pub mod models;
pub mod pool;
pub mod store;
pub mod transport;
pub mod utils;

// Feature-gated modules
#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "retrieve")]
pub mod retrieve;

// Re-export the common surface
pub use bus::{BroadcastBus, EventReceiver};
pub use collaborators::{EventBus, StoreOp, SubscriptionApi, SubscriptionStore, TokenSource};
pub use config::EventSubConfig;
pub use dispatch::events::{EventData, PlatformEvent};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{DecodeError, EventSubError, Result, StoreError, TokenError};
pub use manager::{ReconcileReport, SubscriptionManager};
pub use models::{LiveBinding, PersistedSubscription, Subscription, SubscriptionConfig, SubscriptionFilter};
pub use pool::{Pool, PoolContext, PoolRegistry, PoolSlot, PoolSnapshot, PoolStatus};
pub use store::MemoryStore;
pub use transport::{CloseOutcome, SessionEvent, SessionSettings, SessionSignal, TransportSession};
