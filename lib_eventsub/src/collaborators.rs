//! # Collaborator Seams
//!
//! The core never talks to storage, the provider's REST API, the token
//! service or downstream consumers directly. It goes through these traits so
//! each can be swapped for Postgres/Helix in production and in-memory fakes in
//! tests.

use async_trait::async_trait;

use crate::dispatch::events::PlatformEvent;
use crate::error::{Result, StoreError, TokenError};
use crate::models::wire::SubscriptionRequest;
use crate::models::{PersistedSubscription, Subscription, SubscriptionFilter};

/// One step of a [`SubscriptionStore::run_in_transaction`] batch.
#[derive(Debug, Clone)]
pub enum StoreOp {
    Save(PersistedSubscription),
    Delete(String),
}

/// Durable storage for subscription intent.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<PersistedSubscription>, StoreError>;

    async fn find_by_filter(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<PersistedSubscription>, StoreError>;

    /// Inserts or replaces the record with the same id.
    async fn save(&self, record: &PersistedSubscription) -> Result<(), StoreError>;

    /// Deleting a missing record is not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Applies every op or none of them.
    async fn run_in_transaction(&self, ops: Vec<StoreOp>) -> Result<(), StoreError>;
}

/// Resolves the access token an authorizer's subscriptions are created with.
/// Implementations refresh near-expiry tokens themselves.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self, authorizer_id: &str) -> Result<String, TokenError>;
}

/// The provider's subscription management endpoints.
#[async_trait]
pub trait SubscriptionApi: Send + Sync {
    async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
        access_token: &str,
    ) -> Result<Subscription>;

    async fn delete_subscription(&self, subscription_id: &str, access_token: &str) -> Result<()>;
}

/// Fire-and-forget fan-out to downstream consumers.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: PlatformEvent);
}
