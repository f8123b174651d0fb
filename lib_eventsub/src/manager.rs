//! # Subscription Manager
//!
//! Public façade over the pool registry. Callers speak in terms of persisted
//! subscription records; the manager keeps each record's live binding in step
//! with whichever pool actually holds the provider subscription.
//!
//! Duplicate detection and the first write of a record happen under one
//! intent lock, so concurrent `create_subscription` calls for the same type
//! and broadcaster persist exactly one record. Deletes and the final write of
//! a create take the same lock; a record deleted while its subscribe was in
//! flight stays deleted and the live subscription is rolled back.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::collaborators::{StoreOp, SubscriptionStore};
use crate::error::{EventSubError, Result};
use crate::models::{catalog, LiveBinding, PersistedSubscription, Subscription, SubscriptionConfig, SubscriptionFilter};
use crate::pool::{Pool, PoolRegistry, PoolSnapshot};

/// What `start()` did with the persisted records.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub subscribed: usize,
    pub removed: usize,
}

pub struct SubscriptionManager {
    registry: PoolRegistry,
    intent: AsyncMutex<()>,
}

impl SubscriptionManager {
    pub fn new(registry: PoolRegistry) -> Self {
        Self {
            registry,
            intent: AsyncMutex::new(()),
        }
    }

    pub fn registry(&self) -> &PoolRegistry {
        &self.registry
    }

    fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.registry.context().store
    }

    /// Persists the intent for `config` and binds it to a live subscription.
    /// Returns the persisted record id.
    pub async fn create_subscription(
        &self,
        authorizer_id: &str,
        config: SubscriptionConfig,
    ) -> Result<String> {
        let mut record = {
            let _intent = self.intent.lock().await;
            match self.find_duplicate(&config).await? {
                Some(existing) if existing.binding.is_active() => {
                    debug!(record_id = %existing.id, "subscription intent already recorded");
                    return Err(EventSubError::AlreadySubscribed {
                        broadcaster_user_id: config
                            .broadcaster_user_id()
                            .unwrap_or_default()
                            .to_string(),
                        subscription_type: config.subscription_type,
                    });
                }
                Some(mut dormant) => {
                    debug!(record_id = %dormant.id, state = dormant.binding.state_name(), "reactivating record");
                    dormant.authorizer_id = authorizer_id.to_string();
                    dormant.config = config;
                    dormant.set_binding(LiveBinding::Pending);
                    self.store().save(&dormant).await?;
                    dormant
                }
                None => {
                    let record = PersistedSubscription::pending(authorizer_id, config);
                    self.store().save(&record).await?;
                    record
                }
            }
        };

        self.subscribe_record(&mut record).await?;
        Ok(record.id)
    }

    async fn find_duplicate(&self, config: &SubscriptionConfig) -> Result<Option<PersistedSubscription>> {
        let Some((subscription_type, broadcaster_user_id)) = config.dedupe_key() else {
            return Ok(None);
        };
        let filter = SubscriptionFilter::TypeAndBroadcaster {
            subscription_type: subscription_type.to_string(),
            broadcaster_user_id: broadcaster_user_id.to_string(),
        };
        let mut records = self.store().find_by_filter(&filter).await?;
        let active = records.iter().position(|record| record.binding.is_active());
        Ok(match active {
            Some(index) => Some(records.swap_remove(index)),
            None => records.into_iter().next(),
        })
    }

    /// Binds `record` to a live subscription and persists the outcome.
    async fn subscribe_record(&self, record: &mut PersistedSubscription) -> Result<Subscription> {
        let subscription = match self.bind(record).await {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "subscribe failed");
                record.set_binding(LiveBinding::Failed(e.to_string()));
                match self.persist_binding(record).await {
                    Ok(true) => {}
                    Ok(false) => debug!(record_id = %record.id, "record deleted while subscribing"),
                    Err(store_err) => {
                        warn!(record_id = %record.id, error = %store_err, "failed to persist failure");
                    }
                }
                return Err(e);
            }
        };

        record.set_binding(LiveBinding::Subscribed(subscription.id.clone()));
        let failure = match self.persist_binding(record).await {
            Ok(true) => None,
            Ok(false) => {
                info!(record_id = %record.id, subscription_id = %subscription.id, "record deleted while subscribing, rolling back");
                Some(EventSubError::RecordNotFound(record.id.clone()))
            }
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "failed to persist binding, rolling back");
                Some(e)
            }
        };
        if let Some(e) = failure {
            if let Err(unsub) = self.unsubscribe_live(&record.authorizer_id, &subscription.id).await {
                warn!(subscription_id = %subscription.id, error = %unsub, "rollback unsubscribe failed");
            }
            return Err(e);
        }
        info!(
            record_id = %record.id,
            subscription_id = %subscription.id,
            subscription_type = %subscription.subscription_type,
            "subscribed"
        );
        Ok(subscription)
    }

    /// Saves `record` unless it was deleted meanwhile. False when it was.
    async fn persist_binding(&self, record: &PersistedSubscription) -> Result<bool> {
        let _intent = self.intent.lock().await;
        if self.store().find_by_id(&record.id).await?.is_none() {
            return Ok(false);
        }
        self.store().save(record).await?;
        Ok(true)
    }

    /// Places the record's config on a pool, moving on to the next pool when
    /// one turns out to be full or unavailable.
    async fn bind(&self, record: &PersistedSubscription) -> Result<Subscription> {
        let token = self
            .registry
            .context()
            .tokens
            .access_token(&record.authorizer_id)
            .await?;
        let attempts = self.registry.context().config.subscribe_attempts.max(1);

        let mut last_error = None;
        for attempt in 1..=attempts {
            let slot = self.registry.find_or_create().await?;
            let pool = slot.pool().clone();
            match slot.subscribe(&record.config, &token).await {
                Ok(subscription) => return Ok(subscription),
                Err(e) => {
                    self.discard_if_idle(&pool).await;
                    if !e.is_capacity() {
                        return Err(e);
                    }
                    debug!(pool_id = %pool.id(), attempt, error = %e, "pool could not take subscription, retrying");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or(EventSubError::NotConnected))
    }

    /// Unsubscribes the record's live subscription (if any) and deletes the
    /// record. The record goes even when the provider call fails.
    pub async fn delete_subscription(&self, record_id: &str) -> Result<()> {
        let _intent = self.intent.lock().await;
        let record = self
            .store()
            .find_by_id(record_id)
            .await?
            .ok_or_else(|| EventSubError::RecordNotFound(record_id.to_string()))?;

        if let Some(live_id) = record.binding.live_id() {
            match self.unsubscribe_live(&record.authorizer_id, live_id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {
                    debug!(record_id, subscription_id = live_id, "live subscription already gone");
                }
                Err(e) => {
                    warn!(record_id, subscription_id = live_id, error = %e, "unsubscribe failed, deleting record anyway");
                }
            }
        }

        self.store().delete(&record.id).await?;
        info!(record_id, "subscription deleted");
        Ok(())
    }

    async fn unsubscribe_live(&self, authorizer_id: &str, live_id: &str) -> Result<()> {
        let pool = self
            .registry
            .find_by_subscription(live_id)
            .ok_or_else(|| EventSubError::SubscriptionNotFound(live_id.to_string()))?;
        let result = match self.registry.context().tokens.access_token(authorizer_id).await {
            Ok(token) => pool.unsubscribe(live_id, &token).await,
            Err(e) => {
                pool.forget(live_id);
                Err(e.into())
            }
        };
        self.discard_if_idle(&pool).await;
        result
    }

    async fn discard_if_idle(&self, pool: &Pool) {
        if let Some(outcome) = pool.close_if_idle().await {
            debug!(pool_id = %pool.id(), ?outcome, "idle pool closed");
            self.registry.remove(pool.id());
        }
    }

    /// Startup reconciliation: every persisted record is subscribed afresh;
    /// records that cannot be are deleted.
    pub async fn start(&self) -> Result<ReconcileReport> {
        let records = self.store().find_by_filter(&SubscriptionFilter::All).await?;
        info!(records = records.len(), "reconciling persisted subscriptions");

        let mut report = ReconcileReport::default();
        for mut record in records {
            match self.subscribe_record(&mut record).await {
                Ok(_) => report.subscribed += 1,
                Err(e) => {
                    warn!(record_id = %record.id, error = %e, "could not restore subscription, removing record");
                    if let Err(store_err) = self.store().delete(&record.id).await {
                        warn!(record_id = %record.id, error = %store_err, "failed to delete record");
                    }
                    report.removed += 1;
                }
            }
        }
        info!(subscribed = report.subscribed, removed = report.removed, "reconciliation finished");
        Ok(report)
    }

    /// Clears every live binding in one transaction, then closes all pools.
    pub async fn shutdown(&self) -> Result<()> {
        let cleared = match self.store().find_by_filter(&SubscriptionFilter::All).await {
            Ok(records) => {
                let ops: Vec<StoreOp> = records
                    .into_iter()
                    .filter(|record| record.binding.is_active())
                    .map(|mut record| {
                        record.set_binding(LiveBinding::Unsubscribed);
                        StoreOp::Save(record)
                    })
                    .collect();
                let count = ops.len();
                self.store()
                    .run_in_transaction(ops)
                    .await
                    .map(|()| count)
                    .map_err(EventSubError::from)
            }
            Err(e) => Err(e.into()),
        };

        self.registry.close_all().await;
        let count = cleared?;
        info!(cleared = count, "subscription manager shut down");
        Ok(())
    }

    /// Creates the default subscription set for `user_id`, skipping those that
    /// already exist. Returns the ids of records created or reactivated.
    pub async fn create_default_subscriptions(
        &self,
        authorizer_id: &str,
        user_id: &str,
    ) -> Result<Vec<String>> {
        let mut created = Vec::new();
        for config in catalog::default_subscriptions(user_id) {
            let subscription_type = config.subscription_type.clone();
            match self.create_subscription(authorizer_id, config).await {
                Ok(record_id) => created.push(record_id),
                Err(EventSubError::AlreadySubscribed { .. }) => {
                    debug!(subscription_type = %subscription_type, user_id, "default subscription already exists");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(created)
    }

    pub async fn record(&self, record_id: &str) -> Result<Option<PersistedSubscription>> {
        Ok(self.store().find_by_id(record_id).await?)
    }

    pub async fn records(&self, filter: &SubscriptionFilter) -> Result<Vec<PersistedSubscription>> {
        Ok(self.store().find_by_filter(filter).await?)
    }

    pub fn status(&self) -> std::collections::BTreeMap<String, PoolSnapshot> {
        self.registry.snapshot()
    }
}
