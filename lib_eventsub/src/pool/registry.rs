//! # Pool Registry
//!
//! Ordered collection of live pools. Placement always takes the first pool, in
//! creation order, that can reserve a slot; a new pool is opened only when
//! none can. Pool creation is serialized so two callers racing past a full
//! registry open one pool between them, not two.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Pool, PoolContext, PoolSlot, PoolStatus, TerminationHook};
use crate::error::Result;
use crate::utils::{lock, random_id, POOL_ID_LEN};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    pub status: PoolStatus,
    pub session_id: Option<String>,
    pub subscription_count: usize,
    pub reserved: usize,
}

struct RegistryInner {
    context: Arc<PoolContext>,
    pools: Mutex<Vec<Pool>>,
    creation: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct PoolRegistry {
    inner: Arc<RegistryInner>,
}

impl PoolRegistry {
    pub fn new(context: PoolContext) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                context: Arc::new(context),
                pools: Mutex::new(Vec::new()),
                creation: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn context(&self) -> &Arc<PoolContext> {
        &self.inner.context
    }

    /// Reserves a slot on the first available pool, opening a new pool if
    /// every existing one is full or not connected.
    pub async fn find_or_create(&self) -> Result<PoolSlot> {
        if let Some(slot) = self.reserve_existing() {
            return Ok(slot);
        }

        let _creating = self.inner.creation.lock().await;
        // Another caller may have opened a pool while we waited.
        if let Some(slot) = self.reserve_existing() {
            return Ok(slot);
        }

        let pool_id = random_id(POOL_ID_LEN);
        info!(pool_id = %pool_id, pools = self.len(), "opening new pool");
        let pool = Pool::start(pool_id, Arc::clone(&self.inner.context), self.termination_hook()).await?;
        let slot = pool.reserve()?;
        lock(&self.inner.pools).push(pool);
        Ok(slot)
    }

    fn reserve_existing(&self) -> Option<PoolSlot> {
        lock(&self.inner.pools)
            .iter()
            .find_map(|pool| pool.reserve().ok())
    }

    fn termination_hook(&self) -> TerminationHook {
        let registry: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        Arc::new(move |pool_id: &str| {
            if let Some(registry) = registry.upgrade() {
                let mut pools = lock(&registry.pools);
                let before = pools.len();
                pools.retain(|pool| pool.id() != pool_id);
                if pools.len() != before {
                    debug!(pool_id, remaining = pools.len(), "pool deregistered");
                }
            }
        })
    }

    pub fn get(&self, pool_id: &str) -> Option<Pool> {
        lock(&self.inner.pools)
            .iter()
            .find(|pool| pool.id() == pool_id)
            .cloned()
    }

    pub fn remove(&self, pool_id: &str) -> Option<Pool> {
        let mut pools = lock(&self.inner.pools);
        let index = pools.iter().position(|pool| pool.id() == pool_id)?;
        Some(pools.remove(index))
    }

    /// The pool currently holding the live subscription `live_id`.
    pub fn find_by_subscription(&self, live_id: &str) -> Option<Pool> {
        lock(&self.inner.pools)
            .iter()
            .find(|pool| pool.contains(live_id))
            .cloned()
    }

    pub fn pools(&self) -> Vec<Pool> {
        lock(&self.inner.pools).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.pools).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> BTreeMap<String, PoolSnapshot> {
        self.pools()
            .into_iter()
            .map(|pool| (pool.id().to_string(), pool.snapshot()))
            .collect()
    }

    /// Closes every pool. Pools deregister themselves as they close.
    pub async fn close_all(&self) {
        for pool in self.pools() {
            match pool.close().await {
                Ok(outcome) => debug!(pool_id = %pool.id(), ?outcome, "pool closed"),
                Err(e) => warn!(pool_id = %pool.id(), error = %e, "pool close failed"),
            }
            self.remove(pool.id());
        }
    }
}
