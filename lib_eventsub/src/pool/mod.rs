//! # Pool
//!
//! A capacity-bounded wrapper around one [`TransportSession`]. The pool owns
//! the live subscriptions bound to its session and brokers subscribe,
//! unsubscribe and resubscribe calls against the provider.
//!
//! ## Capacity
//! Subscribing is a two-step reserve/commit. [`Pool::reserve`] checks the
//! status and `subscriptions + reserved < max` and takes a slot inside one
//! critical section; the returned [`PoolSlot`] either commits into the
//! subscription map after the REST call succeeds or gives the slot back when
//! dropped. Concurrent callers can therefore never push a pool past its cap.
//! A slot reserved before a hard reconnect started is not committed: the
//! subscription it created is bound to a session that no longer exists.
//!
//! ## Lifecycle
//! `STOPPED → STARTING → CONNECTED → {RECONNECTING → CONNECTED | ERRORED} →
//! STOPPING → STOPPED | ERRORED`. Whatever moves a pool into a terminal state
//! also runs its termination hook, which is how the registry learns to drop it.
//! Session signals (notifications, revocations, reconnects, keepalive loss) are
//! handled by a per-pool supervisor task, see [`supervisor`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::collaborators::{SubscriptionApi, SubscriptionStore, TokenSource};
use crate::config::EventSubConfig;
use crate::dispatch::Dispatcher;
use crate::error::{EventSubError, Result};
use crate::models::wire::SubscriptionRequest;
use crate::models::{LiveBinding, Subscription, SubscriptionConfig, SubscriptionFilter};
use crate::transport::{CloseOutcome, SessionSettings, TransportSession};
use crate::utils::lock;

pub mod registry;
mod supervisor;

pub use registry::{PoolRegistry, PoolSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoolStatus {
    Stopped,
    Starting,
    Connected,
    Reconnecting,
    Stopping,
    Errored,
}

impl PoolStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PoolStatus::Stopped | PoolStatus::Errored)
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PoolStatus::Stopped => "STOPPED",
            PoolStatus::Starting => "STARTING",
            PoolStatus::Connected => "CONNECTED",
            PoolStatus::Reconnecting => "RECONNECTING",
            PoolStatus::Stopping => "STOPPING",
            PoolStatus::Errored => "ERRORED",
        };
        f.write_str(name)
    }
}

/// Everything a pool needs from the outside world.
pub struct PoolContext {
    pub config: Arc<EventSubConfig>,
    pub api: Arc<dyn SubscriptionApi>,
    pub tokens: Arc<dyn TokenSource>,
    pub store: Arc<dyn SubscriptionStore>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Called with the pool id once the pool reaches STOPPED or ERRORED.
pub type TerminationHook = Arc<dyn Fn(&str) + Send + Sync>;

struct PoolState {
    status: PoolStatus,
    subscriptions: HashMap<String, Subscription>,
    reserved: usize,
    /// Bumped whenever a hard reconnect replaces the provider-side session.
    epoch: u64,
}

pub(crate) struct PoolInner {
    id: String,
    context: Arc<PoolContext>,
    transport: TransportSession,
    state: Mutex<PoolState>,
    on_terminated: TerminationHook,
}

/// Cheap, cloneable handle to a pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl Pool {
    /// Opens a session on the canonical endpoint and starts supervising it.
    pub async fn start(
        id: String,
        context: Arc<PoolContext>,
        on_terminated: TerminationHook,
    ) -> Result<Pool> {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let settings = SessionSettings::from(context.config.as_ref());
        let inner = Arc::new(PoolInner {
            transport: TransportSession::new(&id, settings, signals_tx),
            id,
            context,
            state: Mutex::new(PoolState {
                status: PoolStatus::Stopped,
                subscriptions: HashMap::new(),
                reserved: 0,
                epoch: 0,
            }),
            on_terminated,
        });

        inner.set_status(PoolStatus::Starting);
        let url = inner.context.config.eventsub_ws_url.clone();
        match inner.transport.connect(&url).await {
            Ok(session_id) => {
                inner.set_status(PoolStatus::Connected);
                info!(pool_id = %inner.id, session_id = %session_id, "pool connected");
            }
            Err(e) => {
                warn!(pool_id = %inner.id, error = %e, "pool failed to start");
                inner.finish(PoolStatus::Errored);
                return Err(e);
            }
        }

        tokio::spawn(supervisor::run(Arc::downgrade(&inner), signals_rx));
        Ok(Pool { inner })
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn status(&self) -> PoolStatus {
        lock(&self.inner.state).status
    }

    pub fn session_id(&self) -> Option<String> {
        self.inner.transport.session_id()
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.inner.state).subscriptions.len()
    }

    pub fn reserved(&self) -> usize {
        lock(&self.inner.state).reserved
    }

    pub fn contains(&self, live_id: &str) -> bool {
        lock(&self.inner.state).subscriptions.contains_key(live_id)
    }

    pub fn subscription(&self, live_id: &str) -> Option<Subscription> {
        lock(&self.inner.state).subscriptions.get(live_id).cloned()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        lock(&self.inner.state).subscriptions.values().cloned().collect()
    }

    /// True iff CONNECTED with room for one more subscription.
    pub fn is_available(&self) -> bool {
        let state = lock(&self.inner.state);
        state.status == PoolStatus::Connected
            && state.subscriptions.len() + state.reserved < self.capacity()
    }

    fn capacity(&self) -> usize {
        self.inner.context.config.max_subscriptions_per_pool
    }

    /// Takes one unit of capacity, released again unless the slot commits.
    pub fn reserve(&self) -> Result<PoolSlot> {
        let mut state = lock(&self.inner.state);
        if state.status != PoolStatus::Connected {
            return Err(EventSubError::PoolUnavailable {
                pool_id: self.inner.id.clone(),
                status: state.status,
            });
        }
        if state.subscriptions.len() + state.reserved >= self.capacity() {
            return Err(EventSubError::PoolFull {
                pool_id: self.inner.id.clone(),
                capacity: self.capacity(),
            });
        }
        state.reserved += 1;
        Ok(PoolSlot {
            pool: self.clone(),
            epoch: state.epoch,
            committed: false,
        })
    }

    /// Reserves and subscribes in one go. Fails with `PoolFull` at capacity.
    pub async fn subscribe(
        &self,
        config: &SubscriptionConfig,
        access_token: &str,
    ) -> Result<Subscription> {
        self.reserve()?.subscribe(config, access_token).await
    }

    /// Deletes the live subscription on the provider and forgets it locally.
    ///
    /// The local entry is dropped even when the REST call fails; the error is
    /// still returned so the caller can log it.
    pub async fn unsubscribe(&self, live_id: &str, access_token: &str) -> Result<()> {
        if !self.contains(live_id) {
            return Err(EventSubError::SubscriptionNotFound(live_id.to_string()));
        }
        let result = self
            .inner
            .context
            .api
            .delete_subscription(live_id, access_token)
            .await;
        self.forget(live_id);
        match result {
            Err(e) if e.is_not_found() => {
                debug!(pool_id = %self.inner.id, subscription_id = live_id, "provider had already dropped subscription");
                Ok(())
            }
            other => other,
        }
    }

    /// Removes a live subscription from the map without calling the provider.
    pub fn forget(&self, live_id: &str) -> Option<Subscription> {
        lock(&self.inner.state).subscriptions.remove(live_id)
    }

    /// Re-issues the REST call for an existing subscription on the current
    /// session with a fresh token, and moves the persisted join key over to
    /// the new provider id.
    pub async fn resubscribe(&self, live_id: &str) -> Result<Subscription> {
        self.inner.resubscribe(live_id).await
    }

    /// Closes the session. Fails if the pool is already terminal.
    pub async fn close(&self) -> Result<CloseOutcome> {
        {
            let mut state = lock(&self.inner.state);
            if state.status.is_terminal() {
                return Err(EventSubError::AlreadyClosed {
                    pool_id: self.inner.id.clone(),
                    status: state.status,
                });
            }
            state.status = PoolStatus::Stopping;
        }
        self.inner.shutdown().await
    }

    /// Closes the pool if it is CONNECTED with nothing live or reserved.
    /// Returns `None` when the pool was left alone.
    pub async fn close_if_idle(&self) -> Option<CloseOutcome> {
        self.inner.close_if_idle().await
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = lock(&self.inner.state);
        PoolSnapshot {
            status: state.status,
            session_id: self.inner.transport.session_id(),
            subscription_count: state.subscriptions.len(),
            reserved: state.reserved,
        }
    }
}

/// One reserved unit of pool capacity.
pub struct PoolSlot {
    pool: Pool,
    epoch: u64,
    committed: bool,
}

impl PoolSlot {
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Creates the subscription on the provider, bound to the pool's current
    /// session, and commits it into the pool.
    pub async fn subscribe(
        mut self,
        config: &SubscriptionConfig,
        access_token: &str,
    ) -> Result<Subscription> {
        let inner = &self.pool.inner;
        let session_id = inner
            .transport
            .session_id()
            .ok_or(EventSubError::NotConnected)?;
        let request = SubscriptionRequest::new(config, &session_id);
        let subscription = inner
            .context
            .api
            .create_subscription(&request, access_token)
            .await?;

        let refused = {
            let mut state = lock(&inner.state);
            state.reserved = state.reserved.saturating_sub(1);
            self.committed = true;
            let live = matches!(state.status, PoolStatus::Connected | PoolStatus::Reconnecting);
            if live && state.epoch == self.epoch {
                state
                    .subscriptions
                    .insert(subscription.id.clone(), subscription.clone());
                debug!(
                    pool_id = %inner.id,
                    subscription_id = %subscription.id,
                    subscription_type = %subscription.subscription_type,
                    count = state.subscriptions.len(),
                    "subscription committed"
                );
                None
            } else {
                Some(state.status)
            }
        };

        match refused {
            None => Ok(subscription),
            Some(status) => {
                warn!(
                    pool_id = %inner.id,
                    subscription_id = %subscription.id,
                    session_id = %session_id,
                    "session replaced while subscribing, discarding subscription"
                );
                inner.discard_remote(&subscription.id, access_token).await;
                Err(EventSubError::PoolUnavailable {
                    pool_id: inner.id.clone(),
                    status,
                })
            }
        }
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        if !self.committed {
            let mut state = lock(&self.pool.inner.state);
            state.reserved = state.reserved.saturating_sub(1);
        }
    }
}

impl PoolInner {
    fn status(&self) -> PoolStatus {
        lock(&self.state).status
    }

    fn is_reconnecting(&self) -> bool {
        self.status() == PoolStatus::Reconnecting
    }

    /// RECONNECTING → CONNECTED. False when something else (a close) moved
    /// the pool on while the reconnect was in flight.
    fn resume(&self) -> bool {
        let mut state = lock(&self.state);
        if state.status != PoolStatus::Reconnecting {
            return false;
        }
        state.status = PoolStatus::Connected;
        true
    }

    /// Best-effort delete of a provider subscription the pool will not keep.
    async fn discard_remote(&self, live_id: &str, access_token: &str) {
        if let Err(e) = self
            .context
            .api
            .delete_subscription(live_id, access_token)
            .await
        {
            debug!(pool_id = %self.id, subscription_id = live_id, error = %e, "discarded subscription could not be deleted");
        }
    }

    fn set_status(&self, status: PoolStatus) {
        let previous = std::mem::replace(&mut lock(&self.state).status, status);
        if previous != status {
            debug!(pool_id = %self.id, from = %previous, to = %status, "pool status changed");
        }
    }

    /// Moves to a terminal status, drops every live subscription and
    /// deregisters the pool.
    fn finish(&self, status: PoolStatus) {
        {
            let mut state = lock(&self.state);
            state.status = status;
            state.subscriptions.clear();
        }
        info!(pool_id = %self.id, status = %status, "pool terminated");
        (self.on_terminated)(&self.id);
    }

    /// Disconnects the transport of a pool already marked STOPPING.
    async fn shutdown(&self) -> Result<CloseOutcome> {
        match self.transport.disconnect().await {
            Ok(CloseOutcome::Clean) => {
                self.finish(PoolStatus::Stopped);
                Ok(CloseOutcome::Clean)
            }
            Ok(CloseOutcome::Forced) => {
                warn!(pool_id = %self.id, "session did not close in time, forced");
                self.finish(PoolStatus::Errored);
                Ok(CloseOutcome::Forced)
            }
            Err(e) => {
                self.finish(PoolStatus::Stopped);
                Err(e)
            }
        }
    }

    async fn close_if_idle(&self) -> Option<CloseOutcome> {
        {
            let mut state = lock(&self.state);
            let idle = state.status == PoolStatus::Connected
                && state.subscriptions.is_empty()
                && state.reserved == 0;
            if !idle {
                return None;
            }
            state.status = PoolStatus::Stopping;
        }
        info!(pool_id = %self.id, "closing idle pool");
        match self.shutdown().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                debug!(pool_id = %self.id, error = %e, "idle pool had no live session");
                Some(CloseOutcome::Clean)
            }
        }
    }

    async fn create_on_session(
        &self,
        authorizer_id: &str,
        config: &SubscriptionConfig,
    ) -> Result<(Subscription, String)> {
        let token = self.context.tokens.access_token(authorizer_id).await?;
        let session_id = self
            .transport
            .session_id()
            .ok_or(EventSubError::NotConnected)?;
        let request = SubscriptionRequest::new(config, &session_id);
        let subscription = self.context.api.create_subscription(&request, &token).await?;
        Ok((subscription, token))
    }

    async fn resubscribe(&self, live_id: &str) -> Result<Subscription> {
        let old = lock(&self.state)
            .subscriptions
            .get(live_id)
            .cloned()
            .ok_or_else(|| EventSubError::SubscriptionNotFound(live_id.to_string()))?;

        let store = &self.context.store;
        let mut record = match store
            .find_by_filter(&SubscriptionFilter::LiveId(live_id.to_string()))
            .await?
            .into_iter()
            .next()
        {
            Some(record) => record,
            None => {
                lock(&self.state).subscriptions.remove(live_id);
                return Err(EventSubError::RecordNotFound(live_id.to_string()));
            }
        };

        let outcome = self.create_on_session(&record.authorizer_id, &old.config()).await;
        match outcome {
            Ok((fresh, token)) => {
                let closed = {
                    let mut state = lock(&self.state);
                    if matches!(state.status, PoolStatus::Connected | PoolStatus::Reconnecting) {
                        state.subscriptions.remove(live_id);
                        state.subscriptions.insert(fresh.id.clone(), fresh.clone());
                        None
                    } else {
                        Some(state.status)
                    }
                };
                if let Some(status) = closed {
                    self.discard_remote(&fresh.id, &token).await;
                    return Err(EventSubError::PoolUnavailable {
                        pool_id: self.id.clone(),
                        status,
                    });
                }
                record.set_binding(LiveBinding::Subscribed(fresh.id.clone()));
                store.save(&record).await?;
                debug!(pool_id = %self.id, old_id = live_id, new_id = %fresh.id, "resubscribed");
                Ok(fresh)
            }
            Err(e) => {
                lock(&self.state).subscriptions.remove(live_id);
                record.set_binding(LiveBinding::Failed(format!("resubscribe failed: {e}")));
                if let Err(store_err) = store.save(&record).await {
                    warn!(record_id = %record.id, error = %store_err, "failed to mark record failed");
                }
                Err(e)
            }
        }
    }
}
