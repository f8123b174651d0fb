//! # Pool Supervisor
//!
//! One task per pool, draining the signals its transport session emits.
//! Signals carrying a superseded connection generation are ignored except for
//! notifications, which are still routed: a soft reconnect keeps the same
//! subscriptions, so frames delivered by the old connection are valid.

use std::sync::Weak;

use tracing::{debug, info, warn};

use super::{PoolInner, PoolStatus};
use crate::dispatch::DispatchOutcome;
use crate::models::wire::EventSubMessage;
use crate::models::{LiveBinding, SubscriptionFilter};
use crate::transport::frames::notification_subscription_id;
use crate::transport::{SessionEvent, SessionSignal, SignalReceiver};
use crate::utils::lock;

/// Runs until the pool is dropped or reaches a terminal status.
pub(super) async fn run(pool: Weak<PoolInner>, mut signals: SignalReceiver) {
    while let Some(signal) = signals.recv().await {
        let Some(inner) = pool.upgrade() else {
            break;
        };
        inner.handle_signal(signal).await;
        if inner.status().is_terminal() {
            debug!(pool_id = %inner.id, "supervisor exiting");
            break;
        }
    }
}

impl PoolInner {
    async fn handle_signal(&self, signal: SessionSignal) {
        let current = signal.generation == self.transport.generation();
        match signal.event {
            SessionEvent::Notification(message) => self.route_notification(message),
            SessionEvent::Revocation {
                subscription_id,
                status,
            } => self.handle_revocation(&subscription_id, &status).await,
            SessionEvent::ReconnectRequested { url } if current => {
                self.handle_reconnect_request(&url).await
            }
            SessionEvent::KeepaliveTimeout if current => {
                self.handle_session_lost("keepalive timeout").await
            }
            SessionEvent::Closed { reason } if current => self.handle_session_lost(&reason).await,
            event => {
                debug!(
                    pool_id = %self.id,
                    generation = signal.generation,
                    ?event,
                    "ignoring signal from superseded connection"
                );
            }
        }
    }

    fn route_notification(&self, message: EventSubMessage) {
        let Some(live_id) = notification_subscription_id(&message) else {
            warn!(pool_id = %self.id, message_id = %message.metadata.message_id, "notification without subscription id");
            return;
        };
        let Some(subscription) = lock(&self.state).subscriptions.get(live_id).cloned() else {
            warn!(
                pool_id = %self.id,
                subscription_id = live_id,
                "notification for unknown subscription, dropping"
            );
            return;
        };
        match self.context.dispatcher.dispatch(&message, &subscription) {
            Ok(DispatchOutcome::Published) => {}
            Ok(DispatchOutcome::Duplicate) => {
                debug!(pool_id = %self.id, message_id = %message.metadata.message_id, "duplicate notification");
            }
            Err(e) => {
                warn!(
                    pool_id = %self.id,
                    subscription_id = live_id,
                    subscription_type = %subscription.subscription_type,
                    error = %e,
                    "failed to decode notification"
                );
            }
        }
    }

    async fn handle_revocation(&self, live_id: &str, status: &str) {
        if lock(&self.state).subscriptions.remove(live_id).is_none() {
            debug!(pool_id = %self.id, subscription_id = live_id, "revocation for unknown subscription");
            return;
        }
        warn!(pool_id = %self.id, subscription_id = live_id, status, "subscription revoked by provider");
        self.mark_failed(live_id, &format!("revoked: {status}")).await;
        self.close_if_idle().await;
    }

    async fn handle_reconnect_request(&self, url: &str) {
        {
            let mut state = lock(&self.state);
            if state.status != PoolStatus::Connected {
                debug!(pool_id = %self.id, status = %state.status, "reconnect request ignored");
                return;
            }
            state.status = PoolStatus::Reconnecting;
        }
        match self.transport.connect(url).await {
            Ok(session_id) => {
                if !self.resume() {
                    self.abandon_connection(&session_id).await;
                    return;
                }
                info!(
                    pool_id = %self.id,
                    session_id = %session_id,
                    subscriptions = lock(&self.state).subscriptions.len(),
                    "migrated to reconnect url"
                );
            }
            Err(e) => self.fail(&format!("reconnect failed: {e}")).await,
        }
    }

    /// The connection died without being asked to. An empty pool just stops;
    /// otherwise a fresh session is opened and every subscription re-created on it.
    async fn handle_session_lost(&self, reason: &str) {
        let has_subscriptions = {
            let mut state = lock(&self.state);
            if !matches!(state.status, PoolStatus::Connected | PoolStatus::Reconnecting) {
                return;
            }
            let has_subscriptions = !state.subscriptions.is_empty();
            if has_subscriptions {
                state.status = PoolStatus::Reconnecting;
                state.epoch += 1;
            } else {
                state.status = PoolStatus::Stopping;
            }
            has_subscriptions
        };

        if !has_subscriptions {
            info!(pool_id = %self.id, reason, "session lost with no subscriptions, stopping");
            if let Err(e) = self.shutdown().await {
                debug!(pool_id = %self.id, error = %e, "no connection left to close");
            }
            return;
        }

        warn!(pool_id = %self.id, reason, "session lost, reconnecting");
        let url = self.context.config.eventsub_ws_url.clone();
        let session_id = match self.transport.connect(&url).await {
            Ok(session_id) => session_id,
            Err(e) => {
                self.fail(&format!("reconnect after {reason} failed: {e}")).await;
                return;
            }
        };
        if !self.is_reconnecting() {
            self.abandon_connection(&session_id).await;
            return;
        }

        let stale: Vec<String> = lock(&self.state).subscriptions.keys().cloned().collect();
        let mut restored = 0usize;
        for live_id in &stale {
            if !self.is_reconnecting() {
                break;
            }
            match self.resubscribe(live_id).await {
                Ok(_) => restored += 1,
                Err(e) => warn!(pool_id = %self.id, subscription_id = %live_id, error = %e, "resubscribe failed"),
            }
        }
        if !self.resume() {
            self.abandon_connection(&session_id).await;
            return;
        }
        info!(pool_id = %self.id, restored, total = stale.len(), "session restored");
        self.close_if_idle().await;
    }

    /// The pool was closed while a reconnect was in flight; the connection
    /// that reconnect opened has no owner.
    async fn abandon_connection(&self, session_id: &str) {
        info!(pool_id = %self.id, session_id, status = %self.status(), "pool closed during reconnect, dropping new session");
        if let Err(e) = self.transport.disconnect().await {
            debug!(pool_id = %self.id, error = %e, "new session already closed");
        }
    }

    /// Tears the pool down as ERRORED and marks every bound record failed.
    /// A pool already being closed is left to its closer.
    async fn fail(&self, reason: &str) {
        if !self.is_reconnecting() {
            debug!(pool_id = %self.id, reason, status = %self.status(), "reconnect failed after close");
            return;
        }
        warn!(pool_id = %self.id, reason, "pool failed");
        let live_ids: Vec<String> = lock(&self.state).subscriptions.keys().cloned().collect();
        for live_id in &live_ids {
            self.mark_failed(live_id, reason).await;
        }
        if let Err(e) = self.transport.disconnect().await {
            debug!(pool_id = %self.id, error = %e, "nothing to disconnect");
        }
        self.finish(PoolStatus::Errored);
    }

    async fn mark_failed(&self, live_id: &str, reason: &str) {
        let store = &self.context.store;
        let records = match store
            .find_by_filter(&SubscriptionFilter::LiveId(live_id.to_string()))
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(pool_id = %self.id, subscription_id = live_id, error = %e, "record lookup failed");
                return;
            }
        };
        for mut record in records {
            record.set_binding(LiveBinding::Failed(reason.to_string()));
            if let Err(e) = store.save(&record).await {
                warn!(record_id = %record.id, error = %e, "failed to mark record failed");
            }
        }
    }
}
