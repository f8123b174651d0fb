//! # EventSub Pool Server
//!
//! Runs the subscription manager against the provider's EventSub WebSocket
//! and REST endpoints.
//!
//! ## Functionality:
//! - **Startup reconciliation**: every persisted subscription intent is
//!   re-established on a fresh session; unrestorable records are dropped.
//! - **Default subscriptions**: when an authorizer and user id are configured,
//!   the default subscription set is created after reconciliation.
//! - **Event logging**: a bus listener logs every published event.
//! - **HTTP**: `GET /health` and `GET /status` (pool snapshot and listener count).
//! - **Graceful Shutdown**: on ctrl-c/SIGTERM, live ids are cleared, every pool
//!   is closed and the HTTP server stops, within a 10-second limit.
//!
//! Configuration comes from defaults, `server_eventsub.conf`, then `EVENTSUB_*`
//! environment variables and CLI flags.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio_graceful::{Shutdown, ShutdownGuard};
use tracing::{error, info, warn};

use lib_eventsub::collaborators::{SubscriptionStore, TokenSource};
use lib_eventsub::loggers::setup_logging;
use lib_eventsub::retrieve::HelixClient;
use lib_eventsub::store::PgStore;
use lib_eventsub::{
    BroadcastBus, Dispatcher, EventReceiver, EventSubError, MemoryStore, PoolContext,
    PoolRegistry, SubscriptionManager,
};

mod eventsub_logic;
use eventsub_logic::{config, routes, state};

async fn build_stores(
    config: &config::Config,
) -> Result<(Arc<dyn SubscriptionStore>, Arc<dyn TokenSource>)> {
    match &config.database_url {
        Some(url) => {
            let store = Arc::new(
                PgStore::connect(
                    url,
                    config.database_max_connections(),
                    config.database_connect_timeout(),
                )
                .await?,
            );
            store.ensure_schema().await?;
            if let (Some(authorizer), Some(token)) = (&config.authorizer_id, &config.access_token) {
                store.put_token(authorizer, token).await?;
            }
            let subscriptions: Arc<dyn SubscriptionStore> = store.clone();
            let tokens: Arc<dyn TokenSource> = store;
            Ok((subscriptions, tokens))
        }
        None => {
            let store = match &config.access_token {
                Some(token) => Arc::new(MemoryStore::with_static_token(token.clone())),
                None => {
                    warn!("no access token configured; subscription requests will fail");
                    Arc::new(MemoryStore::new())
                }
            };
            info!("using in-memory subscription store");
            let subscriptions: Arc<dyn SubscriptionStore> = store.clone();
            let tokens: Arc<dyn TokenSource> = store;
            Ok((subscriptions, tokens))
        }
    }
}

async fn log_events(guard: ShutdownGuard, mut events: EventReceiver) {
    loop {
        tokio::select! {
            _ = guard.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                info!(
                    event_type = event.event_type(),
                    subscription_id = %event.subscription_id,
                    message_id = %event.provider_message_id,
                    occurred_at = %event.occurred_at,
                    "event received"
                );
            }
        }
    }
}

async fn reconcile(
    guard: ShutdownGuard,
    manager: Arc<SubscriptionManager>,
    defaults: Option<(String, String)>,
) {
    let work = async {
        match manager.start().await {
            Ok(report) => info!(
                subscribed = report.subscribed,
                removed = report.removed,
                "startup reconciliation finished"
            ),
            Err(e) => error!("startup reconciliation failed: {e}"),
        }
        if let Some((authorizer, user)) = defaults {
            match manager.create_default_subscriptions(&authorizer, &user).await {
                Ok(created) => info!(count = created.len(), user_id = %user, "default subscriptions created"),
                Err(e) => error!(user_id = %user, "default subscriptions failed: {e}"),
            }
        }
    };
    tokio::select! {
        _ = guard.cancelled() => warn!("shutdown during startup reconciliation"),
        _ = work => {}
    }
}

async fn serve(guard: ShutdownGuard, listener: TcpListener, state: state::AppState) {
    let manager = state.manager.clone();
    let app = routes::router(state);
    let server_guard = guard.clone();
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_guard.cancelled().await })
        .await
    {
        error!("http server failed: {e}");
    }

    info!("closing pools");
    match manager.shutdown().await {
        Ok(()) => info!("subscription manager stopped"),
        Err(EventSubError::Store(e)) => error!("failed to clear live ids: {e}"),
        Err(e) => error!("subscription manager shutdown failed: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = config::load_config()?;
    let _log_guard = setup_logging(&config.log_options())?;
    info!(
        config_path = ?config.config_path,
        port = config.port(),
        "configuration loaded"
    );

    let eventsub = Arc::new(config.eventsub_config()?);
    let (store, tokens) = build_stores(&config).await?;
    let api = Arc::new(HelixClient::new(&eventsub)?);
    let bus = Arc::new(BroadcastBus::new());
    let context = PoolContext {
        config: eventsub,
        api,
        tokens,
        store,
        dispatcher: Arc::new(Dispatcher::new(bus.clone())),
    };
    let manager = Arc::new(SubscriptionManager::new(PoolRegistry::new(context)));
    let app_state = state::AppState::new(manager.clone(), bus.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port()));
    let listener = TcpListener::bind(addr).await?;
    info!("listening on http://{addr}");

    let shutdown = Shutdown::default();
    let events = bus.subscribe("event-log");
    shutdown.spawn_task_fn(move |guard| log_events(guard, events));
    let defaults = config
        .default_subscription_target()
        .map(|(authorizer, user)| (authorizer.to_string(), user.to_string()));
    shutdown.spawn_task_fn(move |guard| reconcile(guard, manager, defaults));
    shutdown.spawn_task_fn(move |guard| serve(guard, listener, app_state));

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            warn!("shutdown: forcefully due to timeout: {e}");
        }
    }

    info!("Bye!");
    Ok(())
}
