//! Shared fixtures: an in-process EventSub WebSocket provider driven by
//! commands, a recording fake of the subscriptions REST API, and a harness
//! wiring them to a registry and manager backed by `MemoryStore`.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use lib_eventsub::models::wire::SubscriptionRequest;
use lib_eventsub::{
    BroadcastBus, Dispatcher, EventReceiver, EventSubConfig, EventSubError, MemoryStore, PoolContext,
    PoolRegistry, Subscription, SubscriptionApi, SubscriptionManager,
};

pub const CLIENT_ID: &str = "test-client";
pub const DEFAULT_KEEPALIVE_SECS: f64 = 10.0;

enum Command {
    Send(String),
    /// Drop the TCP connection without a close handshake.
    Drop,
}

struct Connection {
    session_id: String,
    commands: mpsc::UnboundedSender<Command>,
    open: Arc<AtomicBool>,
}

#[derive(Default)]
struct ProviderState {
    connections: Mutex<Vec<Connection>>,
    keepalive_queue: Mutex<VecDeque<f64>>,
    silent: AtomicBool,
    welcome_delay: Mutex<Option<Duration>>,
}

/// Minimal EventSub WebSocket endpoint. Every accepted connection gets a
/// welcome (unless silenced) and then only what the test sends it.
pub struct MockProvider {
    addr: SocketAddr,
    state: Arc<ProviderState>,
}

impl MockProvider {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ProviderState::default());
        let accept_state = state.clone();
        tokio::spawn(async move {
            let mut counter = 0usize;
            while let Ok((stream, _)) = listener.accept().await {
                counter += 1;
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                let session_id = format!("session-{counter}");
                let keepalive = lock(&accept_state.keepalive_queue)
                    .pop_front()
                    .unwrap_or(DEFAULT_KEEPALIVE_SECS);
                let (commands, mut command_rx) = mpsc::unbounded_channel();
                let open = Arc::new(AtomicBool::new(true));
                lock(&accept_state.connections).push(Connection {
                    session_id: session_id.clone(),
                    commands,
                    open: open.clone(),
                });
                let send_welcome = !accept_state.silent.load(Ordering::SeqCst);
                let welcome_delay = *lock(&accept_state.welcome_delay);

                tokio::spawn(async move {
                    let (mut sink, mut stream) = ws.split();
                    if let Some(delay) = welcome_delay {
                        sleep(delay).await;
                    }
                    if send_welcome {
                        let welcome = welcome_frame(&session_id, keepalive).to_string();
                        if sink.send(Message::Text(welcome.into())).await.is_err() {
                            open.store(false, Ordering::SeqCst);
                            return;
                        }
                    }
                    loop {
                        tokio::select! {
                            command = command_rx.recv() => match command {
                                Some(Command::Send(text)) => {
                                    if sink.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                Some(Command::Drop) | None => break,
                            },
                            incoming = stream.next() => match incoming {
                                Some(Ok(Message::Close(_))) => {
                                    let _ = sink.send(Message::Close(None)).await;
                                    break;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(_)) | None => break,
                            },
                        }
                    }
                    open.store(false, Ordering::SeqCst);
                });
            }
        });
        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Keepalive window advertised to the next accepted connection.
    pub fn queue_keepalive(&self, seconds: f64) {
        lock(&self.state.keepalive_queue).push_back(seconds);
    }

    /// Stop sending welcomes to new connections.
    pub fn silence(&self) {
        self.state.silent.store(true, Ordering::SeqCst);
    }

    /// Hold back the welcome of every later connection by `delay`.
    pub fn delay_welcomes(&self, delay: Duration) {
        *lock(&self.state.welcome_delay) = Some(delay);
    }

    pub fn connection_count(&self) -> usize {
        lock(&self.state.connections).len()
    }

    pub fn open_connections(&self) -> usize {
        lock(&self.state.connections)
            .iter()
            .filter(|c| c.open.load(Ordering::SeqCst))
            .count()
    }

    pub fn is_open(&self, index: usize) -> bool {
        lock(&self.state.connections)[index].open.load(Ordering::SeqCst)
    }

    pub fn session_id(&self, index: usize) -> String {
        lock(&self.state.connections)[index].session_id.clone()
    }

    pub async fn wait_for_connections(&self, count: usize) {
        eventually(&format!("{count} provider connections"), || {
            self.connection_count() >= count
        })
        .await;
    }

    pub fn send(&self, index: usize, frame: Value) {
        let connections = lock(&self.state.connections);
        let _ = connections[index].commands.send(Command::Send(frame.to_string()));
    }

    pub fn drop_connection(&self, index: usize) {
        let connections = lock(&self.state.connections);
        let _ = connections[index].commands.send(Command::Drop);
    }

    pub fn send_reconnect(&self, index: usize, reconnect_url: &str) {
        let session_id = self.session_id(index);
        self.send(index, reconnect_frame(&session_id, reconnect_url));
    }

    pub fn send_notification(&self, index: usize, message_id: &str, subscription: &Subscription, event: Value) {
        self.send(index, notification_frame(message_id, subscription, event));
    }

    pub fn send_revocation(&self, index: usize, subscription: &Subscription, status: &str) {
        self.send(index, revocation_frame(subscription, status));
    }
}

fn metadata(message_type: &str) -> Value {
    json!({
        "message_id": format!("{message_type}-{}", rand_suffix()),
        "message_type": message_type,
        "message_timestamp": "2024-05-01T12:00:00.000000000Z"
    })
}

fn rand_suffix() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    NEXT.fetch_add(1, Ordering::SeqCst)
}

pub fn welcome_frame(session_id: &str, keepalive_seconds: f64) -> Value {
    json!({
        "metadata": metadata("session_welcome"),
        "payload": {"session": {
            "id": session_id,
            "status": "connected",
            "connected_at": "2024-05-01T12:00:00.000000000Z",
            "keepalive_timeout_seconds": keepalive_seconds,
            "reconnect_url": null
        }}
    })
}

pub fn keepalive_frame() -> Value {
    json!({"metadata": metadata("session_keepalive"), "payload": {}})
}

pub fn reconnect_frame(session_id: &str, reconnect_url: &str) -> Value {
    json!({
        "metadata": metadata("session_reconnect"),
        "payload": {"session": {
            "id": session_id,
            "status": "reconnecting",
            "keepalive_timeout_seconds": null,
            "reconnect_url": reconnect_url,
            "connected_at": "2024-05-01T12:00:00.000000000Z"
        }}
    })
}

fn subscription_json(subscription: &Subscription, status: &str) -> Value {
    json!({
        "id": subscription.id,
        "status": status,
        "type": subscription.subscription_type,
        "version": subscription.version,
        "cost": 0,
        "condition": subscription.condition,
        "transport": {"method": "websocket", "session_id": "ignored"},
        "created_at": "2024-05-01T12:00:00.000000000Z"
    })
}

pub fn notification_frame(message_id: &str, subscription: &Subscription, event: Value) -> Value {
    json!({
        "metadata": {
            "message_id": message_id,
            "message_type": "notification",
            "message_timestamp": "2024-05-01T12:00:01.000000000Z",
            "subscription_type": subscription.subscription_type,
            "subscription_version": subscription.version
        },
        "payload": {
            "subscription": subscription_json(subscription, "enabled"),
            "event": event
        }
    })
}

pub fn revocation_frame(subscription: &Subscription, status: &str) -> Value {
    json!({
        "metadata": {
            "message_id": format!("revocation-{}", rand_suffix()),
            "message_type": "revocation",
            "message_timestamp": "2024-05-01T12:00:01.000000000Z",
            "subscription_type": subscription.subscription_type,
            "subscription_version": subscription.version
        },
        "payload": {"subscription": subscription_json(subscription, status)}
    })
}

pub fn stream_offline_event(broadcaster_id: &str) -> Value {
    json!({
        "broadcaster_user_id": broadcaster_id,
        "broadcaster_user_login": "caster",
        "broadcaster_user_name": "Caster"
    })
}

/// One recorded `create_subscription` call.
#[derive(Debug, Clone)]
pub struct CreateCall {
    pub request: SubscriptionRequest,
    pub access_token: String,
    pub assigned_id: Option<String>,
}

/// Recording stand-in for the Helix subscriptions endpoint. Assigns
/// sequential ids `live-1`, `live-2`, …
#[derive(Default)]
pub struct FakeApi {
    next_id: AtomicUsize,
    creates: Mutex<Vec<CreateCall>>,
    deletes: Mutex<Vec<String>>,
    rejected_types: Mutex<HashSet<String>>,
    fail_deletes: AtomicBool,
    create_delay: Mutex<Option<Duration>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later create for `subscription_type` answers 403.
    pub fn reject_type(&self, subscription_type: &str) {
        lock(&self.rejected_types).insert(subscription_type.to_string());
    }

    pub fn allow_all(&self) {
        lock(&self.rejected_types).clear();
    }

    /// Every later create answers only after `delay`.
    pub fn delay_creates(&self, delay: Duration) {
        *lock(&self.create_delay) = Some(delay);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn creates(&self) -> Vec<CreateCall> {
        lock(&self.creates).clone()
    }

    pub fn create_count(&self) -> usize {
        lock(&self.creates).len()
    }

    pub fn deletes(&self) -> Vec<String> {
        lock(&self.deletes).clone()
    }
}

#[async_trait]
impl SubscriptionApi for FakeApi {
    async fn create_subscription(
        &self,
        request: &SubscriptionRequest,
        access_token: &str,
    ) -> lib_eventsub::Result<Subscription> {
        let delay = *lock(&self.create_delay);
        if let Some(delay) = delay {
            sleep(delay).await;
        }
        let rejected = lock(&self.rejected_types).contains(&request.subscription_type);
        let assigned_id = (!rejected)
            .then(|| format!("live-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1));
        lock(&self.creates).push(CreateCall {
            request: request.clone(),
            access_token: access_token.to_string(),
            assigned_id: assigned_id.clone(),
        });
        match assigned_id {
            Some(id) => Ok(Subscription {
                id,
                subscription_type: request.subscription_type.clone(),
                version: request.version.clone(),
                condition: request.condition.clone(),
            }),
            None => Err(EventSubError::Api {
                status: 403,
                body: "subscription missing proper authorization".into(),
            }),
        }
    }

    async fn delete_subscription(&self, subscription_id: &str, _access_token: &str) -> lib_eventsub::Result<()> {
        lock(&self.deletes).push(subscription_id.to_string());
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(EventSubError::Http("connection reset".into()));
        }
        Ok(())
    }
}

pub fn test_config(url: &str, max_per_pool: usize) -> EventSubConfig {
    let mut config = EventSubConfig::with_client_id(CLIENT_ID);
    config.eventsub_ws_url = url.to_string();
    config.max_subscriptions_per_pool = max_per_pool;
    config.welcome_timeout = Duration::from_millis(500);
    config.keepalive_buffer = Duration::from_millis(200);
    config.close_timeout = Duration::from_millis(500);
    config
}

pub struct Harness {
    pub provider: MockProvider,
    pub api: Arc<FakeApi>,
    pub store: Arc<MemoryStore>,
    pub bus: Arc<BroadcastBus>,
    pub events: EventReceiver,
    pub registry: PoolRegistry,
    pub manager: SubscriptionManager,
}

impl Harness {
    pub async fn new(max_per_pool: usize) -> Self {
        let provider = MockProvider::start().await;
        let config = test_config(&provider.url(), max_per_pool);
        Self::with_config(provider, config, Arc::new(MemoryStore::new()))
    }

    pub fn with_config(provider: MockProvider, config: EventSubConfig, store: Arc<MemoryStore>) -> Self {
        let api = Arc::new(FakeApi::new());
        let bus = Arc::new(BroadcastBus::new());
        let events = bus.subscribe("test");
        let context = PoolContext {
            config: Arc::new(config),
            api: api.clone(),
            tokens: store.clone(),
            store: store.clone(),
            dispatcher: Arc::new(Dispatcher::new(bus.clone())),
        };
        let registry = PoolRegistry::new(context);
        let manager = SubscriptionManager::new(registry.clone());
        store.insert_token("alice", "token-alice");
        store.insert_token("bob", "token-bob");
        Self {
            provider,
            api,
            store,
            bus,
            events,
            registry,
            manager,
        }
    }

    /// Live subscriptions across all pools.
    pub fn live_count(&self) -> usize {
        self.registry
            .pools()
            .iter()
            .map(|pool| pool.subscription_count())
            .sum()
    }
}

/// Polls `check` until it holds, panicking after five seconds.
pub async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !check() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(20)).await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
