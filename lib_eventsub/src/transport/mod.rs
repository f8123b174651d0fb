//! # Transport Session
//!
//! Owns one physical WebSocket connection to the provider and speaks the
//! session protocol on it:
//!
//! - `connect()` dials, spawns the read loop and waits (bounded) for
//!   `session_welcome`. A successful connect replaces, then closes, whatever
//!   connection the session held before, which is how `session_reconnect`
//!   migrations are spliced in.
//! - The read loop owns the keepalive deadline (advertised window plus a fixed
//!   buffer), answers pings, and forwards everything the owning pool must act
//!   on as [`SessionSignal`]s over the channel given at construction.
//! - `disconnect()` sends a close frame and waits for the read loop to see the
//!   close handshake through; it never leaves a read loop running.
//!
//! Every connection gets a generation number so the pool can ignore signals
//! from a connection that has already been superseded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EventSubConfig;
use crate::error::{EventSubError, Result};
use crate::models::wire::{EventSubMessage, MessageType};
use crate::utils::lock;

pub mod frames;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = Arc<AsyncMutex<SplitSink<WsStream, Message>>>;

/// Something the owning pool has to act on.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Notification(EventSubMessage),
    Revocation { subscription_id: String, status: String },
    ReconnectRequested { url: String },
    /// No keepalive or notification arrived within the advertised window plus buffer.
    KeepaliveTimeout,
    /// The connection dropped after the welcome without being asked to.
    Closed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSignal {
    pub generation: u64,
    pub event: SessionEvent,
}

pub type SignalSender = mpsc::UnboundedSender<SessionSignal>;
pub type SignalReceiver = mpsc::UnboundedReceiver<SessionSignal>;

/// How a close ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The read loop observed the close handshake in time.
    Clean,
    /// The read loop had to be aborted after the close timeout.
    Forced,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub welcome_timeout: Duration,
    pub keepalive_buffer: Duration,
    /// Keepalive window used when the welcome does not advertise one.
    pub default_keepalive: Duration,
    pub close_timeout: Duration,
}

impl From<&EventSubConfig> for SessionSettings {
    fn from(config: &EventSubConfig) -> Self {
        Self {
            welcome_timeout: config.welcome_timeout,
            keepalive_buffer: config.keepalive_buffer,
            default_keepalive: config.default_keepalive,
            close_timeout: config.close_timeout,
        }
    }
}

struct LiveConnection {
    generation: u64,
    writer: WsWriter,
    closing: Arc<AtomicBool>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

impl LiveConnection {
    async fn shutdown(mut self, close_timeout: Duration) -> CloseOutcome {
        let deadline = Instant::now() + close_timeout;
        self.closing.store(true, Ordering::SeqCst);

        let sent = timeout_at(deadline, async {
            self.writer.lock().await.send(Message::Close(None)).await
        })
        .await;
        if !matches!(sent, Ok(Ok(()))) {
            debug!(generation = self.generation, "close frame could not be sent");
        }

        match timeout_at(deadline, &mut self.reader).await {
            Ok(_) => CloseOutcome::Clean,
            Err(_) => {
                self.cancel.cancel();
                self.reader.abort();
                CloseOutcome::Forced
            }
        }
    }
}

pub struct TransportSession {
    label: String,
    settings: SessionSettings,
    signals: SignalSender,
    live: AsyncMutex<Option<LiveConnection>>,
    session_id: Mutex<Option<String>>,
    next_generation: AtomicU64,
    current_generation: AtomicU64,
}

impl TransportSession {
    /// `label` shows up in logs; `signals` receives everything the read loops report.
    pub fn new(label: &str, settings: SessionSettings, signals: SignalSender) -> Self {
        Self {
            label: label.to_string(),
            settings,
            signals,
            live: AsyncMutex::new(None),
            session_id: Mutex::new(None),
            next_generation: AtomicU64::new(0),
            current_generation: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        lock(&self.session_id).clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.session_id).is_some()
    }

    /// Generation of the connection currently in use; 0 before the first connect.
    pub fn generation(&self) -> u64 {
        self.current_generation.load(Ordering::SeqCst)
    }

    /// Dials `url` and waits for `session_welcome`. Returns the new session id.
    pub async fn connect(&self, url: &str) -> Result<String> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let welcome_timeout = self.settings.welcome_timeout;
        let deadline = Instant::now() + welcome_timeout;

        debug!(session = %self.label, generation, url, "dialing provider");
        let (stream, _) = timeout_at(deadline, connect_async(url))
            .await
            .map_err(|_| EventSubError::WelcomeTimeout(welcome_timeout))??;
        let (writer, reader) = stream.split();
        let writer: WsWriter = Arc::new(AsyncMutex::new(writer));
        let cancel = CancellationToken::new();
        let closing = Arc::new(AtomicBool::new(false));
        let (welcome_tx, welcome_rx) = oneshot::channel();

        let read_loop = ReadLoop {
            label: self.label.clone(),
            generation,
            writer: writer.clone(),
            cancel: cancel.clone(),
            closing: closing.clone(),
            signals: self.signals.clone(),
            keepalive_buffer: self.settings.keepalive_buffer,
            keepalive: self.settings.default_keepalive,
            welcome: Some(welcome_tx),
        };
        let reader_task = tokio::spawn(read_loop.run(reader));

        let session_id = match timeout_at(deadline, welcome_rx).await {
            Ok(Ok(Ok(session_id))) => session_id,
            Ok(Ok(Err(reason))) => {
                cancel.cancel();
                return Err(EventSubError::HandshakeFailed(reason));
            }
            Ok(Err(_)) => {
                cancel.cancel();
                return Err(EventSubError::HandshakeFailed(
                    "read loop ended before welcome".into(),
                ));
            }
            Err(_) => {
                cancel.cancel();
                warn!(session = %self.label, ?welcome_timeout, "no welcome from provider");
                return Err(EventSubError::WelcomeTimeout(welcome_timeout));
            }
        };

        let previous = {
            let mut live = self.live.lock().await;
            self.current_generation.store(generation, Ordering::SeqCst);
            *lock(&self.session_id) = Some(session_id.clone());
            live.replace(LiveConnection {
                generation,
                writer,
                closing,
                cancel,
                reader: reader_task,
            })
        };
        info!(session = %self.label, generation, session_id = %session_id, "session established");

        if let Some(old) = previous {
            let close_timeout = self.settings.close_timeout;
            let label = self.label.clone();
            tokio::spawn(async move {
                let old_generation = old.generation;
                let outcome = old.shutdown(close_timeout).await;
                debug!(session = %label, generation = old_generation, ?outcome, "superseded connection closed");
            });
        }
        Ok(session_id)
    }

    /// Gracefully closes the live connection.
    pub async fn disconnect(&self) -> Result<CloseOutcome> {
        let live = self
            .live
            .lock()
            .await
            .take()
            .ok_or(EventSubError::NotConnected)?;
        lock(&self.session_id).take();
        let generation = live.generation;
        let outcome = live.shutdown(self.settings.close_timeout).await;
        info!(session = %self.label, generation, ?outcome, "session disconnected");
        Ok(outcome)
    }
}

enum Flow {
    Continue,
    Stop(String),
}

struct ReadLoop {
    label: String,
    generation: u64,
    writer: WsWriter,
    cancel: CancellationToken,
    closing: Arc<AtomicBool>,
    signals: SignalSender,
    keepalive_buffer: Duration,
    keepalive: Duration,
    welcome: Option<oneshot::Sender<std::result::Result<String, String>>>,
}

impl ReadLoop {
    async fn run(mut self, mut reader: SplitStream<WsStream>) {
        let mut deadline: Option<Instant> = None;
        let mut close_reason: Option<String> = None;
        let cancel = self.cancel.clone();

        let reason = loop {
            let keepalive = async move {
                match deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = keepalive => {
                    if !self.closing.load(Ordering::SeqCst) {
                        warn!(session = %self.label, generation = self.generation, "keepalive window elapsed");
                        self.emit(SessionEvent::KeepaliveTimeout);
                    }
                    return;
                }
                frame = reader.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Flow::Stop(reason) = self.handle_text(text.as_str(), &mut deadline) {
                            break reason;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = self.writer.lock().await.send(Message::Pong(payload)).await {
                            debug!(session = %self.label, error = %e, "failed to answer ping");
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        close_reason = Some(match frame {
                            Some(frame) => format!(
                                "closed by provider ({}: {})",
                                u16::from(frame.code),
                                frame.reason.as_str()
                            ),
                            None => "closed by provider".to_string(),
                        });
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("read error: {e}"),
                    None => break close_reason.take().unwrap_or_else(|| "stream ended".to_string()),
                }
            }
        };
        self.finish(reason);
    }

    fn handle_text(&mut self, text: &str, deadline: &mut Option<Instant>) -> Flow {
        let message: EventSubMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) if self.welcome.is_some() => {
                return Flow::Stop(format!("malformed frame before welcome: {e}"));
            }
            Err(e) => {
                warn!(session = %self.label, error = %e, "dropping malformed frame");
                return Flow::Continue;
            }
        };

        match message.message_type() {
            MessageType::SessionWelcome => {
                if self.welcome.is_none() {
                    debug!(session = %self.label, "ignoring repeated welcome");
                    return Flow::Continue;
                }
                let welcome = match frames::parse_welcome(&message, self.keepalive) {
                    Ok(welcome) => welcome,
                    Err(e) => return Flow::Stop(e.to_string()),
                };
                self.keepalive = welcome.keepalive;
                match self.next_deadline() {
                    Some(at) => *deadline = Some(at),
                    None => return Flow::Stop("keepalive window out of range".into()),
                }
                if let Some(tx) = self.welcome.take() {
                    let _ = tx.send(Ok(welcome.session_id));
                }
            }
            _ if self.welcome.is_some() => {
                debug!(session = %self.label, kind = %message.metadata.message_type, "ignoring frame before welcome");
            }
            MessageType::SessionKeepalive => {
                *deadline = self.next_deadline().or(*deadline);
            }
            MessageType::Notification => {
                *deadline = self.next_deadline().or(*deadline);
                self.emit(SessionEvent::Notification(message));
            }
            MessageType::SessionReconnect => match frames::parse_reconnect_url(&message) {
                Ok(url) => {
                    info!(session = %self.label, generation = self.generation, "provider requested reconnect");
                    self.emit(SessionEvent::ReconnectRequested { url });
                }
                Err(e) => warn!(session = %self.label, error = %e, "dropping reconnect frame"),
            },
            MessageType::Revocation => match frames::parse_revocation(&message) {
                Ok(revocation) => self.emit(SessionEvent::Revocation {
                    subscription_id: revocation.subscription_id,
                    status: revocation.status,
                }),
                Err(e) => warn!(session = %self.label, error = %e, "dropping revocation frame"),
            },
            MessageType::Other(kind) => {
                debug!(session = %self.label, kind = %kind, "ignoring unknown frame type");
            }
        }
        Flow::Continue
    }

    fn next_deadline(&self) -> Option<Instant> {
        Instant::now()
            .checked_add(self.keepalive)?
            .checked_add(self.keepalive_buffer)
    }

    fn finish(mut self, reason: String) {
        if let Some(tx) = self.welcome.take() {
            let _ = tx.send(Err(reason));
            return;
        }
        if self.closing.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
            debug!(session = %self.label, generation = self.generation, "read loop finished after close");
            return;
        }
        warn!(session = %self.label, generation = self.generation, reason = %reason, "connection lost");
        self.emit(SessionEvent::Closed { reason });
    }

    fn emit(&self, event: SessionEvent) {
        // The pool may already be gone; nothing left to tell.
        let _ = self.signals.send(SessionSignal {
            generation: self.generation,
            event,
        });
    }
}
