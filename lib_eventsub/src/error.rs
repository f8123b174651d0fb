//! # Error Taxonomy
//!
//! Every fallible operation in the crate returns [`EventSubError`]. The
//! collaborator seams carry their own narrower types ([`StoreError`],
//! [`TokenError`]) which convert into it with `?`, and the notification
//! decoders report [`DecodeError`] naming the exact field that failed.

use thiserror::Error;

use crate::pool::PoolStatus;

/// Crate-wide result alias.
pub type Result<T, E = EventSubError> = std::result::Result<T, E>;

/// Errors surfaced by sessions, pools, the registry and the manager.
#[derive(Debug, Error)]
pub enum EventSubError {
    /// `disconnect()` or a write was attempted without a live connection.
    #[error("transport session is not connected")]
    NotConnected,

    /// The pool already holds (or has reserved) its maximum number of subscriptions.
    #[error("pool {pool_id} is full ({capacity} subscriptions)")]
    PoolFull { pool_id: String, capacity: usize },

    /// The pool is not in a state that accepts subscriptions.
    #[error("pool {pool_id} is not accepting subscriptions (status {status})")]
    PoolUnavailable { pool_id: String, status: PoolStatus },

    /// `close()` was called on a pool that is already terminal.
    #[error("pool {pool_id} is already {status}")]
    AlreadyClosed { pool_id: String, status: PoolStatus },

    /// A live or pending subscription already exists for the same type and broadcaster.
    #[error("already subscribed to {subscription_type} for broadcaster {broadcaster_user_id}")]
    AlreadySubscribed {
        subscription_type: String,
        broadcaster_user_id: String,
    },

    #[error("subscription record {0} not found")]
    RecordNotFound(String),

    /// No pool holds a live subscription with this provider id.
    #[error("live subscription {0} not found")]
    SubscriptionNotFound(String),

    #[error("no session_welcome received within {0:?}")]
    WelcomeTimeout(std::time::Duration),

    /// The connection ended or misbehaved before a welcome was delivered.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A provider frame could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(String),

    /// The provider answered with a non-2xx status.
    #[error("provider rejected request with status {status}: {body}")]
    Api { status: u16, body: String },

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EventSubError {
    /// Capacity or status races that a caller should answer by asking the
    /// registry for another pool.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            EventSubError::PoolFull { .. } | EventSubError::PoolUnavailable { .. }
        )
    }

    /// The provider or a pool reported that the subscription does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EventSubError::SubscriptionNotFound(_) | EventSubError::Api { status: 404, .. }
        )
    }
}

/// Failures decoding an untyped notification payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing field `{field}`")]
    MissingField { field: String },

    #[error("field `{field}` is not a {expected}")]
    WrongType { field: String, expected: &'static str },

    #[error("no decoder registered for subscription type `{subscription_type}`")]
    UnsupportedType { subscription_type: String },
}

impl DecodeError {
    /// Name of the field the error is about, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            DecodeError::MissingField { field } | DecodeError::WrongType { field, .. } => {
                Some(field)
            }
            DecodeError::UnsupportedType { .. } => None,
        }
    }
}

/// Storage collaborator failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to store: {0}")]
    Connection(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("record is corrupt: {0}")]
    Corrupt(String),
}

/// Token collaborator failures.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("no access token for authorizer {0}")]
    Missing(String),
    #[error("token refresh failed for authorizer {authorizer_id}: {reason}")]
    Refresh { authorizer_id: String, reason: String },
}
