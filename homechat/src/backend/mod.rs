//! Collaborator boundary for the chat core.
//!
//! Defines the [`ChatBackend`] trait through which the core lists
//! conversations, loads history, sends messages and subscribes to the push
//! channel. The core never sees HTTP, sockets or auth; it consumes
//! already-deserialized values.
//!
//! Implementations:
//! - [`loopback::LoopbackBackend`]: in-memory collaborator for tests and demos

pub mod loopback;

use std::future::Future;

use tokio::sync::{mpsc, watch};

use homechat_proto::conversation::Conversation;
use homechat_proto::event::InboundEvent;
use homechat_proto::message::{AuthoritativeMessage, ConversationId, TempId, UserId};

/// Connection signal from the real-time transport.
///
/// Only used to gate the composer; reconnection is the transport's business.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    /// The push channel is up.
    pub is_connected: bool,
    /// The transport is (re)establishing the channel.
    pub is_connecting: bool,
}

impl ConnectionStatus {
    /// Fully connected.
    pub const CONNECTED: Self = Self {
        is_connected: true,
        is_connecting: false,
    };

    /// Disconnected and not trying.
    pub const DISCONNECTED: Self = Self {
        is_connected: false,
        is_connecting: false,
    };

    /// Reconnect in progress.
    pub const CONNECTING: Self = Self {
        is_connected: false,
        is_connecting: true,
    };
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.is_connected, self.is_connecting) {
            (true, _) => f.write_str("connected"),
            (false, true) => f.write_str("connecting"),
            (false, false) => f.write_str("disconnected"),
        }
    }
}

/// Errors reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// The collaborator gave up waiting (its own timeout policy).
    #[error("request timed out")]
    Timeout,

    /// The server refused the request.
    #[error("rejected by server: {0}")]
    Rejected(String),

    /// The transport is not connected.
    #[error("transport disconnected")]
    Disconnected,

    /// The conversation does not exist or is not visible to the viewer.
    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),

    /// The push channel was already subscribed for this session.
    #[error("push channel already subscribed")]
    AlreadySubscribed,
}

impl BackendError {
    /// Whether a user retry has a chance of succeeding.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Disconnected)
    }
}

/// Async collaborator interface consumed by the chat core.
///
/// All methods must be cancel-safe from the caller's point of view: a
/// dropped future leaves no partial state visible to the core.
pub trait ChatBackend: Send + Sync + 'static {
    /// List the conversations the viewer participates in.
    fn list_conversations(
        &self,
        viewer: UserId,
    ) -> impl Future<Output = Result<Vec<Conversation>, BackendError>> + Send;

    /// Load the authoritative history of a conversation, oldest first.
    fn list_messages(
        &self,
        conversation: ConversationId,
    ) -> impl Future<Output = Result<Vec<AuthoritativeMessage>, BackendError>> + Send;

    /// Send a message. `temp_id` is the idempotency token: repeating a send
    /// with the same token must not create a second message, and the token
    /// is carried on the returned payload and on the matching broadcast.
    fn send(
        &self,
        conversation: ConversationId,
        text: String,
        temp_id: TempId,
    ) -> impl Future<Output = Result<AuthoritativeMessage, BackendError>> + Send;

    /// Subscribe to push events for the viewer. Called once per session.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::AlreadySubscribed`] if a live subscription
    /// exists, or [`BackendError::Disconnected`] if the channel is down.
    fn subscribe(&self, viewer: UserId) -> Result<mpsc::Receiver<InboundEvent>, BackendError>;

    /// Watch the transport's connection signal.
    fn connection_status(&self) -> watch::Receiver<ConnectionStatus>;
}
