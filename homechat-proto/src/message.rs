//! Message model shared between the chat core and its collaborators.
//!
//! A [`Message`] is identified by exactly one [`MessageKey`]: a server id once
//! the collaborator has confirmed it, or a client-generated [`TempId`] while it
//! is still pending. The [`DeliveryStatus`] progression is encoded here so that
//! every layer agrees on what "forward" means.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default maximum message length, in characters.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 2000;

/// Identifies a conversation between a customer and a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(u64);

impl ConversationId {
    /// Creates a conversation identifier from its integer value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the integer value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned, authoritative message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerMessageId(u64);

impl ServerMessageId {
    /// Creates a server message identifier from its integer value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the integer value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ServerMessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a platform user (customer or provider).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    /// Creates a user identifier from its integer value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the integer value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Client-generated token correlating a pending send with its acknowledgement.
///
/// Based on UUID v7, so tokens are unique for the lifetime of the process and
/// sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TempId(Uuid);

impl TempId {
    /// Creates a fresh, time-ordered temporary identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TempId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Identity of a message: confirmed by the server, or still pending locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKey {
    /// Authoritative server id.
    Confirmed(ServerMessageId),
    /// Client token of an optimistic send that has not been acknowledged.
    Pending(TempId),
}

impl std::fmt::Display for MessageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Confirmed(id) => write!(f, "#{id}"),
            Self::Pending(temp) => write!(f, "~{temp}"),
        }
    }
}

/// Delivery lifecycle of a message.
///
/// `Sending < Sent < Delivered < Read` is the forward progression. `Failed`
/// sits outside it: it can only follow `Sending`, and only an explicit retry
/// leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Optimistically shown, transport send in flight.
    Sending,
    /// Accepted by the server.
    Sent,
    /// Delivered to the counter-party's device.
    Delivered,
    /// Read by the counter-party.
    Read,
    /// The transport reported a failure. Retryable or discardable.
    Failed,
}

impl DeliveryStatus {
    /// Position in the forward progression, `None` for [`Failed`](Self::Failed).
    #[must_use]
    pub const fn rank(self) -> Option<u8> {
        match self {
            Self::Sending => Some(0),
            Self::Sent => Some(1),
            Self::Delivered => Some(2),
            Self::Read => Some(3),
            Self::Failed => None,
        }
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Message payload as returned by the collaborator API or push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthoritativeMessage {
    /// Server-assigned id.
    pub id: ServerMessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Text content.
    pub text: String,
    /// Canonical creation time.
    pub timestamp: Timestamp,
    /// Server-side delivery status.
    #[serde(default = "default_server_status")]
    pub status: DeliveryStatus,
    /// Idempotency token of the send that produced this message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<TempId>,
}

const fn default_server_status() -> DeliveryStatus {
    DeliveryStatus::Sent
}

/// A message as held in the client cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Server id or pending token.
    pub key: MessageKey,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Text content.
    pub text: String,
    /// Creation time: local clock while pending, server clock once confirmed.
    pub timestamp: Timestamp,
    /// Current delivery status.
    pub status: DeliveryStatus,
}

impl Message {
    /// Builds a pending message in the `Sending` state.
    #[must_use]
    pub const fn pending(
        temp_id: TempId,
        conversation_id: ConversationId,
        sender_id: UserId,
        text: String,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            key: MessageKey::Pending(temp_id),
            conversation_id,
            sender_id,
            text,
            timestamp,
            status: DeliveryStatus::Sending,
        }
    }

    /// Returns the pending token, if this message is not yet confirmed.
    #[must_use]
    pub const fn temp_id(&self) -> Option<TempId> {
        match self.key {
            MessageKey::Pending(temp) => Some(temp),
            MessageKey::Confirmed(_) => None,
        }
    }

    /// Returns the server id, if this message is confirmed.
    #[must_use]
    pub const fn server_id(&self) -> Option<ServerMessageId> {
        match self.key {
            MessageKey::Confirmed(id) => Some(id),
            MessageKey::Pending(_) => None,
        }
    }

    /// Returns `true` while the message is keyed by a [`TempId`].
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.key, MessageKey::Pending(_))
    }
}

impl From<AuthoritativeMessage> for Message {
    fn from(msg: AuthoritativeMessage) -> Self {
        Self {
            key: MessageKey::Confirmed(msg.id),
            conversation_id: msg.conversation_id,
            sender_id: msg.sender_id,
            text: msg.text,
            timestamp: msg.timestamp,
            status: msg.status,
        }
    }
}

/// Error returned when composed text cannot be sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Text is empty after trimming whitespace.
    #[error("message text is empty")]
    Empty,
    /// Text exceeds the configured length bound.
    #[error("message too long ({len} characters, max {max})")]
    TooLong {
        /// Length of the trimmed text in characters.
        len: usize,
        /// Maximum allowed length in characters.
        max: usize,
    },
}

/// Validates composed text and returns the trimmed form that will be sent.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] if nothing but whitespace remains, or
/// [`ValidationError::TooLong`] if the trimmed text has more than `max_len`
/// characters.
pub fn validate_text(text: &str, max_len: usize) -> Result<&str, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    let len = trimmed.chars().count();
    if len > max_len {
        return Err(ValidationError::TooLong { len, max: max_len });
    }
    Ok(trimmed)
}
