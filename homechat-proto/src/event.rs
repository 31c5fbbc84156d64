//! Events pushed by the real-time channel.
//!
//! Frames look like `{"type": "new_message", "payload": {...}}`; see
//! [`codec`](crate::codec) for decoding.

use serde::{Deserialize, Serialize};

use crate::message::{
    AuthoritativeMessage, ConversationId, DeliveryStatus, ServerMessageId, TempId, Timestamp,
};

/// An event delivered by the push channel for a conversation the viewer is in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A message was created, by the counter-party or as the echo of our own send.
    NewMessage(AuthoritativeMessage),
    /// Delivery or read receipt.
    StatusUpdate(StatusUpdate),
}

impl InboundEvent {
    /// The conversation this event belongs to.
    #[must_use]
    pub const fn conversation_id(&self) -> ConversationId {
        match self {
            Self::NewMessage(msg) => msg.conversation_id,
            Self::StatusUpdate(update) => update.conversation_id,
        }
    }
}

/// A status receipt for one message or for a whole conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    /// Conversation the receipt applies to.
    pub conversation_id: ConversationId,
    /// Which message(s) the receipt covers.
    pub target: StatusTarget,
    /// The reported status.
    pub status: DeliveryStatus,
}

/// What a [`StatusUpdate`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum StatusTarget {
    /// A confirmed message.
    Message {
        /// Server id of the message.
        id: ServerMessageId,
    },
    /// A message still known to the sender by its pending token.
    Pending {
        /// Token issued with the send.
        temp_id: TempId,
    },
    /// Every message authored by the viewer up to a point in time
    /// (mark-all-read).
    Conversation {
        /// Inclusive upper bound on message timestamps.
        up_to: Timestamp,
    },
}
