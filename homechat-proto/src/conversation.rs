//! Conversation summaries as listed by the collaborator API.

use serde::{Deserialize, Serialize};

use crate::message::{ConversationId, Timestamp, UserId};

/// The counter-party of a conversation, seen from the viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Platform user id.
    pub user_id: UserId,
    /// Display name (provider business name or customer name).
    pub name: String,
    /// Optional avatar image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// A conversation as shown in the sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Conversation id.
    pub id: ConversationId,
    /// The other side of the conversation.
    pub participant: Participant,
    /// Preview of the newest message.
    #[serde(default)]
    pub last_message: Option<String>,
    /// Timestamp of the newest message.
    #[serde(default)]
    pub last_message_at: Option<Timestamp>,
    /// Messages from the participant the viewer has not read.
    #[serde(default)]
    pub unread: u32,
}

impl Conversation {
    /// Creates an empty conversation with the given participant.
    #[must_use]
    pub const fn new(id: ConversationId, participant: Participant) -> Self {
        Self {
            id,
            participant,
            last_message: None,
            last_message_at: None,
            unread: 0,
        }
    }
}
