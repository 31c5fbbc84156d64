//! Sidebar conversation list with preview and unread badges.

use homechat_proto::conversation::Conversation;
use homechat_proto::message::{ConversationId, Message, Timestamp, UserId};

/// Conversations of the viewer, newest activity first.
#[derive(Debug, Default, Clone)]
pub struct ConversationList {
    items: Vec<Conversation>,
}

impl ConversationList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with what the collaborator returned.
    pub fn load(&mut self, conversations: Vec<Conversation>) {
        self.items = conversations;
        self.sort();
    }

    /// All conversations, newest activity first.
    #[must_use]
    pub fn iter(&self) -> std::slice::Iter<'_, Conversation> {
        self.items.iter()
    }

    /// Number of conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up a conversation.
    #[must_use]
    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.items.iter().find(|c| c.id == id)
    }

    /// Whether the conversation is loaded.
    #[must_use]
    pub fn contains(&self, id: ConversationId) -> bool {
        self.get(id).is_some()
    }

    /// Account for a newly merged message.
    ///
    /// Updates the preview when the message is the newest seen, and bumps
    /// the unread badge for counter-party messages while the conversation is
    /// not on screen. Returns `true` if anything changed.
    pub fn note_message(&mut self, message: &Message, viewer: UserId, active: bool) -> bool {
        let Some(conv) = self
            .items
            .iter_mut()
            .find(|c| c.id == message.conversation_id)
        else {
            return false;
        };

        let mut changed = false;
        if conv
            .last_message_at
            .is_none_or(|last| last <= message.timestamp)
        {
            conv.last_message = Some(message.text.clone());
            conv.last_message_at = Some(message.timestamp);
            changed = true;
        }
        if message.sender_id != viewer && !active {
            conv.unread = conv.unread.saturating_add(1);
            changed = true;
        }
        if changed {
            self.sort();
        }
        changed
    }

    /// Re-point a preview that still shows a retired pending message.
    ///
    /// The authoritative copy of a send carries the server's timestamp, so
    /// the preview moves to `newest`, the newest cached message of the
    /// conversation. Previews showing anything else are left alone.
    pub fn replace_preview(
        &mut self,
        id: ConversationId,
        retired_at: Timestamp,
        newest: &Message,
    ) -> bool {
        let Some(conv) = self.items.iter_mut().find(|c| c.id == id) else {
            return false;
        };
        if conv.last_message_at != Some(retired_at) {
            return false;
        }
        if conv.last_message_at == Some(newest.timestamp)
            && conv.last_message.as_deref() == Some(newest.text.as_str())
        {
            return false;
        }
        conv.last_message = Some(newest.text.clone());
        conv.last_message_at = Some(newest.timestamp);
        self.sort();
        true
    }

    /// Clear the unread badge. Returns `true` if it was non-zero.
    pub fn mark_read(&mut self, id: ConversationId) -> bool {
        match self.items.iter_mut().find(|c| c.id == id) {
            Some(conv) if conv.unread > 0 => {
                conv.unread = 0;
                true
            }
            _ => false,
        }
    }

    fn sort(&mut self) {
        self.items
            .sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    }
}
