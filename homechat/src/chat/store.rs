//! Client-side message cache.
//!
//! [`MessageStore`] keeps one ordered thread per conversation. Ordering is
//! by creation timestamp, non-decreasing; a message inserted with a
//! timestamp equal to existing ones goes after them. Every mutation keeps
//! the thread sorted, so reads never observe a partially ordered list.
//!
//! The store is single-writer: it is owned by the chat state and mutated
//! through `&mut self` only.

use std::collections::HashMap;

use homechat_proto::message::{
    ConversationId, DeliveryStatus, Message, MessageKey, ServerMessageId, TempId,
};

use super::status;

/// What [`MessageStore::reconcile`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The pending entry was upgraded in place to the confirmed message.
    Upgraded,
    /// The confirmed message was already present (e.g. via the push echo);
    /// the pending entry, if any, was dropped and statuses merged.
    Merged,
    /// Neither entry existed; the confirmed message was inserted fresh.
    Inserted,
}

/// Ordered messages of one conversation.
#[derive(Debug, Default, Clone)]
struct Thread {
    messages: Vec<Message>,
}

impl Thread {
    fn position(&self, key: &MessageKey) -> Option<usize> {
        self.messages.iter().position(|m| m.key == *key)
    }

    /// Insert after every message with an earlier or equal timestamp.
    fn insert_sorted(&mut self, message: Message) {
        let idx = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(idx, message);
    }

    /// Replace the entry at `idx`, keeping its position when the new
    /// timestamp still fits between its neighbours.
    fn replace_at(&mut self, idx: usize, message: Message) {
        let fits_before = idx == 0 || self.messages[idx - 1].timestamp <= message.timestamp;
        let fits_after = self
            .messages
            .get(idx + 1)
            .is_none_or(|next| message.timestamp <= next.timestamp);
        if fits_before && fits_after {
            self.messages[idx] = message;
        } else {
            self.messages.remove(idx);
            self.insert_sorted(message);
        }
    }
}

/// Per-conversation ordered message cache.
#[derive(Debug, Default, Clone)]
pub struct MessageStore {
    threads: HashMap<ConversationId, Thread>,
}

impl MessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages of a conversation, oldest first. Empty if none are cached.
    #[must_use]
    pub fn get_messages(&self, conversation: ConversationId) -> &[Message] {
        self.threads
            .get(&conversation)
            .map(|t| t.messages.as_slice())
            .unwrap_or_default()
    }

    /// Look up a message by key.
    #[must_use]
    pub fn find(&self, conversation: ConversationId, key: &MessageKey) -> Option<&Message> {
        let thread = self.threads.get(&conversation)?;
        thread.position(key).map(|idx| &thread.messages[idx])
    }

    /// Insert or replace a message, keyed by server id if confirmed, else by
    /// temp id.
    pub fn upsert(&mut self, conversation: ConversationId, message: Message) {
        let thread = self.threads.entry(conversation).or_default();
        match thread.position(&message.key) {
            Some(idx) => thread.replace_at(idx, message),
            None => thread.insert_sorted(message),
        }
    }

    /// Retire the pending entry `temp_id` in favour of `confirmed`.
    ///
    /// Exactly one entry for the logical message remains afterwards. The
    /// resulting status is never behind what the pending entry or an
    /// already present confirmed copy had.
    pub fn reconcile(
        &mut self,
        conversation: ConversationId,
        temp_id: TempId,
        confirmed: Message,
    ) -> ReconcileOutcome {
        let thread = self.threads.entry(conversation).or_default();
        let pending_idx = thread.position(&MessageKey::Pending(temp_id));
        let confirmed_idx = thread.position(&confirmed.key);

        match (pending_idx, confirmed_idx) {
            (Some(p), None) => {
                let mut upgraded = confirmed;
                upgraded.status = status::reconciled(thread.messages[p].status, upgraded.status);
                thread.replace_at(p, upgraded);
                ReconcileOutcome::Upgraded
            }
            (pending, Some(c)) => {
                let mut merged = confirmed;
                merged.status = status::furthest(thread.messages[c].status, merged.status);
                if let Some(p) = pending {
                    merged.status = status::reconciled(thread.messages[p].status, merged.status);
                }
                thread.replace_at(c, merged);
                if pending.is_some()
                    && let Some(p) = thread.position(&MessageKey::Pending(temp_id))
                {
                    thread.messages.remove(p);
                }
                ReconcileOutcome::Merged
            }
            (None, None) => {
                thread.insert_sorted(confirmed);
                ReconcileOutcome::Inserted
            }
        }
    }

    /// Remove a pending message. Returns it if it existed.
    pub fn remove(&mut self, conversation: ConversationId, temp_id: TempId) -> Option<Message> {
        let thread = self.threads.get_mut(&conversation)?;
        let idx = thread.position(&MessageKey::Pending(temp_id))?;
        Some(thread.messages.remove(idx))
    }

    /// Overwrite the status of a message. Returns the previous status.
    ///
    /// Callers decide whether the change is allowed (see [`status`]).
    pub fn set_status(
        &mut self,
        conversation: ConversationId,
        key: &MessageKey,
        new_status: DeliveryStatus,
    ) -> Option<DeliveryStatus> {
        let thread = self.threads.get_mut(&conversation)?;
        let idx = thread.position(key)?;
        Some(std::mem::replace(
            &mut thread.messages[idx].status,
            new_status,
        ))
    }

    /// Keys of confirmed messages matching `filter`, oldest first.
    pub fn confirmed_keys_where(
        &self,
        conversation: ConversationId,
        mut filter: impl FnMut(&Message) -> bool,
    ) -> Vec<ServerMessageId> {
        self.get_messages(conversation)
            .iter()
            .filter(|m| filter(m))
            .filter_map(Message::server_id)
            .collect()
    }

    /// Drop the cached thread entirely (store reset).
    pub fn clear(&mut self, conversation: ConversationId) -> usize {
        self.threads
            .remove(&conversation)
            .map_or(0, |t| t.messages.len())
    }

    /// Merge a freshly loaded history into a thread.
    ///
    /// The history is a snapshot: confirmed entries it does not list (acked
    /// or pushed after the snapshot was taken) are kept, as are pending and
    /// failed entries, except those whose temp id is listed in `retired`
    /// (the history already holds their confirmed copy). Entries collapse by
    /// server id and statuses never regress.
    pub fn merge_history(
        &mut self,
        conversation: ConversationId,
        history: Vec<Message>,
        retired: &[TempId],
    ) {
        let thread = self.threads.entry(conversation).or_default();
        let before = thread.messages.len();
        thread
            .messages
            .retain(|m| m.temp_id().is_none_or(|temp| !retired.contains(&temp)));
        let retired_count = before - thread.messages.len();

        for msg in history {
            match thread.position(&msg.key) {
                Some(idx) => {
                    let mut merged = msg;
                    merged.status = status::furthest(thread.messages[idx].status, merged.status);
                    thread.replace_at(idx, merged);
                }
                None => thread.insert_sorted(msg),
            }
        }

        if retired_count > 0 {
            tracing::debug!(
                conversation_id = %conversation,
                retired = retired_count,
                "pending messages confirmed by history reload"
            );
        }
    }
}
