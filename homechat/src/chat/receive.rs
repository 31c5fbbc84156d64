//! Inbound methods for [`ChatState`]: push events, status receipts, history
//! loads and conversation selection.

use homechat_proto::event::{InboundEvent, StatusTarget, StatusUpdate};
use homechat_proto::message::{
    AuthoritativeMessage, ConversationId, DeliveryStatus, Message, MessageKey, TempId, Timestamp,
};

use crate::backend::BackendError;

use super::selector::{HistoryState, Selection};
use super::status::{self, Transition};
use super::store::ReconcileOutcome;
use super::{ChatEvent, ChatState, SelectError};

impl ChatState {
    /// Merge one event from the push channel.
    pub fn apply_inbound(&mut self, event: InboundEvent) {
        let conversation = event.conversation_id();
        if !self.conversations.contains(conversation) {
            tracing::debug!(
                conversation_id = %conversation,
                "push event for conversation outside the loaded list"
            );
        }
        match event {
            InboundEvent::NewMessage(message) => self.on_new_message(message),
            InboundEvent::StatusUpdate(update) => self.on_status_update(update),
        }
    }

    fn on_new_message(&mut self, incoming: AuthoritativeMessage) {
        let conversation = incoming.conversation_id;
        let temp_id = incoming.temp_id;
        let message = Message::from(incoming);

        let is_new = if let Some(temp_id) = temp_id {
            // Echo of a send carrying its idempotency token.
            let retired_at = self
                .store
                .find(conversation, &MessageKey::Pending(temp_id))
                .map(|m| m.timestamp);
            let outcome = self.store.reconcile(conversation, temp_id, message.clone());
            self.resync_preview(conversation, retired_at);
            match outcome {
                ReconcileOutcome::Upgraded => {
                    tracing::debug!(
                        conversation_id = %conversation,
                        temp_id = %temp_id,
                        "echo reconciled pending message"
                    );
                    false
                }
                ReconcileOutcome::Merged => false,
                ReconcileOutcome::Inserted => true,
            }
        } else if let Some(existing) = self.store.find(conversation, &message.key) {
            let mut merged = message.clone();
            merged.status = status::furthest(existing.status, message.status);
            self.store.upsert(conversation, merged);
            tracing::debug!(
                conversation_id = %conversation,
                key = %message.key,
                "duplicate broadcast merged"
            );
            false
        } else {
            self.store.upsert(conversation, message.clone());
            true
        };

        if is_new {
            self.note_in_list(&message);
            self.scroll_if_active(conversation);
        }
        self.notify_changed(conversation);
    }

    fn on_status_update(&mut self, update: StatusUpdate) {
        let conversation = update.conversation_id;
        match update.target {
            StatusTarget::Message { id } => {
                self.apply_status_event(conversation, MessageKey::Confirmed(id), update.status);
            }
            StatusTarget::Pending { temp_id } => {
                self.apply_status_event(conversation, MessageKey::Pending(temp_id), update.status);
            }
            StatusTarget::Conversation { up_to } => {
                self.apply_conversation_status(conversation, up_to, update.status);
            }
        }
    }

    /// Apply a delivery receipt to one message.
    ///
    /// Duplicates are no-ops and regressions are ignored with a debug log.
    /// Returns `None` if the message is not cached.
    pub fn apply_status_event(
        &mut self,
        conversation: ConversationId,
        key: MessageKey,
        requested: DeliveryStatus,
    ) -> Option<Transition> {
        let Some(current) = self.store.find(conversation, &key).map(|m| m.status) else {
            tracing::debug!(
                conversation_id = %conversation,
                key = %key,
                status = %requested,
                "status event for unknown message"
            );
            return None;
        };

        let transition = status::advance(current, requested);
        match transition {
            Transition::Applied(next) => {
                self.store.set_status(conversation, &key, next);
                self.notify_changed(conversation);
            }
            Transition::Duplicate => {}
            Transition::Rejected { from, to } => {
                tracing::debug!(
                    conversation_id = %conversation,
                    key = %key,
                    from = %from,
                    to = %to,
                    "ignoring out-of-order status event"
                );
            }
        }
        Some(transition)
    }

    /// Apply a conversation-wide receipt to every confirmed message the
    /// viewer authored at or before `up_to`. Returns how many changed.
    pub fn apply_conversation_status(
        &mut self,
        conversation: ConversationId,
        up_to: Timestamp,
        requested: DeliveryStatus,
    ) -> usize {
        let viewer = self.viewer;
        let targets = self
            .store
            .confirmed_keys_where(conversation, |m| m.sender_id == viewer && m.timestamp <= up_to);

        let mut changed = 0usize;
        for id in targets {
            let key = MessageKey::Confirmed(id);
            let Some(current) = self.store.find(conversation, &key).map(|m| m.status) else {
                continue;
            };
            if let Transition::Applied(next) = status::advance(current, requested) {
                self.store.set_status(conversation, &key, next);
                changed += 1;
            }
        }
        tracing::debug!(
            conversation_id = %conversation,
            up_to = up_to.as_millis(),
            status = %requested,
            changed,
            "conversation receipt applied"
        );
        if changed > 0 {
            self.notify_changed(conversation);
        }
        changed
    }

    /// Make a conversation active.
    ///
    /// Clears the draft, raises the scroll intent and resets the unread
    /// badge. The caller requests the history when this returns
    /// [`Selection::LoadHistory`]. Pending sends elsewhere keep running.
    ///
    /// # Errors
    ///
    /// [`SelectError::UnknownConversation`] if the conversation is not in the
    /// loaded list.
    pub fn select_conversation(
        &mut self,
        conversation: ConversationId,
    ) -> Result<Selection, SelectError> {
        if !self.conversations.contains(conversation) {
            return Err(SelectError::UnknownConversation(conversation));
        }
        let previous = self.selector.active();
        let selection = self.selector.select(conversation);
        if selection == Selection::AlreadyActive {
            return Ok(selection);
        }

        tracing::debug!(
            conversation_id = %conversation,
            selection = ?selection,
            "conversation selected"
        );
        if let Some(previous) = previous
            && !self.config.retain_inactive_threads
        {
            self.evict(previous);
        }
        if self.conversations.mark_read(conversation) {
            self.emit(ChatEvent::ConversationsUpdated);
        }
        if selection == Selection::LoadHistory {
            self.emit(ChatEvent::HistoryLoading {
                conversation_id: conversation,
            });
        }
        self.emit(ChatEvent::ScrollToBottom {
            conversation_id: conversation,
        });
        Ok(selection)
    }

    /// Merge a freshly loaded history.
    ///
    /// Ignored if the conversation was evicted while the request was in
    /// flight. Pending entries whose temp id appears on a history message are
    /// retired; other pending and failed entries are kept. Messages confirmed
    /// while the request was in flight survive even when the snapshot
    /// predates them.
    pub fn on_history_loaded(
        &mut self,
        conversation: ConversationId,
        history: Vec<AuthoritativeMessage>,
    ) {
        if self.selector.history_state(conversation) != &HistoryState::Loading {
            tracing::debug!(
                conversation_id = %conversation,
                "dropping history for a conversation no longer loading"
            );
            return;
        }

        let count = history.len();
        let retired: Vec<TempId> = history.iter().filter_map(|m| m.temp_id).collect();
        let messages: Vec<Message> = history.into_iter().map(Message::from).collect();
        let newest = messages.iter().max_by_key(|m| m.timestamp).cloned();

        self.store.merge_history(conversation, messages, &retired);
        self.selector.finish_load(conversation, Ok(()));
        tracing::debug!(conversation_id = %conversation, count, "history loaded");

        // History never counts towards the unread badge.
        if let Some(newest) = newest
            && self.conversations.note_message(&newest, self.viewer, true)
        {
            self.emit(ChatEvent::ConversationsUpdated);
        }
        self.emit(ChatEvent::HistoryLoaded {
            conversation_id: conversation,
            count,
        });
        self.notify_changed(conversation);
        self.scroll_if_active(conversation);
    }

    /// Record a failed history load. Cached threads are untouched.
    pub fn on_history_failed(&mut self, conversation: ConversationId, error: &BackendError) {
        if self.selector.history_state(conversation) != &HistoryState::Loading {
            return;
        }
        tracing::warn!(conversation_id = %conversation, error = %error, "history load failed");
        self.selector.finish_load(conversation, Err(error.to_string()));
        self.emit(ChatEvent::HistoryFailed {
            conversation_id: conversation,
            reason: error.to_string(),
        });
    }

    /// Reset a conversation's cache. In-flight sends still reconcile: their
    /// acks insert fresh entries. Returns the number of dropped messages.
    pub fn evict(&mut self, conversation: ConversationId) -> usize {
        let dropped = self.store.clear(conversation);
        self.selector.forget(conversation);
        tracing::debug!(conversation_id = %conversation, dropped, "thread evicted");
        dropped
    }
}
