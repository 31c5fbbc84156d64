//! Optimistic send methods for [`ChatState`].
//!
//! A send is split in two halves. [`ChatState::begin_send`] validates the
//! text, inserts a pending message with status `Sending` and returns the
//! [`OutboundSend`] the driver hands to the collaborator, exactly once. The
//! collaborator's answer comes back later through
//! [`ChatState::on_send_ack`] or [`ChatState::on_send_failed`].

use homechat_proto::message::{
    AuthoritativeMessage, ConversationId, DeliveryStatus, Message, MessageKey, TempId, Timestamp,
    validate_text,
};

use crate::backend::BackendError;

use super::status::{self, Transition};
use super::store::ReconcileOutcome;
use super::{ChatEvent, ChatState, ComposeError, DiscardError, OutboundSend, RetryError};

impl ChatState {
    /// Whether the composer is enabled.
    #[must_use]
    pub const fn can_send(&self) -> bool {
        self.connection.is_connected && self.selector.active().is_some()
    }

    /// Start an optimistic send.
    ///
    /// On success the pending message is already in the store when this
    /// returns, and the caller must issue exactly one collaborator send for
    /// the returned [`OutboundSend`].
    ///
    /// # Errors
    ///
    /// Returns [`ComposeError`] if the transport is down, the conversation is
    /// not loaded, or the text is empty or too long. Nothing is inserted.
    pub fn begin_send(
        &mut self,
        conversation: ConversationId,
        text: &str,
        now: Timestamp,
    ) -> Result<OutboundSend, ComposeError> {
        if !self.connection.is_connected {
            return Err(ComposeError::Offline);
        }
        if !self.conversations.contains(conversation) {
            return Err(ComposeError::UnknownConversation(conversation));
        }
        let text = validate_text(text, self.config.max_message_len)?.to_owned();

        let temp_id = TempId::new();
        let message = Message::pending(temp_id, conversation, self.viewer, text.clone(), now);
        self.note_in_list(&message);
        self.store.upsert(conversation, message);

        tracing::debug!(
            conversation_id = %conversation,
            temp_id = %temp_id,
            "optimistic message inserted"
        );
        self.notify_changed(conversation);
        self.scroll_if_active(conversation);

        Ok(OutboundSend {
            conversation_id: conversation,
            temp_id,
            text,
        })
    }

    /// Send the composer draft to the active conversation.
    ///
    /// The draft is cleared only when the optimistic insert succeeded.
    ///
    /// # Errors
    ///
    /// [`ComposeError::NoActiveConversation`] if nothing is selected, else as
    /// [`begin_send`](Self::begin_send).
    pub fn submit_draft(&mut self, now: Timestamp) -> Result<OutboundSend, ComposeError> {
        let conversation = self
            .selector
            .active()
            .ok_or(ComposeError::NoActiveConversation)?;
        let draft = self.selector.draft().to_owned();
        let outbound = self.begin_send(conversation, &draft, now)?;
        self.selector.clear_draft();
        Ok(outbound)
    }

    /// Reconcile a pending message with the collaborator's acknowledgement.
    ///
    /// If the pending entry is gone (thread evicted, or the echo already
    /// replaced it), the authoritative message is inserted unless a copy
    /// with the same server id is present. Either way exactly one entry
    /// remains.
    pub fn on_send_ack(&mut self, temp_id: TempId, ack: AuthoritativeMessage) -> ReconcileOutcome {
        let conversation = ack.conversation_id;
        let confirmed = Message::from(ack);
        let retired_at = self
            .store
            .find(conversation, &MessageKey::Pending(temp_id))
            .map(|m| m.timestamp);
        let outcome = self.store.reconcile(conversation, temp_id, confirmed.clone());

        match outcome {
            ReconcileOutcome::Upgraded => {
                tracing::debug!(
                    conversation_id = %conversation,
                    temp_id = %temp_id,
                    key = %confirmed.key,
                    "send acknowledged"
                );
            }
            ReconcileOutcome::Merged => {
                tracing::debug!(
                    conversation_id = %conversation,
                    temp_id = %temp_id,
                    key = %confirmed.key,
                    "ack for message already confirmed"
                );
            }
            ReconcileOutcome::Inserted => {
                tracing::debug!(
                    conversation_id = %conversation,
                    temp_id = %temp_id,
                    key = %confirmed.key,
                    "ack for unknown temp id, inserted as new"
                );
                self.note_in_list(&confirmed);
            }
        }
        self.resync_preview(conversation, retired_at);
        self.notify_changed(conversation);
        outcome
    }

    /// Mark a pending message as failed after the collaborator gave up.
    ///
    /// The message stays in the store with a retry affordance. A failure
    /// for a message that was already confirmed (for instance by the push
    /// echo) is ignored.
    pub fn on_send_failed(
        &mut self,
        conversation: ConversationId,
        temp_id: TempId,
        error: &BackendError,
    ) {
        let key = MessageKey::Pending(temp_id);
        let Some(current) = self.store.find(conversation, &key).map(|m| m.status) else {
            tracing::debug!(
                conversation_id = %conversation,
                temp_id = %temp_id,
                error = %error,
                "send failed for message no longer cached"
            );
            return;
        };

        match status::advance(current, DeliveryStatus::Failed) {
            Transition::Applied(next) => {
                self.store.set_status(conversation, &key, next);
                tracing::warn!(
                    conversation_id = %conversation,
                    temp_id = %temp_id,
                    error = %error,
                    "send failed"
                );
                self.emit(ChatEvent::SendFailed {
                    conversation_id: conversation,
                    temp_id,
                    reason: error.to_string(),
                    retryable: error.is_transient(),
                });
                self.notify_changed(conversation);
            }
            Transition::Duplicate | Transition::Rejected { .. } => {
                tracing::debug!(
                    conversation_id = %conversation,
                    temp_id = %temp_id,
                    status = %current,
                    "ignoring failure for message past sending"
                );
            }
        }
    }

    /// Put a failed message back to `Sending` for a new attempt with the
    /// same temp id.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError`] if offline, if the message is unknown, or if it
    /// is not failed.
    pub fn begin_retry(
        &mut self,
        conversation: ConversationId,
        temp_id: TempId,
    ) -> Result<OutboundSend, RetryError> {
        if !self.connection.is_connected {
            return Err(RetryError::Offline);
        }
        let key = MessageKey::Pending(temp_id);
        let (current, text) = self
            .store
            .find(conversation, &key)
            .map(|m| (m.status, m.text.clone()))
            .ok_or(RetryError::NotFound(temp_id))?;

        let Transition::Applied(next) = status::retry(current) else {
            return Err(RetryError::NotFailed {
                temp_id,
                status: current,
            });
        };
        self.store.set_status(conversation, &key, next);
        tracing::debug!(
            conversation_id = %conversation,
            temp_id = %temp_id,
            "retrying failed message"
        );
        self.notify_changed(conversation);

        Ok(OutboundSend {
            conversation_id: conversation,
            temp_id,
            text,
        })
    }

    /// Drop a failed message the user dismissed.
    ///
    /// # Errors
    ///
    /// Returns [`DiscardError`] if the message is unknown or not failed.
    pub fn discard(
        &mut self,
        conversation: ConversationId,
        temp_id: TempId,
    ) -> Result<Message, DiscardError> {
        let current = self
            .store
            .find(conversation, &MessageKey::Pending(temp_id))
            .map(|m| m.status)
            .ok_or(DiscardError::NotFound(temp_id))?;
        if current != DeliveryStatus::Failed {
            return Err(DiscardError::NotFailed {
                temp_id,
                status: current,
            });
        }
        let removed = self
            .store
            .remove(conversation, temp_id)
            .ok_or(DiscardError::NotFound(temp_id))?;
        tracing::debug!(
            conversation_id = %conversation,
            temp_id = %temp_id,
            "discarded failed message"
        );
        self.notify_changed(conversation);
        Ok(removed)
    }
}
