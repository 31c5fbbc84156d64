//! Chat core for `HomeChat`.
//!
//! [`ChatState`] is a single-writer reducer over the message store, the
//! conversation list and the selector. Every input (user action, send
//! completion, push event, history load) is a synchronous method call that
//! mutates the state and queues [`ChatEvent`]s for the view. The async
//! driver lives in [`session`].
//!
//! Methods are split by concern:
//! - `send.rs`: optimistic send, ack reconciliation, failure, retry, discard
//! - `receive.rs`: push events, status receipts, history, selection

pub mod conversations;
pub mod render;
mod receive;
pub mod selector;
mod send;
pub mod session;
pub mod status;
pub mod store;

use homechat_proto::conversation::Conversation;
use homechat_proto::message::{
    ConversationId, DEFAULT_MAX_MESSAGE_LEN, DeliveryStatus, Message, TempId, Timestamp, UserId,
    ValidationError,
};

use crate::backend::ConnectionStatus;

use conversations::ConversationList;
use selector::ConversationSelector;
use store::MessageStore;

/// Errors from composing a new message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComposeError {
    /// The text is empty or too long.
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// The conversation is not in the loaded list.
    #[error("conversation {0} is not loaded")]
    UnknownConversation(ConversationId),

    /// The composer is disabled while the transport is down.
    #[error("cannot send while offline")]
    Offline,

    /// No conversation is selected.
    #[error("no active conversation")]
    NoActiveConversation,
}

/// Errors from retrying a failed message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryError {
    /// No pending message with this temp id.
    #[error("no pending message {0}")]
    NotFound(TempId),

    /// Only failed messages can be retried.
    #[error("message {temp_id} is {status}, not failed")]
    NotFailed {
        /// The message.
        temp_id: TempId,
        /// Its current status.
        status: DeliveryStatus,
    },

    /// The composer is disabled while the transport is down.
    #[error("cannot retry while offline")]
    Offline,
}

/// Errors from discarding a failed message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscardError {
    /// No pending message with this temp id.
    #[error("no pending message {0}")]
    NotFound(TempId),

    /// Only failed messages can be discarded.
    #[error("message {temp_id} is {status}, not failed")]
    NotFailed {
        /// The message.
        temp_id: TempId,
        /// Its current status.
        status: DeliveryStatus,
    },
}

/// Errors from selecting a conversation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    /// The conversation is not in the loaded list.
    #[error("conversation {0} is not loaded")]
    UnknownConversation(ConversationId),
}

/// Behaviour knobs for the chat core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatConfig {
    /// Maximum message length in characters, after trimming.
    pub max_message_len: usize,
    /// Keep the cached thread of a conversation when switching away.
    pub retain_inactive_threads: bool,
    /// Capacity of the UI event channel.
    pub event_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
            retain_inactive_threads: true,
            event_buffer: 64,
        }
    }
}

/// Notifications for the view layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The thread of a conversation changed.
    MessagesChanged {
        /// The conversation.
        conversation_id: ConversationId,
        /// Whether it is on screen.
        active: bool,
    },
    /// The active thread should scroll to its newest message.
    ScrollToBottom {
        /// The active conversation.
        conversation_id: ConversationId,
    },
    /// A send failed; the message stays in the thread with a retry affordance.
    SendFailed {
        /// The conversation.
        conversation_id: ConversationId,
        /// The failed message.
        temp_id: TempId,
        /// Collaborator's reason.
        reason: String,
        /// Whether the failure was transient (timeout, dropped connection),
        /// so the view can offer an immediate retry.
        retryable: bool,
    },
    /// A history request started.
    HistoryLoading {
        /// The conversation.
        conversation_id: ConversationId,
    },
    /// A history request completed and was merged.
    HistoryLoaded {
        /// The conversation.
        conversation_id: ConversationId,
        /// Number of authoritative messages received.
        count: usize,
    },
    /// A history request failed.
    HistoryFailed {
        /// The conversation.
        conversation_id: ConversationId,
        /// Collaborator's reason.
        reason: String,
    },
    /// Preview, unread badge or ordering of the conversation list changed.
    ConversationsUpdated,
    /// The transport's connection signal changed.
    ConnectionChanged(ConnectionStatus),
}

/// A send the driver must hand to the collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundSend {
    /// Target conversation.
    pub conversation_id: ConversationId,
    /// Idempotency token, also the pending message's key.
    pub temp_id: TempId,
    /// Trimmed message text.
    pub text: String,
}

/// Chat state of one signed-in viewer.
#[derive(Debug)]
pub struct ChatState {
    viewer: UserId,
    config: ChatConfig,
    store: MessageStore,
    conversations: ConversationList,
    selector: ConversationSelector,
    connection: ConnectionStatus,
    outbox: Vec<ChatEvent>,
}

impl ChatState {
    /// Creates an empty state for `viewer`. The connection starts down until
    /// the transport reports otherwise.
    #[must_use]
    pub fn new(viewer: UserId, config: ChatConfig) -> Self {
        Self {
            viewer,
            config,
            store: MessageStore::new(),
            conversations: ConversationList::new(),
            selector: ConversationSelector::new(),
            connection: ConnectionStatus::default(),
            outbox: Vec::new(),
        }
    }

    /// The signed-in user.
    #[must_use]
    pub const fn viewer(&self) -> UserId {
        self.viewer
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Ordered messages of a conversation, oldest first.
    #[must_use]
    pub fn messages(&self, conversation: ConversationId) -> &[Message] {
        self.store.get_messages(conversation)
    }

    /// The message cache.
    #[must_use]
    pub const fn store(&self) -> &MessageStore {
        &self.store
    }

    /// The conversation list.
    #[must_use]
    pub const fn conversations(&self) -> &ConversationList {
        &self.conversations
    }

    /// The selector (active conversation, draft, history states).
    #[must_use]
    pub const fn selector(&self) -> &ConversationSelector {
        &self.selector
    }

    /// The active conversation.
    #[must_use]
    pub const fn active(&self) -> Option<ConversationId> {
        self.selector.active()
    }

    /// Last known connection signal.
    #[must_use]
    pub const fn connection(&self) -> ConnectionStatus {
        self.connection
    }

    /// Replace the conversation list.
    pub fn load_conversations(&mut self, conversations: Vec<Conversation>) {
        tracing::debug!(count = conversations.len(), "conversation list loaded");
        self.conversations.load(conversations);
        self.emit(ChatEvent::ConversationsUpdated);
    }

    /// Record a connection signal change.
    pub fn set_connection(&mut self, status: ConnectionStatus) {
        if self.connection == status {
            return;
        }
        tracing::info!(connection = %status, "connection status changed");
        self.connection = status;
        self.emit(ChatEvent::ConnectionChanged(status));
    }

    /// Replace the composer text.
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.selector.set_draft(text);
    }

    /// Consume the scroll-to-bottom intent of the active thread.
    pub const fn take_scroll_intent(&mut self) -> bool {
        self.selector.take_scroll_intent()
    }

    /// Drain queued view notifications, oldest first.
    pub fn take_events(&mut self) -> Vec<ChatEvent> {
        std::mem::take(&mut self.outbox)
    }

    fn emit(&mut self, event: ChatEvent) {
        self.outbox.push(event);
    }

    fn notify_changed(&mut self, conversation: ConversationId) {
        let active = self.selector.is_active(conversation);
        self.emit(ChatEvent::MessagesChanged {
            conversation_id: conversation,
            active,
        });
    }

    fn scroll_if_active(&mut self, conversation: ConversationId) {
        if self.selector.is_active(conversation) {
            self.selector.request_scroll();
            self.emit(ChatEvent::ScrollToBottom {
                conversation_id: conversation,
            });
        }
    }

    fn note_in_list(&mut self, message: &Message) {
        let active = self.selector.is_active(message.conversation_id);
        if self.conversations.note_message(message, self.viewer, active) {
            self.emit(ChatEvent::ConversationsUpdated);
        }
    }

    /// After a pending entry stamped `retired_at` gave way to its
    /// authoritative copy, move the preview to the newest cached message.
    fn resync_preview(&mut self, conversation: ConversationId, retired_at: Option<Timestamp>) {
        let Some(retired_at) = retired_at else {
            return;
        };
        let Some(newest) = self.store.get_messages(conversation).last() else {
            return;
        };
        if self
            .conversations
            .replace_preview(conversation, retired_at, newest)
        {
            self.emit(ChatEvent::ConversationsUpdated);
        }
    }
}
