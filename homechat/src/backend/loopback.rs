//! In-memory collaborator for tests and demos.
//!
//! [`LoopbackBackend`] plays the server and the push channel in one
//! process: it assigns server ids and timestamps, honours the temp id as an
//! idempotency token, and broadcasts new messages to the subscriber. Tests
//! can script failures, hold sends to release them later (in any order), and
//! flip the connection signal.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

use homechat_proto::codec::{self, CodecError};
use homechat_proto::conversation::Conversation;
use homechat_proto::event::{InboundEvent, StatusTarget, StatusUpdate};
use homechat_proto::message::{
    AuthoritativeMessage, ConversationId, DeliveryStatus, ServerMessageId, TempId, Timestamp,
    UserId,
};

use super::{BackendError, ChatBackend, ConnectionStatus};

/// Step applied to the manual server clock for every stamped message.
const CLOCK_STEP_MS: u64 = 1000;

/// A send call as observed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRecord {
    /// Target conversation.
    pub conversation: ConversationId,
    /// Text as received.
    pub text: String,
    /// Idempotency token.
    pub temp_id: TempId,
}

/// A send parked until the test releases or fails it.
struct HeldSend {
    conversation: ConversationId,
    text: String,
    temp_id: TempId,
    reply: oneshot::Sender<Result<AuthoritativeMessage, BackendError>>,
}

struct LoopbackState {
    conversations: Vec<Conversation>,
    messages: HashMap<ConversationId, Vec<AuthoritativeMessage>>,
    next_id: u64,
    /// Manual server clock in ms; `None` uses the wall clock.
    clock: Option<u64>,
    send_failures: VecDeque<BackendError>,
    history_failures: HashMap<ConversationId, BackendError>,
    hold_sends: bool,
    held: Vec<HeldSend>,
    echo_sends: bool,
    subscriber: Option<mpsc::Sender<InboundEvent>>,
    send_log: Vec<SendRecord>,
}

impl LoopbackState {
    fn next_timestamp(&mut self) -> Timestamp {
        match self.clock.as_mut() {
            Some(ms) => {
                let now = *ms;
                *ms += CLOCK_STEP_MS;
                Timestamp::from_millis(now)
            }
            None => Timestamp::now(),
        }
    }

    fn has_conversation(&self, id: ConversationId) -> bool {
        self.conversations.iter().any(|c| c.id == id)
    }

    fn find_by_temp_id(&self, id: ConversationId, temp_id: TempId) -> Option<&AuthoritativeMessage> {
        self.messages
            .get(&id)?
            .iter()
            .find(|m| m.temp_id == Some(temp_id))
    }

    /// Store a message, update the conversation preview and return it.
    fn commit(
        &mut self,
        conversation: ConversationId,
        sender: UserId,
        text: String,
        temp_id: Option<TempId>,
        timestamp: Option<Timestamp>,
    ) -> AuthoritativeMessage {
        let timestamp = timestamp.unwrap_or_else(|| self.next_timestamp());
        let msg = AuthoritativeMessage {
            id: ServerMessageId::new(self.next_id),
            conversation_id: conversation,
            sender_id: sender,
            text,
            timestamp,
            status: DeliveryStatus::Sent,
            temp_id,
        };
        self.next_id += 1;

        let thread = self.messages.entry(conversation).or_default();
        let idx = thread.partition_point(|m| m.timestamp <= timestamp);
        thread.insert(idx, msg.clone());

        if let Some(conv) = self.conversations.iter_mut().find(|c| c.id == conversation)
            && conv.last_message_at.is_none_or(|last| last <= timestamp)
        {
            conv.last_message = Some(msg.text.clone());
            conv.last_message_at = Some(timestamp);
        }
        msg
    }

    fn broadcast(&mut self, event: InboundEvent) -> bool {
        let Some(tx) = self.subscriber.as_ref() else {
            return false;
        };
        match tx.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "loopback push dropped");
                false
            }
        }
    }
}

/// In-memory [`ChatBackend`] acting as server and push channel.
pub struct LoopbackBackend {
    viewer: UserId,
    event_buffer: usize,
    state: Mutex<LoopbackState>,
    connection: watch::Sender<ConnectionStatus>,
}

impl LoopbackBackend {
    /// Create an empty backend for `viewer`, connected, with no conversations.
    #[must_use]
    pub fn new(viewer: UserId) -> Self {
        let (connection, _) = watch::channel(ConnectionStatus::CONNECTED);
        Self {
            viewer,
            event_buffer: 64,
            state: Mutex::new(LoopbackState {
                conversations: Vec::new(),
                messages: HashMap::new(),
                next_id: 1,
                clock: None,
                send_failures: VecDeque::new(),
                history_failures: HashMap::new(),
                hold_sends: false,
                held: Vec::new(),
                echo_sends: false,
                subscriber: None,
                send_log: Vec::new(),
            }),
            connection,
        }
    }

    /// Add a conversation the viewer participates in.
    #[must_use]
    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.state.get_mut().conversations.push(conversation);
        self
    }

    /// Use a manual server clock starting at `start_ms`; each stamped
    /// message advances it by one second.
    #[must_use]
    pub fn with_clock(mut self, start_ms: u64) -> Self {
        self.state.get_mut().clock = Some(start_ms);
        self
    }

    /// Broadcast the viewer's own sends back on the push channel.
    #[must_use]
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.state.get_mut().echo_sends = echo;
        self
    }

    /// Capacity of the push channel handed out by [`subscribe`](ChatBackend::subscribe).
    #[must_use]
    pub fn with_event_buffer(mut self, buffer: usize) -> Self {
        self.event_buffer = buffer;
        self
    }

    /// Store a message in history without broadcasting it.
    pub fn seed_message(
        &self,
        conversation: ConversationId,
        sender: UserId,
        text: &str,
    ) -> AuthoritativeMessage {
        self.state
            .lock()
            .commit(conversation, sender, text.to_string(), None, None)
    }

    /// Store a message from the conversation's participant and push it.
    ///
    /// Returns `None` if the conversation is unknown.
    pub fn push_incoming(&self, conversation: ConversationId, text: &str) -> Option<AuthoritativeMessage> {
        let mut state = self.state.lock();
        let sender = state
            .conversations
            .iter()
            .find(|c| c.id == conversation)?
            .participant
            .user_id;
        let msg = state.commit(conversation, sender, text.to_string(), None, None);
        state.broadcast(InboundEvent::NewMessage(msg.clone()));
        Some(msg)
    }

    /// Push an arbitrary event to the subscriber. Returns `false` if there is
    /// no live subscriber.
    pub fn push_event(&self, event: InboundEvent) -> bool {
        self.state.lock().broadcast(event)
    }

    /// Decode a raw push-channel frame and push it to the subscriber.
    ///
    /// Malformed frames are logged and dropped; the session never sees them.
    ///
    /// # Errors
    ///
    /// Returns the [`CodecError`] for frames that do not decode.
    pub fn push_frame(&self, frame: &str) -> Result<bool, CodecError> {
        match codec::decode_event(frame) {
            Ok(event) => Ok(self.push_event(event)),
            Err(e) => {
                tracing::warn!(error = %e, len = frame.len(), "dropping malformed push frame");
                Err(e)
            }
        }
    }

    /// Mark the viewer's messages up to `up_to` as read and push a
    /// conversation-wide receipt.
    pub fn mark_read(&self, conversation: ConversationId, up_to: Timestamp) -> bool {
        let mut state = self.state.lock();
        let viewer = self.viewer;
        if let Some(thread) = state.messages.get_mut(&conversation) {
            for msg in thread
                .iter_mut()
                .filter(|m| m.sender_id == viewer && m.timestamp <= up_to)
            {
                msg.status = DeliveryStatus::Read;
            }
        }
        state.broadcast(InboundEvent::StatusUpdate(StatusUpdate {
            conversation_id: conversation,
            target: StatusTarget::Conversation { up_to },
            status: DeliveryStatus::Read,
        }))
    }

    /// Make the next send fail with `error`. Failures queue up in order.
    pub fn fail_next_send(&self, error: BackendError) {
        self.state.lock().send_failures.push_back(error);
    }

    /// Make the next history load of `conversation` fail with `error`.
    pub fn fail_next_history(&self, conversation: ConversationId, error: BackendError) {
        self.state.lock().history_failures.insert(conversation, error);
    }

    /// Park subsequent sends until released with [`release_send`](Self::release_send).
    pub fn set_hold_sends(&self, hold: bool) {
        self.state.lock().hold_sends = hold;
    }

    /// Number of sends currently parked.
    pub fn held_count(&self) -> usize {
        self.state.lock().held.len()
    }

    /// Complete a parked send, stamping it with the server clock.
    pub fn release_send(&self, temp_id: TempId) -> Option<AuthoritativeMessage> {
        self.complete_held(temp_id, None)
    }

    /// Complete a parked send with an explicit server timestamp.
    pub fn release_send_at(
        &self,
        temp_id: TempId,
        timestamp: Timestamp,
    ) -> Option<AuthoritativeMessage> {
        self.complete_held(temp_id, Some(timestamp))
    }

    /// Fail a parked send. Returns `false` if no send with `temp_id` is parked.
    pub fn fail_held_send(&self, temp_id: TempId, error: BackendError) -> bool {
        let mut state = self.state.lock();
        let Some(pos) = state.held.iter().position(|h| h.temp_id == temp_id) else {
            return false;
        };
        let held = state.held.remove(pos);
        let _ = held.reply.send(Err(error));
        true
    }

    /// Publish a new connection status.
    pub fn set_connection(&self, status: ConnectionStatus) {
        self.connection.send_replace(status);
    }

    /// Every send call received so far, in order.
    pub fn sent(&self) -> Vec<SendRecord> {
        self.state.lock().send_log.clone()
    }

    /// Snapshot of a conversation's stored messages, oldest first.
    pub fn messages(&self, conversation: ConversationId) -> Vec<AuthoritativeMessage> {
        self.state
            .lock()
            .messages
            .get(&conversation)
            .cloned()
            .unwrap_or_default()
    }

    fn complete_held(
        &self,
        temp_id: TempId,
        timestamp: Option<Timestamp>,
    ) -> Option<AuthoritativeMessage> {
        let mut state = self.state.lock();
        let pos = state.held.iter().position(|h| h.temp_id == temp_id)?;
        let held = state.held.remove(pos);
        let msg = state.commit(
            held.conversation,
            self.viewer,
            held.text,
            Some(held.temp_id),
            timestamp,
        );
        if state.echo_sends {
            state.broadcast(InboundEvent::NewMessage(msg.clone()));
        }
        let _ = held.reply.send(Ok(msg.clone()));
        Some(msg)
    }
}

impl ChatBackend for LoopbackBackend {
    async fn list_conversations(&self, viewer: UserId) -> Result<Vec<Conversation>, BackendError> {
        if viewer != self.viewer {
            return Err(BackendError::Rejected(format!("unknown viewer {viewer}")));
        }
        let mut conversations = self.state.lock().conversations.clone();
        conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(conversations)
    }

    async fn list_messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<AuthoritativeMessage>, BackendError> {
        let mut state = self.state.lock();
        if let Some(err) = state.history_failures.remove(&conversation) {
            return Err(err);
        }
        if !state.has_conversation(conversation) {
            return Err(BackendError::ConversationNotFound(conversation));
        }
        Ok(state.messages.get(&conversation).cloned().unwrap_or_default())
    }

    async fn send(
        &self,
        conversation: ConversationId,
        text: String,
        temp_id: TempId,
    ) -> Result<AuthoritativeMessage, BackendError> {
        let reply = {
            let mut state = self.state.lock();
            state.send_log.push(SendRecord {
                conversation,
                text: text.clone(),
                temp_id,
            });
            if !self.connection.borrow().is_connected {
                return Err(BackendError::Disconnected);
            }
            if !state.has_conversation(conversation) {
                return Err(BackendError::ConversationNotFound(conversation));
            }
            if let Some(err) = state.send_failures.pop_front() {
                return Err(err);
            }
            if let Some(existing) = state.find_by_temp_id(conversation, temp_id) {
                tracing::debug!(%temp_id, "loopback send deduplicated by temp id");
                return Ok(existing.clone());
            }
            if !state.hold_sends {
                let msg = state.commit(conversation, self.viewer, text, Some(temp_id), None);
                if state.echo_sends {
                    state.broadcast(InboundEvent::NewMessage(msg.clone()));
                }
                return Ok(msg);
            }
            let (tx, rx) = oneshot::channel();
            state.held.push(HeldSend {
                conversation,
                text,
                temp_id,
                reply: tx,
            });
            rx
        };
        reply.await.unwrap_or(Err(BackendError::Disconnected))
    }

    fn subscribe(&self, viewer: UserId) -> Result<mpsc::Receiver<InboundEvent>, BackendError> {
        if viewer != self.viewer {
            return Err(BackendError::Rejected(format!("unknown viewer {viewer}")));
        }
        let mut state = self.state.lock();
        if state.subscriber.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return Err(BackendError::AlreadySubscribed);
        }
        let (tx, rx) = mpsc::channel(self.event_buffer);
        state.subscriber = Some(tx);
        Ok(rx)
    }

    fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.subscribe()
    }
}
