//! Async driver tying [`ChatState`] to a [`ChatBackend`].
//!
//! A [`ChatSession`] lives from login to logout. It owns the state, the push
//! subscription and the in-flight collaborator calls. User actions are
//! synchronous: they mutate the state at once (optimistic insert) and spawn
//! the collaborator call onto a [`JoinSet`]. Completions, push events and
//! connection changes are applied one at a time by
//! [`process_next`](ChatSession::process_next), so the state is never
//! observed mid-mutation. View notifications go out on an mpsc channel.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};

use homechat_proto::event::InboundEvent;
use homechat_proto::message::{
    AuthoritativeMessage, ConversationId, Message, TempId, Timestamp, UserId,
};

use crate::backend::{BackendError, ChatBackend, ConnectionStatus};

use super::render::{RenderOptions, Row, render_thread};
use super::selector::Selection;
use super::{
    ChatConfig, ChatEvent, ChatState, ComposeError, DiscardError, OutboundSend, RetryError,
    SelectError,
};

/// Rounds without progress before [`ChatSession::run_until_idle`] stops.
const IDLE_ROUNDS: usize = 3;

/// Errors that prevent a session from starting.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The conversation list could not be fetched.
    #[error("failed to list conversations: {0}")]
    Conversations(#[source] BackendError),

    /// The push channel could not be subscribed.
    #[error("failed to subscribe to push channel: {0}")]
    Subscribe(#[source] BackendError),
}

/// Who is signed in. Passed explicitly instead of read from global state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// The signed-in user.
    pub viewer: UserId,
    /// Name shown in logs.
    pub display_name: String,
}

/// Result of a collaborator call spawned by the session.
#[derive(Debug)]
enum Completion {
    Sent {
        conversation: ConversationId,
        temp_id: TempId,
        result: Result<AuthoritativeMessage, BackendError>,
    },
    History {
        conversation: ConversationId,
        result: Result<Vec<AuthoritativeMessage>, BackendError>,
    },
}

/// One signed-in chat session.
pub struct ChatSession<B: ChatBackend> {
    context: SessionContext,
    backend: Arc<B>,
    state: ChatState,
    render_options: RenderOptions,
    tasks: JoinSet<Completion>,
    inbound: Option<mpsc::Receiver<InboundEvent>>,
    connection: Option<watch::Receiver<ConnectionStatus>>,
    event_tx: mpsc::Sender<ChatEvent>,
}

impl<B: ChatBackend> ChatSession<B> {
    /// Start a session: read the connection signal, fetch the conversation
    /// list and subscribe to the push channel once.
    ///
    /// Returns the session and the receiver for view notifications.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the list or the subscription fails.
    pub async fn init(
        context: SessionContext,
        backend: Arc<B>,
        config: ChatConfig,
        render_options: RenderOptions,
    ) -> Result<(Self, mpsc::Receiver<ChatEvent>), SessionError> {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
        let mut state = ChatState::new(context.viewer, config);

        let mut connection = backend.connection_status();
        state.set_connection(*connection.borrow_and_update());

        let conversations = backend
            .list_conversations(context.viewer)
            .await
            .map_err(SessionError::Conversations)?;
        let count = conversations.len();
        state.load_conversations(conversations);

        let inbound = backend
            .subscribe(context.viewer)
            .map_err(SessionError::Subscribe)?;

        tracing::info!(
            viewer = %context.viewer,
            name = %context.display_name,
            conversations = count,
            "chat session started"
        );

        let mut session = Self {
            context,
            backend,
            state,
            render_options,
            tasks: JoinSet::new(),
            inbound: Some(inbound),
            connection: Some(connection),
            event_tx,
        };
        session.flush_events();
        Ok((session, event_rx))
    }

    /// End the session. In-flight calls are aborted; their outcome is left
    /// to the collaborator's idempotency.
    pub async fn teardown(mut self) {
        let in_flight = self.tasks.len();
        self.tasks.shutdown().await;
        self.inbound = None;
        tracing::info!(
            viewer = %self.context.viewer,
            in_flight,
            "chat session closed"
        );
    }

    /// The signed-in user.
    #[must_use]
    pub const fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Current chat state.
    #[must_use]
    pub const fn state(&self) -> &ChatState {
        &self.state
    }

    /// Ordered messages of a conversation.
    #[must_use]
    pub fn messages(&self, conversation: ConversationId) -> &[Message] {
        self.state.messages(conversation)
    }

    /// Display rows of a conversation.
    #[must_use]
    pub fn render(&self, conversation: ConversationId) -> Vec<Row> {
        render_thread(
            self.state.messages(conversation),
            self.state.viewer(),
            &self.render_options,
        )
    }

    /// Whether the composer is enabled.
    #[must_use]
    pub const fn can_send(&self) -> bool {
        self.state.can_send()
    }

    /// Number of collaborator calls still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Send `text` to `conversation`. The pending message is in the store
    /// when this returns; the collaborator call runs in the background.
    ///
    /// # Errors
    ///
    /// See [`ChatState::begin_send`].
    pub fn send_message(
        &mut self,
        conversation: ConversationId,
        text: &str,
    ) -> Result<TempId, ComposeError> {
        let result = self.state.begin_send(conversation, text, Timestamp::now());
        self.finish_compose(result)
    }

    /// Send the composer draft to the active conversation.
    ///
    /// # Errors
    ///
    /// See [`ChatState::submit_draft`].
    pub fn submit_draft(&mut self) -> Result<TempId, ComposeError> {
        let result = self.state.submit_draft(Timestamp::now());
        self.finish_compose(result)
    }

    /// Replace the composer text.
    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.state.set_draft(text);
    }

    /// Retry a failed message with its original temp id.
    ///
    /// # Errors
    ///
    /// See [`ChatState::begin_retry`].
    pub fn retry(&mut self, conversation: ConversationId, temp_id: TempId) -> Result<(), RetryError> {
        let outbound = self.state.begin_retry(conversation, temp_id)?;
        self.spawn_send(outbound);
        self.flush_events();
        Ok(())
    }

    /// Drop a failed message.
    ///
    /// # Errors
    ///
    /// See [`ChatState::discard`].
    pub fn discard(
        &mut self,
        conversation: ConversationId,
        temp_id: TempId,
    ) -> Result<Message, DiscardError> {
        let removed = self.state.discard(conversation, temp_id);
        self.flush_events();
        removed
    }

    /// Make a conversation active, loading its history if needed.
    ///
    /// # Errors
    ///
    /// See [`ChatState::select_conversation`].
    pub fn select_conversation(
        &mut self,
        conversation: ConversationId,
    ) -> Result<Selection, SelectError> {
        let selection = self.state.select_conversation(conversation)?;
        if selection == Selection::LoadHistory {
            let backend = Arc::clone(&self.backend);
            self.tasks.spawn(async move {
                let result = backend.list_messages(conversation).await;
                Completion::History {
                    conversation,
                    result,
                }
            });
        }
        self.flush_events();
        Ok(selection)
    }

    /// Reset a conversation's cached thread.
    pub fn evict(&mut self, conversation: ConversationId) -> usize {
        let dropped = self.state.evict(conversation);
        self.flush_events();
        dropped
    }

    /// Wait for the next completion, push event or connection change and
    /// apply it.
    ///
    /// Returns `false` once there is nothing left that could ever arrive:
    /// no calls in flight and both the push channel and the connection
    /// signal closed.
    pub async fn process_next(&mut self) -> bool {
        let has_tasks = !self.tasks.is_empty();
        tokio::select! {
            Some(joined) = self.tasks.join_next(), if has_tasks => {
                self.on_joined(joined);
            }
            event = recv_inbound(&mut self.inbound), if self.inbound.is_some() => {
                match event {
                    Some(event) => self.state.apply_inbound(event),
                    None => {
                        tracing::warn!("push channel closed");
                        self.inbound = None;
                    }
                }
            }
            changed = changed_connection(&mut self.connection), if self.connection.is_some() => {
                match changed {
                    Some(status) => self.state.set_connection(status),
                    None => {
                        tracing::debug!("connection signal closed");
                        self.connection = None;
                    }
                }
            }
            else => return false,
        }
        self.flush_events();
        true
    }

    /// Apply everything that is ready, yielding to the runtime between
    /// rounds so spawned calls can finish, until a few rounds in a row make
    /// no progress. Calls the collaborator is holding stay in flight.
    pub async fn run_until_idle(&mut self) {
        let mut idle = 0;
        while idle < IDLE_ROUNDS {
            if self.drain_ready() {
                idle = 0;
            } else {
                idle += 1;
                tokio::task::yield_now().await;
            }
        }
    }

    fn drain_ready(&mut self) -> bool {
        let mut progressed = false;

        while let Some(joined) = self.tasks.try_join_next() {
            self.on_joined(joined);
            progressed = true;
        }

        if let Some(rx) = self.inbound.as_mut() {
            loop {
                match rx.try_recv() {
                    Ok(event) => {
                        self.state.apply_inbound(event);
                        progressed = true;
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        tracing::warn!("push channel closed");
                        self.inbound = None;
                        break;
                    }
                }
            }
        }

        if let Some(rx) = self.connection.as_mut() {
            match rx.has_changed() {
                Ok(true) => {
                    let status = *rx.borrow_and_update();
                    self.state.set_connection(status);
                    progressed = true;
                }
                Ok(false) => {}
                Err(_) => {
                    tracing::debug!("connection signal closed");
                    self.connection = None;
                }
            }
        }

        self.flush_events();
        progressed
    }

    fn finish_compose(
        &mut self,
        result: Result<OutboundSend, ComposeError>,
    ) -> Result<TempId, ComposeError> {
        let outcome = result.map(|outbound| {
            let temp_id = outbound.temp_id;
            self.spawn_send(outbound);
            temp_id
        });
        self.flush_events();
        outcome
    }

    fn spawn_send(&mut self, outbound: OutboundSend) {
        let backend = Arc::clone(&self.backend);
        let OutboundSend {
            conversation_id,
            temp_id,
            text,
        } = outbound;
        self.tasks.spawn(async move {
            let result = backend.send(conversation_id, text, temp_id).await;
            Completion::Sent {
                conversation: conversation_id,
                temp_id,
                result,
            }
        });
    }

    fn on_joined(&mut self, joined: Result<Completion, JoinError>) {
        match joined {
            Ok(Completion::Sent {
                temp_id,
                result: Ok(ack),
                ..
            }) => {
                self.state.on_send_ack(temp_id, ack);
            }
            Ok(Completion::Sent {
                conversation,
                temp_id,
                result: Err(e),
            }) => {
                self.state.on_send_failed(conversation, temp_id, &e);
            }
            Ok(Completion::History {
                conversation,
                result: Ok(history),
            }) => {
                self.state.on_history_loaded(conversation, history);
            }
            Ok(Completion::History {
                conversation,
                result: Err(e),
            }) => {
                self.state.on_history_failed(conversation, &e);
            }
            Err(e) => {
                tracing::warn!(error = %e, "collaborator call did not complete");
            }
        }
    }

    fn flush_events(&mut self) {
        for event in self.state.take_events() {
            if let Err(e) = self.event_tx.try_send(event) {
                tracing::debug!(error = %e, "view event dropped");
            }
        }
    }
}

async fn recv_inbound(inbound: &mut Option<mpsc::Receiver<InboundEvent>>) -> Option<InboundEvent> {
    match inbound.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn changed_connection(
    connection: &mut Option<watch::Receiver<ConnectionStatus>>,
) -> Option<ConnectionStatus> {
    let rx = connection.as_mut()?;
    match rx.changed().await {
        Ok(()) => Some(*rx.borrow_and_update()),
        Err(_) => None,
    }
}
