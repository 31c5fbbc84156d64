//! Integration tests for the optimistic send path.
//!
//! Drives a [`ChatSession`] against the in-memory backend and checks:
//! 1. The pending message is visible before the collaborator answers.
//! 2. Exactly one collaborator send per user action, no implicit retries.
//! 3. Acks replace the pending entry; no duplicate remains.
//! 4. Failure keeps the message, retry reuses its temp id.
//! 5. A late ack after the thread was reset inserts the message once.
//! 6. Display order follows server timestamps, whatever the ack order.

use std::sync::Arc;

use homechat::backend::loopback::LoopbackBackend;
use homechat::backend::{BackendError, ConnectionStatus};
use homechat::chat::render::RenderOptions;
use homechat::chat::selector::Selection;
use homechat::chat::session::{ChatSession, SessionContext};
use homechat::chat::store::ReconcileOutcome;
use homechat::chat::{ChatConfig, ChatEvent, ChatState, ComposeError};
use homechat_proto::conversation::{Conversation, Participant};
use homechat_proto::message::{
    AuthoritativeMessage, ConversationId, DeliveryStatus, MessageKey, ServerMessageId, Timestamp,
    UserId,
};
use tokio::sync::mpsc;

const VIEWER: UserId = UserId::new(1);
const PLUMBER: ConversationId = ConversationId::new(7);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn plumber() -> Conversation {
    Conversation::new(
        PLUMBER,
        Participant {
            user_id: UserId::new(100),
            name: "Pat's Plumbing".into(),
            avatar_url: None,
        },
    )
}

fn backend() -> Arc<LoopbackBackend> {
    Arc::new(
        LoopbackBackend::new(VIEWER)
            .with_clock(1_000)
            .with_conversation(plumber()),
    )
}

async fn start(
    backend: &Arc<LoopbackBackend>,
) -> (ChatSession<LoopbackBackend>, mpsc::Receiver<ChatEvent>) {
    ChatSession::init(
        SessionContext {
            viewer: VIEWER,
            display_name: "Dana".into(),
        },
        Arc::clone(backend),
        ChatConfig::default(),
        RenderOptions::default(),
    )
    .await
    .expect("session should start")
}

fn drain(events: &mut mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

// ---------------------------------------------------------------------------
// Pure state scenarios
// ---------------------------------------------------------------------------

#[test]
fn happy_path_scenario() {
    let mut state = ChatState::new(VIEWER, ChatConfig::default());
    state.set_connection(ConnectionStatus::CONNECTED);
    state.load_conversations(vec![plumber()]);

    let out = state
        .begin_send(PLUMBER, "hello", Timestamp::from_millis(1_000))
        .unwrap();
    let msgs = state.messages(PLUMBER);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].status, DeliveryStatus::Sending);
    assert_eq!(msgs[0].key, MessageKey::Pending(out.temp_id));

    let ack = AuthoritativeMessage {
        id: ServerMessageId::new(500),
        conversation_id: PLUMBER,
        sender_id: VIEWER,
        text: "hello".into(),
        timestamp: Timestamp::from_millis(1_020),
        status: DeliveryStatus::Sent,
        temp_id: Some(out.temp_id),
    };
    assert_eq!(state.on_send_ack(out.temp_id, ack), ReconcileOutcome::Upgraded);

    let msgs = state.messages(PLUMBER);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].key, MessageKey::Confirmed(ServerMessageId::new(500)));
    assert_eq!(msgs[0].status, DeliveryStatus::Sent);
    assert!(msgs.iter().all(|m| m.temp_id() != Some(out.temp_id)));
}

// ---------------------------------------------------------------------------
// Session scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_message_visible_before_ack() {
    let backend = backend();
    backend.set_hold_sends(true);
    let (mut session, _events) = start(&backend).await;

    let temp_id = session.send_message(PLUMBER, "the tap drips").unwrap();
    let msgs = session.messages(PLUMBER);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].status, DeliveryStatus::Sending);
    assert_eq!(msgs[0].temp_id(), Some(temp_id));

    session.run_until_idle().await;
    assert_eq!(backend.held_count(), 1);
    assert_eq!(session.messages(PLUMBER)[0].status, DeliveryStatus::Sending);
}

#[tokio::test]
async fn ack_replaces_pending_entry() {
    let backend = backend();
    let (mut session, _events) = start(&backend).await;

    let temp_id = session.send_message(PLUMBER, "hello").unwrap();
    session.run_until_idle().await;

    let msgs = session.messages(PLUMBER);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].status, DeliveryStatus::Sent);
    let stored = backend.messages(PLUMBER);
    assert_eq!(msgs[0].server_id(), Some(stored[0].id));
    assert_eq!(stored[0].temp_id, Some(temp_id));
}

#[tokio::test]
async fn one_collaborator_send_per_action() {
    let backend = backend();
    let (mut session, _events) = start(&backend).await;

    backend.fail_next_send(BackendError::Timeout);
    session.send_message(PLUMBER, "first").unwrap();
    session.send_message(PLUMBER, "second").unwrap();
    session.run_until_idle().await;

    let sent = backend.sent();
    assert_eq!(sent.len(), 2);
    assert_ne!(sent[0].temp_id, sent[1].temp_id);
}

#[tokio::test]
async fn failure_then_retry_reconciles() {
    let backend = backend();
    let (mut session, mut events) = start(&backend).await;
    drain(&mut events);

    backend.fail_next_send(BackendError::Rejected("rate limited".into()));
    let temp_id = session.send_message(PLUMBER, "hello").unwrap();
    session.run_until_idle().await;

    assert_eq!(session.messages(PLUMBER)[0].status, DeliveryStatus::Failed);
    assert!(drain(&mut events).contains(&ChatEvent::SendFailed {
        conversation_id: PLUMBER,
        temp_id,
        reason: "rejected by server: rate limited".into(),
        retryable: false,
    }));
    assert_eq!(backend.sent().len(), 1);

    session.retry(PLUMBER, temp_id).unwrap();
    assert_eq!(session.messages(PLUMBER)[0].status, DeliveryStatus::Sending);
    session.run_until_idle().await;

    let msgs = session.messages(PLUMBER);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].status, DeliveryStatus::Sent);
    let sent = backend.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].temp_id, temp_id);
    assert_eq!(backend.messages(PLUMBER).len(), 1);
}

#[tokio::test]
async fn failed_message_can_be_discarded() {
    let backend = backend();
    let (mut session, _events) = start(&backend).await;

    backend.fail_next_send(BackendError::Disconnected);
    let temp_id = session.send_message(PLUMBER, "never mind").unwrap();
    session.run_until_idle().await;

    let removed = session.discard(PLUMBER, temp_id).unwrap();
    assert_eq!(removed.text, "never mind");
    assert!(session.messages(PLUMBER).is_empty());
}

#[tokio::test]
async fn late_ack_after_reset_inserts_once() {
    let backend = backend();
    backend.set_hold_sends(true);
    let (mut session, _events) = start(&backend).await;

    let temp_id = session.send_message(PLUMBER, "hello").unwrap();
    session.run_until_idle().await;
    session.evict(PLUMBER);
    assert!(session.messages(PLUMBER).is_empty());

    let committed = backend.release_send(temp_id).unwrap();
    session.run_until_idle().await;
    let msgs = session.messages(PLUMBER);
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].server_id(), Some(committed.id));

    // Loading history must not duplicate it.
    assert_eq!(
        session.select_conversation(PLUMBER),
        Ok(Selection::LoadHistory)
    );
    session.run_until_idle().await;
    assert_eq!(session.messages(PLUMBER).len(), 1);
}

#[tokio::test]
async fn out_of_order_acks_sort_by_server_time() {
    let backend = backend();
    backend.set_hold_sends(true);
    let (mut session, _events) = start(&backend).await;

    let first = session.send_message(PLUMBER, "first").unwrap();
    let second = session.send_message(PLUMBER, "second").unwrap();
    session.run_until_idle().await;
    assert_eq!(backend.held_count(), 2);

    backend.release_send_at(second, Timestamp::from_millis(5_000));
    session.run_until_idle().await;
    backend.release_send_at(first, Timestamp::from_millis(4_000));
    session.run_until_idle().await;

    let texts: Vec<_> = session
        .messages(PLUMBER)
        .iter()
        .map(|m| m.text.as_str())
        .collect();
    assert_eq!(texts, vec!["first", "second"]);
    assert!(session.messages(PLUMBER).iter().all(|m| !m.is_pending()));
}

#[tokio::test]
async fn offline_composer_sends_nothing() {
    let backend = backend();
    let (mut session, _events) = start(&backend).await;

    backend.set_connection(ConnectionStatus::DISCONNECTED);
    session.run_until_idle().await;

    assert_eq!(
        session.send_message(PLUMBER, "hello"),
        Err(ComposeError::Offline)
    );
    assert!(session.messages(PLUMBER).is_empty());
    assert!(backend.sent().is_empty());

    backend.set_connection(ConnectionStatus::CONNECTED);
    session.run_until_idle().await;
    assert!(session.send_message(PLUMBER, "hello").is_ok());
}

#[tokio::test]
async fn held_send_failure_marks_failed() {
    let backend = backend();
    backend.set_hold_sends(true);
    let (mut session, _events) = start(&backend).await;

    let temp_id = session.send_message(PLUMBER, "hello").unwrap();
    session.run_until_idle().await;
    assert!(backend.fail_held_send(temp_id, BackendError::Timeout));
    session.run_until_idle().await;

    assert_eq!(session.messages(PLUMBER)[0].status, DeliveryStatus::Failed);
    assert_eq!(session.in_flight(), 0);
}
