//! Integration tests for switching between conversations.
//!
//! Covers history loading states, failure isolation between threads,
//! sends that outlive a switch, and eviction of inactive threads.

use std::sync::Arc;

use homechat::backend::BackendError;
use homechat::backend::loopback::LoopbackBackend;
use homechat::chat::render::RenderOptions;
use homechat::chat::selector::{HistoryState, Selection};
use homechat::chat::session::{ChatSession, SessionContext};
use homechat::chat::{ChatConfig, ChatEvent, SelectError};
use homechat_proto::conversation::{Conversation, Participant};
use homechat_proto::message::{ConversationId, DeliveryStatus, UserId};
use tokio::sync::mpsc;

const VIEWER: UserId = UserId::new(1);
const PLUMBER: ConversationId = ConversationId::new(7);
const CLEANER: ConversationId = ConversationId::new(8);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn provider(id: ConversationId, user: u64, name: &str) -> Conversation {
    Conversation::new(
        id,
        Participant {
            user_id: UserId::new(user),
            name: name.into(),
            avatar_url: None,
        },
    )
}

fn backend() -> Arc<LoopbackBackend> {
    let backend = LoopbackBackend::new(VIEWER)
        .with_clock(50_000)
        .with_conversation(provider(PLUMBER, 100, "Pat's Plumbing"))
        .with_conversation(provider(CLEANER, 200, "Casey Cleans"));
    backend.seed_message(PLUMBER, UserId::new(100), "Thanks for booking");
    backend.seed_message(CLEANER, UserId::new(200), "See you Friday");
    Arc::new(backend)
}

async fn start_with(
    backend: &Arc<LoopbackBackend>,
    config: ChatConfig,
) -> (ChatSession<LoopbackBackend>, mpsc::Receiver<ChatEvent>) {
    ChatSession::init(
        SessionContext {
            viewer: VIEWER,
            display_name: "Dana".into(),
        },
        Arc::clone(backend),
        config,
        RenderOptions::default(),
    )
    .await
    .expect("session should start")
}

async fn start(
    backend: &Arc<LoopbackBackend>,
) -> (ChatSession<LoopbackBackend>, mpsc::Receiver<ChatEvent>) {
    start_with(backend, ChatConfig::default()).await
}

fn drain(events: &mut mpsc::Receiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

fn history(session: &ChatSession<LoopbackBackend>, id: ConversationId) -> HistoryState {
    session.state().selector().history_state(id).clone()
}

// ---------------------------------------------------------------------------
// History loading
// ---------------------------------------------------------------------------

#[tokio::test]
async fn selecting_loads_history_once() {
    let backend = backend();
    let (mut session, mut events) = start(&backend).await;
    drain(&mut events);

    assert_eq!(session.select_conversation(PLUMBER), Ok(Selection::LoadHistory));
    assert_eq!(history(&session, PLUMBER), HistoryState::Loading);
    assert_eq!(session.select_conversation(PLUMBER), Ok(Selection::AlreadyActive));

    session.run_until_idle().await;
    assert_eq!(history(&session, PLUMBER), HistoryState::Loaded);
    assert_eq!(session.messages(PLUMBER).len(), 1);

    let events = drain(&mut events);
    assert!(events.contains(&ChatEvent::HistoryLoading {
        conversation_id: PLUMBER
    }));
    assert!(events.contains(&ChatEvent::HistoryLoaded {
        conversation_id: PLUMBER,
        count: 1
    }));

    session.select_conversation(CLEANER).unwrap();
    session.run_until_idle().await;
    assert_eq!(session.select_conversation(PLUMBER), Ok(Selection::Cached));
}

#[tokio::test]
async fn unknown_conversation_cannot_be_selected() {
    let backend = backend();
    let (mut session, _events) = start(&backend).await;
    let stranger = ConversationId::new(99);
    assert_eq!(
        session.select_conversation(stranger),
        Err(SelectError::UnknownConversation(stranger))
    );
    assert_eq!(session.state().active(), None);
}

#[tokio::test]
async fn history_failure_is_isolated() {
    let backend = backend();
    let (mut session, mut events) = start(&backend).await;

    session.select_conversation(PLUMBER).unwrap();
    session.run_until_idle().await;
    session.send_message(PLUMBER, "kitchen sink").unwrap();
    session.run_until_idle().await;
    let plumber_before = session.messages(PLUMBER).to_vec();
    drain(&mut events);

    backend.fail_next_history(CLEANER, BackendError::Timeout);
    session.select_conversation(CLEANER).unwrap();
    session.run_until_idle().await;

    assert_eq!(
        history(&session, CLEANER),
        HistoryState::Failed("request timed out".into())
    );
    assert!(session.messages(CLEANER).is_empty());
    assert_eq!(session.messages(PLUMBER), plumber_before.as_slice());
    assert!(drain(&mut events).contains(&ChatEvent::HistoryFailed {
        conversation_id: CLEANER,
        reason: "request timed out".into()
    }));

    // Selecting again retries the load.
    session.select_conversation(PLUMBER).unwrap();
    assert_eq!(session.select_conversation(CLEANER), Ok(Selection::LoadHistory));
    session.run_until_idle().await;
    assert_eq!(history(&session, CLEANER), HistoryState::Loaded);
    assert_eq!(session.messages(CLEANER).len(), 1);
}

#[tokio::test]
async fn history_does_not_count_as_unread() {
    let backend = backend();
    let (mut session, _events) = start(&backend).await;

    session.select_conversation(CLEANER).unwrap();
    session.run_until_idle().await;

    let cleaner = session.state().conversations().get(CLEANER).unwrap();
    assert_eq!(cleaner.unread, 0);
    assert_eq!(cleaner.last_message.as_deref(), Some("See you Friday"));
}

// ---------------------------------------------------------------------------
// Sends across a switch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_send_survives_switch() {
    let backend = backend();
    backend.set_hold_sends(true);
    let (mut session, _events) = start(&backend).await;

    session.select_conversation(PLUMBER).unwrap();
    session.run_until_idle().await;
    let temp_id = session.send_message(PLUMBER, "are you close?").unwrap();
    session.run_until_idle().await;

    session.select_conversation(CLEANER).unwrap();
    session.run_until_idle().await;
    backend.release_send(temp_id).unwrap();
    session.run_until_idle().await;

    assert_eq!(session.select_conversation(PLUMBER), Ok(Selection::Cached));
    let msgs = session.messages(PLUMBER);
    assert_eq!(msgs.len(), 2);
    let sent = msgs.iter().find(|m| m.text == "are you close?").unwrap();
    assert!(!sent.is_pending());
    assert_eq!(sent.status, DeliveryStatus::Sent);
    assert!(session.messages(CLEANER).iter().all(|m| m.text != "are you close?"));
}

#[tokio::test]
async fn late_ack_into_evicted_thread_then_reload() {
    let backend = backend();
    backend.set_hold_sends(true);
    let config = ChatConfig {
        retain_inactive_threads: false,
        ..ChatConfig::default()
    };
    let (mut session, _events) = start_with(&backend, config).await;

    session.select_conversation(PLUMBER).unwrap();
    session.run_until_idle().await;
    let temp_id = session.send_message(PLUMBER, "on the way?").unwrap();
    session.run_until_idle().await;

    session.select_conversation(CLEANER).unwrap();
    session.run_until_idle().await;
    assert!(session.messages(PLUMBER).is_empty());
    assert_eq!(history(&session, PLUMBER), HistoryState::NotLoaded);

    backend.release_send(temp_id).unwrap();
    session.run_until_idle().await;
    assert_eq!(session.messages(PLUMBER).len(), 1);

    assert_eq!(session.select_conversation(PLUMBER), Ok(Selection::LoadHistory));
    session.run_until_idle().await;
    let texts: Vec<_> = session
        .messages(PLUMBER)
        .iter()
        .map(|m| m.text.as_str())
        .collect();
    assert_eq!(texts, vec!["Thanks for booking", "on the way?"]);
    assert!(session.messages(CLEANER).is_empty());
}

#[tokio::test]
async fn eviction_during_history_load_drops_result() {
    let backend = backend();
    let (mut session, _events) = start(&backend).await;

    session.select_conversation(PLUMBER).unwrap();
    session.evict(PLUMBER);
    session.run_until_idle().await;

    assert!(session.messages(PLUMBER).is_empty());
    assert_eq!(history(&session, PLUMBER), HistoryState::NotLoaded);
}

// ---------------------------------------------------------------------------
// Composer and selection state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn switching_clears_draft_and_scrolls() {
    let backend = backend();
    let (mut session, mut events) = start(&backend).await;

    session.select_conversation(PLUMBER).unwrap();
    session.set_draft("half a thought");
    drain(&mut events);

    session.select_conversation(CLEANER).unwrap();
    assert_eq!(session.state().selector().draft(), "");
    assert!(drain(&mut events).contains(&ChatEvent::ScrollToBottom {
        conversation_id: CLEANER
    }));
}

#[tokio::test]
async fn at_most_one_active_conversation() {
    let backend = backend();
    let (mut session, _events) = start(&backend).await;

    assert_eq!(session.state().active(), None);
    session.select_conversation(PLUMBER).unwrap();
    session.select_conversation(CLEANER).unwrap();
    session.run_until_idle().await;

    assert_eq!(session.state().active(), Some(CLEANER));
    assert!(session.state().selector().is_active(CLEANER));
    assert!(!session.state().selector().is_active(PLUMBER));
}

#[tokio::test]
async fn selecting_clears_unread_badge() {
    let backend = backend();
    let (mut session, _events) = start(&backend).await;

    backend.push_incoming(CLEANER, "one");
    backend.push_incoming(CLEANER, "two");
    session.run_until_idle().await;
    assert_eq!(session.state().conversations().get(CLEANER).unwrap().unread, 2);

    session.select_conversation(CLEANER).unwrap();
    session.run_until_idle().await;
    assert_eq!(session.state().conversations().get(CLEANER).unwrap().unread, 0);
    assert_eq!(session.messages(CLEANER).len(), 3);
}
