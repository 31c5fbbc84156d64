//! Property-based tests for the message store and status reducer.
//!
//! Uses proptest to verify:
//! 1. Any ack order, with echoes and failed-then-retried sends mixed in,
//!    leaves each send exactly once, confirmed, sorted by server time.
//! 2. Status receipts only ever move a message forward; repeats are no-ops.
//! 3. Random interleavings of sends, acks, failures, retries, echoes,
//!    incoming messages and evictions never duplicate a message.
//! 4. Arbitrary push frames never panic the decoder.

use std::collections::HashSet;

use proptest::prelude::*;

use homechat::backend::{BackendError, ConnectionStatus};
use homechat::chat::ChatState;
use homechat_proto::codec;
use homechat_proto::conversation::{Conversation, Participant};
use homechat_proto::event::InboundEvent;
use homechat_proto::message::{
    AuthoritativeMessage, ConversationId, DeliveryStatus, Message, MessageKey, ServerMessageId,
    TempId, Timestamp, UserId,
};

const VIEWER: UserId = UserId::new(1);
const PROVIDER: UserId = UserId::new(100);
const CONV: ConversationId = ConversationId::new(7);

// --- Fixtures ---

fn fresh_state() -> ChatState {
    let mut state = ChatState::new(VIEWER, homechat::chat::ChatConfig::default());
    state.set_connection(ConnectionStatus::CONNECTED);
    state.load_conversations(vec![Conversation::new(
        CONV,
        Participant {
            user_id: PROVIDER,
            name: "Pat's Plumbing".into(),
            avatar_url: None,
        },
    )]);
    state
}

fn authoritative(
    id: u64,
    sender: UserId,
    text: &str,
    ts: u64,
    temp_id: Option<TempId>,
) -> AuthoritativeMessage {
    AuthoritativeMessage {
        id: ServerMessageId::new(id),
        conversation_id: CONV,
        sender_id: sender,
        text: text.to_string(),
        timestamp: Timestamp::from_millis(ts),
        status: DeliveryStatus::Sent,
        temp_id,
    }
}

/// Checks the structural invariants of a thread.
fn assert_thread_invariants(messages: &[Message]) {
    let mut server_ids = HashSet::new();
    let mut temp_ids = HashSet::new();
    let mut texts = HashSet::new();
    for msg in messages {
        match msg.key {
            MessageKey::Confirmed(id) => assert!(server_ids.insert(id), "duplicate server id {id}"),
            MessageKey::Pending(temp) => assert!(temp_ids.insert(temp), "duplicate temp id {temp}"),
        }
        assert!(texts.insert(msg.text.clone()), "message shown twice: {}", msg.text);
    }
    assert!(
        messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp),
        "thread not sorted by timestamp"
    );
}

// --- Strategies ---

/// Per-send script: server timestamp, echo before ack, fail before ack.
fn arb_send_script() -> impl Strategy<Value = (u64, bool, bool)> {
    (0u64..100_000, any::<bool>(), any::<bool>())
}

/// A batch of sends plus the order in which their acks arrive.
fn arb_ack_schedule() -> impl Strategy<Value = (Vec<(u64, bool, bool)>, Vec<usize>)> {
    prop::collection::vec(arb_send_script(), 1..8).prop_flat_map(|scripts| {
        let order: Vec<usize> = (0..scripts.len()).collect();
        (Just(scripts), Just(order).prop_shuffle())
    })
}

fn arb_status() -> impl Strategy<Value = DeliveryStatus> {
    prop_oneof![
        Just(DeliveryStatus::Sending),
        Just(DeliveryStatus::Sent),
        Just(DeliveryStatus::Delivered),
        Just(DeliveryStatus::Read),
        Just(DeliveryStatus::Failed),
    ]
}

#[derive(Debug, Clone)]
enum Op {
    Send,
    Ack(usize, u64),
    Fail(usize),
    Retry(usize),
    Echo(usize, u64),
    Incoming(u64),
    Receipt(usize, DeliveryStatus),
    Evict,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Send),
        3 => (any::<usize>(), 0u64..100_000).prop_map(|(k, ts)| Op::Ack(k, ts)),
        1 => any::<usize>().prop_map(Op::Fail),
        1 => any::<usize>().prop_map(Op::Retry),
        2 => (any::<usize>(), 0u64..100_000).prop_map(|(k, ts)| Op::Echo(k, ts)),
        1 => (0u64..100_000).prop_map(Op::Incoming),
        1 => (any::<usize>(), arb_status()).prop_map(|(k, s)| Op::Receipt(k, s)),
        1 => Just(Op::Evict),
    ]
}

// --- Properties ---

proptest! {
    #[test]
    fn every_send_lands_exactly_once((scripts, order) in arb_ack_schedule()) {
        let mut state = fresh_state();
        let sends: Vec<_> = scripts
            .iter()
            .enumerate()
            .map(|(i, _)| {
                state
                    .begin_send(CONV, &format!("msg {i}"), Timestamp::from_millis(200_000 + i as u64))
                    .unwrap()
            })
            .collect();

        for i in order {
            let (ts, echo_first, fail_first) = scripts[i];
            let out = &sends[i];
            let ack = authoritative(1_000 + i as u64, VIEWER, &out.text, ts, Some(out.temp_id));

            if fail_first {
                state.on_send_failed(CONV, out.temp_id, &BackendError::Timeout);
                let retried = state.begin_retry(CONV, out.temp_id).unwrap();
                prop_assert_eq!(retried.temp_id, out.temp_id);
            }
            if echo_first {
                state.apply_inbound(InboundEvent::NewMessage(ack.clone()));
            }
            state.on_send_ack(out.temp_id, ack.clone());
            if !echo_first {
                state.apply_inbound(InboundEvent::NewMessage(ack));
            }
        }

        let messages = state.messages(CONV);
        prop_assert_eq!(messages.len(), scripts.len());
        prop_assert!(messages.iter().all(|m| !m.is_pending()));
        prop_assert!(messages.iter().all(|m| m.status == DeliveryStatus::Sent));
        assert_thread_invariants(messages);
    }

    #[test]
    fn receipts_never_regress(statuses in prop::collection::vec(arb_status(), 0..20)) {
        let mut state = fresh_state();
        let out = state.begin_send(CONV, "hello", Timestamp::from_millis(1)).unwrap();
        state.on_send_ack(out.temp_id, authoritative(500, VIEWER, "hello", 10, Some(out.temp_id)));
        let key = MessageKey::Confirmed(ServerMessageId::new(500));

        let mut expected = 1u8;
        for status in statuses {
            let before = state.messages(CONV)[0].status.rank();
            state.apply_status_event(CONV, key, status);
            let after = state.messages(CONV)[0].status.rank();
            prop_assert!(after >= before);

            if let Some(rank) = status.rank() {
                expected = expected.max(rank);
            }
            // Applying the same receipt again changes nothing.
            let snapshot = state.messages(CONV).to_vec();
            state.apply_status_event(CONV, key, status);
            prop_assert_eq!(state.messages(CONV), snapshot.as_slice());
        }
        prop_assert_eq!(state.messages(CONV)[0].status.rank(), Some(expected));
    }

    #[test]
    fn interleavings_never_duplicate(ops in prop::collection::vec(arb_op(), 1..40)) {
        let mut state = fresh_state();
        let mut sends: Vec<(TempId, String, u64)> = Vec::new();
        let mut next_incoming = 50_000u64;

        for (step, op) in ops.into_iter().enumerate() {
            match op {
                Op::Send => {
                    let text = format!("send {step}");
                    let out = state
                        .begin_send(CONV, &text, Timestamp::from_millis(step as u64))
                        .unwrap();
                    let id = 1_000 + sends.len() as u64;
                    sends.push((out.temp_id, text, id));
                }
                Op::Ack(k, ts) if !sends.is_empty() => {
                    let (temp_id, text, id) = &sends[k % sends.len()];
                    state.on_send_ack(*temp_id, authoritative(*id, VIEWER, text, ts, Some(*temp_id)));
                }
                Op::Echo(k, ts) if !sends.is_empty() => {
                    let (temp_id, text, id) = &sends[k % sends.len()];
                    let echo = authoritative(*id, VIEWER, text, ts, Some(*temp_id));
                    state.apply_inbound(InboundEvent::NewMessage(echo));
                }
                Op::Fail(k) if !sends.is_empty() => {
                    let (temp_id, _, _) = &sends[k % sends.len()];
                    state.on_send_failed(CONV, *temp_id, &BackendError::Disconnected);
                }
                Op::Retry(k) if !sends.is_empty() => {
                    let (temp_id, _, _) = &sends[k % sends.len()];
                    let _ = state.begin_retry(CONV, *temp_id);
                }
                Op::Receipt(k, status) if !sends.is_empty() => {
                    let (_, _, id) = &sends[k % sends.len()];
                    let key = MessageKey::Confirmed(ServerMessageId::new(*id));
                    state.apply_status_event(CONV, key, status);
                }
                Op::Incoming(ts) => {
                    next_incoming += 1;
                    let text = format!("incoming {next_incoming}");
                    let msg = authoritative(next_incoming, PROVIDER, &text, ts, None);
                    state.apply_inbound(InboundEvent::NewMessage(msg));
                }
                Op::Evict => {
                    state.evict(CONV);
                }
                _ => {}
            }
            assert_thread_invariants(state.messages(CONV));
        }
    }

    #[test]
    fn decoder_never_panics(frame in ".{0,512}") {
        let _ = codec::decode_event(&frame);
    }
}
