//! `HomeChat` demo.
//!
//! Runs a scripted session against the in-memory backend: a customer talks
//! to a plumber, one send fails and is retried, the plumber answers and
//! reads the thread. The rendered thread is printed to stdout; logs go to a
//! file.
//!
//! ```bash
//! cargo run --bin homechat
//! HOMECHAT_LOG=debug cargo run --bin homechat -- --log-file /tmp/homechat.log
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use homechat::backend::BackendError;
use homechat::backend::loopback::LoopbackBackend;
use homechat::chat::render::Row;
use homechat::chat::session::{ChatSession, SessionContext};
use homechat::config::{CliArgs, ClientConfig};
use homechat_proto::conversation::{Conversation, Participant};
use homechat_proto::message::{ConversationId, Timestamp, UserId};

const PLUMBER: ConversationId = ConversationId::new(7);
const CLEANER: ConversationId = ConversationId::new(8);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("homechat demo starting");

    let backend = Arc::new(seed_backend(config.viewer_id, config.chat.event_buffer));
    let context = SessionContext {
        viewer: config.viewer_id,
        display_name: config.display_name.clone(),
    };
    let (mut session, _events) = ChatSession::init(
        context,
        Arc::clone(&backend),
        config.chat.clone(),
        config.render.clone(),
    )
    .await?;

    session.select_conversation(PLUMBER)?;
    session.run_until_idle().await;

    session.set_draft("Hi Pat, the kitchen sink is leaking again.");
    session.submit_draft()?;
    session.run_until_idle().await;

    backend.fail_next_send(BackendError::Timeout);
    let failed = session.send_message(PLUMBER, "Are you free tomorrow morning?")?;
    session.run_until_idle().await;
    session.retry(PLUMBER, failed)?;
    session.run_until_idle().await;

    backend.push_incoming(PLUMBER, "Sure, I can come by at 9.");
    backend.push_incoming(CLEANER, "Your cleaning is confirmed for Friday.");
    backend.mark_read(PLUMBER, Timestamp::now());
    session.run_until_idle().await;

    for conversation in session.state().conversations().iter() {
        println!(
            "[{}] {} ({} unread): {}",
            conversation.id,
            conversation.participant.name,
            conversation.unread,
            conversation.last_message.as_deref().unwrap_or("")
        );
    }
    println!();
    print_rows(&session.render(PLUMBER));

    session.teardown().await;
    tracing::info!("homechat demo finished");
    Ok(())
}

fn seed_backend(viewer: UserId, event_buffer: usize) -> LoopbackBackend {
    let backend = LoopbackBackend::new(viewer)
        .with_echo(true)
        .with_event_buffer(event_buffer)
        .with_conversation(Conversation::new(
            PLUMBER,
            Participant {
                user_id: UserId::new(100),
                name: "Pat's Plumbing".to_string(),
                avatar_url: None,
            },
        ))
        .with_conversation(Conversation::new(
            CLEANER,
            Participant {
                user_id: UserId::new(200),
                name: "Casey Cleans".to_string(),
                avatar_url: None,
            },
        ));
    backend.seed_message(PLUMBER, UserId::new(100), "Thanks for booking with us!");
    backend
}

fn print_rows(rows: &[Row]) {
    for row in rows {
        match row {
            Row::DaySeparator { label } => println!("---- {label} ----"),
            Row::Message(msg) => {
                let who = if msg.own { "you" } else { "them" };
                let header = if msg.first_in_group {
                    format!("{who} {}", msg.time_label)
                } else {
                    String::new()
                };
                println!(
                    "{header:>12} | {} {}{}",
                    msg.text,
                    msg.status_glyph.unwrap_or(""),
                    if msg.retryable { " (tap to retry)" } else { "" }
                );
            }
        }
    }
}

/// Initialize file-based logging.
///
/// Logs are written to a file so stdout stays readable. Returns a
/// [`WorkerGuard`] that must be held until shutdown to ensure all buffered
/// log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("homechat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}
