//! Shared per-line orchestration for connection workers.
//!
//! Both transports feed inbound units through [`handle_line`]: size
//! enforcement, command dispatch, liveness stamping, and audit recording all
//! live here. The transport keeps only what is genuinely transport-specific:
//! reading frames and writing the returned replies back to its peer.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Local;
use tracing::debug;

use crate::audit::{AuditLog, PeerLog};
use crate::broadcast::Broadcaster;
use crate::command::{self, Command};
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::events::EventSink;
use crate::registry::Registry;

pub const EMPTY_ACK: &str = "Silence is golden...";
pub const FAREWELL: &str = "Goodbye traveler. May your packets be swift!";
pub const OVERSIZE_WARNING: &str = "Whoa there, message too long.";
const KNOCK_REPLY: &str = "Who's there? Not your GPA, go study!";

/// Everything a connection worker needs from the core.
#[derive(Clone)]
pub struct WorkerContext {
    pub registry: Registry,
    pub broadcaster: Broadcaster,
    pub audit: AuditLog,
    pub events: Arc<dyn EventSink>,
    pub config: RelayConfig,
}

/// What the transport should do after one inbound unit: write these replies
/// to the sender (in order), then keep going or tear the session down.
#[derive(Debug, Default)]
pub struct LineOutcome {
    pub replies: Vec<String>,
    pub terminate: bool,
}

/// Acknowledgement sent once a peer is admitted, and reused as the reply to
/// a successful rename.
pub fn name_ack(name: &str) -> String {
    format!("Username set to {name}")
}

/// Derives a display name from an identification unit. Accepts either a
/// bare name or the client convention of leading with `/name X`. Returns
/// `None` when the unit trims to nothing.
pub fn identification_name(payload: &str, max_len: usize) -> Option<String> {
    let trimmed = payload.trim();
    let trimmed = match trimmed.strip_prefix("/name") {
        Some(rest) if rest.is_empty() || rest.starts_with(' ') => rest.trim(),
        _ => trimmed,
    };
    if trimmed.is_empty() {
        return None;
    }
    Some(truncate_to_boundary(trimmed, max_len).to_string())
}

/// Runs one inbound unit from an admitted session through the Active-state
/// steps: truncate, classify, apply, stamp, audit.
pub async fn handle_line(
    ctx: &WorkerContext,
    id: SocketAddr,
    raw: &str,
    audit: &mut PeerLog,
) -> LineOutcome {
    let mut outcome = LineOutcome::default();
    let trimmed = raw.trim();

    let text = match enforce_limit(trimmed, ctx.config.max_message_len) {
        Ok(text) => text,
        Err(error) => {
            debug!(peer = %id, %error, "truncating oversized message");
            outcome.replies.push(OVERSIZE_WARNING.to_string());
            truncate_to_boundary(trimmed, ctx.config.max_message_len)
        }
    };

    // Stamp liveness and the inter-message delay before applying effects;
    // a session evicted mid-read simply terminates here.
    let receipt = match ctx.registry.record_message(id).await {
        Some(receipt) => receipt,
        None => {
            outcome.terminate = true;
            return outcome;
        }
    };
    audit.record(receipt.delay, text).await;

    match command::parse(text) {
        Command::Empty => outcome.replies.push(EMPTY_ACK.to_string()),
        Command::Quit => {
            outcome.replies.push(FAREWELL.to_string());
            outcome.terminate = true;
        }
        Command::Time => outcome
            .replies
            .push(format!("Server Time: {}", Local::now().format("%H:%M:%S"))),
        Command::Date => outcome.replies.push(format!(
            "Today's Date: {}",
            Local::now().format("%A, %b %-d, %Y")
        )),
        Command::KnockKnock => outcome.replies.push(KNOCK_REPLY.to_string()),
        Command::Clients => outcome.replies.push(format!(
            "There are currently {} humans connected.",
            ctx.registry.count().await
        )),
        Command::Help => outcome.replies.push(command::HELP_TEXT.to_string()),
        Command::Name(arg) => {
            let new_name = arg.trim();
            if !new_name.is_empty() {
                match ctx.registry.rename(id, new_name).await {
                    Ok((old, new)) => {
                        outcome.replies.push(name_ack(&new));
                        ctx.broadcaster
                            .submit(format!("* {old} is now known as {new} *"));
                    }
                    Err(error) => {
                        debug!(peer = %id, %error, "rename for unknown session");
                        outcome.replies.push("You are not registered.".to_string());
                    }
                }
            }
        }
        Command::Echo(arg) => outcome.replies.push(format!("Echo: {arg}")),
        Command::Chat(text) => {
            ctx.broadcaster.submit(format!("{}: {}", receipt.name, text));
        }
    }

    outcome
}

fn enforce_limit(line: &str, limit: usize) -> Result<&str, RelayError> {
    if line.len() <= limit {
        Ok(line)
    } else {
        Err(RelayError::OversizedMessage { limit })
    }
}

/// Cuts `s` to at most `max` bytes without splitting a UTF-8 sequence.
fn truncate_to_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
