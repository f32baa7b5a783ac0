//! Observability hooks emitted by the session core.
//!
//! The registry, broadcast task, and liveness monitor report membership and
//! delivery activity through an [`EventSink`] instead of logging directly,
//! so the process log, the per-peer audit trail, and tests all observe the
//! same stream of facts.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, info, warn};

/// Why a session left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Explicit quit or orderly end of stream.
    Voluntary,
    /// Evicted by the liveness sweep.
    Timeout,
    /// Read or write failure on the transport.
    Error,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Voluntary => write!(f, "voluntary"),
            DisconnectReason::Timeout => write!(f, "timeout"),
            DisconnectReason::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RelayEvent {
    SessionJoined {
        id: SocketAddr,
        name: String,
    },
    SessionLeft {
        id: SocketAddr,
        name: String,
        reason: DisconnectReason,
    },
    /// An inbound message cleared truncation and dispatch. `delay` is the
    /// gap since the previous accepted message, `None` for the first one.
    MessageAccepted {
        id: SocketAddr,
        name: String,
        delay: Option<Duration>,
    },
    /// A broadcast could not be handed to one recipient.
    DeliveryFailed {
        id: SocketAddr,
        name: String,
    },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: RelayEvent);
}

/// Default sink: structured process log via `tracing`.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: RelayEvent) {
        match event {
            RelayEvent::SessionJoined { id, name } => {
                info!(peer = %id, name = %name, "client connected");
            }
            RelayEvent::SessionLeft { id, name, reason } => {
                info!(peer = %id, name = %name, reason = %reason, "client disconnected");
            }
            RelayEvent::MessageAccepted { id, name, delay } => {
                debug!(
                    peer = %id,
                    name = %name,
                    delay_ms = delay.map(|d| d.as_millis() as u64),
                    "message accepted"
                );
            }
            RelayEvent::DeliveryFailed { id, name } => {
                warn!(peer = %id, name = %name, "failed to deliver broadcast");
            }
        }
    }
}
