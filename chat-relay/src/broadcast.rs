//! Serialized broadcast delivery.
//!
//! A single task drains a FIFO queue of outbound lines. For each line it
//! takes a registry snapshot (membership is evaluated at delivery time,
//! not at enqueue time) and hands the line to every snapshotted session's
//! outbound channel without blocking. Per-recipient FIFO order follows from
//! the single drain task feeding per-session channels in queue order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::events::{DisconnectReason, EventSink, RelayEvent};
use crate::registry::Registry;

struct Outbound {
    text: String,
    queued_at: Instant,
}

/// Cloneable handle submitting lines to the broadcast task.
#[derive(Clone)]
pub struct Broadcaster {
    queue: mpsc::UnboundedSender<Outbound>,
}

impl Broadcaster {
    /// Spawns the delivery task and returns its handle. The task exits once
    /// every handle is dropped and the queue drains.
    pub fn spawn(registry: Registry, events: Arc<dyn EventSink>) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(rx, registry, events));
        Self { queue }
    }

    pub fn submit(&self, text: impl Into<String>) {
        let outbound = Outbound {
            text: text.into(),
            queued_at: Instant::now(),
        };
        if self.queue.send(outbound).is_err() {
            warn!("broadcast task stopped; dropping message");
        }
    }
}

async fn run(
    mut queue: mpsc::UnboundedReceiver<Outbound>,
    registry: Registry,
    events: Arc<dyn EventSink>,
) {
    while let Some(Outbound { text, queued_at }) = queue.recv().await {
        let recipients = registry.snapshot().await;
        debug!(
            recipients = recipients.len(),
            queued_ms = queued_at.elapsed().as_millis() as u64,
            "delivering broadcast"
        );

        for session in recipients {
            match session.outbound.try_send(text.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    // A backed-up channel means the peer's writer has been
                    // stalled for a full buffer's worth of traffic. Cut it
                    // loose rather than let it wedge future batches.
                    events.emit(RelayEvent::DeliveryFailed {
                        id: session.id,
                        name: session.name.clone(),
                    });
                    registry
                        .unregister(session.id, session.epoch, DisconnectReason::Error)
                        .await;
                }
                Err(TrySendError::Closed(_)) => {
                    // Session was removed between snapshot and send.
                    debug!(peer = %session.id, "skipping delivery to departed session");
                }
            }
        }
    }
}
