//! Authoritative session membership.
//!
//! One mutex guards the whole map. Every operation holds the lock for a
//! bounded map access only; delivery I/O always happens on a [`snapshot`]
//! copy after the lock is released.
//!
//! [`snapshot`]: Registry::snapshot

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::debug;

use crate::error::RelayError;
use crate::events::{DisconnectReason, EventSink, RelayEvent};

/// Server-side record of one identified peer. Owned exclusively by the
/// registry; workers hold only the `(id, epoch)` pair handed back at
/// registration and route every mutation through registry calls.
pub struct Session {
    id: SocketAddr,
    epoch: u64,
    name: String,
    outbound: mpsc::Sender<String>,
    last_seen: Instant,
    last_message_at: Option<Instant>,
}

impl Session {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Point-in-time copy of one live session, safe to use outside the lock.
#[derive(Clone)]
pub struct SessionInfo {
    pub id: SocketAddr,
    pub epoch: u64,
    pub name: String,
    pub outbound: mpsc::Sender<String>,
}

/// Result of admitting a session.
pub struct Registration {
    /// Generation tag for this registration. Passing it back to
    /// [`Registry::unregister`] guarantees a stale worker can never remove
    /// a replacement session that reused its address.
    pub epoch: u64,
    /// Session displaced by a reconnect under the same address
    /// (last-writer-wins). Dropping it closes the old outbound channel.
    pub displaced: Option<Session>,
}

/// Receipt for one accepted inbound message.
pub struct MessageReceipt {
    /// Display name at the moment the message was accepted.
    pub name: String,
    /// Gap since the previous accepted message; `None` for the first.
    pub delay: Option<Duration>,
}

#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

struct Inner {
    sessions: Mutex<HashMap<SocketAddr, Session>>,
    next_epoch: AtomicU64,
    events: Arc<dyn EventSink>,
}

impl Registry {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: Mutex::new(HashMap::new()),
                next_epoch: AtomicU64::new(1),
                events,
            }),
        }
    }

    /// Admits a session. An existing session under the same address is
    /// displaced and returned to the caller (reconnect is last-writer-wins).
    pub async fn register(
        &self,
        id: SocketAddr,
        name: String,
        outbound: mpsc::Sender<String>,
    ) -> Registration {
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        let session = Session {
            id,
            epoch,
            name: name.clone(),
            outbound,
            last_seen: now,
            last_message_at: None,
        };

        let displaced = {
            let mut sessions = self.inner.sessions.lock().await;
            sessions.insert(id, session)
        };
        if let Some(old) = &displaced {
            debug!(peer = %id, old_name = %old.name, "session replaced by reconnect");
        }

        self.inner.events.emit(RelayEvent::SessionJoined { id, name });
        Registration { epoch, displaced }
    }

    /// Removes the session if it is still the registered generation.
    /// Removing an absent (or already-replaced) session is a no-op, which is
    /// what makes the voluntary-exit and timeout-eviction paths safe to
    /// race: whichever caller gets the session back owns its teardown.
    pub async fn unregister(
        &self,
        id: SocketAddr,
        epoch: u64,
        reason: DisconnectReason,
    ) -> Option<Session> {
        let removed = {
            let mut sessions = self.inner.sessions.lock().await;
            let current = sessions
                .get(&id)
                .is_some_and(|session| session.epoch == epoch);
            if current { sessions.remove(&id) } else { None }
        };

        if let Some(session) = &removed {
            self.inner.events.emit(RelayEvent::SessionLeft {
                id,
                name: session.name.clone(),
                reason,
            });
        }
        removed
    }

    /// Atomically swaps the display name, returning `(old, new)` for the
    /// rename announcement.
    pub async fn rename(
        &self,
        id: SocketAddr,
        new_name: &str,
    ) -> Result<(String, String), RelayError> {
        let mut sessions = self.inner.sessions.lock().await;
        let session = sessions.get_mut(&id).ok_or(RelayError::NotFound(id))?;
        let old = std::mem::replace(&mut session.name, new_name.to_string());
        Ok((old, new_name.to_string()))
    }

    /// Refreshes the liveness stamp for any inbound unit of work.
    pub async fn touch(&self, id: SocketAddr) {
        let mut sessions = self.inner.sessions.lock().await;
        if let Some(session) = sessions.get_mut(&id) {
            session.last_seen = Instant::now();
        }
    }

    /// Stamps an accepted message: refreshes liveness, rotates the
    /// previous-message timestamp, and reports the inter-message delay.
    pub async fn record_message(&self, id: SocketAddr) -> Option<MessageReceipt> {
        let receipt = {
            let mut sessions = self.inner.sessions.lock().await;
            let session = sessions.get_mut(&id)?;
            let now = Instant::now();
            session.last_seen = now;
            let delay = session
                .last_message_at
                .replace(now)
                .map(|previous| now.duration_since(previous));
            MessageReceipt {
                name: session.name.clone(),
                delay,
            }
        };

        self.inner.events.emit(RelayEvent::MessageAccepted {
            id,
            name: receipt.name.clone(),
            delay: receipt.delay,
        });
        Some(receipt)
    }

    /// Consistent copy of the current membership. Never aliases the live
    /// map; broadcast iteration and count queries work off this.
    pub async fn snapshot(&self) -> Vec<SessionInfo> {
        let sessions = self.inner.sessions.lock().await;
        sessions
            .values()
            .map(|session| SessionInfo {
                id: session.id,
                epoch: session.epoch,
                name: session.name.clone(),
                outbound: session.outbound.clone(),
            })
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.inner.sessions.lock().await.len()
    }

    /// Sessions whose last activity is at least `threshold` old.
    pub async fn idle(&self, threshold: Duration) -> Vec<SessionInfo> {
        let now = Instant::now();
        let sessions = self.inner.sessions.lock().await;
        sessions
            .values()
            .filter(|session| now.duration_since(session.last_seen) >= threshold)
            .map(|session| SessionInfo {
                id: session.id,
                epoch: session.epoch,
                name: session.name.clone(),
                outbound: session.outbound.clone(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TracingSink;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().expect("test addr")
    }

    fn registry() -> Registry {
        Registry::new(Arc::new(TracingSink))
    }

    #[tokio::test]
    async fn register_then_rename_roundtrip() {
        let registry = registry();
        let (tx, _rx) = mpsc::channel(8);
        registry.register(addr(9000), "guest".into(), tx).await;

        let (old, new) = registry
            .rename(addr(9000), "dave")
            .await
            .expect("session should be present");
        assert_eq!(old, "guest");
        assert_eq!(new, "dave");

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "dave");
    }

    #[tokio::test]
    async fn rename_unknown_session_is_not_found() {
        let registry = registry();
        let result = registry.rename(addr(9001), "ghost").await;
        assert!(matches!(result, Err(RelayError::NotFound(_))));
    }

    #[tokio::test]
    async fn reconnect_displaces_previous_session() {
        let registry = registry();
        let (tx_a, _rx_a) = mpsc::channel(8);
        let first = registry.register(addr(9002), "first".into(), tx_a).await;

        let (tx_b, _rx_b) = mpsc::channel(8);
        let second = registry.register(addr(9002), "second".into(), tx_b).await;
        assert_eq!(second.displaced.expect("old session returned").name(), "first");
        assert_eq!(registry.count().await, 1);

        // The stale worker's unregister must not touch the replacement.
        let removed = registry
            .unregister(addr(9002), first.epoch, DisconnectReason::Error)
            .await;
        assert!(removed.is_none());
        assert_eq!(registry.count().await, 1);

        let removed = registry
            .unregister(addr(9002), second.epoch, DisconnectReason::Voluntary)
            .await;
        assert_eq!(removed.expect("current session removed").name(), "second");
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn record_message_reports_inter_message_delay() {
        let registry = registry();
        let (tx, _rx) = mpsc::channel(8);
        registry.register(addr(9003), "dave".into(), tx).await;

        let first = registry
            .record_message(addr(9003))
            .await
            .expect("session present");
        assert_eq!(first.delay, None);

        tokio::time::advance(Duration::from_millis(250)).await;
        let second = registry
            .record_message(addr(9003))
            .await
            .expect("session present");
        assert_eq!(second.delay, Some(Duration::from_millis(250)));
    }
}
