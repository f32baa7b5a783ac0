//! Idle-session eviction.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

use crate::config::RelayConfig;
use crate::events::DisconnectReason;
use crate::registry::Registry;

/// Final line sent to a peer before its session is evicted.
pub const IDLE_NOTICE: &str = "Disconnected due to inactivity";

/// Spawns the periodic liveness sweep. Each pass evicts every session whose
/// last activity is at least `idle_timeout` old: a best-effort final notice
/// goes out on the session's outbound channel, then the session is
/// unregistered. A session quitting voluntarily at the same moment is fine;
/// the registry resolves the race to a single winner.
pub fn spawn(registry: Registry, config: &RelayConfig) -> JoinHandle<()> {
    let idle_timeout = config.idle_timeout;
    let sweep_interval = config.sweep_interval;
    tokio::spawn(run(registry, idle_timeout, sweep_interval))
}

async fn run(registry: Registry, idle_timeout: Duration, sweep_interval: Duration) {
    let mut ticker = time::interval(sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; nothing can be idle yet.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        for session in registry.idle(idle_timeout).await {
            info!(peer = %session.id, name = %session.name, "evicting idle session");
            let _ = session.outbound.try_send(IDLE_NOTICE.to_string());
            registry
                .unregister(session.id, session.epoch, DisconnectReason::Timeout)
                .await;
        }
    }
}
