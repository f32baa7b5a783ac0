//! Tunables the relay core takes from its environment.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// A session whose last activity is older than this is evicted.
    pub idle_timeout: Duration,
    /// How often the liveness monitor scans for idle sessions.
    pub sweep_interval: Duration,
    /// Inbound frames longer than this are truncated, not rejected.
    pub max_message_len: usize,
    /// Directory for per-peer audit log files.
    pub log_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(10),
            max_message_len: 1024,
            log_dir: PathBuf::from("client_logs"),
        }
    }
}

impl RelayConfig {
    /// Clamps the sweep interval to the idle timeout. A sweep coarser than
    /// the timeout would let sessions linger well past their deadline.
    pub fn normalized(mut self) -> Self {
        if self.sweep_interval > self.idle_timeout {
            warn!(
                sweep_secs = self.sweep_interval.as_secs(),
                timeout_secs = self.idle_timeout.as_secs(),
                "sweep interval exceeds idle timeout; clamping"
            );
            self.sweep_interval = self.idle_timeout;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_clamps_oversized_sweep() {
        let config = RelayConfig {
            idle_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(120),
            ..RelayConfig::default()
        }
        .normalized();
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn normalized_keeps_tighter_sweep() {
        let config = RelayConfig::default().normalized();
        assert_eq!(config.sweep_interval, Duration::from_secs(10));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
    }
}
