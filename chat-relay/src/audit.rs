//! Per-peer audit trail.
//!
//! Every session gets an append-only file under the configured directory,
//! named after its sanitized address, with one line per accepted message.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Local;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::RelayError;

#[derive(Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Opens the append-only record for one peer. Failure here refuses the
    /// session: callers surface it as `ResourceUnavailable` and close the
    /// connection instead of admitting an unauditable peer.
    pub async fn open(&self, peer: SocketAddr) -> Result<PeerLog, RelayError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{}.log", sanitize(peer)));
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await?;
        Ok(PeerLog { peer, file })
    }
}

fn sanitize(peer: SocketAddr) -> String {
    peer.to_string().replace([':', '[', ']'], "_")
}

pub struct PeerLog {
    peer: SocketAddr,
    file: File,
}

impl PeerLog {
    /// Appends one accepted-message line. Write failures are logged and
    /// swallowed; a broken audit file never takes the session down.
    pub async fn record(&mut self, delay: Option<Duration>, text: &str) {
        let stamp = Local::now().to_rfc3339();
        let delay_ms = delay.unwrap_or_default().as_millis();
        let line = format!("[{stamp}] Delay: {delay_ms}ms | {text}\n");
        if let Err(error) = self.file.write_all(line.as_bytes()).await {
            warn!(peer = %self.peer, ?error, "failed to append audit line");
        }
    }
}
