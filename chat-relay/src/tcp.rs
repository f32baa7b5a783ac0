//! Stream-transport relay.
//!
//! One task per accepted connection. The worker owns both socket halves:
//! inbound lines and broadcast deliveries are multiplexed through one
//! `select!` loop, so the socket has exactly one writer and teardown closes
//! it exactly once. The registry holds the only persistent sender into the
//! session's outbound channel; when the session is unregistered (quit,
//! error, or eviction) that sender drops, the channel drains to `None`, and
//! the worker exits.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::audit::{AuditLog, PeerLog};
use crate::broadcast::Broadcaster;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::events::{DisconnectReason, EventSink, RelayEvent};
use crate::monitor;
use crate::registry::Registry;
use crate::worker::{self, WorkerContext};

/// Outbound channel depth per session; a peer this far behind is stalled.
const OUTBOUND_BUFFER: usize = 32;
/// Deadline for any single write toward a peer.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TcpRelay {
    listener: TcpListener,
    ctx: WorkerContext,
}

impl TcpRelay {
    pub fn new(listener: TcpListener, config: RelayConfig, events: Arc<dyn EventSink>) -> Self {
        let config = config.normalized();
        let registry = Registry::new(events.clone());
        let broadcaster = Broadcaster::spawn(registry.clone(), events.clone());
        let ctx = WorkerContext {
            registry,
            broadcaster,
            audit: AuditLog::new(&config.log_dir),
            events,
            config,
        };
        Self { listener, ctx }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Registry {
        self.ctx.registry.clone()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let TcpRelay { listener, ctx } = self;
        let sweeper = monitor::spawn(ctx.registry.clone(), &ctx.config);
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("stream relay shutting down");
                    ctx.broadcaster.submit("* server shutting down *");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => spawn_session(stream, peer, ctx.clone()),
                        Err(error) => warn!(?error, "failed to accept connection"),
                    }
                }
            }
        }

        sweeper.abort();
        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(?error, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, ctx: WorkerContext) {
    tokio::spawn(async move {
        if let Err(error) = run_session(stream, peer, ctx).await {
            warn!(peer = %peer, ?error, "connection closed with error");
        }
    });
}

async fn run_session(stream: TcpStream, peer: SocketAddr, ctx: WorkerContext) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Identification step: nothing is admitted to the registry until the
    // first line arrives. An unidentified peer is not subject to the
    // liveness sweep, so the read itself carries the idle deadline.
    let mut line = String::new();
    let name = match timeout(ctx.config.idle_timeout, reader.read_line(&mut line)).await {
        Err(_) => {
            debug!(peer = %peer, "closed before identifying");
            return Ok(());
        }
        Ok(Ok(0)) => return Ok(()),
        Ok(Ok(_)) => worker::identification_name(&line, ctx.config.max_message_len)
            .unwrap_or_else(|| peer.to_string()),
        Ok(Err(error)) => return Err(error.into()),
    };

    let mut peer_log = match ctx.audit.open(peer).await {
        Ok(log) => log,
        Err(error) => {
            // RelayError::ResourceUnavailable: refuse the session, keep the
            // server running.
            warn!(peer = %peer, %error, "refusing session");
            let _ = write_line(&mut writer, peer, "Server error: unable to open log file").await;
            return Ok(());
        }
    };

    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let registration = ctx.registry.register(peer, name.clone(), tx).await;
    let epoch = registration.epoch;
    drop(registration.displaced);

    if let Err(error) = write_line(&mut writer, peer, &worker::name_ack(&name)).await {
        warn!(peer = %peer, %error, "failed to acknowledge registration");
        ctx.registry
            .unregister(peer, epoch, DisconnectReason::Error)
            .await;
        return Ok(());
    }

    let reason = session_loop(&ctx, peer, &name, &mut reader, &mut writer, &mut rx, &mut peer_log).await;

    // No-op if the liveness sweep (or a reconnect) already removed us.
    ctx.registry.unregister(peer, epoch, reason).await;
    let _ = writer.shutdown().await;
    Ok(())
}

async fn session_loop(
    ctx: &WorkerContext,
    peer: SocketAddr,
    name: &str,
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    rx: &mut mpsc::Receiver<String>,
    peer_log: &mut PeerLog,
) -> DisconnectReason {
    // The line buffer lives across iterations and is cleared only after a
    // complete line is handled: a read cancelled by the delivery branch
    // resumes where it left off instead of dropping a partial line.
    let mut line = String::new();
    loop {
        select! {
            read = reader.read_line(&mut line) => {
                match read {
                    Ok(0) => return DisconnectReason::Voluntary,
                    Ok(_) => {
                        let outcome = worker::handle_line(ctx, peer, &line, peer_log).await;
                        line.clear();
                        for reply in &outcome.replies {
                            if let Err(error) = write_line(writer, peer, reply).await {
                                warn!(peer = %peer, %error, "reply write failed");
                                return DisconnectReason::Error;
                            }
                        }
                        if outcome.terminate {
                            return DisconnectReason::Voluntary;
                        }
                    }
                    Err(error) => {
                        warn!(peer = %peer, ?error, "read failed");
                        return DisconnectReason::Error;
                    }
                }
            }
            delivery = rx.recv() => {
                match delivery {
                    Some(text) => {
                        if let Err(error) = write_line(writer, peer, &text).await {
                            warn!(peer = %peer, %error, "broadcast write failed");
                            ctx.events.emit(RelayEvent::DeliveryFailed {
                                id: peer,
                                name: name.to_string(),
                            });
                            return DisconnectReason::Error;
                        }
                    }
                    // The registry dropped its sender: evicted or replaced.
                    None => return DisconnectReason::Error,
                }
            }
        }
    }
}

async fn write_line(
    writer: &mut OwnedWriteHalf,
    peer: SocketAddr,
    text: &str,
) -> Result<(), RelayError> {
    let write = async {
        writer.write_all(text.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    };
    match timeout(WRITE_TIMEOUT, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(RelayError::DeliveryFailure {
            peer,
            reason: error.to_string(),
        }),
        Err(_) => Err(RelayError::DeliveryFailure {
            peer,
            reason: format!("write exceeded {}s", WRITE_TIMEOUT.as_secs()),
        }),
    }
}
