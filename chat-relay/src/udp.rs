//! Datagram-transport relay.
//!
//! A single receive loop demultiplexes packets by source address into
//! per-session worker tasks, so the datagram variant runs the exact same
//! worker contract as the stream variant. The first packet from an unseen
//! source is identification only: its payload names the peer and is never
//! broadcast; an empty payload from an unknown source is dropped silently.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::audit::AuditLog;
use crate::broadcast::Broadcaster;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::events::{DisconnectReason, EventSink, RelayEvent};
use crate::monitor;
use crate::registry::Registry;
use crate::worker::{self, WorkerContext};

/// One packet is one logical unit, up to this many bytes.
const DATAGRAM_BUFFER: usize = 2048;
/// Outbound channel depth per session.
const OUTBOUND_BUFFER: usize = 32;
/// Inbound queue depth between the receive loop and one session worker.
const INBOUND_BUFFER: usize = 64;

pub struct UdpRelay {
    socket: Arc<UdpSocket>,
    ctx: WorkerContext,
}

impl UdpRelay {
    pub fn new(socket: UdpSocket, config: RelayConfig, events: Arc<dyn EventSink>) -> Self {
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
        Self {
            socket: Arc::new(socket),
            ctx,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn registry(&self) -> Registry {
        self.ctx.registry.clone()
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let UdpRelay { socket, ctx } = self;
        let sweeper = monitor::spawn(ctx.registry.clone(), &ctx.config);
        // Routes inbound packets to the worker of an identified source.
        // Owned by this loop alone; entries die with their worker.
        let mut routes: HashMap<SocketAddr, mpsc::Sender<String>> = HashMap::new();
        let mut buf = vec![0u8; DATAGRAM_BUFFER];
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("datagram relay shutting down");
                    break;
                }
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => {
                            route_packet(&socket, &ctx, &mut routes, &buf[..len], peer).await;
                        }
                        Err(error) => warn!(?error, "failed to read datagram"),
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

async fn route_packet(
    socket: &Arc<UdpSocket>,
    ctx: &WorkerContext,
    routes: &mut HashMap<SocketAddr, mpsc::Sender<String>>,
    payload: &[u8],
    peer: SocketAddr,
) {
    let text = String::from_utf8_lossy(payload).into_owned();

    let text = if let Some(inbound) = routes.get(&peer) {
        match inbound.try_send(text) {
            Ok(()) => return,
            Err(TrySendError::Full(_)) => {
                warn!(peer = %peer, "inbound queue full; dropping datagram");
                return;
            }
            Err(TrySendError::Closed(returned)) => {
                // Worker ended (quit or eviction); the peer starts over.
                routes.remove(&peer);
                returned
            }
        }
    } else {
        text
    };

    match worker::identification_name(&text, ctx.config.max_message_len) {
        None => {
            let error = RelayError::IdentificationMissing(peer);
            debug!(peer = %peer, %error, "ignoring datagram");
        }
        Some(name) => {
            let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
            routes.insert(peer, inbound_tx);
            let socket = Arc::clone(socket);
            let ctx = ctx.clone();
            tokio::spawn(run_session(socket, ctx, peer, name, inbound_rx));
        }
    }
}

async fn run_session(
    socket: Arc<UdpSocket>,
    ctx: WorkerContext,
    peer: SocketAddr,
    name: String,
    mut inbound: mpsc::Receiver<String>,
) {
    let mut peer_log = match ctx.audit.open(peer).await {
        Ok(log) => log,
        Err(error) => {
            warn!(peer = %peer, %error, "refusing session");
            send_line(&socket, peer, "Server error: unable to open log file").await;
            return;
        }
    };

    let (tx, mut outbound) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let registration = ctx.registry.register(peer, name.clone(), tx).await;
    let epoch = registration.epoch;
    drop(registration.displaced);

    send_line(&socket, peer, &worker::name_ack(&name)).await;

    let reason = loop {
        select! {
            unit = inbound.recv() => {
                match unit {
                    Some(text) => {
                        let outcome = worker::handle_line(&ctx, peer, &text, &mut peer_log).await;
                        for reply in &outcome.replies {
                            send_line(&socket, peer, reply).await;
                        }
                        if outcome.terminate {
                            break DisconnectReason::Voluntary;
                        }
                    }
                    // Receive loop went away: server shutdown.
                    None => break DisconnectReason::Voluntary,
                }
            }
            delivery = outbound.recv() => {
                match delivery {
                    Some(text) => {
                        if !try_send_line(&socket, peer, &text).await {
                            ctx.events.emit(RelayEvent::DeliveryFailed {
                                id: peer,
                                name: name.clone(),
                            });
                            break DisconnectReason::Error;
                        }
                    }
                    // The registry dropped its sender: evicted or replaced.
                    None => break DisconnectReason::Error,
                }
            }
        }
    };

    ctx.registry.unregister(peer, epoch, reason).await;
}

async fn send_line(socket: &UdpSocket, peer: SocketAddr, text: &str) {
    if !try_send_line(socket, peer, text).await {
        warn!(peer = %peer, "failed to send datagram");
    }
}

async fn try_send_line(socket: &UdpSocket, peer: SocketAddr, text: &str) -> bool {
    let mut frame = text.as_bytes().to_vec();
    frame.push(b'\n');
    socket.send_to(&frame, peer).await.is_ok()
}
