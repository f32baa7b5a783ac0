//! Interactive terminal client for both transports.
//!
//! Multiplexes stdin and server traffic; incoming lines are printed with
//! the gap since the previous one so a human can eyeball relay latency.

use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UdpSocket};
use tokio::select;
use tracing::{info, warn};

use crate::cli::{ClientArgs, Transport};

const DATAGRAM_BUFFER: usize = 2048;

pub async fn run(args: ClientArgs) -> Result<()> {
    match args.transport {
        Transport::Tcp => run_tcp(args).await,
        Transport::Udp => run_udp(args).await,
    }
}

async fn run_tcp(args: ClientArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    info!("connected to {}", args.server);

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    // Identification line; the server answers with an acknowledgement.
    writer
        .write_all(format!("/name {}\n", args.nickname).as_bytes())
        .await?;

    let mut stdin = BufReader::new(io::stdin());
    let mut input = String::new();
    let mut incoming = String::new();
    let mut delays = DelayTracker::default();

    loop {
        select! {
            read = reader.read_line(&mut incoming) => {
                if read? == 0 {
                    write_stdout("*** server closed the connection").await?;
                    break;
                }
                delays.render(incoming.trim_end_matches(['\r', '\n'])).await?;
                incoming.clear();
            }
            read = stdin.read_line(&mut input) => {
                if read? == 0 {
                    break;
                }
                let text = input.trim_end();
                if !text.is_empty() {
                    writer.write_all(text.as_bytes()).await?;
                    writer.write_all(b"\n").await?;
                }
                input.clear();
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown writer cleanly");
    }
    Ok(())
}

async fn run_udp(args: ClientArgs) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket
        .connect(args.server)
        .await
        .with_context(|| format!("failed to reach {}", args.server))?;
    info!("sending to {}", args.server);

    // First packet identifies us; the server answers with an
    // acknowledgement and never relays this packet.
    socket.send(args.nickname.as_bytes()).await?;

    let mut stdin = BufReader::new(io::stdin());
    let mut input = String::new();
    let mut buf = vec![0u8; DATAGRAM_BUFFER];
    let mut delays = DelayTracker::default();

    loop {
        select! {
            received = socket.recv(&mut buf) => {
                let len = received?;
                let text = String::from_utf8_lossy(&buf[..len]);
                delays.render(text.trim_end()).await?;
            }
            read = stdin.read_line(&mut input) => {
                if read? == 0 {
                    break;
                }
                let text = input.trim_end().to_string();
                input.clear();
                if text.is_empty() {
                    continue;
                }
                socket.send(text.as_bytes()).await?;
                // The server only answers a farewell; don't wait around.
                if text == "/quit" || text == "bye" {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    Ok(())
}

#[derive(Default)]
struct DelayTracker {
    last: Option<Instant>,
}

impl DelayTracker {
    async fn render(&mut self, line: &str) -> io::Result<()> {
        let now = Instant::now();
        match self.last.replace(now) {
            Some(previous) => {
                let delay = now.duration_since(previous).as_millis();
                write_stdout(&format!("[Delay: {delay}ms] {line}")).await
            }
            None => write_stdout(line).await,
        }
    }
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
