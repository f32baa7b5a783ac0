use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::{TcpListener, UdpSocket};
use tracing::{info, warn};

use chat_relay::{
    cli::{Cli, Command},
    client,
    events::{EventSink, TracingSink},
    tcp::TcpRelay,
    udp::UdpRelay,
};

const DEFAULT_TCP_PORT: u16 = 3000;
const DEFAULT_UDP_PORT: u16 = 3001;

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let events: Arc<dyn EventSink> = Arc::new(TracingSink);

    match cli.command {
        Command::TcpServer(args) => {
            let listen = args
                .listen
                .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], DEFAULT_TCP_PORT)));
            let listener = TcpListener::bind(listen).await?;
            let relay = TcpRelay::new(listener, args.relay_config(), events);
            info!("TCP relay listening on {}", relay.local_addr()?);
            if let Err(err) = relay.run_until_ctrl_c().await {
                warn!("relay exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::UdpServer(args) => {
            let listen = args
                .listen
                .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], DEFAULT_UDP_PORT)));
            let socket = UdpSocket::bind(listen).await?;
            let relay = UdpRelay::new(socket, args.relay_config(), events);
            info!("UDP relay listening on {}", relay.local_addr()?);
            if let Err(err) = relay.run_until_ctrl_c().await {
                warn!("relay exited with error: {err:?}");
                return Err(err);
            }
        }
        Command::Client(args) => client::run(args).await?,
    }

    Ok(())
}
