use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::RelayConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the stream (TCP) relay server.
    TcpServer(ServerArgs),
    /// Run the datagram (UDP) relay server.
    UdpServer(ServerArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address to bind. Defaults to 127.0.0.1:3000 for TCP and
    /// 127.0.0.1:3001 for UDP; use port 0 for an ephemeral port.
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Seconds a session may stay silent before the sweep evicts it.
    #[arg(long, default_value_t = 60)]
    pub idle_timeout_secs: u64,

    /// Seconds between liveness sweeps (clamped to the idle timeout).
    #[arg(long, default_value_t = 10)]
    pub sweep_interval_secs: u64,

    /// Inbound messages longer than this many bytes are truncated.
    #[arg(long, default_value_t = 1024)]
    pub max_message_len: usize,

    /// Directory for per-peer audit log files.
    #[arg(long, default_value = "client_logs")]
    pub log_dir: PathBuf,
}

impl ServerArgs {
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs),
            max_message_len: self.max_message_len,
            log_dir: self.log_dir.clone(),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Display name announced when joining.
    #[arg(long)]
    pub nickname: String,

    /// Address of the relay server.
    #[arg(long, default_value = "127.0.0.1:3000")]
    pub server: SocketAddr,

    /// Transport to speak.
    #[arg(long, value_enum, default_value_t = Transport::Tcp)]
    pub transport: Transport,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Tcp,
    Udp,
}
