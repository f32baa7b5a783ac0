//! Real-time chat relay over two transports.
//!
//! Both the stream (TCP) and datagram (UDP) servers share one coordination
//! core: a session registry that owns membership, a single serializing
//! broadcast task, and a liveness monitor that evicts idle peers. Each
//! module covers one concrete responsibility:
//!
//! - [`cli`] parses the command-line interface for the servers and client.
//! - [`config`] holds the tunables the core takes from its environment.
//! - [`registry`] owns session state behind one lock.
//! - [`broadcast`] serializes fan-out of chat lines to every session.
//! - [`monitor`] sweeps idle sessions out of the registry.
//! - [`command`] is the pure textual command grammar.
//! - [`worker`] runs each inbound unit through the shared per-line steps.
//! - [`tcp`] and [`udp`] bind the core to their transports.
//! - [`client`] is the interactive terminal client.
//! - [`audit`] appends a per-peer record of accepted messages.
//! - [`events`] and [`error`] are the observability and failure surfaces.
//!
//! Integration tests drive the servers over real sockets; the liveness
//! scenarios run on tokio's paused clock.

pub mod audit;
pub mod broadcast;
pub mod cli;
pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod monitor;
pub mod registry;
pub mod tcp;
pub mod udp;
pub mod worker;
