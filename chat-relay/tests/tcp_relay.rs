//! Socket-driven tests for the stream relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chat_relay::config::RelayConfig;
use chat_relay::events::TracingSink;
use chat_relay::registry::Registry;
use chat_relay::tcp::TcpRelay;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

fn test_config(tag: &str) -> RelayConfig {
    RelayConfig {
        log_dir: std::env::temp_dir().join(format!("chat-relay-tcp-{tag}-{}", std::process::id())),
        ..RelayConfig::default()
    }
}

async fn spawn_relay(tag: &str) -> (SocketAddr, Registry, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let relay = TcpRelay::new(listener, test_config(tag), Arc::new(TracingSink));
    let addr = relay.local_addr().expect("local addr");
    let registry = relay.registry();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.await;
        };
        let _ = relay.run_until(shutdown).await;
    });

    (addr, registry, shutdown_tx)
}

async fn connect(addr: SocketAddr, name: &str) -> (BufReader<OwnedReadHalf>, OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.expect("connect");
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    send_line(&mut writer, &format!("/name {name}")).await;
    let ack = read_line_within(&mut reader).await;
    assert_eq!(ack, format!("Username set to {name}"));

    (reader, writer)
}

async fn send_line(writer: &mut OwnedWriteHalf, text: &str) {
    writer.write_all(text.as_bytes()).await.expect("write line");
    writer.write_all(b"\n").await.expect("write newline");
}

async fn read_line_within(reader: &mut BufReader<OwnedReadHalf>) -> String {
    let mut line = String::new();
    let bytes = timeout(Duration::from_secs(2), reader.read_line(&mut line))
        .await
        .expect("read should not hang")
        .expect("read line");
    assert!(bytes > 0, "connection closed unexpectedly");
    line.trim_end_matches(['\r', '\n']).to_string()
}

async fn assert_silent(reader: &mut BufReader<OwnedReadHalf>) {
    let mut line = String::new();
    let outcome = timeout(Duration::from_millis(200), reader.read_line(&mut line)).await;
    assert!(outcome.is_err(), "unexpected traffic: {line:?}");
}

async fn wait_for_count(registry: &Registry, expected: usize) {
    for _ in 0..100 {
        if registry.count().await == expected {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("registry never reached {expected} sessions");
}

#[tokio::test]
async fn chat_is_relayed_to_every_session() {
    let (addr, _registry, _shutdown) = spawn_relay("chat").await;
    let (mut alice_reader, mut alice_writer) = connect(addr, "alice").await;
    let (mut bob_reader, _bob_writer) = connect(addr, "bob").await;

    send_line(&mut alice_writer, "hello everyone").await;

    assert_eq!(read_line_within(&mut alice_reader).await, "alice: hello everyone");
    assert_eq!(read_line_within(&mut bob_reader).await, "alice: hello everyone");
}

#[tokio::test]
async fn echo_goes_to_the_sender_only() {
    let (addr, _registry, _shutdown) = spawn_relay("echo").await;
    let (mut alice_reader, mut alice_writer) = connect(addr, "alice").await;
    let (mut bob_reader, _bob_writer) = connect(addr, "bob").await;

    send_line(&mut alice_writer, "/echo hi").await;

    assert_eq!(read_line_within(&mut alice_reader).await, "Echo: hi");
    assert_silent(&mut bob_reader).await;
}

#[tokio::test]
async fn identification_line_is_never_relayed() {
    let (addr, _registry, _shutdown) = spawn_relay("ident").await;
    let (mut bob_reader, _bob_writer) = connect(addr, "bob").await;

    let _alice = connect(addr, "alice").await;
    assert_silent(&mut bob_reader).await;
}

#[tokio::test]
async fn rename_is_announced_to_everyone() {
    let (addr, _registry, _shutdown) = spawn_relay("rename").await;
    let (mut alice_reader, mut alice_writer) = connect(addr, "alice").await;
    let (mut bob_reader, _bob_writer) = connect(addr, "bob").await;

    send_line(&mut alice_writer, "/name alicia").await;

    assert_eq!(read_line_within(&mut alice_reader).await, "Username set to alicia");
    assert_eq!(
        read_line_within(&mut alice_reader).await,
        "* alice is now known as alicia *"
    );
    assert_eq!(
        read_line_within(&mut bob_reader).await,
        "* alice is now known as alicia *"
    );
}

#[tokio::test]
async fn oversized_message_is_truncated_with_warning() {
    let (addr, _registry, _shutdown) = spawn_relay("oversize").await;
    let (mut alice_reader, mut alice_writer) = connect(addr, "alice").await;
    let (mut bob_reader, _bob_writer) = connect(addr, "bob").await;

    send_line(&mut alice_writer, &"b".repeat(2000)).await;

    assert_eq!(
        read_line_within(&mut alice_reader).await,
        "Whoa there, message too long."
    );
    let expected = format!("alice: {}", "b".repeat(1024));
    assert_eq!(read_line_within(&mut alice_reader).await, expected);
    assert_eq!(read_line_within(&mut bob_reader).await, expected);
}

#[tokio::test]
async fn quit_sends_farewell_and_unregisters() {
    let (addr, registry, _shutdown) = spawn_relay("quit").await;
    let (mut alice_reader, mut alice_writer) = connect(addr, "alice").await;
    let (mut bob_reader, mut bob_writer) = connect(addr, "bob").await;
    wait_for_count(&registry, 2).await;

    send_line(&mut alice_writer, "/quit").await;
    assert_eq!(
        read_line_within(&mut alice_reader).await,
        "Goodbye traveler. May your packets be swift!"
    );
    wait_for_count(&registry, 1).await;

    send_line(&mut bob_writer, "/clients").await;
    assert_eq!(
        read_line_within(&mut bob_reader).await,
        "There are currently 1 humans connected."
    );
}

#[tokio::test]
async fn empty_line_is_acknowledged_privately() {
    let (addr, _registry, _shutdown) = spawn_relay("empty").await;
    let (mut alice_reader, mut alice_writer) = connect(addr, "alice").await;
    let (mut bob_reader, _bob_writer) = connect(addr, "bob").await;

    send_line(&mut alice_writer, "").await;

    assert_eq!(read_line_within(&mut alice_reader).await, "Silence is golden...");
    assert_silent(&mut bob_reader).await;
}

#[tokio::test]
async fn disconnect_without_quit_unregisters() {
    let (addr, registry, _shutdown) = spawn_relay("drop").await;
    let alice = connect(addr, "alice").await;
    wait_for_count(&registry, 1).await;

    drop(alice);
    wait_for_count(&registry, 0).await;
}
