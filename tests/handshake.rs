//! Integration tests for the three-way handshake.
//!
//! Each test spins up two endpoints on loopback, runs the receiver half in a
//! background task, and verifies that both sides reach
//! `ConnectionState::Established` with agreeing sequence state.

use std::net::SocketAddr;
use std::time::Duration;

use prtp::transport::{ImpairmentConfig, Transport};
use prtp::{ConnError, Connection, ConnectionState};

/// Bind a transport on an OS-chosen loopback port.
async fn ephemeral() -> Transport {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Transport::bind(addr, ImpairmentConfig::default())
        .await
        .expect("bind")
}

#[tokio::test]
async fn handshake_both_sides_reach_established() {
    let receiver_transport = ephemeral().await;
    let receiver_addr = receiver_transport.local_addr;

    let receiver_task = tokio::spawn(async move { Connection::accept(receiver_transport).await });

    let sender_transport = ephemeral().await;
    let sender = tokio::time::timeout(
        Duration::from_secs(5),
        Connection::connect(sender_transport, receiver_addr, 1.0),
    )
    .await
    .expect("connect timed out")
    .expect("connect failed");

    let receiver = tokio::time::timeout(Duration::from_secs(5), receiver_task)
        .await
        .expect("accept timed out")
        .expect("receiver task panicked")
        .expect("accept failed");

    assert_eq!(sender.state, ConnectionState::Established);
    assert_eq!(receiver.state, ConnectionState::Established);
}

#[tokio::test]
async fn handshake_sequence_state_agrees() {
    let receiver_transport = ephemeral().await;
    let receiver_addr = receiver_transport.local_addr;

    let receiver_task = tokio::spawn(async move { Connection::accept(receiver_transport).await });

    let sender = Connection::connect(ephemeral().await, receiver_addr, 1.0)
        .await
        .expect("connect failed");
    let receiver = tokio::time::timeout(Duration::from_secs(5), receiver_task)
        .await
        .expect("accept timed out")
        .expect("receiver task panicked")
        .expect("accept failed");

    // The SYN consumed seq 0: the first data segment carries seq 1 and the
    // receiver awaits exactly that.
    assert_eq!(sender.window.send_base(), 1);
    assert_eq!(sender.window.next_seq_num(), 1);
    assert_eq!(receiver.delivery.ack_number(), 1);
}

#[tokio::test]
async fn connect_to_silent_peer_fails() {
    // Bind a socket and immediately drop it so the port is unbound; any SYN
    // sent there receives no reply.
    let silent_addr = ephemeral().await.local_addr;

    let sender_transport = ephemeral().await;
    let result = tokio::time::timeout(
        Duration::from_secs(30),
        Connection::connect(sender_transport, silent_addr, 1.0),
    )
    .await
    .expect("connect must give up before the outer deadline");

    assert!(
        matches!(result, Err(ConnError::HandshakeFailed)),
        "expected HandshakeFailed, got: {result:?}"
    );
}
