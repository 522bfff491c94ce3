//! End-to-end file-transfer tests over loopback.
//!
//! Each test runs a sender and a receiver as separate tokio tasks and checks
//! the one property the protocol exists for: the bytes that come out equal
//! the bytes that went in, under loss, corruption, and delay.

use std::net::SocketAddr;
use std::time::Duration;

use prtp::transport::{ImpairmentConfig, Transport};
use prtp::{ConnError, Connection, TransferStats};

/// Deterministic test payload of `len` bytes.
fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn ephemeral(config: ImpairmentConfig) -> Transport {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Transport::bind(addr, config).await.expect("bind")
}

/// Run a complete transfer: handshake, data, four-way close.
///
/// Impairments (seeded for reproducibility) apply to the sender's transport;
/// the receiver's is clean.  Returns the sender's stats, its final cwnd, and
/// the bytes the receiver delivered.
async fn run_transfer(
    data: Vec<u8>,
    sender_config: ImpairmentConfig,
    seed: u64,
    initial_window: f64,
) -> (TransferStats, f64, Vec<u8>) {
    let receiver_transport = ephemeral(ImpairmentConfig::default()).await;
    let receiver_addr = receiver_transport.local_addr;

    let receiver_task = tokio::spawn(async move {
        let mut conn = Connection::accept(receiver_transport).await.expect("accept");
        conn.receive_file().await.expect("receive_file")
    });

    let sender_task = tokio::spawn(async move {
        let transport = Transport::bind_seeded("127.0.0.1:0".parse().unwrap(), sender_config, seed)
            .await
            .expect("bind");
        let mut conn = Connection::connect(transport, receiver_addr, initial_window)
            .await
            .expect("connect");
        let stats = conn.send_file(&data).await.expect("send_file");
        conn.close().await.expect("close");
        (stats, conn.congestion.cwnd())
    });

    let (received, sent) = tokio::join!(receiver_task, sender_task);
    let (stats, cwnd) = sent.expect("sender task panicked");
    (stats, cwnd, received.expect("receiver task panicked"))
}

#[tokio::test]
async fn baseline_small_file_is_bit_exact() {
    let data = pattern(1038);
    let (stats, _, received) =
        run_transfer(data.clone(), ImpairmentConfig::default(), 1, 1.0).await;

    assert_eq!(received, data);
    assert_eq!(stats.bytes, 1038);
    assert_eq!(stats.segments, 2, "1038 bytes must fit in two segments");
    assert_eq!(stats.retransmit_timeouts, 0, "clean link must not time out");
}

#[tokio::test]
async fn zero_byte_file_closes_cleanly() {
    let (stats, _, received) = run_transfer(Vec::new(), ImpairmentConfig::default(), 1, 1.0).await;

    assert!(received.is_empty());
    assert_eq!(stats.segments, 0, "no data segments for an empty file");
}

#[tokio::test]
async fn one_byte_file_uses_one_segment() {
    let data = vec![0x42];
    let (stats, _, received) =
        run_transfer(data.clone(), ImpairmentConfig::default(), 1, 1.0).await;

    assert_eq!(received, data);
    assert_eq!(stats.segments, 1);
}

#[tokio::test]
async fn exact_payload_multiple_has_no_partial_segment() {
    let data = pattern(3 * 1024);
    let (stats, _, received) =
        run_transfer(data.clone(), ImpairmentConfig::default(), 1, 1.0).await;

    assert_eq!(received, data);
    assert_eq!(stats.segments, 3, "3x1024 bytes is exactly three full segments");
}

#[tokio::test]
async fn clean_link_window_grows_through_slow_start() {
    let data = pattern(64 * 1024);
    let (stats, cwnd, received) = tokio::time::timeout(
        Duration::from_secs(30),
        run_transfer(data.clone(), ImpairmentConfig::default(), 1, 5.0),
    )
    .await
    .expect("transfer deadline");

    assert_eq!(received, data);
    assert_eq!(stats.segments, 64);
    assert_eq!(stats.retransmit_timeouts, 0);
    assert!(
        cwnd >= 40.0,
        "64 new ACKs from an initial window of 5 should grow cwnd well past 40, got {cwnd:.1}"
    );
}

#[tokio::test]
async fn lossy_link_delivers_bit_exact() {
    let config = ImpairmentConfig {
        loss_rate: 0.2,
        ..Default::default()
    };
    let data = pattern(16 * 1024);
    let (stats, _, received) = tokio::time::timeout(
        Duration::from_secs(60),
        run_transfer(data.clone(), config, 42, 2.0),
    )
    .await
    .expect("transfer deadline");

    assert_eq!(received, data);
    assert_eq!(stats.bytes, 16 * 1024);
}

#[tokio::test]
async fn corrupting_link_delivers_bit_exact() {
    let config = ImpairmentConfig {
        corruption_rate: 0.2,
        ..Default::default()
    };
    let data = pattern(4 * 1024);
    let (_, _, received) = tokio::time::timeout(
        Duration::from_secs(60),
        run_transfer(data.clone(), config, 7, 2.0),
    )
    .await
    .expect("transfer deadline");

    assert_eq!(received, data, "corrupted segments must never reach the sink");
}

#[tokio::test]
async fn delayed_link_delivers_bit_exact() {
    let config = ImpairmentConfig {
        min_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        ..Default::default()
    };
    let data = pattern(4 * 1024);
    let (_, _, received) = tokio::time::timeout(
        Duration::from_secs(60),
        run_transfer(data.clone(), config, 3, 4.0),
    )
    .await
    .expect("transfer deadline");

    assert_eq!(received, data);
}

#[tokio::test]
async fn total_loss_hits_retransmit_ceiling() {
    let receiver_transport = ephemeral(ImpairmentConfig::default()).await;
    let receiver_addr = receiver_transport.local_addr;

    // The receiver will never see data; park it and drop it afterwards.
    let receiver_task = tokio::spawn(async move {
        let mut conn = Connection::accept(receiver_transport).await.expect("accept");
        let _ = conn.receive_file().await;
    });

    let config = ImpairmentConfig {
        loss_rate: 1.0,
        ..Default::default()
    };
    let transport = Transport::bind_seeded("127.0.0.1:0".parse().unwrap(), config, 9)
        .await
        .expect("bind");
    // The handshake still succeeds: loss injection is suspended for it.
    let mut conn = Connection::connect(transport, receiver_addr, 1.0)
        .await
        .expect("connect");

    let result = tokio::time::timeout(Duration::from_secs(30), conn.send_file(&pattern(2048)))
        .await
        .expect("ceiling must trip before the outer deadline");

    assert!(
        matches!(result, Err(ConnError::RetransmitCeiling { .. })),
        "expected RetransmitCeiling, got: {result:?}"
    );
    receiver_task.abort();
}
