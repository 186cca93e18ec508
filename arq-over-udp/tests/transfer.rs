//! End-to-end transfer tests on loopback.
//!
//! A server task listens and receives while the test body connects and
//! sends.  Loss scenarios replace the fault injector with scripted or
//! seeded deciders so every run drops the same packets; an observer
//! records the [`TransferEvent`]s each side reports.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;

use arq_over_udp::{
    packet::{flags, Packet},
    simulator::{FaultInjector, RandomLoss, ScriptedLoss},
    socket::{RecvEvent, Socket},
    Config, ConnError, Connection, Protocol, TransferEvent, TransferStats,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type EventLog = Arc<Mutex<Vec<TransferEvent>>>;

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn config(window: usize, timeout_ms: u64) -> Config {
    Config {
        max_payload_size: 1000,
        window_size: window,
        timeout: Duration::from_millis(timeout_ms),
        ..Config::default()
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn record(conn: &mut Connection) -> EventLog {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    conn.set_observer(move |e| sink.lock().unwrap().push(*e));
    log
}

fn events(log: &EventLog) -> Vec<TransferEvent> {
    log.lock().unwrap().clone()
}

fn retransmitted(events: &[TransferEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Retransmitted { offset, .. } => Some(*offset),
            _ => None,
        })
        .collect()
}

fn sent(events: &[TransferEvent]) -> Vec<u32> {
    events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Sent { offset, .. } => Some(*offset),
            _ => None,
        })
        .collect()
}

struct Outcome {
    received: Vec<u8>,
    client_stats: TransferStats,
    server_stats: TransferStats,
    client_events: Vec<TransferEvent>,
    server_events: Vec<TransferEvent>,
}

/// Run one complete transfer of `data` from a client to a server.
async fn transfer(
    data: &[u8],
    protocol: Protocol,
    cfg: Config,
    client_faults: FaultInjector,
    server_faults: FaultInjector,
) -> Outcome {
    let mut server = Connection::bind(loopback(), cfg.clone())
        .await
        .expect("bind server")
        .with_fault_injector(server_faults);
    let server_addr = server.local_addr();
    let server_log = record(&mut server);

    let server_task = tokio::spawn(async move {
        server.listen().await?;
        let received = server.receive_reliable(protocol).await?;
        Ok::<_, ConnError>((received, server.stats()))
    });

    let mut client = Connection::bind(loopback(), cfg)
        .await
        .expect("bind client")
        .with_fault_injector(client_faults);
    let client_log = record(&mut client);
    client.connect(server_addr).await.expect("connect");

    let client_stats = tokio::time::timeout(
        Duration::from_secs(30),
        client.send_reliable(data, protocol),
    )
    .await
    .expect("send timed out")
    .expect("send failed");

    let (received, server_stats) = tokio::time::timeout(Duration::from_secs(30), server_task)
        .await
        .expect("receive timed out")
        .expect("server task panicked")
        .expect("receive failed");

    Outcome {
        received,
        client_stats,
        server_stats,
        client_events: events(&client_log),
        server_events: events(&server_log),
    }
}

async fn clean(data: &[u8], protocol: Protocol, window: usize) -> Outcome {
    transfer(
        data,
        protocol,
        config(window, 250),
        FaultInjector::disabled(),
        FaultInjector::disabled(),
    )
    .await
}

// ---------------------------------------------------------------------------
// Lossless delivery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_protocol_delivers_exactly_once_without_loss() {
    for protocol in Protocol::ALL {
        for len in [0, 1, 999, 1000, 4500, 25_000] {
            let data = pattern(len);
            let out = clean(&data, protocol, 4).await;
            assert_eq!(out.received, data, "{protocol} len={len}");
            assert_eq!(out.client_stats.bytes, len as u64, "{protocol} len={len}");
        }
    }
}

#[tokio::test]
async fn wide_windows_deliver_in_order() {
    let data = pattern(64 * 1000 * 2 + 17);
    for protocol in [Protocol::GoBackN, Protocol::SelectiveRepeat] {
        for window in [1, 16, 64] {
            let out = clean(&data, protocol, window).await;
            assert_eq!(out.received, data, "{protocol} window={window}");
        }
    }
}

/// 4500 bytes, 1000-byte chunks, window 4, no loss.
#[tokio::test]
async fn gbn_4500_bytes_without_retransmission() {
    let out = transfer(
        &pattern(4500),
        Protocol::GoBackN,
        config(4, 1000),
        FaultInjector::disabled(),
        FaultInjector::disabled(),
    )
    .await;

    assert_eq!(sent(&out.client_events), [0, 1000, 2000, 3000, 4000]);
    assert!(retransmitted(&out.client_events).is_empty());
    assert_eq!(out.client_stats.retransmissions, 0);
    assert_eq!(out.client_stats.packets_sent, 5);

    let delivered: Vec<(u32, usize)> = out
        .server_events
        .iter()
        .filter_map(|e| match e {
            TransferEvent::Delivered { offset, len } => Some((*offset, *len)),
            _ => None,
        })
        .collect();
    assert_eq!(
        delivered,
        [(0, 1000), (1000, 1000), (2000, 1000), (3000, 1000), (4000, 500)]
    );
}

// ---------------------------------------------------------------------------
// Scripted loss
// ---------------------------------------------------------------------------

/// Drop the second data send (offset 1000) once.
fn drop_second_send() -> FaultInjector {
    FaultInjector::new(ScriptedLoss::new([1]), 1)
}

#[tokio::test]
async fn gbn_resends_the_whole_window_after_a_loss() {
    let data = pattern(4500);
    let out = transfer(
        &data,
        Protocol::GoBackN,
        config(4, 200),
        drop_second_send(),
        FaultInjector::disabled(),
    )
    .await;

    assert_eq!(out.received, data);
    assert_eq!(
        retransmitted(&out.client_events),
        [1000, 2000, 3000, 4000]
    );
    assert!(out
        .client_events
        .contains(&TransferEvent::Lost { offset: 1000, len: 1000 }));
    assert_eq!(out.client_stats.simulated_losses, 1);
    // Receiver dropped the segments that arrived past the gap.
    assert!(out
        .server_events
        .iter()
        .any(|e| matches!(e, TransferEvent::Discarded { offset: 2000 })));
}

#[tokio::test]
async fn sr_resends_only_the_lost_packet() {
    let data = pattern(4500);
    let out = transfer(
        &data,
        Protocol::SelectiveRepeat,
        config(4, 200),
        drop_second_send(),
        FaultInjector::disabled(),
    )
    .await;

    assert_eq!(out.received, data);
    assert_eq!(retransmitted(&out.client_events), [1000]);
    assert!(out
        .server_events
        .contains(&TransferEvent::Buffered { offset: 2000, len: 1000 }));
    assert!(out
        .server_events
        .contains(&TransferEvent::Buffered { offset: 4000, len: 500 }));
}

#[tokio::test]
async fn saw_recovers_from_a_lost_segment() {
    let data = pattern(3000);
    let out = transfer(
        &data,
        Protocol::StopAndWait,
        config(4, 200),
        drop_second_send(),
        FaultInjector::disabled(),
    )
    .await;

    assert_eq!(out.received, data);
    assert_eq!(retransmitted(&out.client_events), [1000]);
}

/// The server's first ACK is lost (`--test skipack`).
#[tokio::test]
async fn lost_ack_is_recovered_by_every_protocol() {
    for protocol in Protocol::ALL {
        let data = pattern(4500);
        let out = transfer(
            &data,
            protocol,
            config(4, 200),
            FaultInjector::disabled(),
            FaultInjector::new(ScriptedLoss::new([0]), 1),
        )
        .await;

        assert_eq!(out.received, data, "{protocol}");
        assert_eq!(out.server_stats.simulated_losses, 1, "{protocol}");
        assert!(
            out.server_events.contains(&TransferEvent::AckLost { ack: 1001 }),
            "{protocol}"
        );
    }
}

#[tokio::test]
async fn saw_lost_ack_causes_a_duplicate() {
    let data = pattern(2000);
    let out = transfer(
        &data,
        Protocol::StopAndWait,
        config(1, 200),
        FaultInjector::disabled(),
        FaultInjector::new(ScriptedLoss::new([0]), 1),
    )
    .await;

    assert_eq!(out.received, data);
    assert_eq!(retransmitted(&out.client_events), [0]);
    assert!(out
        .server_events
        .contains(&TransferEvent::Duplicate { offset: 0 }));
    assert_eq!(out.server_stats.duplicates, 1);
}

/// Losing the FIN makes the sender resend it.
#[tokio::test]
async fn lost_fin_is_resent() {
    let data = pattern(1500);
    // Sends: data 0, data 1000, FIN.
    let out = transfer(
        &data,
        Protocol::GoBackN,
        config(4, 200),
        FaultInjector::new(ScriptedLoss::new([2]), 1),
        FaultInjector::disabled(),
    )
    .await;

    assert_eq!(out.received, data);
    assert!(out.client_events.contains(&TransferEvent::FinResent));
}

/// Losing the FIN-ACK is answered by the lingering receiver.
#[tokio::test]
async fn lost_fin_ack_is_answered_again() {
    let data = pattern(500);
    // Server sends: ACK for data, FIN-ACK.
    let out = transfer(
        &data,
        Protocol::StopAndWait,
        config(1, 200),
        FaultInjector::disabled(),
        FaultInjector::new(ScriptedLoss::new([1]), 1),
    )
    .await;

    assert_eq!(out.received, data);
    assert!(out.client_events.contains(&TransferEvent::FinResent));
    assert!(out.server_events.contains(&TransferEvent::FinAckResent));
}

/// The receiver keeps lingering while the sender's FIN resends are dropped,
/// as long as the loss budget allows.
#[tokio::test]
async fn linger_outlasts_consecutive_lost_fins() {
    let cfg = Config {
        max_simulated_losses: 3,
        ..config(4, 100)
    };
    // Client sends: FIN, then resends 1..=3 are dropped and 4 gets through.
    // Server sends: FIN-ACK (dropped), FIN-ACK.
    let out = transfer(
        &[],
        Protocol::GoBackN,
        cfg,
        FaultInjector::new(ScriptedLoss::new([1, 2, 3]), 3),
        FaultInjector::new(ScriptedLoss::new([0]), 1),
    )
    .await;

    assert!(out.received.is_empty());
    let fin_resends = out
        .client_events
        .iter()
        .filter(|e| **e == TransferEvent::FinResent)
        .count();
    assert!(fin_resends >= 4, "FIN resent {fin_resends} times");
    assert!(out.server_events.contains(&TransferEvent::FinAckResent));
}

// ---------------------------------------------------------------------------
// Random loss
// ---------------------------------------------------------------------------

#[tokio::test]
async fn seeded_random_loss_still_delivers() {
    let data = pattern(20_000);
    for (i, protocol) in Protocol::ALL.into_iter().enumerate() {
        let seed = 7 + i as u64;
        let out = transfer(
            &data,
            protocol,
            config(8, 100),
            FaultInjector::new(RandomLoss::seeded(0.1, seed), 15),
            FaultInjector::new(RandomLoss::seeded(0.1, seed + 100), 15),
        )
        .await;
        assert_eq!(out.received, data, "{protocol}");
    }
}

// ---------------------------------------------------------------------------
// Hand-driven peers
// ---------------------------------------------------------------------------

async fn expect_from(socket: &Socket) -> (Packet, SocketAddr) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    match socket.recv_until(deadline).await.unwrap() {
        RecvEvent::Packet { packet, from } => (packet, from),
        RecvEvent::Timeout => panic!("no packet within 2s"),
    }
}

async fn expect_packet(socket: &Socket) -> Packet {
    expect_from(socket).await.0
}

async fn send_raw(udp: &UdpSocket, packet: Packet, to: SocketAddr) {
    udp.send_to(&packet.encode(), to).await.unwrap();
}

async fn recv_raw(udp: &UdpSocket) -> Packet {
    let mut buf = [0u8; 2048];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), udp.recv_from(&mut buf))
        .await
        .expect("no datagram within 2s")
        .unwrap();
    Packet::decode(&buf[..n]).unwrap()
}

/// Perform the client half of the handshake from a raw socket.
async fn raw_connect(raw: &Socket, server: SocketAddr) {
    raw.send_to(&Packet::control(0, 0, flags::SYN, 1), server)
        .await
        .unwrap();
    let syn_ack = expect_packet(raw).await;
    assert!(syn_ack.header.has(flags::SYN | flags::ACK));
    raw.send_to(&Packet::control(1, 1, flags::ACK, 1), server)
        .await
        .unwrap();
}

#[tokio::test]
async fn duplicate_fin_gets_another_fin_ack() {
    let mut server = Connection::bind(loopback(), config(1, 300)).await.unwrap();
    let server_addr = server.local_addr();
    let log = record(&mut server);
    let server_task = tokio::spawn(async move {
        server.listen().await?;
        server.receive_reliable(Protocol::GoBackN).await
    });

    let raw = Socket::bind(loopback()).await.unwrap();
    raw_connect(&raw, server_addr).await;

    raw.send_to(&Packet::new(1, 1, flags::ACK, 1, b"abc".to_vec()), server_addr)
        .await
        .unwrap();
    assert_eq!(expect_packet(&raw).await.header.ack, 4);

    let fin = Packet::control(4, 1, flags::FIN, 1);
    raw.send_to(&fin, server_addr).await.unwrap();
    let first = expect_packet(&raw).await;
    assert!(first.header.has(flags::ACK | flags::FIN));
    assert_eq!(first.header.ack, 5);

    raw.send_to(&fin, server_addr).await.unwrap();
    let second = expect_packet(&raw).await;
    assert_eq!(second.header, first.header);

    let data = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(data, b"abc");
    assert_eq!(
        events(&log)
            .iter()
            .filter(|e| **e == TransferEvent::FinAckResent)
            .count(),
        1
    );
}

#[tokio::test]
async fn malformed_datagram_mid_transfer_is_ignored() {
    let mut server = Connection::bind(loopback(), config(1, 300)).await.unwrap();
    let server_addr = server.local_addr();
    let server_task = tokio::spawn(async move {
        server.listen().await?;
        server.receive_reliable(Protocol::StopAndWait).await
    });

    // One socket for the handshake and the junk so the peer filter passes.
    let udp = UdpSocket::bind(loopback()).await.unwrap();

    send_raw(&udp, Packet::control(0, 0, flags::SYN, 1), server_addr).await;
    assert!(recv_raw(&udp).await.header.has(flags::SYN | flags::ACK));
    send_raw(&udp, Packet::control(1, 1, flags::ACK, 1), server_addr).await;

    // Too short for a header: dropped without reply.
    udp.send_to(&[0xde, 0xad, 0xbe], server_addr).await.unwrap();
    send_raw(&udp, Packet::new(1, 1, flags::ACK, 1, b"payload".to_vec()), server_addr).await;
    assert_eq!(recv_raw(&udp).await.header.ack, 8);

    send_raw(&udp, Packet::control(8, 1, flags::FIN, 1), server_addr).await;
    assert!(recv_raw(&udp).await.header.has(flags::ACK | flags::FIN));

    let data = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(data, b"payload");
}

#[tokio::test]
async fn sender_gives_up_after_max_retries_and_sends_rst() {
    let raw = Socket::bind(loopback()).await.unwrap();
    let raw_addr = raw.local_addr;

    let cfg = Config {
        max_retries: Some(2),
        ..config(4, 100)
    };
    let mut client = Connection::bind(loopback(), cfg).await.unwrap();
    let client_task = tokio::spawn(async move {
        client.connect(raw_addr).await?;
        client.send_reliable(&pattern(3000), Protocol::GoBackN).await
    });

    // Answer the handshake, then go silent.
    let (syn, client_addr) = expect_from(&raw).await;
    assert!(syn.header.is_syn());
    raw.send_to(&Packet::control(0, 1, flags::SYN | flags::ACK, 1), client_addr)
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), client_task)
        .await
        .unwrap()
        .unwrap();
    assert!(
        matches!(result, Err(ConnError::MaxRetriesExceeded(2))),
        "got {result:?}"
    );

    // Drain what the client sent; the last packet is the RST.
    let mut last = None;
    loop {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(200);
        match raw.recv_until(deadline).await.unwrap() {
            RecvEvent::Packet { packet, .. } => last = Some(packet),
            RecvEvent::Timeout => break,
        }
    }
    assert!(last.expect("client sent nothing").header.is_rst());
}

#[tokio::test]
async fn receiver_stops_on_rst() {
    let mut server = Connection::bind(loopback(), config(1, 300)).await.unwrap();
    let server_addr = server.local_addr();
    let server_task = tokio::spawn(async move {
        server.listen().await?;
        server.receive_reliable(Protocol::SelectiveRepeat).await
    });

    let raw = Socket::bind(loopback()).await.unwrap();
    raw_connect(&raw, server_addr).await;
    raw.send_to(&Packet::control(1, 1, flags::RST, 1), server_addr)
        .await
        .unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(ConnError::Reset)), "got {result:?}");
}

#[tokio::test]
async fn receiver_gives_up_on_a_silent_peer() {
    let cfg = Config {
        max_retries: Some(2),
        ..config(1, 100)
    };
    let mut server = Connection::bind(loopback(), cfg).await.unwrap();
    let server_addr = server.local_addr();
    let server_task = tokio::spawn(async move {
        server.listen().await?;
        server.receive_reliable(Protocol::GoBackN).await
    });

    let raw = Socket::bind(loopback()).await.unwrap();
    raw_connect(&raw, server_addr).await;

    let result = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(ConnError::MaxRetriesExceeded(2))));
}

#[tokio::test]
async fn oversized_payload_config_is_rejected() {
    let cfg = Config {
        max_payload_size: 70_000,
        ..Config::default()
    };
    assert!(matches!(
        Connection::bind(loopback(), cfg).await,
        Err(ConnError::Config(_))
    ));
}
