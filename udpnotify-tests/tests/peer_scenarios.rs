//! End-to-end peer scenarios
//!
//! Every test runs real peers over loopback UDP. Datagrams on loopback are
//! delivered almost immediately; a short sleep before each update covers
//! scheduling jitter.

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};
use udpnotify::protocol::{CommandPacket, ConnectionError, NotifyHeader};
use udpnotify::{
    Config, ConnectionFailedReason, ConnectionState, DisconnectReason, Peer, PeerEvent,
};
use udpnotify_io::NotifySocket;

fn loopback() -> Config {
    Config::bound_to("127.0.0.1:0".parse().unwrap())
}

fn settle() {
    thread::sleep(Duration::from_millis(20));
}

fn events(peer: &mut Peer<u32>) -> Vec<PeerEvent<u32>> {
    peer.drain_events().collect()
}

/// Connect `client` to `server` and discard the handshake events
fn connect_pair(server_config: Config, client_config: Config) -> (Peer<u32>, Peer<u32>) {
    let mut server = Peer::bind(server_config).unwrap();
    let mut client = Peer::bind(client_config).unwrap();

    client.connect(server.local_addr()).unwrap();
    settle();
    server.update().unwrap();
    settle();
    client.update().unwrap();

    assert_eq!(
        events(&mut server),
        vec![PeerEvent::Connected {
            remote: client.local_addr()
        }]
    );
    assert_eq!(
        events(&mut client),
        vec![PeerEvent::Connected {
            remote: server.local_addr()
        }]
    );
    (server, client)
}

/// Update `peer` until an event matches or `limit` passes
fn wait_for(
    peer: &mut Peer<u32>,
    limit: Duration,
    matches: impl Fn(&PeerEvent<u32>) -> bool,
) -> Vec<PeerEvent<u32>> {
    let start = Instant::now();
    let mut seen = Vec::new();
    while start.elapsed() < limit {
        peer.update().unwrap();
        seen.extend(peer.drain_events());
        if seen.iter().any(&matches) {
            return seen;
        }
        thread::sleep(Duration::from_millis(10));
    }
    panic!("no matching event within {:?}, saw {:?}", limit, seen);
}

fn notify_datagram(sequence: u64, sequence_bytes: usize) -> Bytes {
    let header = NotifyHeader {
        sequence,
        recv_sequence: 0,
        recv_mask: 0,
    };
    let mut buf = BytesMut::new();
    header.write(&mut buf, sequence_bytes);
    buf.freeze()
}

#[test]
fn test_handshake_single_update_per_side() {
    let (server, client) = connect_pair(loopback(), loopback());

    let on_server = server.connection(client.local_addr()).unwrap();
    let on_client = client.connection(server.local_addr()).unwrap();
    assert_eq!(on_server.state(), ConnectionState::Connected);
    assert_eq!(on_client.state(), ConnectionState::Connected);
    assert_eq!(on_client.connection_attempts(), 1);
    assert_eq!(server.connection_count(), 1);
}

#[test]
fn test_notify_delivery_reports_rtt() {
    let (mut server, mut client) = connect_pair(loopback(), loopback());
    let server_addr = server.local_addr();
    let client_addr = client.local_addr();

    assert!(client.send_notify(server_addr, b"hello", Some(42)).unwrap());
    settle();
    server.update().unwrap();
    assert_eq!(
        events(&mut server),
        vec![PeerEvent::NotifyReceived {
            remote: client_addr,
            payload: Bytes::from_static(b"hello"),
        }]
    );

    // an empty notify carries the ack back
    assert!(server.send_notify(client_addr, &[], None).unwrap());
    settle();
    client.update().unwrap();
    assert_eq!(
        events(&mut client),
        vec![
            PeerEvent::NotifyDelivered {
                remote: server_addr,
                user_data: Some(42),
            },
            PeerEvent::NotifyReceived {
                remote: server_addr,
                payload: Bytes::new(),
            },
        ]
    );

    let connection = client.connection(server_addr).unwrap();
    assert!(connection.rtt() >= 0.0);
    assert_eq!(connection.rtt_estimator().sample_count(), 1);
    assert!(connection.send_window().is_empty());
    assert_eq!(connection.stats().notify_delivered, 1);
}

#[test]
fn test_dropped_notify_reported_lost() {
    let (mut server, mut client) = connect_pair(loopback(), loopback());
    let server_addr = server.local_addr();
    let client_addr = client.local_addr();

    server.set_simulated_loss(1.0).unwrap();
    assert!(client.send_notify(server_addr, b"first", Some(1)).unwrap());
    settle();
    server.update().unwrap();
    assert!(events(&mut server).is_empty());

    server.set_simulated_loss(0.0).unwrap();
    assert!(client.send_notify(server_addr, b"second", Some(2)).unwrap());
    settle();
    server.update().unwrap();
    assert_eq!(events(&mut server).len(), 1);

    assert!(server.send_notify(client_addr, &[], None).unwrap());
    settle();
    client.update().unwrap();
    assert_eq!(
        events(&mut client),
        vec![
            PeerEvent::NotifyLost {
                remote: server_addr,
                user_data: Some(1),
            },
            PeerEvent::NotifyDelivered {
                remote: server_addr,
                user_data: Some(2),
            },
            PeerEvent::NotifyReceived {
                remote: server_addr,
                payload: Bytes::new(),
            },
        ]
    );

    let stats = client.connection(server_addr).unwrap().stats();
    assert_eq!(stats.notify_lost, 1);
    assert_eq!(stats.notify_delivered, 1);
}

#[test]
fn test_full_send_window_backpressure() {
    let (server, mut client) = connect_pair(loopback(), loopback().with_send_window_size(4));
    let server_addr = server.local_addr();

    for i in 0..4 {
        assert!(client.send_notify(server_addr, b"x", Some(i)).unwrap());
    }
    let next = client
        .connection(server_addr)
        .unwrap()
        .send_sequencer()
        .peek();

    assert!(!client.send_notify(server_addr, b"x", Some(4)).unwrap());

    let connection = client.connection(server_addr).unwrap();
    assert_eq!(connection.send_window().len(), 4);
    assert_eq!(connection.send_sequencer().peek(), next);
}

#[test]
fn test_unreliable_both_directions() {
    let (mut server, mut client) = connect_pair(loopback(), loopback());
    let server_addr = server.local_addr();
    let client_addr = client.local_addr();

    assert!(client.send_unreliable(server_addr, b"up").unwrap());
    assert!(server.send_unreliable(client_addr, b"down").unwrap());
    settle();
    server.update().unwrap();
    client.update().unwrap();

    assert_eq!(
        events(&mut server),
        vec![PeerEvent::Unreliable {
            remote: client_addr,
            payload: Bytes::from_static(b"up"),
        }]
    );
    assert_eq!(
        events(&mut client),
        vec![PeerEvent::Unreliable {
            remote: server_addr,
            payload: Bytes::from_static(b"down"),
        }]
    );
}

#[test]
fn test_idle_connection_times_out() {
    let server_config = loopback()
        .with_connection_timeout(0.2)
        .with_keep_alive_interval(10.0);
    let client_config = loopback().with_keep_alive_interval(10.0);
    let (mut server, client) = connect_pair(server_config, client_config);
    let client_addr = client.local_addr();

    thread::sleep(Duration::from_millis(300));
    server.update().unwrap();

    assert_eq!(
        events(&mut server),
        vec![PeerEvent::Disconnected {
            remote: client_addr,
            reason: DisconnectReason::Timeout,
        }]
    );
    assert_eq!(
        server.connection(client_addr).map(|c| c.state()),
        Some(ConnectionState::Disconnected)
    );
}

#[test]
fn test_keepalives_hold_connection_open() {
    let config = loopback()
        .with_connection_timeout(0.3)
        .with_keep_alive_interval(0.05);
    let (mut server, mut client) = connect_pair(config.clone(), config);

    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(600) {
        server.update().unwrap();
        client.update().unwrap();
        thread::sleep(Duration::from_millis(20));
    }

    assert!(events(&mut server).is_empty());
    assert!(events(&mut client).is_empty());
    assert!(server.connection(client.local_addr()).unwrap().is_connected());
    assert!(client.connection(server.local_addr()).unwrap().is_connected());
}

#[test]
fn test_sequence_out_of_bounds_disconnects() {
    let (mut server, mut client) = connect_pair(loopback().with_send_window_size(32), loopback());
    let server_addr = server.local_addr();
    let client_addr = client.local_addr();

    client
        .send_unconnected(server_addr, &notify_datagram(100, 2))
        .unwrap();
    settle();
    server.update().unwrap();

    assert_eq!(
        events(&mut server),
        vec![PeerEvent::Disconnected {
            remote: client_addr,
            reason: DisconnectReason::SequenceOutOfBounds,
        }]
    );

    // the remote is told why
    settle();
    client.update().unwrap();
    assert_eq!(
        events(&mut client),
        vec![PeerEvent::Disconnected {
            remote: server_addr,
            reason: DisconnectReason::SequenceOutOfBounds,
        }]
    );
}

#[test]
fn test_duplicate_notify_dropped() {
    let (mut server, mut client) = connect_pair(loopback(), loopback());
    let server_addr = server.local_addr();
    let datagram = notify_datagram(1, 2);

    client.send_unconnected(server_addr, &datagram).unwrap();
    settle();
    server.update().unwrap();
    assert_eq!(events(&mut server).len(), 1);

    client.send_unconnected(server_addr, &datagram).unwrap();
    settle();
    server.update().unwrap();
    assert!(events(&mut server).is_empty());

    let connection = server.connection(client.local_addr()).unwrap();
    assert_eq!(connection.recv_sequence(), 1);
    assert_eq!(connection.stats().notify_stale, 1);
}

#[test]
fn test_server_full_refuses() {
    let (mut server, _first) = connect_pair(loopback().with_max_connections(1), loopback());
    let mut second: Peer<u32> = Peer::bind(loopback()).unwrap();
    let server_addr = server.local_addr();

    second.connect(server_addr).unwrap();
    settle();
    server.update().unwrap();
    settle();
    second.update().unwrap();

    assert_eq!(
        events(&mut second),
        vec![PeerEvent::ConnectionFailed {
            remote: server_addr,
            reason: ConnectionFailedReason::ServerFull,
        }]
    );
    assert_eq!(second.connection_count(), 0);
    assert_eq!(server.connection_count(), 1);
    assert!(events(&mut server).is_empty());
}

#[test]
fn test_connect_gives_up_after_max_attempts() {
    // bound but never read, so requests go unanswered
    let silent = NotifySocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let target = silent.local_addr().unwrap();

    let config = loopback()
        .with_connect_attempt_interval(0.02)
        .with_max_connect_attempts(3);
    let mut client: Peer<u32> = Peer::bind(config).unwrap();
    client.connect(target).unwrap();

    let seen = wait_for(&mut client, Duration::from_secs(2), |e| {
        matches!(e, PeerEvent::ConnectionFailed { .. })
    });

    assert_eq!(
        seen,
        vec![PeerEvent::ConnectionFailed {
            remote: target,
            reason: ConnectionFailedReason::Timeout,
        }]
    );
    assert_eq!(client.connection_count(), 0);
}

#[test]
fn test_disconnect_without_reason_byte_applied() {
    for datagram in [&[0u8, 4][..], &[0, 4, 9][..]] {
        let (mut server, mut client) = connect_pair(loopback(), loopback());
        let client_addr = client.local_addr();

        client.send_unconnected(server.local_addr(), datagram).unwrap();
        settle();
        server.update().unwrap();

        assert_eq!(
            events(&mut server),
            vec![PeerEvent::Disconnected {
                remote: client_addr,
                reason: DisconnectReason::Requested,
            }]
        );
        assert_eq!(
            server.connection(client_addr).map(|c| c.state()),
            Some(ConnectionState::Disconnected)
        );
    }
}

#[test]
fn test_refusal_without_reason_byte_fails_connect() {
    let fake_server = NotifySocket::bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let server_addr = fake_server.local_addr().unwrap();
    let mut client: Peer<u32> = Peer::bind(loopback()).unwrap();
    client.connect(server_addr).unwrap();
    settle();

    let mut buf = [0u8; 64];
    let (len, from) = fake_server.try_recv_from(&mut buf).unwrap().unwrap();
    assert_eq!(&buf[..len], &CommandPacket::ConnectRequest.to_bytes()[..]);
    fake_server.send_to(&[0, 3], from).unwrap();
    settle();
    client.update().unwrap();

    assert_eq!(
        events(&mut client),
        vec![PeerEvent::ConnectionFailed {
            remote: server_addr,
            reason: ConnectionFailedReason::Unspecified,
        }]
    );
    assert_eq!(client.connection_count(), 0);
}

#[test]
fn test_connect_retries_until_answered() {
    let mut server: Peer<u32> = Peer::bind(loopback()).unwrap();
    let config = loopback().with_connect_attempt_interval(0.02);
    let mut client: Peer<u32> = Peer::bind(config).unwrap();
    let server_addr = server.local_addr();

    // the first request is lost
    server.set_simulated_loss(1.0).unwrap();
    client.connect(server_addr).unwrap();
    settle();
    server.update().unwrap();
    server.set_simulated_loss(0.0).unwrap();

    let start = Instant::now();
    while !client.has_events() {
        assert!(start.elapsed() < Duration::from_secs(2));
        client.update().unwrap();
        thread::sleep(Duration::from_millis(10));
        server.update().unwrap();
        thread::sleep(Duration::from_millis(10));
    }

    assert_eq!(
        events(&mut client),
        vec![PeerEvent::Connected {
            remote: server_addr
        }]
    );
    assert!(client.connection(server_addr).unwrap().connection_attempts() >= 2);
}

#[test]
fn test_disconnect_then_idle_removal() {
    let config = loopback().with_disconnect_idle_time(0.1);
    let (mut server, mut client) = connect_pair(config.clone(), config);
    let server_addr = server.local_addr();
    let client_addr = client.local_addr();

    assert!(client.disconnect(server_addr).unwrap());
    assert_eq!(
        events(&mut client),
        vec![PeerEvent::Disconnected {
            remote: server_addr,
            reason: DisconnectReason::Requested,
        }]
    );
    assert!(!client.send_notify(server_addr, b"late", Some(1)).unwrap());
    assert!(!client.disconnect(server_addr).unwrap());

    settle();
    server.update().unwrap();
    assert_eq!(
        events(&mut server),
        vec![PeerEvent::Disconnected {
            remote: client_addr,
            reason: DisconnectReason::Requested,
        }]
    );

    thread::sleep(Duration::from_millis(150));
    server.update().unwrap();
    client.update().unwrap();
    assert_eq!(server.connection_count(), 0);
    assert_eq!(client.connection_count(), 0);
}

#[test]
fn test_simultaneous_connect_is_protocol_violation() {
    let mut a: Peer<u32> = Peer::bind(loopback()).unwrap();
    let mut b: Peer<u32> = Peer::bind(loopback()).unwrap();
    let a_addr = a.local_addr();
    let b_addr = b.local_addr();

    a.connect(b_addr).unwrap();
    b.connect(a_addr).unwrap();
    settle();
    a.update().unwrap();
    b.update().unwrap();

    let expected_error = ConnectionError::UnexpectedCommand {
        command: CommandPacket::ConnectRequest,
        state: ConnectionState::Connecting,
    };
    assert_eq!(
        events(&mut a),
        vec![PeerEvent::ProtocolViolation {
            remote: b_addr,
            error: expected_error.clone(),
        }]
    );
    assert_eq!(
        events(&mut b),
        vec![PeerEvent::ProtocolViolation {
            remote: a_addr,
            error: expected_error,
        }]
    );
    assert_eq!(a.connection_count(), 0);
    assert_eq!(b.connection_count(), 0);
}

#[test]
fn test_oversized_datagram_ignored() {
    let (mut server, mut client) = connect_pair(loopback().with_mtu(64), loopback());
    let server_addr: SocketAddr = server.local_addr();

    // the client allows bigger datagrams than the server accepts
    assert!(client.send_unreliable(server_addr, &[7u8; 100]).unwrap());
    settle();
    server.update().unwrap();

    assert!(events(&mut server).is_empty());
}
