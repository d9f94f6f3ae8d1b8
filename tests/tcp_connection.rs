use uaio::clock::TICKS_PER_MILLISECOND;
use uaio::{
    Connection, ConnectionConfig, ConnectionManager, Error, EventLoopBuilder, NetworkConfig,
};

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream as StdTcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn open_local(connection_config: ConnectionConfig) -> ConnectionManager {
    init_tracing();
    let network = NetworkConfig::new(0).with_address(Ipv4Addr::LOCALHOST);
    ConnectionManager::open(&network, connection_config).expect("open listener")
}

fn accept_one(manager: &ConnectionManager) -> Box<dyn Connection> {
    let mut accepted = Vec::new();
    let count = manager
        .accept_pending(|connection| accepted.push(connection))
        .expect("accept_pending");

    assert_eq!(count, 1, "expected exactly one pending connection");
    accepted.pop().unwrap()
}

#[test]
fn tcp_accept_and_round_trip() {
    let manager = open_local(ConnectionConfig::default());
    let port = manager.local_addr().port();
    assert_ne!(port, 0);

    let mut client = StdTcpStream::connect(("127.0.0.1", port)).expect("connect");
    let mut connection = accept_one(&manager);
    assert!(connection.handle().is_some());

    let payload: Vec<u8> = (0..=255u8).chain(b"opc.tcp".iter().copied()).collect();
    client.write_all(&payload).expect("client write");

    let mut received = Vec::new();
    while received.len() < payload.len() {
        let chunk = connection
            .receive(Duration::from_secs(1))
            .expect("receive");
        received.extend_from_slice(chunk);
    }
    assert_eq!(received, payload);

    connection.send(&received).expect("send");
    let mut echoed = vec![0u8; payload.len()];
    client.read_exact(&mut echoed).expect("client read");
    assert_eq!(echoed, payload);
}

#[test]
fn tcp_accept_pending_without_clients_accepts_nothing() {
    let manager = open_local(ConnectionConfig::default());
    let count = manager
        .accept_pending(|_| panic!("no client connected"))
        .expect("accept_pending");
    assert_eq!(count, 0);
}

#[test]
fn tcp_accept_pending_drains_every_waiting_client() {
    let manager = open_local(ConnectionConfig::default());
    let port = manager.local_addr().port();

    let clients: Vec<StdTcpStream> = (0..3)
        .map(|_| StdTcpStream::connect(("127.0.0.1", port)).expect("connect"))
        .collect();

    let mut accepted = Vec::new();
    let count = manager
        .accept_pending(|connection| accepted.push(connection))
        .expect("accept_pending");

    assert_eq!(count, 3);
    assert_eq!(accepted.len(), 3);
    drop(clients);
}

#[test]
fn tcp_peer_close_reports_connection_closed_repeatedly() {
    let manager = open_local(ConnectionConfig::default());
    let client = StdTcpStream::connect(manager.local_addr()).expect("connect");
    let mut connection = accept_one(&manager);

    drop(client);

    for _ in 0..2 {
        let result = connection.receive(Duration::from_secs(1));
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }
}

#[test]
fn tcp_receive_timeout_is_retryable() {
    let manager = open_local(ConnectionConfig::default());
    let mut client = StdTcpStream::connect(manager.local_addr()).expect("connect");
    let mut connection = accept_one(&manager);

    match connection.receive(Duration::from_millis(20)) {
        Err(err @ Error::Communication(_)) => assert!(err.is_retryable()),
        other => panic!("expected a communication error, got {other:?}"),
    }

    client.write_all(b"late").expect("client write");
    let data = connection
        .receive(Duration::from_secs(1))
        .expect("receive after timeout");
    assert_eq!(data, b"late");
}

#[test]
fn tcp_close_twice_is_noop() {
    let manager = open_local(ConnectionConfig::default());
    let _client = StdTcpStream::connect(manager.local_addr()).expect("connect");
    let mut connection = accept_one(&manager);

    connection.close();
    assert!(connection.handle().is_none());
    connection.close();
    assert!(connection.handle().is_none());

    assert!(matches!(connection.send(b"x"), Err(Error::ConnectionClosed)));
    assert!(matches!(
        connection.receive(Duration::ZERO),
        Err(Error::ConnectionClosed)
    ));
}

#[test]
fn tcp_receive_reads_at_most_the_negotiated_buffer() {
    let config = ConnectionConfig {
        recv_buffer_size: 4,
        ..ConnectionConfig::default()
    };
    let manager = open_local(config);
    let mut client = StdTcpStream::connect(manager.local_addr()).expect("connect");
    let mut connection = accept_one(&manager);
    assert_eq!(connection.config().recv_buffer_size, 4);

    client.write_all(b"0123456789").expect("client write");

    let first = connection
        .receive(Duration::from_secs(1))
        .expect("receive")
        .to_vec();
    assert_eq!(first, b"0123");
}

#[test]
fn tcp_send_buffer_respects_negotiated_size() {
    let config = ConnectionConfig {
        send_buffer_size: 8,
        ..ConnectionConfig::default()
    };
    let manager = open_local(config);
    let _client = StdTcpStream::connect(manager.local_addr()).expect("connect");
    let connection = accept_one(&manager);

    let buffer = connection.send_buffer(8).expect("send buffer");
    assert_eq!(buffer, vec![0u8; 8]);

    assert!(matches!(
        connection.send_buffer(9),
        Err(Error::Communication(_))
    ));
}

#[test]
fn tcp_set_config_rejects_zero_receive_buffer() {
    let manager = open_local(ConnectionConfig::default());
    let mut client = StdTcpStream::connect(manager.local_addr()).expect("connect");
    let mut connection = accept_one(&manager);

    let result = connection.set_config(ConnectionConfig {
        recv_buffer_size: 0,
        ..ConnectionConfig::default()
    });
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
    assert_eq!(
        connection.config().recv_buffer_size,
        ConnectionConfig::default().recv_buffer_size
    );

    client.write_all(b"hi").expect("client write");
    let data = connection
        .receive(Duration::from_secs(1))
        .expect("receive on a live socket");
    assert_eq!(data, b"hi");

    connection
        .set_config(ConnectionConfig {
            recv_buffer_size: 1,
            ..ConnectionConfig::default()
        })
        .expect("valid config");
    assert_eq!(connection.config().recv_buffer_size, 1);
}

#[test]
fn tcp_send_after_peer_close_is_connection_closed() {
    let manager = open_local(ConnectionConfig::default());
    let client = StdTcpStream::connect(manager.local_addr()).expect("connect");
    let mut connection = accept_one(&manager);

    drop(client);
    // The first write after the peer is gone draws a reset; whether it is
    // reported on this call or the next depends on timing.
    let _ = connection.send(b"x");
    thread::sleep(Duration::from_millis(50));

    let payload = vec![0u8; 1024 * 1024];
    for _ in 0..2 {
        assert!(matches!(
            connection.send(&payload),
            Err(Error::ConnectionClosed)
        ));
    }
}

#[test]
fn tcp_send_to_stalled_reader_times_out() {
    init_tracing();
    let network = NetworkConfig::new(0)
        .with_address(Ipv4Addr::LOCALHOST)
        .with_send_timeout(Duration::from_millis(50));
    let manager = ConnectionManager::open(&network, ConnectionConfig::default()).expect("open");
    // Connected but never read from.
    let _client = StdTcpStream::connect(manager.local_addr()).expect("connect");
    let mut connection = accept_one(&manager);

    let payload = vec![0u8; 64 * 1024 * 1024];
    let result = connection.send(&payload);
    assert!(matches!(result, Err(Error::ConnectionClosed)));
}

#[test]
fn tcp_send_large_payload_completes() {
    let manager = open_local(ConnectionConfig::default());
    let mut client = StdTcpStream::connect(manager.local_addr()).expect("connect");
    let mut connection = accept_one(&manager);

    let payload = vec![7u8; 4 * 1024 * 1024];
    let payload_len = payload.len();

    let reader = thread::spawn(move || {
        let mut buf = vec![0u8; payload_len];
        client.read_exact(&mut buf).expect("read_exact");
        buf
    });

    connection.send(&payload).expect("send");

    let received = reader.join().unwrap();
    assert_eq!(received.len(), payload_len);
    assert!(received.iter().all(|&b| b == 7));
}

#[test]
fn tcp_attached_listener_accepts_during_run() {
    let event_loop = EventLoopBuilder::new().build().expect("build");
    let manager = Arc::new(open_local(ConnectionConfig::default()));
    let accepted = Arc::new(Mutex::new(Vec::new()));

    let sink = accepted.clone();
    manager
        .attach(&event_loop, move |connection| {
            sink.lock().unwrap().push(connection)
        })
        .expect("attach");
    assert!(event_loop.is_registered(manager.listener_fd()));

    let mut client = StdTcpStream::connect(manager.local_addr()).expect("connect");

    for _ in 0..100 {
        event_loop.run(10 * TICKS_PER_MILLISECOND).expect("run");
        if !accepted.lock().unwrap().is_empty() {
            break;
        }
    }

    let mut connections = accepted.lock().unwrap();
    assert_eq!(connections.len(), 1);

    client.write_all(b"hello").expect("client write");
    let data = connections[0]
        .receive(Duration::from_secs(1))
        .expect("receive");
    assert_eq!(data, b"hello");

    manager.detach(&event_loop);
    assert!(!event_loop.is_registered(manager.listener_fd()));
}

#[test]
fn tcp_open_rejects_invalid_config() {
    init_tracing();
    let network = NetworkConfig::new(0)
        .with_address(Ipv4Addr::LOCALHOST)
        .with_backlog(0);
    let result = ConnectionManager::open(&network, ConnectionConfig::default());
    assert!(matches!(result, Err(Error::InvalidConfig(_))));

    let network = NetworkConfig::new(0).with_address(Ipv4Addr::LOCALHOST);
    let config = ConnectionConfig {
        recv_buffer_size: 0,
        ..ConnectionConfig::default()
    };
    let result = ConnectionManager::open(&network, config);
    assert!(matches!(result, Err(Error::InvalidConfig(_))));
}

#[test]
fn tcp_open_on_busy_port_fails() {
    let first = open_local(ConnectionConfig::default());
    let network = NetworkConfig::new(first.local_addr().port()).with_address(Ipv4Addr::LOCALHOST);

    let result = ConnectionManager::open(&network, ConnectionConfig::default());
    assert!(matches!(result, Err(Error::Communication(_))));
}
