//! End-to-end scenarios driving `Connection` as a mock server would:
//! connect a session, observe its outgoing request on `poll_io`, feed a
//! canned response through `receive`, and check the resulting stats/events.

use std::time::Instant;

use kvload_proto::connection::Connection;
use kvload_proto::event::{Event, Io};
use kvload_proto::generator::{FixedGenerator, SequentialKeyGenerator};
use kvload_proto::options::Options;
use kvload_proto::stats::ConnectionStats;
use kvload_proto::OpType;

fn logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

/// Connect a single-session `Connection` and drain the setup `Io`, returning
/// the `Connection` ready to `start()`.
fn connect(options: Options, keysize: usize, valuesize: f64) -> Connection {
    let mut conn = Connection::new(
        logger(),
        options,
        "127.0.0.1:11211",
        11211,
        Box::new(SequentialKeyGenerator { key_len: keysize }),
        Box::new(FixedGenerator(valuesize)),
        Box::new(FixedGenerator(0.0)),
        Box::new(ConnectionStats::new(16)),
    )
    .unwrap();
    let now = Instant::now();
    conn.session_connected(1, now).unwrap();
    while conn.poll_io().is_some() {}
    assert!(conn.is_ready());
    conn
}

/// Pull the first `Io::Transmit` payload queued for `session`.
fn next_transmit(conn: &mut Connection, session: usize) -> Vec<u8> {
    loop {
        match conn.poll_io().expect("expected a pending Io::Transmit") {
            Io::Transmit { session: s, data } if s == session => return data.to_vec(),
            _ => continue,
        }
    }
}

#[test]
fn ascii_hit() {
    let options = Options {
        records: 1,
        depth: 1,
        update: 0.0,
        time: 0.1,
        ..Options::default()
    };
    let mut conn = connect(options, 1, 0.0);
    let now = Instant::now();
    conn.start(now);

    let request = next_transmit(&mut conn, 1);
    assert_eq!(request, b"get 0\r\n");

    conn.receive(1, b"VALUE k 0 3\r\nval\r\nEND\r\n", now).unwrap();

    assert_eq!(conn.stats().gets(), 1);
    assert_eq!(conn.stats().get_misses(), 0);
    // `examples/original_source/Protocol.cc`'s own byte accounting for this
    // exact response totals 23, not the 24 a naive reading of spec.md §8
    // scenario 1 would suggest — see DESIGN.md.
    assert_eq!(conn.stats().rx_bytes(), 23);

    let completed = std::iter::from_fn(|| conn.poll_event())
        .find(|e| matches!(e, Event::OperationCompleted { .. }));
    match completed {
        Some(Event::OperationCompleted { op, .. }) => assert_eq!(op.ty, OpType::Get),
        _ => panic!("expected an OperationCompleted event"),
    }
}

#[test]
fn ascii_miss() {
    let options = Options {
        records: 1,
        depth: 1,
        update: 0.0,
        time: 0.1,
        ..Options::default()
    };
    let mut conn = connect(options, 1, 0.0);
    let now = Instant::now();
    conn.start(now);
    next_transmit(&mut conn, 1);

    conn.receive(1, b"END\r\n", now).unwrap();

    assert_eq!(conn.stats().gets(), 1);
    assert_eq!(conn.stats().get_misses(), 1);
}

#[test]
fn binary_set() {
    let options = Options {
        records: 1,
        update: 1.0,
        binary: true,
        ..Options::default()
    };
    let mut conn = connect(options, 1, 4.0);
    let now = Instant::now();
    conn.start(now);

    let request = next_transmit(&mut conn, 1);
    assert_eq!(request.len(), 24 + 1 + 8 + 4);
    assert_eq!(request[1], 0x01); // SET opcode
    assert_eq!(&request[2..4], &[0x00, 0x01]); // key_len = 1
    assert_eq!(request[4], 8); // extras_len
    assert_eq!(&request[8..12], &[0x00, 0x00, 0x00, (1 + 8 + 4)]); // body_len

    let mut response = vec![0u8; 24];
    response[0] = 0x80;
    response[1] = 0x01; // SET opcode
    conn.receive(1, &response, now).unwrap();

    assert_eq!(conn.stats().sets(), 1);
    assert_eq!(conn.stats().get_misses(), 0);
}

#[test]
fn http_content_length_framing() {
    let options = Options {
        records: 1,
        update: 0.0,
        http: true,
        ..Options::default()
    };
    let mut conn = connect(options, 1, 0.0);
    let now = Instant::now();
    conn.start(now);
    next_transmit(&mut conn, 1);

    conn.receive(
        1,
        b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello",
        now,
    )
    .unwrap();

    assert_eq!(conn.stats().gets(), 1);
    assert_eq!(conn.stats().rx_bytes(), 41);
}

#[test]
fn etcd_leader_change() {
    let options = Options {
        records: 1,
        update: 0.0,
        etcd: true,
        ..Options::default()
    };
    let mut conn = Connection::new(
        logger(),
        options,
        "a:1|b:2|c:3",
        2379,
        Box::new(SequentialKeyGenerator { key_len: 1 }),
        Box::new(FixedGenerator(0.0)),
        Box::new(FixedGenerator(0.0)),
        Box::new(ConnectionStats::new(16)),
    )
    .unwrap();
    let now = Instant::now();
    for session in 1..=3 {
        conn.session_connected(session, now).unwrap();
    }
    while conn.poll_io().is_some() {}
    assert_eq!(conn.get_leader(), 1);

    conn.start(now);
    next_transmit(&mut conn, 1);

    conn.receive(
        1,
        b"HTTP/1.1 424 status code 424\r\nX-Raft-Leader: 2\r\n\r\n0\r\n\r\n",
        now,
    )
    .unwrap();

    assert_eq!(conn.stats().get_misses(), 1);
    assert_eq!(conn.get_leader(), 2);

    let switched = std::iter::from_fn(|| conn.poll_event()).find_map(|e| match e {
        Event::OperationCompleted { op, .. } => Some(op.switched),
        _ => None,
    });
    assert_eq!(switched, Some(1));

    // Steady state now issues against the new leader.
    let request = next_transmit(&mut conn, 2);
    assert!(request.starts_with(b"GET /v2/keys/test/"));
}

#[test]
fn skip_compensation_bounds_queue_depth() {
    let options = Options {
        records: 1_000,
        lambda: 1_000_000.0,
        depth: 2,
        skip: true,
        update: 0.0,
        ..Options::default()
    };
    let mut conn = Connection::new(
        logger(),
        options,
        "127.0.0.1:11211",
        11211,
        Box::new(SequentialKeyGenerator { key_len: 4 }),
        Box::new(FixedGenerator(0.0)),
        Box::new(kvload_proto::generator::ExponentialGenerator { lambda: 1_000_000.0 }),
        Box::new(ConnectionStats::new(0)),
    )
    .unwrap();
    let start = Instant::now();
    conn.session_connected(1, start).unwrap();
    while conn.poll_io().is_some() {}
    conn.start(start);

    let mut outstanding: i64 = 0;
    let mut max_outstanding: i64 = 0;
    let mut drain = |conn: &mut Connection, outstanding: &mut i64| {
        while let Some(item) = conn.poll_io() {
            if matches!(item, Io::Transmit { .. }) {
                *outstanding += 1;
                max_outstanding = max_outstanding.max(*outstanding);
            }
        }
    };
    drain(&mut conn, &mut outstanding);

    // Simulate a 50ms-stalled mock server: advance the clock well past
    // every pacing deadline before the first response ever arrives, then
    // let the pacing machine catch up via skip-compensation rather than
    // queuing unboundedly.
    let stalled = start + std::time::Duration::from_millis(50);
    conn.timeout(stalled);
    drain(&mut conn, &mut outstanding);

    assert!(conn.stats().skips() > 0);

    conn.receive(1, b"END\r\n", stalled).unwrap();
    outstanding -= 1;
    drain(&mut conn, &mut outstanding);
    conn.receive(1, b"END\r\n", stalled).unwrap();
    outstanding -= 1;
    drain(&mut conn, &mut outstanding);

    // Never more than `depth` requests outstanding at once.
    assert!(max_outstanding <= 2);
}
