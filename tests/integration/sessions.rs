//! Registration, status reporting, singleton mode, and protocol resilience.

use crate::*;
use std::io::{Read, Write};
use std::time::Duration;

/// Status reports the live client count, the caller's chunk count, and the
/// configuration text.
#[tokio::test(flavor = "multi_thread")]
async fn status_reports_clients_and_caller_chunks() {
    let daemon = spawn_daemon(false).await;
    let mut a = daemon.connect();
    let mut rec_a = Recorder::manual();

    a.send_status_request().unwrap();
    drain_until(&mut a, &mut rec_a, |r| r.statuses.len() == 1)
        .await
        .unwrap();
    assert_eq!(rec_a.statuses[0].num_clients, 1);
    assert_eq!(rec_a.statuses[0].num_chunks, 0);
    assert!(rec_a.statuses[0].info.contains("port:"));
    assert!(rec_a.statuses[0].info.contains("update rate:"));

    a.send_memory_push_start_request(8).unwrap();
    a.send_memory_push_start_request(8).unwrap();
    drain_until(&mut a, &mut rec_a, |r| r.push_starts.len() == 2)
        .await
        .unwrap();

    let _b = daemon.connect();
    pause().await;

    a.send_status_request().unwrap();
    drain_until(&mut a, &mut rec_a, |r| r.statuses.len() == 2)
        .await
        .unwrap();
    assert_eq!(rec_a.statuses[1].num_clients, 2);
    assert_eq!(rec_a.statuses[1].num_chunks, 2, "chunk count is per caller");
}

/// Scenario C: in singleton mode a second TCP connection completes but is
/// never registered and receives no replies; once the first client leaves, a
/// new connection is served.
#[tokio::test(flavor = "multi_thread")]
async fn singleton_serves_one_client_at_a_time() {
    let daemon = spawn_daemon(true).await;

    let mut a = daemon.connect();
    let mut rec_a = Recorder::manual();
    a.send_status_request().unwrap();
    drain_until(&mut a, &mut rec_a, |r| r.statuses.len() == 1)
        .await
        .unwrap();

    // B's handshake completes (the server flushes its backlog) but B is
    // rejected at the registration step and hears nothing.
    let mut b = daemon.connect();
    let mut rec_b = Recorder::manual();
    let _ = b.send_status_request();
    drain_for(&mut b, &mut rec_b, 200).await;
    assert!(rec_b.statuses.is_empty(), "B must not be served while A lives");

    // A leaves; its drop announces the shutdown.
    drop(a);
    pause().await;

    let mut c = daemon.connect();
    let mut rec_c = Recorder::manual();
    c.send_status_request().unwrap();
    drain_until(&mut c, &mut rec_c, |r| r.statuses.len() == 1)
        .await
        .unwrap();
    assert_eq!(rec_c.statuses[0].num_clients, 1);
}

/// An explicit shutdown unregisters the client; the next client sees a count
/// of one again.
#[tokio::test(flavor = "multi_thread")]
async fn shutdown_request_unregisters() {
    let daemon = spawn_daemon(false).await;

    let a = daemon.connect();
    pause().await;
    a.shutdown().unwrap();
    pause().await;

    let mut b = daemon.connect();
    let mut rec = Recorder::manual();
    b.send_status_request().unwrap();
    drain_until(&mut b, &mut rec, |r| r.statuses.len() == 1)
        .await
        .unwrap();
    assert_eq!(rec.statuses[0].num_clients, 1, "A must be unregistered");
}

/// An unknown packet id is logged and the buffered bytes are discarded, but
/// the connection survives and later requests are served.
#[tokio::test(flavor = "multi_thread")]
async fn unknown_packet_id_keeps_the_connection_open() {
    use depot_core::wire::{PacketId, Response};

    let daemon = spawn_daemon(false).await;
    let mut raw = std::net::TcpStream::connect(daemon.addr).unwrap();
    raw.set_nodelay(true).unwrap();
    raw.set_read_timeout(Some(Duration::from_secs(3))).unwrap();

    // Garbage id. The server logs it and clears its read buffer.
    raw.write_all(&[222u8]).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    // A valid status request in a later pass still gets its reply.
    raw.write_all(&[PacketId::StatusIn as u8]).unwrap();

    let mut wire = bytes::BytesMut::new();
    let mut chunk = [0u8; 2048];
    let reply = loop {
        let n = raw.read(&mut chunk).expect("connection must stay open");
        assert!(n > 0, "server must not close on a protocol violation");
        wire.extend_from_slice(&chunk[..n]);
        if let Some(reply) = Response::decode(&mut wire).unwrap() {
            break reply;
        }
    };
    match reply {
        Response::Status(status) => assert_eq!(status.num_clients, 1),
        other => panic!("expected StatusOut, got {other:?}"),
    }
}
