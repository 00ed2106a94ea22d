//! Owner enforcement across client connections.

use crate::*;

/// Scenario B: client B pushes into A's chunk; the server drops the request
/// and A's subsequent read sees the chunk unchanged.
#[tokio::test(flavor = "multi_thread")]
async fn foreign_push_never_mutates() {
    let daemon = spawn_daemon(false).await;
    let mut a = daemon.connect();
    let mut rec_a = Recorder::auto();

    a.send_memory_push_start_request(64).unwrap();
    drain_until(&mut a, &mut rec_a, |r| r.push_starts.len() == 1)
        .await
        .unwrap();
    let id = rec_a.push_starts[0];
    a.send_memory_push_segment_request(id, 64, 0, b"owned by A")
        .unwrap();
    pause().await;

    let mut b = daemon.connect();
    let mut rec_b = Recorder::manual();
    b.send_memory_push_segment_request(id, 64, 0, b"intruder!!")
        .unwrap();
    pause().await;
    // Push is fire-and-forget; failure produces no reply of any kind.
    drain_for(&mut b, &mut rec_b, 100).await;
    assert!(rec_b.statuses.is_empty() && rec_b.pull_starts.is_empty());

    a.send_memory_pull_start_request(id).unwrap();
    drain_until(&mut a, &mut rec_a, |r| r.pull_complete())
        .await
        .unwrap();
    assert_eq!(&rec_a.assembled[..10], b"owned by A");
}

/// A foreign drop returns the reference's silent no-op: the chunk stays
/// queryable and readable by its owner.
#[tokio::test(flavor = "multi_thread")]
async fn foreign_drop_leaves_chunk_queryable() {
    let daemon = spawn_daemon(false).await;
    let mut a = daemon.connect();
    let mut rec_a = Recorder::auto();

    a.send_memory_push_start_request(32).unwrap();
    drain_until(&mut a, &mut rec_a, |r| r.push_starts.len() == 1)
        .await
        .unwrap();
    let id = rec_a.push_starts[0];

    let mut b = daemon.connect();
    b.send_memory_drop_request(id).unwrap();
    pause().await;

    a.send_memory_query_request().unwrap();
    drain_until(&mut a, &mut rec_a, |r| !r.query_pages.is_empty())
        .await
        .unwrap();
    assert_eq!(rec_a.queried_ids(), vec![id]);

    a.send_memory_pull_start_request(id).unwrap();
    drain_until(&mut a, &mut rec_a, |r| r.pull_complete())
        .await
        .unwrap();
    assert_eq!(rec_a.assembled.len(), 32);
}

/// A pull start on someone else's chunk reads as size 0 on the wire.
#[tokio::test(flavor = "multi_thread")]
async fn foreign_pull_start_announces_zero() {
    let daemon = spawn_daemon(false).await;
    let mut a = daemon.connect();
    let mut rec_a = Recorder::manual();

    a.send_memory_push_start_request(512).unwrap();
    drain_until(&mut a, &mut rec_a, |r| r.push_starts.len() == 1)
        .await
        .unwrap();
    let id = rec_a.push_starts[0];

    let mut b = daemon.connect();
    let mut rec_b = Recorder::manual();
    b.send_memory_pull_start_request(id).unwrap();
    drain_until(&mut b, &mut rec_b, |r| r.pull_starts.len() == 1)
        .await
        .unwrap();
    assert_eq!(rec_b.pull_starts, vec![0]);
}

/// Drop with the reserved id 0 purges exactly the caller's chunks.
#[tokio::test(flavor = "multi_thread")]
async fn drop_all_purges_only_the_caller() {
    let daemon = spawn_daemon(false).await;
    let mut a = daemon.connect();
    let mut b = daemon.connect();
    let mut rec_a = Recorder::manual();
    let mut rec_b = Recorder::manual();

    for _ in 0..3 {
        a.send_memory_push_start_request(8).unwrap();
    }
    for _ in 0..2 {
        b.send_memory_push_start_request(8).unwrap();
    }
    drain_until(&mut a, &mut rec_a, |r| r.push_starts.len() == 3)
        .await
        .unwrap();
    drain_until(&mut b, &mut rec_b, |r| r.push_starts.len() == 2)
        .await
        .unwrap();

    a.send_memory_drop_request(depot_core::wire::CHUNK_ID_ALL)
        .unwrap();
    pause().await;

    a.send_memory_query_request().unwrap();
    drain_until(&mut a, &mut rec_a, |r| !r.query_pages.is_empty())
        .await
        .unwrap();
    assert!(rec_a.queried_ids().is_empty(), "A's chunks must be gone");

    b.send_memory_query_request().unwrap();
    drain_until(&mut b, &mut rec_b, |r| !r.query_pages.is_empty())
        .await
        .unwrap();
    assert_eq!(rec_b.queried_ids(), rec_b.push_starts, "B's chunks must survive");
}
