//! Chunk-id enumeration and reply pagination.

use crate::*;
use std::collections::BTreeSet;

/// An owner with no chunks still hears back: one page with zero ids.
#[tokio::test(flavor = "multi_thread")]
async fn empty_query_sends_one_empty_page() {
    let daemon = spawn_daemon(false).await;
    let mut client = daemon.connect();
    let mut rec = Recorder::manual();

    client.send_memory_query_request().unwrap();
    drain_until(&mut client, &mut rec, |r| !r.query_pages.is_empty())
        .await
        .unwrap();
    assert_eq!(rec.query_pages.len(), 1);
    assert!(rec.query_pages[0].is_empty());
}

/// 300 owned chunks paginate as exactly 255 + 45 ids whose union equals the
/// owned set with no duplicates.
#[tokio::test(flavor = "multi_thread")]
async fn query_of_300_chunks_arrives_as_two_pages() {
    let daemon = spawn_daemon(false).await;
    let mut client = daemon.connect();
    let mut rec = Recorder::manual();

    for _ in 0..300 {
        client.send_memory_push_start_request(0).unwrap();
    }
    drain_until(&mut client, &mut rec, |r| r.push_starts.len() == 300)
        .await
        .unwrap();

    client.send_memory_query_request().unwrap();
    drain_until(&mut client, &mut rec, |r| {
        r.query_pages.iter().map(Vec::len).sum::<usize>() >= 300
    })
    .await
    .unwrap();

    assert_eq!(rec.query_pages.len(), 2);
    assert_eq!(rec.query_pages[0].len(), 255);
    assert_eq!(rec.query_pages[1].len(), 45);

    let queried = rec.queried_ids();
    let unique: BTreeSet<_> = queried.iter().copied().collect();
    assert_eq!(unique.len(), 300, "no duplicates across pages");
    let owned: BTreeSet<_> = rec.push_starts.iter().copied().collect();
    assert_eq!(unique, owned, "pages must cover exactly the owned set");
}
