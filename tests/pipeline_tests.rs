mod common;

use common::{Harness, fingerprint};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use ton_watcher::{
    event::MemoryPublisher,
    repo::WatchStore,
    utils::AccountAddress,
    watcher::{ProcessorSettings, Schedule, Watcher, listen_chain, warm_filter},
};

const LEFT: i64 = 0x4000_0000_0000_0000;
const RIGHT: i64 = -0x4000_0000_0000_0000;

fn watcher(h: &Harness, publisher: Arc<MemoryPublisher>) -> Watcher {
    Watcher::new(
        h.client.clone(),
        h.store.clone(),
        h.filter.clone(),
        publisher,
        None,
        ProcessorSettings::default(),
        Schedule {
            sync_interval: Duration::from_millis(20),
            process_interval: Duration::from_millis(20),
            lock_wait: Duration::ZERO,
        },
    )
}

#[tokio::test]
async fn test_discovery_then_processing_emits_matches_once() {
    let h = Harness::new();
    let publisher = Arc::new(MemoryPublisher::default());
    let w = watcher(&h, publisher.clone());
    let tracked = AccountAddress::new(0, fingerprint(1));
    h.tracking().add(&tracked).await.unwrap();

    // first sighting: only the tips are queued
    h.chain.advance(100, &[(LEFT, 50), (RIGHT, 70)]);
    let report = w.sync().step().await.unwrap();
    assert_eq!(report.inserted, 2);

    // three new blocks on the left shard, one of them touches the address
    h.chain.advance(101, &[(LEFT, 53), (RIGHT, 70)]);
    h.chain.add_transaction(LEFT, 52, fingerprint(1), 1_000);
    h.chain.add_transaction(LEFT, 52, fingerprint(2), 1_001);
    h.chain.add_transaction(LEFT, 53, fingerprint(3), 1_002);
    let report = w.sync().step().await.unwrap();
    assert_eq!(report.inserted, 3);
    assert_eq!(h.store.count_unprocessed().await.unwrap(), 5);

    let cancel = CancellationToken::new();
    let report = w.processor().step(&cancel).await.unwrap();
    assert_eq!(report.processed, 5);
    assert_eq!(report.events, 1);
    assert_eq!(h.store.count_unprocessed().await.unwrap(), 0);

    let events = publisher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].address, tracked);
    assert_eq!(events[0].seqno, 52);
    assert_eq!(events[0].shard, LEFT);
    assert_eq!(events[0].lt, 1_000);

    // nothing new on chain: no new work, no duplicate events
    w.sync().step().await.unwrap();
    let report = w.processor().step(&cancel).await.unwrap();
    assert_eq!(report.fetched, 0);
    assert_eq!(publisher.events().len(), 1);
}

#[tokio::test]
async fn test_disabled_address_stops_matching() {
    let h = Harness::new();
    let publisher = Arc::new(MemoryPublisher::default());
    let w = watcher(&h, publisher.clone());
    let tracked = AccountAddress::new(0, fingerprint(4));
    let tracking = h.tracking();
    tracking.add(&tracked).await.unwrap();

    h.chain.advance(10, &[(LEFT, 5)]);
    w.sync().step().await.unwrap();
    h.chain.advance(11, &[(LEFT, 6)]);
    h.chain.add_transaction(LEFT, 6, fingerprint(4), 77);
    tracking.disable(&tracked).await.unwrap();
    w.sync().step().await.unwrap();

    let report = w.processor().step(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.processed, 2);
    assert!(publisher.events().is_empty());
}

#[tokio::test]
async fn test_restart_rebuilds_filter_from_store() {
    let h = Harness::new();
    let tracked = AccountAddress::new(0, fingerprint(5));
    h.tracking().add(&tracked).await.unwrap();

    // a fresh process starts with an empty filter
    let cold = ton_watcher::filter::AddressFilter::new(1_000, 0.001);
    assert!(!cold.might_contain(&tracked.fingerprint));
    assert_eq!(warm_filter(h.store.as_ref(), &cold).await.unwrap(), 1);
    assert!(cold.might_contain(&tracked.fingerprint));
}

#[tokio::test]
async fn test_listen_chain_runs_until_cancelled() {
    let h = Harness::new();
    let publisher = Arc::new(MemoryPublisher::default());
    let tracked = AccountAddress::new(0, fingerprint(6));
    h.store
        .insert_tracked_address(0, &tracked.fingerprint)
        .await
        .unwrap();
    h.chain.advance(3, &[(LEFT, 9)]);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(listen_chain(
        watcher(&h, publisher.clone()),
        cancel.clone(),
    ));
    tokio::time::sleep(Duration::from_millis(150)).await;
    h.chain.add_transaction(LEFT, 10, fingerprint(6), 500);
    h.chain.advance(4, &[(LEFT, 10)]);
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();
    task.await.unwrap().unwrap();

    // the filter was warmed from the store, so the match was found
    let events = publisher.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].seqno, 10);
    assert_eq!(h.store.count_unprocessed().await.unwrap(), 0);
}
