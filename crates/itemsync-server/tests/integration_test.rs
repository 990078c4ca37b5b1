//! Integration tests for the store, mutator and notification hub.
//!
//! These tests drive the server-side components together, mostly by
//! stepping hub cycles by hand so the outcome is deterministic.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

use itemsync_core::{ClockKind, LogicalClock, SyncConfig};
use itemsync_server::{
    ItemKey, ItemStore, MemoryStore, Mutator, NotificationHub, SyncServer, TickOutcome, Timestamp,
};

fn seeded_store(count: u32) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::seeded(
        Arc::new(LogicalClock::new()),
        (0..count).map(|k| (ItemKey(k), 0)),
    ))
}

#[test]
fn test_changed_since_matches_mutation_history() {
    let store = seeded_store(20);
    let mut mutator = Mutator::with_rng(store.clone(), 1_000, StdRng::seed_from_u64(11));

    let mut history: Vec<(ItemKey, Timestamp)> = Vec::new();
    for _ in 0..300 {
        let item = mutator.mutate_once().unwrap();
        history.push((item.key, item.updated_at));
    }

    // Probe every point in the history, plus both ends.
    let probes = std::iter::once(Timestamp::ZERO)
        .chain(history.iter().map(|(_, t)| *t))
        .chain(std::iter::once(store.now()));
    for t in probes {
        let mut expected: BTreeSet<ItemKey> = history
            .iter()
            .filter(|(_, stamp)| *stamp > t)
            .map(|(key, _)| *key)
            .collect();
        if t < Timestamp(20) {
            // Seeded items are stamped 1..=20.
            expected.extend((t.ticks() as u32..20).map(ItemKey));
        }
        assert_eq!(store.changed_since(t), expected, "probe at {t:?}");
    }
}

#[test]
fn test_broadcast_survives_saturated_subscriber() {
    let store = seeded_store(10);
    let hub = NotificationHub::new(store.clone(), 2);

    let mut stuck = hub.subscribe();
    let mut active: Vec<_> = (0..5).map(|_| hub.subscribe()).collect();

    for round in 0..10 {
        store.apply_mutation(ItemKey(round % 10), i64::from(round));
        let outcome = hub.notify_subscribers();
        assert!(matches!(outcome, TickOutcome::Broadcast { delivered, .. } if delivered >= 5));
        for sub in &mut active {
            assert!(sub.try_recv().is_ok());
        }
    }

    // The stuck subscriber holds its first two batches and missed the rest.
    assert!(stuck.try_recv().is_ok());
    assert!(stuck.try_recv().is_ok());
    assert!(stuck.try_recv().is_err());

    let stats = hub.statistics();
    assert_eq!(stats.dropped, 8);
    assert_eq!(stats.delivered, 52);
    assert_eq!(stats.subscribers, 6);
}

#[test]
fn test_mutation_scenario_through_hub() {
    let store = seeded_store(10);
    let hub = NotificationHub::new(store.clone(), 4);
    let mut sub = hub.subscribe();

    let t = Timestamp(store.now().ticks() + 1);
    store.apply_mutation(ItemKey(3), 42);

    assert!(store.changed_since(t.prev()).contains(&ItemKey(3)));
    let item = store.get(ItemKey(3)).unwrap();
    assert_eq!((item.key, item.value, item.updated_at), (ItemKey(3), 42, t));

    hub.notify_subscribers();
    let batch = sub.try_recv().unwrap();
    assert_eq!(batch.iter().collect::<Vec<_>>(), vec![ItemKey(3)]);
}

#[tokio::test(start_paused = true)]
async fn test_server_run_with_subscribers() {
    let config = SyncConfig {
        item_count: 5,
        clock: ClockKind::Logical,
        mutate_interval_ms: 5,
        notify_interval_ms: 20,
        queue_capacity: 100,
        ..SyncConfig::default()
    };
    let server = Arc::new(SyncServer::new(config));
    let mut subs: Vec<_> = (0..3).map(|_| server.subscribe()).collect();
    let shutdown = CancellationToken::new();

    let task = {
        let server = server.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.run(shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();
    task.await.unwrap().unwrap();

    let stats = server.statistics();
    assert!(stats.broadcasts > 0);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.subscribers, 0);

    // Every subscriber saw the same batches, then end of stream.
    let mut received = Vec::new();
    for sub in &mut subs {
        let mut batches = Vec::new();
        while let Some(batch) = sub.recv().await {
            batches.push(batch);
        }
        received.push(batches);
    }
    assert_eq!(received[0].len() as u64, stats.broadcasts);
    assert_eq!(received[0], received[1]);
    assert_eq!(received[1], received[2]);
}
