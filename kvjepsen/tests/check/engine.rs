//! Partitioning and termination of the actor engine.

use std::sync::Arc;

use kvjepsen::{
    ActorEngine, Aggregator, Durability, EngineSettings, InMemoryStore, KvStore, NullSink,
    Partition, UpdateStrategy,
};

fn settings(actors: usize, setsize: u64) -> EngineSettings {
    EngineSettings {
        key: "jepsen".to_string(),
        strategy: UpdateStrategy::CasMerge,
        durability: Durability::None,
        actors,
        setsize,
        channel_capacity: 4,
    }
}

#[test]
fn test_more_actors_than_elements() {
    let empty = Partition::new(6, 7, 3);
    assert!(empty.is_empty());
    assert_eq!(empty.indices().count(), 0);
}

#[tokio::test]
async fn test_engine_emits_one_report_per_element() {
    let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
    store
        .set("jepsen", b"{}".to_vec(), Durability::None)
        .await
        .unwrap();

    let mut running = ActorEngine::new(store, settings(3, 31)).spawn();
    // Capacity is far smaller than the workload: actors block on a full
    // channel until the aggregator drains it.
    let aggregation = Aggregator::new(3, NullSink)
        .collect(&mut running.reports)
        .await;

    assert_eq!(aggregation.received, 31);
    assert_eq!(aggregation.missing_actors, 0);
    assert_eq!(aggregation.reports.len(), 31);
    assert_eq!(aggregation.reports.acknowledged(), 31);
    for handle in running.handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn test_actors_with_empty_partitions_still_finish() {
    let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
    store
        .set("jepsen", b"{}".to_vec(), Durability::None)
        .await
        .unwrap();

    let mut running = ActorEngine::new(store, settings(8, 2)).spawn();
    let aggregation = Aggregator::new(8, NullSink)
        .collect(&mut running.reports)
        .await;
    assert_eq!(aggregation.received, 2);
    assert_eq!(aggregation.missing_actors, 0);
}
