//! Counter-mode reconciliation.

use std::sync::Arc;

use kvjepsen::{
    run_check, Analysis, CheckOptions, CounterAnalysis, InMemoryStore, KvStore, NullSink,
    StoreFaults, UpdateMode,
};

use crate::doubles::FlakyCounter;

fn options(actors: usize, setsize: u64) -> CheckOptions {
    CheckOptions {
        mode: UpdateMode::Incr,
        actors,
        setsize,
        ..CheckOptions::default()
    }
}

async fn check_counter(options: &CheckOptions, store: Arc<dyn KvStore>) -> CounterAnalysis {
    let outcome = run_check(options, store, NullSink).await.unwrap();
    match outcome.analysis {
        Analysis::Counter(counter) => counter,
        Analysis::Set(set) => panic!("expected counter analysis, got {set:?}"),
    }
}

#[tokio::test]
async fn test_failed_increments_are_missing_not_lost() {
    let store = Arc::new(FlakyCounter::new(3));
    let counter = check_counter(&options(2, 30), store.clone()).await;

    assert_eq!(store.failures(), 10);
    assert_eq!(counter.attempted, 30);
    assert_eq!(counter.acknowledged, 20);
    assert_eq!(counter.final_value, 20);
    assert_eq!(counter.missing(), store.failures());
    assert_eq!(counter.total_loss(), 0);
    assert_eq!(counter.phantom(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_increments_on_correct_store() {
    let counter = check_counter(&options(6, 600), Arc::new(InMemoryStore::new())).await;
    assert_eq!(counter.acknowledged, 600);
    assert_eq!(counter.final_value, 600);
    assert_eq!(counter.total_loss(), 0);
}

#[tokio::test]
async fn test_dropped_increments_never_exceed_acknowledged() {
    let store = InMemoryStore::with_faults(StoreFaults {
        phantom_write_probability: 0.25,
        seed: 3,
        ..StoreFaults::default()
    });
    let counter = check_counter(&options(3, 90), Arc::new(store)).await;

    assert_eq!(counter.attempted, 90);
    assert!(counter.final_value <= counter.acknowledged, "{counter}");
    assert_eq!(counter.phantom(), 0);
    assert_eq!(
        counter.total_loss(),
        counter.acknowledged - counter.final_value
    );
}
