//! Set-mode reconciliation against stores with known failure patterns.

use std::sync::Arc;
use std::time::Duration;

use kvjepsen::analysis::analyze_set;
use kvjepsen::{
    run_check, Analysis, CheckOptions, ConfigError, Durability, HarnessError, InMemoryStore,
    KvStore, NullSink, OpKind, Outcome, RemoteSet, Report, ReportSet, SetAnalysis, StoreError,
    StoreFaults, UpdateMode,
};

use crate::doubles::{NoDurability, OddElementsFail};

fn options(mode: UpdateMode, actors: usize, setsize: u64) -> CheckOptions {
    CheckOptions {
        mode,
        actors,
        setsize,
        ..CheckOptions::default()
    }
}

async fn check_set(options: &CheckOptions, store: Arc<dyn KvStore>) -> SetAnalysis {
    let outcome = run_check(options, store, NullSink).await.unwrap();
    match outcome.analysis {
        Analysis::Set(set) => set,
        Analysis::Counter(counter) => panic!("expected set analysis, got {counter:?}"),
    }
}

fn class_sum(set: &SetAnalysis) -> u64 {
    set.acknowledged_durable + set.acknowledged_lost + set.durable_unacknowledged + set.completely_lost
}

#[tokio::test]
async fn test_cas_on_correct_store_loses_nothing() {
    let set = check_set(
        &options(UpdateMode::Cas, 2, 10),
        Arc::new(InMemoryStore::new()),
    )
    .await;
    assert_eq!(set.acknowledged_durable, 10);
    assert_eq!(set.acknowledged_lost, 0);
    assert_eq!(set.durable_unacknowledged, 0);
    assert_eq!(set.completely_lost, 0);
    assert!(set.lost_elements.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cas_under_contention_loses_nothing() {
    let store = InMemoryStore::with_faults(StoreFaults::with_latency(Duration::from_micros(50)));
    let set = check_set(&options(UpdateMode::Cas, 8, 400), Arc::new(store)).await;
    assert_eq!(set.acknowledged_durable, 400);
    assert_eq!(set.total_loss(), 0);
}

#[tokio::test]
async fn test_rejected_odd_elements_are_completely_lost() {
    let set = check_set(
        &options(UpdateMode::Cas, 2, 10),
        Arc::new(OddElementsFail::new()),
    )
    .await;
    assert_eq!(set.acknowledged, 5);
    assert_eq!(set.acknowledged_durable, 5);
    assert_eq!(set.completely_lost, 5);
    assert_eq!(set.acknowledged_lost, 0);
    assert_eq!(set.total_loss(), 5);
    assert!(set.lost_elements.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_naive_updates_clobber_each_other() {
    let store = InMemoryStore::with_faults(StoreFaults::with_latency(Duration::from_millis(5)));
    let set = check_set(&options(UpdateMode::Naive, 4, 40), Arc::new(store)).await;

    // Every write is acknowledged, but concurrent read-modify-write cycles
    // overwrite each other.
    assert_eq!(set.acknowledged, 40);
    assert!(set.acknowledged_lost > 0, "{set}");
    assert_eq!(set.total_loss(), set.acknowledged_lost);
    assert_eq!(set.lost_elements.len() as u64, set.acknowledged_lost);
    assert_eq!(class_sum(&set), 40);
}

#[tokio::test]
async fn test_outcome_classes_partition_the_workload_under_faults() {
    for seed in [1, 7, 42] {
        let store = InMemoryStore::with_faults(StoreFaults {
            write_fault_probability: 0.1,
            ambiguous_fault_probability: 0.1,
            phantom_write_probability: 0.05,
            seed,
            ..StoreFaults::default()
        });
        let mut options = options(UpdateMode::Cas, 3, 150);
        options.final_read_backoff = Duration::from_millis(1);
        // A seed whose first roll rejects the initial write cannot run.
        let outcome = run_check(&options, Arc::new(store), NullSink).await;
        let set = match outcome {
            Ok(outcome) => match outcome.analysis {
                Analysis::Set(set) => set,
                Analysis::Counter(_) => unreachable!(),
            },
            Err(HarnessError::Initialize(_)) => continue,
            Err(other) => panic!("unexpected failure: {other}"),
        };

        assert_eq!(class_sum(&set), 150, "seed {seed}: {set}");
        assert_eq!(
            set.acknowledged,
            set.acknowledged_durable + set.acknowledged_lost
        );
        assert_eq!(set.lost_elements.len() as u64, set.acknowledged_lost);
    }
}

#[tokio::test]
async fn test_durability_request_on_unsupported_store_is_fatal() {
    let mut options = options(UpdateMode::Cas, 1, 1);
    options.durability = Durability::Persisted;
    let store = Arc::new(NoDurability::default());
    let result = run_check(&options, store.clone(), NullSink).await;
    assert!(matches!(
        result,
        Err(HarnessError::Config(ConfigError::DurabilityUnsupported { .. }))
    ));
    assert_eq!(store.get("jepsen").await.unwrap(), None);
}

#[test]
fn test_element_without_report_counts_as_unacknowledged() {
    let reports: ReportSet = [
        Report::observed(
            0,
            "0",
            OpKind::Update,
            Duration::ZERO,
            Duration::ZERO,
            Ok(()),
        ),
        Report::observed(
            0,
            "2",
            OpKind::Update,
            Duration::ZERO,
            Duration::ZERO,
            Err(StoreError::Unavailable),
        ),
    ]
    .into_iter()
    .collect();
    let remote: RemoteSet = ["0", "1"].into_iter().collect();

    let set = analyze_set(4, &reports, &remote);
    assert_eq!(set.count(Outcome::AcknowledgedDurable), 1);
    // "1" never reported but present; "3" never reported and absent.
    assert_eq!(set.count(Outcome::DurableUnacknowledged), 1);
    assert_eq!(set.count(Outcome::CompletelyLost), 2);
    assert_eq!(set.count(Outcome::AcknowledgedLost), 0);
}
