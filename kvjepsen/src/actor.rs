//! Actor engine: concurrent workers racing against the shared value.
//!
//! The element space `[0, setsize)` is split with a fixed stride: actor `i`
//! owns `i, i + actors, i + 2 * actors, ...`. Each actor attempts every owned
//! element exactly once, pushes one [`Report`] per attempt onto the shared
//! channel, then pushes a single terminal report and exits.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::report::{OpKind, Report};
use crate::store::{Durability, KvStore};
use crate::strategy::{UpdateStrategy, Updater};

/// Elements owned by one actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    actor: usize,
    actors: usize,
    size: u64,
}

impl Partition {
    /// Partition of `[0, size)` owned by `actor` out of `actors`.
    pub fn new(actor: usize, actors: usize, size: u64) -> Self {
        assert!(actors > 0, "partition needs at least one actor");
        Self {
            actor,
            actors,
            size,
        }
    }

    /// Actor that owns `index`.
    pub fn owner(index: u64, actors: usize) -> usize {
        (index % actors as u64) as usize
    }

    /// Owned indices in ascending order.
    pub fn indices(&self) -> impl Iterator<Item = u64> {
        (self.actor as u64..self.size).step_by(self.actors)
    }

    /// Number of owned indices.
    pub fn len(&self) -> u64 {
        let start = self.actor as u64;
        if start >= self.size {
            0
        } else {
            (self.size - start).div_ceil(self.actors as u64)
        }
    }

    /// Check if the actor owns nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Settings shared by all actors of one run.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Key of the shared value.
    pub key: String,
    /// Strategy every actor uses.
    pub strategy: UpdateStrategy,
    /// Durability requested for every write.
    pub durability: Durability,
    /// Number of actors.
    pub actors: usize,
    /// Size of the element space.
    pub setsize: u64,
    /// Capacity of the report channel.
    pub channel_capacity: usize,
}

/// Handles to a running set of actors.
#[derive(Debug)]
pub struct RunningActors {
    /// Shared report stream.
    pub reports: mpsc::Receiver<Report>,
    /// One handle per actor, indexed by actor id.
    pub handles: Vec<JoinHandle<()>>,
    /// Instant all report timestamps are relative to.
    pub started: Instant,
}

/// Spawns one task per actor.
pub struct ActorEngine {
    store: Arc<dyn KvStore>,
    settings: EngineSettings,
}

impl ActorEngine {
    /// Create an engine over `store`.
    pub fn new(store: Arc<dyn KvStore>, settings: EngineSettings) -> Self {
        Self { store, settings }
    }

    /// Settings in use.
    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Spawn every actor on the current tokio runtime.
    ///
    /// The engine keeps no sender: once all actors have exited the channel
    /// closes on its own.
    pub fn spawn(&self) -> RunningActors {
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let started = Instant::now();
        let handles = (0..self.settings.actors)
            .map(|actor| {
                tracing::info!(actor, "starting actor");
                let partition = Partition::new(actor, self.settings.actors, self.settings.setsize);
                let updater = Updater::new(
                    self.store.clone(),
                    self.settings.key.clone(),
                    self.settings.strategy,
                    self.settings.durability,
                );
                tokio::spawn(run_actor(actor, partition, updater, tx.clone(), started))
            })
            .collect();

        RunningActors {
            reports: rx,
            handles,
            started,
        }
    }
}

/// Attempt every element of `partition`, then signal completion.
pub async fn run_actor(
    actor: usize,
    partition: Partition,
    mut updater: Updater,
    out: mpsc::Sender<Report>,
    started: Instant,
) {
    for index in partition.indices() {
        let element = index.to_string();
        let begin = Instant::now();
        let attempt = updater.attempt(&element).await;
        let end = Instant::now();

        if let Some(error) = &attempt.error {
            tracing::debug!(actor, element = %element, %error, "update not acknowledged");
        }
        let report = Report::observed(
            actor,
            element,
            OpKind::Update,
            end.duration_since(started),
            end.duration_since(begin),
            attempt.into_result(),
        );
        if out.send(report).await.is_err() {
            tracing::warn!(actor, "report channel closed, stopping early");
            return;
        }
    }

    if out.send(Report::done(actor)).await.is_err() {
        tracing::warn!(actor, "report channel closed before terminal report");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::store::InMemoryStore;

    #[test]
    fn test_partition_covers_space_exactly_once() {
        for actors in 1..=7usize {
            for size in [0u64, 1, 2, 10, 13, 100] {
                let mut seen = HashSet::new();
                for actor in 0..actors {
                    let partition = Partition::new(actor, actors, size);
                    let indices: Vec<u64> = partition.indices().collect();
                    assert_eq!(indices.len() as u64, partition.len());
                    for index in indices {
                        assert_eq!(Partition::owner(index, actors), actor);
                        assert!(seen.insert(index), "index {index} assigned twice");
                    }
                }
                assert_eq!(seen.len() as u64, size);
            }
        }
    }

    #[test]
    fn test_partition_stride() {
        let partition = Partition::new(1, 3, 10);
        assert_eq!(partition.indices().collect::<Vec<_>>(), vec![1, 4, 7]);
        assert!(Partition::new(5, 6, 3).is_empty());
    }

    #[tokio::test]
    async fn test_actor_emits_one_report_per_element_then_done() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        store
            .set("k", b"{}".to_vec(), Durability::None)
            .await
            .unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let updater = Updater::new(store, "k", UpdateStrategy::CasMerge, Durability::None);

        run_actor(1, Partition::new(1, 2, 7), updater, tx, Instant::now()).await;

        let mut elements = Vec::new();
        let mut done = 0;
        while let Some(report) = rx.recv().await {
            assert_eq!(report.actor, 1);
            if report.done {
                done += 1;
                assert_eq!(elements.len(), 3, "terminal report must come last");
            } else {
                assert!(report.ack);
                elements.push(report.element);
            }
        }
        assert_eq!(done, 1);
        assert_eq!(elements, vec!["1", "3", "5"]);
    }

    #[tokio::test]
    async fn test_engine_spawns_all_actors() {
        let store: Arc<dyn KvStore> = Arc::new(InMemoryStore::new());
        store.set("c", b"0".to_vec(), Durability::None).await.unwrap();
        let engine = ActorEngine::new(
            store.clone(),
            EngineSettings {
                key: "c".to_string(),
                strategy: UpdateStrategy::AtomicIncrement,
                durability: Durability::None,
                actors: 4,
                setsize: 50,
                channel_capacity: 8,
            },
        );

        let mut running = engine.spawn();
        assert_eq!(running.handles.len(), 4);
        let mut updates = 0;
        let mut done = 0;
        while let Some(report) = running.reports.recv().await {
            if report.done {
                done += 1;
            } else {
                updates += 1;
            }
        }
        assert_eq!((updates, done), (50, 4));
        assert_eq!(store.get("c").await.unwrap(), Some(b"50".to_vec()));
    }
}
