use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Error, Result};
use crate::registry::NodeRegistry;
use crate::roots::UniqueRoots;
use crate::store::AssignmentStore;

/// Which step of a pass an outcome came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Reconcile,
    Evict,
    Assign,
}

/// What a balance pass did with one partition.
///
/// A partition can appear more than once in a report, e.g. `Retained`, then
/// `Evicted`, then `Assigned` to a different worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The partition no longer represents a root of interest; assignment deleted.
    DeletedStaleRoot,
    /// The recorded worker is not registered; assignment deleted.
    DeletedDisconnected { worker_id: String },
    /// The entry disappeared between listing and reading it.
    Vanished,
    /// Valid assignment left in place.
    Retained { worker_id: String },
    /// Removed from an over-assigned worker.
    Evicted { worker_id: String },
    /// Newly assigned.
    Assigned { worker_id: String },
    /// A store operation failed; the partition is left alone until the next pass.
    Skipped { stage: Stage, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionOutcome {
    pub partition_id: String,
    pub outcome: Outcome,
}

/// Per-partition results of one [`Balancer::balance`] call, in the order
/// they happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BalanceReport {
    pub outcomes: Vec<PartitionOutcome>,
}

impl BalanceReport {
    fn record(&mut self, partition_id: &str, outcome: Outcome) {
        self.outcomes.push(PartitionOutcome {
            partition_id: partition_id.to_string(),
            outcome,
        });
    }

    /// Number of creates and deletes that reached the store.
    pub fn mutations(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| {
                matches!(
                    o.outcome,
                    Outcome::DeletedStaleRoot
                        | Outcome::DeletedDisconnected { .. }
                        | Outcome::Evicted { .. }
                        | Outcome::Assigned { .. }
                )
            })
            .count()
    }

    /// `(partition_id, worker_id)` for every assignment created in this pass.
    pub fn assigned(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Outcome::Assigned { worker_id } => Some((o.partition_id.as_str(), worker_id.as_str())),
            _ => None,
        })
    }

    pub fn evicted(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Outcome::Evicted { worker_id } => Some((o.partition_id.as_str(), worker_id.as_str())),
            _ => None,
        })
    }

    pub fn deleted(&self) -> impl Iterator<Item = &str> {
        self.outcomes.iter().filter_map(|o| match &o.outcome {
            Outcome::DeletedStaleRoot | Outcome::DeletedDisconnected { .. } => {
                Some(o.partition_id.as_str())
            }
            _ => None,
        })
    }

    pub fn skipped(&self) -> impl Iterator<Item = &PartitionOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Skipped { .. }))
    }
}

/// Live view of assignments for the duration of a single pass.
#[derive(Debug, Default)]
struct WorkingSet {
    partition_to_worker: HashMap<String, String>,
    worker_to_partitions: HashMap<String, Vec<String>>,
    /// Partitions we couldn't read or clean up. They stay as they are in the
    /// store and are not offered for new assignment this pass.
    unresolved: HashSet<String>,
}

impl WorkingSet {
    fn insert(&mut self, partition_id: &str, worker_id: &str) {
        self.partition_to_worker
            .insert(partition_id.to_string(), worker_id.to_string());
        self.worker_to_partitions
            .entry(worker_id.to_string())
            .or_default()
            .push(partition_id.to_string());
    }

    fn remove(&mut self, partition_id: &str) {
        if let Some(worker_id) = self.partition_to_worker.remove(partition_id) {
            if let Some(partitions) = self.worker_to_partitions.get_mut(&worker_id) {
                partitions.retain(|p| p != partition_id);
            }
        }
    }

    fn load_of(&self, worker_id: &str) -> usize {
        self.worker_to_partitions.get(worker_id).map_or(0, Vec::len)
    }

    fn is_claimed(&self, partition_id: &str) -> bool {
        self.partition_to_worker.contains_key(partition_id)
            || self.unresolved.contains(partition_id)
    }
}

/// Weighted fair assignment of unique roots to workers.
///
/// One call to [`balance`](Self::balance) reconciles the store against the
/// current registry and roots, evicts from over-assigned workers and hands
/// out unclaimed roots. Nothing is cached between calls, and nothing stops two
/// balancers from running against the same store at once: callers must make
/// sure there is a single writer (the service uses leader election).
pub struct Balancer<R> {
    rng: R,
}

impl Balancer<StdRng> {
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl<R: Rng + Send> Balancer<R> {
    /// `rng` picks which partition to evict from an over-assigned worker.
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Run one balance pass.
    ///
    /// Only a failure to list the current assignments is returned as an
    /// error, in which case nothing has been written. Every other store
    /// failure is logged, recorded as [`Outcome::Skipped`] and the pass goes on.
    pub async fn balance(
        &mut self,
        registry: &mut NodeRegistry,
        roots: &UniqueRoots,
        store: &dyn AssignmentStore,
    ) -> Result<BalanceReport> {
        let mut report = BalanceReport::default();

        if registry.is_empty() {
            tracing::debug!("no workers registered, nothing to balance");
            return Ok(report);
        }

        registry.compute_target_loads(roots.len());

        let mut working = reconcile(registry, roots, store, &mut report).await?;

        for worker in registry.iter_mut() {
            worker.current_load = working.load_of(&worker.id);
        }

        self.evict(registry, &mut working, store, &mut report).await;
        assign(registry, roots, &mut working, store, &mut report).await;

        Ok(report)
    }

    async fn evict(
        &mut self,
        registry: &mut NodeRegistry,
        working: &mut WorkingSet,
        store: &dyn AssignmentStore,
        report: &mut BalanceReport,
    ) {
        for worker in registry.iter_mut() {
            if !worker.is_over_assigned() {
                continue;
            }

            tracing::info!(
                worker_id = %worker.id,
                current_load = worker.current_load,
                target_load = worker.target_load,
                "worker is over its target load, unassigning work"
            );

            let mut candidates = working
                .worker_to_partitions
                .get(&worker.id)
                .cloned()
                .unwrap_or_default();

            while worker.current_load as f64 > worker.target_load && !candidates.is_empty() {
                let partition_id = candidates.swap_remove(self.rng.gen_range(0..candidates.len()));

                match store.delete_assignment(&partition_id).await {
                    Ok(()) | Err(Error::NotFound(_)) => {
                        working.remove(&partition_id);
                        worker.current_load -= 1;
                        tracing::info!(
                            partition_id = %partition_id,
                            worker_id = %worker.id,
                            "evicted flag assignment"
                        );
                        report.record(
                            &partition_id,
                            Outcome::Evicted {
                                worker_id: worker.id.clone(),
                            },
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            partition_id = %partition_id,
                            worker_id = %worker.id,
                            error = %e,
                            "failed to delete flag assignment during eviction"
                        );
                        report.record(
                            &partition_id,
                            Outcome::Skipped {
                                stage: Stage::Evict,
                                reason: e.to_string(),
                            },
                        );
                    }
                }
            }
        }
    }
}

/// Steps 1-2: sort every recorded assignment into stale, disconnected or live.
async fn reconcile(
    registry: &NodeRegistry,
    roots: &UniqueRoots,
    store: &dyn AssignmentStore,
    report: &mut BalanceReport,
) -> Result<WorkingSet> {
    let partitions = store.list_assigned_partitions().await.map_err(|e| {
        tracing::error!(error = %e, "failed to list flag assignments, aborting balance");
        Error::listing_failed(e)
    })?;

    let mut working = WorkingSet::default();

    for partition_id in partitions {
        if !roots.contains_partition(&partition_id) {
            match store.delete_assignment(&partition_id).await {
                Ok(()) | Err(Error::NotFound(_)) => {
                    tracing::info!(
                        partition_id = %partition_id,
                        "no longer a partition of interest, assignment deleted"
                    );
                    report.record(&partition_id, Outcome::DeletedStaleRoot);
                }
                Err(e) => {
                    tracing::warn!(
                        partition_id = %partition_id,
                        error = %e,
                        "failed to delete stale assignment"
                    );
                    report.record(&partition_id, skipped(Stage::Reconcile, &e));
                }
            }
            continue;
        }

        let worker_id = match store.read_assigned_worker(&partition_id).await {
            Ok(Some(worker_id)) => worker_id,
            Ok(None) => {
                tracing::debug!(
                    partition_id = %partition_id,
                    "assignment vanished before it could be read"
                );
                report.record(&partition_id, Outcome::Vanished);
                continue;
            }
            Err(e) => {
                tracing::warn!(
                    partition_id = %partition_id,
                    error = %e,
                    "failed to read current flag assignment"
                );
                working.unresolved.insert(partition_id.clone());
                report.record(&partition_id, skipped(Stage::Reconcile, &e));
                continue;
            }
        };

        if registry.contains(&worker_id) {
            working.insert(&partition_id, &worker_id);
            report.record(&partition_id, Outcome::Retained { worker_id });
            continue;
        }

        match store.delete_assignment(&partition_id).await {
            Ok(()) | Err(Error::NotFound(_)) => {
                tracing::info!(
                    partition_id = %partition_id,
                    worker_id = %worker_id,
                    "assigned worker is not connected, assignment deleted"
                );
                report.record(&partition_id, Outcome::DeletedDisconnected { worker_id });
            }
            Err(e) => {
                tracing::warn!(
                    partition_id = %partition_id,
                    worker_id = %worker_id,
                    error = %e,
                    "failed to delete assignment of disconnected worker"
                );
                working.unresolved.insert(partition_id.clone());
                report.record(&partition_id, skipped(Stage::Reconcile, &e));
            }
        }
    }

    Ok(working)
}

/// Step 5: every unclaimed root goes to the least relatively loaded worker.
async fn assign(
    registry: &mut NodeRegistry,
    roots: &UniqueRoots,
    working: &mut WorkingSet,
    store: &dyn AssignmentStore,
    report: &mut BalanceReport,
) {
    for root in roots.iter() {
        let partition_id = root.partition_id.as_str();
        if working.is_claimed(partition_id) {
            continue;
        }

        let Some(worker_id) = registry.least_relatively_loaded().map(|w| w.id.clone()) else {
            return;
        };

        match store.create_assignment(partition_id, &worker_id).await {
            Ok(()) => {
                tracing::info!(
                    partition_id = %partition_id,
                    worker_id = %worker_id,
                    root = %root.root,
                    "flag propagation assigned"
                );
                working.insert(partition_id, &worker_id);
                if let Some(worker) = registry.get_mut(&worker_id) {
                    worker.current_load += 1;
                }
                report.record(partition_id, Outcome::Assigned { worker_id });
            }
            Err(e) => {
                tracing::warn!(
                    partition_id = %partition_id,
                    worker_id = %worker_id,
                    error = %e,
                    "failed to create flag assignment"
                );
                report.record(partition_id, skipped(Stage::Assign, &e));
            }
        }
    }
}

fn skipped(stage: Stage, e: &Error) -> Outcome {
    Outcome::Skipped {
        stage,
        reason: e.to_string(),
    }
}
