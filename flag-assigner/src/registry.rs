use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::RegisteredWorker;

/// A connected worker as seen by one balance pass.
///
/// `current_load` and `target_load` are overwritten by every
/// [`Balancer::balance`](crate::balancer::Balancer::balance) call and carry no
/// meaning between calls.
#[derive(Debug, Clone, PartialEq)]
pub struct Worker {
    pub id: String,
    pub weight: u32,
    pub current_load: usize,
    pub target_load: f64,
}

impl Worker {
    pub fn new(id: impl Into<String>, weight: u32) -> Self {
        Self {
            id: id.into(),
            weight,
            current_load: 0,
            target_load: 0.0,
        }
    }

    /// `current_load / target_load`, with a zero target counting as infinitely
    /// loaded so a worker without a share never wins a new assignment over one
    /// that has a share.
    pub fn relative_load(&self) -> f64 {
        if self.target_load > 0.0 {
            self.current_load as f64 / self.target_load
        } else {
            f64::INFINITY
        }
    }

    /// Over its share by at least one whole partition.
    pub fn is_over_assigned(&self) -> bool {
        self.current_load as f64 >= self.target_load + 1.0
    }
}

/// The workers currently connected to the fleet, keyed and iterated by id.
///
/// Membership is owned by whoever builds the registry; the balancer only
/// annotates loads.
#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    workers: BTreeMap<String, Worker>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from `(id, weight)` pairs.
    pub fn from_weights<I, S>(weights: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut registry = Self::new();
        for (id, weight) in weights {
            registry.insert(id, weight)?;
        }
        Ok(registry)
    }

    /// Build a registry from workers registered in etcd, skipping any that
    /// advertise a zero weight.
    pub fn from_registered(workers: &[RegisteredWorker]) -> Self {
        let mut registry = Self::new();
        for worker in workers {
            if let Err(e) = registry.insert(worker.worker_id.clone(), worker.weight) {
                tracing::warn!(worker_id = %worker.worker_id, error = %e, "ignoring worker");
            }
        }
        registry
    }

    /// Add a worker, replacing any previous entry with the same id.
    pub fn insert(&mut self, id: impl Into<String>, weight: u32) -> Result<()> {
        let id = id.into();
        if weight == 0 {
            return Err(Error::InvalidWeight { worker_id: id });
        }
        self.workers.insert(id.clone(), Worker::new(id, weight));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Worker> {
        self.workers.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Worker> {
        self.workers.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.workers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Worker> {
        self.workers.values_mut()
    }

    pub fn total_weight(&self) -> u64 {
        self.workers.values().map(|w| u64::from(w.weight)).sum()
    }

    /// Give every worker its weighted share of `root_count` partitions.
    pub fn compute_target_loads(&mut self, root_count: usize) {
        let total_weight = self.total_weight();
        if total_weight == 0 {
            return;
        }
        for worker in self.workers.values_mut() {
            worker.target_load =
                root_count as f64 * (f64::from(worker.weight) / total_weight as f64);
        }
    }

    /// The worker with the smallest [`Worker::relative_load`]. Ties go to the
    /// worker that sorts first by id.
    pub fn least_relatively_loaded(&self) -> Option<&Worker> {
        self.workers
            .values()
            .min_by(|a, b| a.relative_load().total_cmp(&b.relative_load()))
    }
}
