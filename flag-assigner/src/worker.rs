use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use assignment_coordination::util;

use crate::error::Result;
use crate::query::get_assignments;
use crate::store::{AssignmentStore, FlagAssignerStore};
use crate::types::RegisteredWorker;

/// Application hook on a worker: start or stop propagating ready flags for
/// the partitions the balancer moved to or away from this worker.
#[async_trait]
pub trait AssignmentHandler: Send + Sync {
    async fn assignments_changed(&self, change: &AssignmentChange) -> Result<()>;
}

/// Difference between two consecutive views of a worker's assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentChange {
    pub assigned: Vec<String>,
    pub unassigned: Vec<String>,
}

impl AssignmentChange {
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty() && self.unassigned.is_empty()
    }
}

/// The partitions a worker last saw assigned to itself.
#[derive(Debug, Default)]
pub struct AssignmentTracker {
    worker_id: String,
    current: BTreeSet<String>,
}

impl AssignmentTracker {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            current: BTreeSet::new(),
        }
    }

    pub fn current(&self) -> &BTreeSet<String> {
        &self.current
    }

    /// Re-read this worker's assignments and return what changed since the
    /// last refresh. On error the previous view is kept.
    pub async fn refresh(&mut self, store: &dyn AssignmentStore) -> Result<AssignmentChange> {
        let latest: BTreeSet<String> = get_assignments(store, &self.worker_id)
            .await?
            .into_iter()
            .collect();

        let change = AssignmentChange {
            assigned: latest.difference(&self.current).cloned().collect(),
            unassigned: self.current.difference(&latest).cloned().collect(),
        };
        self.current = latest;
        Ok(change)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    pub weight: u32,
    pub lease_ttl: i64,
    pub heartbeat_interval: Duration,
    /// How often to re-read this worker's flag assignments.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "kaboom-0".to_string(),
            weight: 1,
            lease_ttl: 30,
            heartbeat_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(15),
        }
    }
}

/// Worker-side membership: registers the worker under a lease so the
/// balancer can see it, keeps the lease alive, and reports assignment
/// changes to an [`AssignmentHandler`].
pub struct WorkerHandle {
    store: Arc<FlagAssignerStore>,
    config: WorkerConfig,
    handler: Arc<dyn AssignmentHandler>,
}

impl WorkerHandle {
    pub fn new(
        store: Arc<FlagAssignerStore>,
        config: WorkerConfig,
        handler: Arc<dyn AssignmentHandler>,
    ) -> Self {
        Self {
            store,
            config,
            handler,
        }
    }

    /// Register, heartbeat and poll assignments until cancelled.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let lease_id = self.store.grant_lease(self.config.lease_ttl).await?;
        let worker = RegisteredWorker {
            worker_id: self.config.worker_id.clone(),
            weight: self.config.weight,
            registered_at: util::now_seconds(),
        };
        self.store.register_worker(&worker, lease_id).await?;

        tracing::info!(
            worker_id = %self.config.worker_id,
            weight = self.config.weight,
            "registered with etcd"
        );

        let heartbeat_cancel = cancel.child_token();
        let heartbeat_handle = {
            let store = self.store.inner().clone();
            let interval = self.config.heartbeat_interval;
            let token = heartbeat_cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = util::run_lease_keepalive(&store, lease_id, interval, token).await
                {
                    tracing::error!(
                        error = %e,
                        "worker keepalive failed, registration will expire"
                    );
                }
            })
        };

        let result = self.poll_loop(cancel.clone()).await;

        heartbeat_cancel.cancel();
        drop(heartbeat_handle.await);

        // Dropping the registration right away lets the next pass move our
        // partitions instead of waiting for the lease to expire.
        drop(self.store.revoke_lease(lease_id).await);

        result
    }

    async fn poll_loop(&self, cancel: CancellationToken) -> Result<()> {
        let mut tracker = AssignmentTracker::new(self.config.worker_id.clone());
        let mut interval = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {}
            }

            let change = match tracker.refresh(self.store.as_ref()).await {
                Ok(change) => change,
                Err(e) => {
                    tracing::warn!(
                        worker_id = %self.config.worker_id,
                        error = %e,
                        "failed to read flag assignments"
                    );
                    continue;
                }
            };
            if change.is_empty() {
                continue;
            }

            tracing::info!(
                worker_id = %self.config.worker_id,
                assigned = ?change.assigned,
                unassigned = ?change.unassigned,
                "flag assignments changed"
            );
            self.handler.assignments_changed(&change).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAssignmentStore;

    #[tokio::test]
    async fn tracker_reports_additions_and_removals() {
        let store = MemoryAssignmentStore::with_assignments([("clicks", "w-0"), ("views", "w-1")]);
        let mut tracker = AssignmentTracker::new("w-0");

        let change = tracker.refresh(&store).await.unwrap();
        assert_eq!(change.assigned, vec!["clicks".to_string()]);
        assert!(change.unassigned.is_empty());

        assert!(tracker.refresh(&store).await.unwrap().is_empty());

        store.delete_assignment("clicks").await.unwrap();
        store.create_assignment("billing", "w-0").await.unwrap();
        let change = tracker.refresh(&store).await.unwrap();
        assert_eq!(change.assigned, vec!["billing".to_string()]);
        assert_eq!(change.unassigned, vec!["clicks".to_string()]);
        assert_eq!(
            tracker.current().iter().cloned().collect::<Vec<_>>(),
            vec!["billing".to_string()]
        );
    }
}
