use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::store::AssignmentStore;

/// In-process [`AssignmentStore`] with the same create/delete semantics as etcd.
///
/// Used for dry runs against a snapshot and as the store behind the balancer
/// tests. Keys are kept sorted so listing order matches etcd's.
#[derive(Debug, Default)]
pub struct MemoryAssignmentStore {
    assignments: Mutex<BTreeMap<String, String>>,
}

impl MemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing set of `(partition_id, worker_id)` assignments.
    pub fn with_assignments<I, P, W>(assignments: I) -> Self
    where
        I: IntoIterator<Item = (P, W)>,
        P: Into<String>,
        W: Into<String>,
    {
        let map = assignments
            .into_iter()
            .map(|(p, w)| (p.into(), w.into()))
            .collect();
        Self {
            assignments: Mutex::new(map),
        }
    }

    /// Copy of the current `partition_id -> worker_id` map.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    /// Write an entry without the create-if-absent check, e.g. to simulate
    /// another writer.
    pub fn force_put(&self, partition_id: &str, worker_id: &str) {
        self.lock()
            .insert(partition_id.to_string(), worker_id.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A panic while holding the lock can't leave the map half-written.
        self.assignments
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AssignmentStore for MemoryAssignmentStore {
    async fn list_assigned_partitions(&self) -> Result<Vec<String>> {
        Ok(self.lock().keys().cloned().collect())
    }

    async fn read_assigned_worker(&self, partition_id: &str) -> Result<Option<String>> {
        Ok(self.lock().get(partition_id).cloned())
    }

    async fn create_assignment(&self, partition_id: &str, worker_id: &str) -> Result<()> {
        let mut assignments = self.lock();
        if assignments.contains_key(partition_id) {
            return Err(Error::AlreadyAssigned {
                partition_id: partition_id.to_string(),
            });
        }
        assignments.insert(partition_id.to_string(), worker_id.to_string());
        Ok(())
    }

    async fn delete_assignment(&self, partition_id: &str) -> Result<()> {
        self.lock()
            .remove(partition_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(partition_id.to_string()))
    }
}
