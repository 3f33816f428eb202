use assignment_coordination::store::EtcdStore;
use assignment_coordination::util::validate_identifier;
use async_trait::async_trait;
use etcd_client::WatchStream;

use crate::error::{Error, Result};
use crate::types::{PartitionConfig, RegisteredWorker};

/// The four coordination-store operations the balancer is built on.
///
/// Every call can fail on its own; callers decide whether a failure affects
/// one partition or the whole pass. Nothing here retries.
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Partition ids that currently have an assignment, in key order.
    async fn list_assigned_partitions(&self) -> Result<Vec<String>>;

    /// The worker recorded for `partition_id`, or `None` if the entry vanished.
    async fn read_assigned_worker(&self, partition_id: &str) -> Result<Option<String>>;

    /// Record `worker_id` for `partition_id`.
    ///
    /// Fails with [`Error::AlreadyAssigned`] if an entry exists; never overwrites.
    async fn create_assignment(&self, partition_id: &str, worker_id: &str) -> Result<()>;

    /// Remove the entry for `partition_id`, [`Error::NotFound`] if there was none.
    async fn delete_assignment(&self, partition_id: &str) -> Result<()>;
}

/// All etcd key patterns used by the flag assigner.
///
/// Full key scheme:
/// ```text
/// {prefix}flag-assignments/{partition_id}   raw utf-8 worker id
/// {prefix}workers/{worker_id}               RegisteredWorker (leased)
/// {prefix}config/partitions/{partition_id}  PartitionConfig
/// ```
///
/// The leader key (`{prefix}flag-assigner/leader`) is managed by the
/// `assignment-coordination` crate's leader election module.
enum StoreKey<'a> {
    Assignment(&'a str),
    AssignmentsPrefix,
    Worker(&'a str),
    WorkersPrefix,
    PartitionConfig(&'a str),
    PartitionConfigsPrefix,
}

impl StoreKey<'_> {
    fn resolve(&self, prefix: &str) -> String {
        match self {
            StoreKey::Assignment(partition) => format!("{prefix}flag-assignments/{partition}"),
            StoreKey::AssignmentsPrefix => format!("{prefix}flag-assignments/"),
            StoreKey::Worker(id) => format!("{prefix}workers/{id}"),
            StoreKey::WorkersPrefix => format!("{prefix}workers/"),
            StoreKey::PartitionConfig(id) => format!("{prefix}config/partitions/{id}"),
            StoreKey::PartitionConfigsPrefix => format!("{prefix}config/partitions/"),
        }
    }
}

pub const LEADER_KEY: &str = "flag-assigner/leader";

/// etcd-backed store for flag assignments, worker registrations and
/// partition configuration.
#[derive(Clone)]
pub struct FlagAssignerStore {
    inner: EtcdStore,
}

impl FlagAssignerStore {
    pub fn new(inner: EtcdStore) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &EtcdStore {
        &self.inner
    }

    fn key(&self, k: StoreKey<'_>) -> String {
        k.resolve(self.inner.prefix())
    }

    // ── Worker operations ────────────────────────────────────────

    pub async fn register_worker(&self, worker: &RegisteredWorker, lease_id: i64) -> Result<()> {
        validate_identifier(&worker.worker_id)?;
        let key = self.key(StoreKey::Worker(&worker.worker_id));
        Ok(self.inner.put(&key, worker, Some(lease_id)).await?)
    }

    pub async fn list_workers(&self) -> Result<Vec<RegisteredWorker>> {
        let key = self.key(StoreKey::WorkersPrefix);
        Ok(self.inner.list(&key).await?)
    }

    pub async fn watch_workers(&self) -> Result<WatchStream> {
        let key = self.key(StoreKey::WorkersPrefix);
        Ok(self.inner.watch(&key).await?)
    }

    // ── Partition config operations ──────────────────────────────

    /// Configured partitions in key order.
    pub async fn list_partition_configs(&self) -> Result<Vec<PartitionConfig>> {
        let key = self.key(StoreKey::PartitionConfigsPrefix);
        Ok(self.inner.list(&key).await?)
    }

    pub async fn set_partition_config(&self, config: &PartitionConfig) -> Result<()> {
        validate_identifier(&config.id)?;
        let key = self.key(StoreKey::PartitionConfig(&config.id));
        Ok(self.inner.put(&key, config, None).await?)
    }

    pub async fn delete_partition_config(&self, id: &str) -> Result<()> {
        let key = self.key(StoreKey::PartitionConfig(id));
        self.inner.delete(&key).await?;
        Ok(())
    }

    // ── Lease operations ─────────────────────────────────────────

    pub async fn grant_lease(&self, ttl: i64) -> Result<i64> {
        Ok(self.inner.grant_lease(ttl).await?)
    }

    pub async fn revoke_lease(&self, lease_id: i64) -> Result<()> {
        Ok(self.inner.revoke_lease(lease_id).await?)
    }

    /// Delete all keys under the store's prefix. Useful for tests.
    pub async fn delete_all(&self) -> Result<()> {
        Ok(self.inner.delete_all().await?)
    }
}

#[async_trait]
impl AssignmentStore for FlagAssignerStore {
    async fn list_assigned_partitions(&self) -> Result<Vec<String>> {
        let prefix = self.key(StoreKey::AssignmentsPrefix);
        Ok(self.inner.list_keys(&prefix).await?)
    }

    async fn read_assigned_worker(&self, partition_id: &str) -> Result<Option<String>> {
        let key = self.key(StoreKey::Assignment(partition_id));
        Ok(self.inner.get_string(&key).await?)
    }

    async fn create_assignment(&self, partition_id: &str, worker_id: &str) -> Result<()> {
        validate_identifier(partition_id)?;
        let key = self.key(StoreKey::Assignment(partition_id));
        if self.inner.create_string(&key, worker_id).await? {
            Ok(())
        } else {
            Err(Error::AlreadyAssigned {
                partition_id: partition_id.to_string(),
            })
        }
    }

    async fn delete_assignment(&self, partition_id: &str) -> Result<()> {
        let key = self.key(StoreKey::Assignment(partition_id));
        if self.inner.delete(&key).await? {
            Ok(())
        } else {
            Err(Error::NotFound(key))
        }
    }
}
