#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use assignment_coordination::store::{EtcdStore, StoreConfig};
use flag_assigner::assigner::{Assigner, AssignerConfig};
use flag_assigner::error::{Error, Result};
use flag_assigner::memory::MemoryAssignmentStore;
use flag_assigner::registry::NodeRegistry;
use flag_assigner::roots::UniqueRoots;
use flag_assigner::store::{AssignmentStore, FlagAssignerStore};
use flag_assigner::types::RegisteredWorker;

pub const ETCD_ENDPOINT: &str = "http://localhost:2379";
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ── Fault injection ─────────────────────────────────────────────

#[derive(Debug, Default)]
struct Faults {
    listing: bool,
    reads: HashSet<String>,
    creates: HashSet<String>,
    deletes: HashSet<String>,
}

/// [`MemoryAssignmentStore`] that fails chosen operations on chosen partitions.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: MemoryAssignmentStore,
    faults: Mutex<Faults>,
}

impl FlakyStore {
    pub fn with_assignments<'a>(assignments: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            inner: MemoryAssignmentStore::with_assignments(assignments),
            faults: Mutex::default(),
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.inner.snapshot()
    }

    pub fn fail_listing(&self) {
        self.faults.lock().unwrap().listing = true;
    }

    pub fn fail_read(&self, partition_id: &str) {
        self.faults.lock().unwrap().reads.insert(partition_id.to_string());
    }

    pub fn fail_create(&self, partition_id: &str) {
        self.faults.lock().unwrap().creates.insert(partition_id.to_string());
    }

    pub fn fail_delete(&self, partition_id: &str) {
        self.faults.lock().unwrap().deletes.insert(partition_id.to_string());
    }

    /// Stop injecting faults.
    pub fn heal(&self) {
        *self.faults.lock().unwrap() = Faults::default();
    }

    fn check(
        &self,
        op: &str,
        partition_id: &str,
        pick: fn(&Faults) -> &HashSet<String>,
    ) -> Result<()> {
        if pick(&self.faults.lock().unwrap()).contains(partition_id) {
            return Err(Error::invalid_state(format!(
                "injected {op} failure for {partition_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AssignmentStore for FlakyStore {
    async fn list_assigned_partitions(&self) -> Result<Vec<String>> {
        if self.faults.lock().unwrap().listing {
            return Err(Error::invalid_state("injected listing failure"));
        }
        self.inner.list_assigned_partitions().await
    }

    async fn read_assigned_worker(&self, partition_id: &str) -> Result<Option<String>> {
        self.check("read", partition_id, |f| &f.reads)?;
        self.inner.read_assigned_worker(partition_id).await
    }

    async fn create_assignment(&self, partition_id: &str, worker_id: &str) -> Result<()> {
        self.check("create", partition_id, |f| &f.creates)?;
        self.inner.create_assignment(partition_id, worker_id).await
    }

    async fn delete_assignment(&self, partition_id: &str) -> Result<()> {
        self.check("delete", partition_id, |f| &f.deletes)?;
        self.inner.delete_assignment(partition_id).await
    }
}

// ── Fixtures ────────────────────────────────────────────────────

/// `n` roots `/logs/r{i}`, each represented by partition `p{i}`.
pub fn roots(n: usize) -> UniqueRoots {
    UniqueRoots::from_pairs((0..n).map(|i| (format!("/logs/r{i}"), format!("p{i}"))))
}

pub fn registry(weights: &[(&str, u32)]) -> NodeRegistry {
    NodeRegistry::from_weights(weights.iter().map(|(id, w)| (*id, *w)))
        .expect("test weights are positive")
}

/// Number of partitions held by each worker in `snapshot`.
pub fn loads(snapshot: &BTreeMap<String, String>) -> BTreeMap<String, usize> {
    let mut loads = BTreeMap::new();
    for worker_id in snapshot.values() {
        *loads.entry(worker_id.clone()).or_default() += 1;
    }
    loads
}

// ── etcd ────────────────────────────────────────────────────────

pub async fn test_store(test_name: &str) -> Arc<FlagAssignerStore> {
    let prefix = format!("/test-{}-{}/", test_name, uuid::Uuid::new_v4());
    let config = StoreConfig {
        endpoints: vec![ETCD_ENDPOINT.to_string()],
        prefix,
    };
    let inner = EtcdStore::connect(config)
        .await
        .expect("failed to connect to etcd");
    Arc::new(FlagAssignerStore::new(inner))
}

pub async fn wait_for_condition<F, Fut>(timeout: Duration, interval: Duration, f: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if f().await {
            return;
        }
        tokio::time::sleep(interval).await;
    }
    panic!("condition not met within {timeout:?}");
}

pub fn start_assigner(
    store: Arc<FlagAssignerStore>,
    cancel: CancellationToken,
) -> JoinHandle<Result<()>> {
    let config = AssignerConfig {
        balance_interval: Duration::from_millis(200),
        rebalance_debounce_interval: Duration::from_millis(50),
        ..AssignerConfig::default()
    };
    let assigner = Assigner::new(store, config);
    let token = cancel.child_token();
    tokio::spawn(async move { assigner.run(token).await })
}

pub async fn register_worker(store: &FlagAssignerStore, id: &str, weight: u32) -> i64 {
    let lease_id = store.grant_lease(30).await.unwrap();
    let worker = RegisteredWorker {
        worker_id: id.to_string(),
        weight,
        registered_at: assignment_coordination::util::now_seconds(),
    };
    store.register_worker(&worker, lease_id).await.unwrap();
    lease_id
}
