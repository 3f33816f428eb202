use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use etcd_client::EventType;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use assignment_coordination::error::Error as CoordinationError;
use assignment_coordination::leader_election::{self, LeaderElectionConfig};

use crate::balancer::{BalanceReport, Balancer};
use crate::error::{Error, Result};
use crate::metrics_consts::{
    ASSIGNMENTS_CREATED, ASSIGNMENTS_DELETED, ASSIGNMENTS_EVICTED, BALANCE_RUNS, BALANCE_RUN_MS,
    LISTING_FAILURES, MALFORMED_TEMPLATES, OPERATIONS_SKIPPED, WORKER_CURRENT_LOAD,
    WORKER_TARGET_LOAD,
};
use crate::registry::NodeRegistry;
use crate::roots::resolve_unique_roots;
use crate::store::{AssignmentStore, FlagAssignerStore, LEADER_KEY};
use crate::types::{PartitionConfig, RegisteredWorker};

#[derive(Debug, Clone)]
pub struct AssignerConfig {
    pub name: String,
    pub leader_lease_ttl: i64,
    pub keepalive_interval: Duration,
    pub election_retry_interval: Duration,
    /// Balance at least this often, even without membership changes, so that
    /// partition config changes and skipped operations get picked up.
    pub balance_interval: Duration,
    /// How long to wait after the first worker event before balancing, to
    /// batch a rolling restart into a single pass.
    pub rebalance_debounce_interval: Duration,
}

impl Default for AssignerConfig {
    fn default() -> Self {
        Self {
            name: "flag-assigner-0".to_string(),
            leader_lease_ttl: 15,
            keepalive_interval: Duration::from_secs(5),
            election_retry_interval: Duration::from_secs(5),
            balance_interval: Duration::from_secs(30),
            rebalance_debounce_interval: Duration::from_secs(1),
        }
    }
}

/// Leader-elected scheduler for [`Balancer::balance`].
///
/// Only the elected instance balances, which gives the balancer the single
/// writer it relies on. The leader runs a pass on a fixed interval and
/// shortly after any worker registers or drops out.
pub struct Assigner {
    store: Arc<FlagAssignerStore>,
    config: AssignerConfig,
}

impl Assigner {
    pub fn new(store: Arc<FlagAssignerStore>, config: AssignerConfig) -> Self {
        Self { store, config }
    }

    /// Campaign for leadership until `cancel` fires; balance while leader.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let election_config = LeaderElectionConfig {
            name: self.config.name.clone(),
            leader_key: LEADER_KEY.to_string(),
            lease_ttl: self.config.leader_lease_ttl,
            keepalive_interval: self.config.keepalive_interval,
            retry_interval: self.config.election_retry_interval,
        };

        leader_election::run_as_leader(
            self.store.inner(),
            &election_config,
            cancel,
            |leadership_cancel| async move {
                self.run_balance_loop(leadership_cancel)
                    .await
                    .map_err(Into::into)
            },
        )
        .await?;

        Ok(())
    }

    async fn run_balance_loop(&self, cancel: CancellationToken) -> Result<()> {
        let mut gauges = WorkerGauges::default();
        let result = self.balance_while_leader(&cancel, &mut gauges).await;
        // Only the leader reports worker load.
        gauges.clear();
        result
    }

    async fn balance_while_leader(
        &self,
        cancel: &CancellationToken,
        gauges: &mut WorkerGauges,
    ) -> Result<()> {
        let mut balancer = Balancer::from_entropy();
        let mut stream = self.store.watch_workers().await?;
        let mut interval = tokio::time::interval(self.config.balance_interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = interval.tick() => {}
                msg = stream.message() => {
                    let resp = msg?.ok_or_else(|| Error::invalid_state("worker watch stream ended"))?;
                    log_worker_events(&resp);

                    // Drain additional events arriving within the debounce window
                    let deadline = tokio::time::Instant::now() + self.config.rebalance_debounce_interval;
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            _ = tokio::time::sleep_until(deadline) => break,
                            msg = stream.message() => {
                                let resp = msg?.ok_or_else(|| Error::invalid_state("worker watch stream ended"))?;
                                log_worker_events(&resp);
                            }
                        }
                    }
                }
            }

            let result = self.balance_once(&mut balancer, gauges, cancel).await;
            if cancel.is_cancelled() {
                tracing::warn!("leadership ended during a balance pass");
                return Ok(());
            }
            if let Err(e) = result {
                tracing::error!(error = %e, "balance pass failed, retrying on next trigger");
            }
        }
    }

    /// Load workers and partition configs from etcd and run one pass. Store
    /// calls made after `leadership` is cancelled fail instead of writing.
    pub async fn balance_once<R: Rng + Send>(
        &self,
        balancer: &mut Balancer<R>,
        gauges: &mut WorkerGauges,
        leadership: &CancellationToken,
    ) -> Result<BalanceReport> {
        let workers = self.store.list_workers().await?;
        let configs = self.store.list_partition_configs().await?;
        let store = FencedStore::new(self.store.as_ref(), leadership);
        run_pass(balancer, &workers, &configs, &store, gauges).await
    }
}

/// [`AssignmentStore`] that refuses every call once `leadership` is
/// cancelled, so a pass still running when the lease is lost stops touching
/// the store before a new leader starts its own.
pub struct FencedStore<'a> {
    inner: &'a dyn AssignmentStore,
    leadership: &'a CancellationToken,
}

impl<'a> FencedStore<'a> {
    pub fn new(inner: &'a dyn AssignmentStore, leadership: &'a CancellationToken) -> Self {
        Self { inner, leadership }
    }

    fn check(&self) -> Result<()> {
        if self.leadership.is_cancelled() {
            return Err(Error::StoreUnavailable(CoordinationError::LeadershipLost));
        }
        Ok(())
    }
}

#[async_trait]
impl<'a> AssignmentStore for FencedStore<'a> {
    async fn list_assigned_partitions(&self) -> Result<Vec<String>> {
        self.check()?;
        self.inner.list_assigned_partitions().await
    }

    async fn read_assigned_worker(&self, partition_id: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.read_assigned_worker(partition_id).await
    }

    async fn create_assignment(&self, partition_id: &str, worker_id: &str) -> Result<()> {
        self.check()?;
        self.inner.create_assignment(partition_id, worker_id).await
    }

    async fn delete_assignment(&self, partition_id: &str) -> Result<()> {
        self.check()?;
        self.inner.delete_assignment(partition_id).await
    }
}

/// Per-worker load gauges. Workers missing from the latest pass are set back
/// to zero instead of exporting their last load forever.
#[derive(Debug, Default)]
pub struct WorkerGauges {
    exported: BTreeSet<String>,
}

impl WorkerGauges {
    /// Publish the loads in `registry`; returns the workers that were zeroed.
    pub fn record(&mut self, registry: &NodeRegistry) -> Vec<String> {
        let current: BTreeSet<String> = registry.iter().map(|w| w.id.clone()).collect();
        for worker in registry.iter() {
            metrics::gauge!(WORKER_CURRENT_LOAD, "worker_id" => worker.id.clone())
                .set(worker.current_load as f64);
            metrics::gauge!(WORKER_TARGET_LOAD, "worker_id" => worker.id.clone())
                .set(worker.target_load);
        }

        let departed: Vec<String> = self.exported.difference(&current).cloned().collect();
        for worker_id in &departed {
            zero(worker_id);
        }
        self.exported = current;
        departed
    }

    /// Zero every gauge this instance exported.
    pub fn clear(&mut self) -> Vec<String> {
        let cleared: Vec<String> = std::mem::take(&mut self.exported).into_iter().collect();
        for worker_id in &cleared {
            zero(worker_id);
        }
        cleared
    }
}

fn zero(worker_id: &str) {
    metrics::gauge!(WORKER_CURRENT_LOAD, "worker_id" => worker_id.to_string()).set(0.0);
    metrics::gauge!(WORKER_TARGET_LOAD, "worker_id" => worker_id.to_string()).set(0.0);
}

/// One balance pass over a snapshot of membership and configuration, with
/// metrics for what it did.
pub async fn run_pass<R: Rng + Send>(
    balancer: &mut Balancer<R>,
    workers: &[RegisteredWorker],
    configs: &[PartitionConfig],
    store: &dyn AssignmentStore,
    gauges: &mut WorkerGauges,
) -> Result<BalanceReport> {
    let start = Instant::now();
    metrics::counter!(BALANCE_RUNS).increment(1);

    let resolution = resolve_unique_roots(configs);
    metrics::counter!(MALFORMED_TEMPLATES).increment(resolution.failures.len() as u64);

    let mut registry = NodeRegistry::from_registered(workers);
    let result = balancer
        .balance(&mut registry, &resolution.roots, store)
        .await;

    metrics::histogram!(BALANCE_RUN_MS).record(start.elapsed().as_millis() as f64);

    match &result {
        Ok(report) => {
            record_report(report);
            gauges.record(&registry);
            tracing::info!(
                workers = registry.len(),
                roots = resolution.roots.len(),
                mutations = report.mutations(),
                skipped = report.skipped().count(),
                "balance pass complete"
            );
        }
        Err(Error::ListingFailed(_)) => {
            metrics::counter!(LISTING_FAILURES).increment(1);
        }
        Err(_) => {}
    }

    result
}

fn record_report(report: &BalanceReport) {
    metrics::counter!(ASSIGNMENTS_CREATED).increment(report.assigned().count() as u64);
    metrics::counter!(ASSIGNMENTS_DELETED).increment(report.deleted().count() as u64);
    metrics::counter!(ASSIGNMENTS_EVICTED).increment(report.evicted().count() as u64);
    metrics::counter!(OPERATIONS_SKIPPED).increment(report.skipped().count() as u64);
}

fn log_worker_events(resp: &etcd_client::WatchResponse) {
    for event in resp.events() {
        match event.event_type() {
            EventType::Put => tracing::info!("worker registered or updated"),
            EventType::Delete => tracing::warn!("worker lease expired or deleted"),
        }
    }
}

impl From<Error> for assignment_coordination::error::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::StoreUnavailable(inner) => inner,
            other => Self::InvalidState(other.to_string()),
        }
    }
}
