use std::future::Future;
use std::time::Duration;

use etcd_client::{Compare, CompareOp, PutOptions, Txn, TxnOp};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::store::EtcdStore;
use crate::util;

#[derive(Debug, Clone)]
pub struct LeaderElectionConfig {
    /// Identifier for this candidate (e.g. pod name).
    pub name: String,
    /// Key, relative to the store prefix, where the leader record lives.
    pub leader_key: String,
    /// TTL for the leader lease. If the leader dies, the key expires after this.
    pub lease_ttl: i64,
    pub keepalive_interval: Duration,
    /// How long to wait before retrying after failing to acquire leadership.
    pub retry_interval: Duration,
}

/// Written to the leader key when leadership is acquired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderRecord {
    pub holder: String,
    pub lease_id: i64,
    pub acquired_at: i64,
}

/// Run `work_fn` whenever this candidate holds leadership, until `cancel` fires.
///
/// Leadership is a leased key created with a version == 0 transaction. While
/// held, `work_fn` gets a token that is cancelled when the lease can no longer
/// be kept alive. Whatever `work_fn` returns, the lease is revoked and the
/// candidate waits `retry_interval` before campaigning again.
pub async fn run_as_leader<F, Fut>(
    store: &EtcdStore,
    config: &LeaderElectionConfig,
    cancel: CancellationToken,
    work_fn: F,
) -> Result<()>
where
    F: Fn(CancellationToken) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = campaign(store, config, &cancel, &work_fn) => {
                match result {
                    Ok(()) => tracing::info!(name = %config.name, "leadership ended normally"),
                    Err(e) => {
                        tracing::warn!(name = %config.name, error = %e, "leader loop ended with error")
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(config.retry_interval) => {}
                }
            }
        }
    }
}

async fn campaign<F, Fut>(
    store: &EtcdStore,
    config: &LeaderElectionConfig,
    cancel: &CancellationToken,
    work_fn: &F,
) -> Result<()>
where
    F: Fn(CancellationToken) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let lease_id = store.grant_lease(config.lease_ttl).await?;
    let key = format!("{}{}", store.prefix(), config.leader_key);

    if !try_acquire(store, &key, &config.name, lease_id).await? {
        tracing::debug!(name = %config.name, "another candidate is leader, standing by");
        drop(store.revoke_lease(lease_id).await);
        return Ok(());
    }

    tracing::info!(name = %config.name, "acquired leadership");

    let leadership = cancel.child_token();
    let keepalive = {
        let store = store.clone();
        let interval = config.keepalive_interval;
        let token = leadership.clone();
        tokio::spawn(async move {
            if let Err(e) =
                util::run_lease_keepalive(&store, lease_id, interval, token.clone()).await
            {
                tracing::error!(error = %e, "leader keepalive failed, giving up leadership");
                token.cancel();
            }
        })
    };

    let result = work_fn(leadership.clone()).await;

    leadership.cancel();
    drop(keepalive.await);
    drop(store.revoke_lease(lease_id).await);

    result
}

async fn try_acquire(store: &EtcdStore, key: &str, holder: &str, lease_id: i64) -> Result<bool> {
    let record = LeaderRecord {
        holder: holder.to_string(),
        lease_id,
        acquired_at: util::now_seconds(),
    };
    let txn = Txn::new()
        .when(vec![Compare::version(key, CompareOp::Equal, 0)])
        .and_then(vec![TxnOp::put(
            key,
            serde_json::to_vec(&record)?,
            Some(PutOptions::new().with_lease(lease_id)),
        )]);

    let resp = store.client().clone().txn(txn).await?;
    Ok(resp.succeeded())
}

/// Read the current leader record (if any) for a key relative to the store prefix.
pub async fn get_leader(store: &EtcdStore, leader_key: &str) -> Result<Option<LeaderRecord>> {
    store
        .get(&format!("{}{}", store.prefix(), leader_key))
        .await
}
