use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use assignment_coordination::store::{EtcdStore, StoreConfig};
use flag_assigner::assigner::{Assigner, AssignerConfig};
use flag_assigner::config::Config;
use flag_assigner::http;
use flag_assigner::store::FlagAssignerStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::init_with_defaults()
        .context("failed to load configuration from environment variables")?;

    info!("starting flag assigner with config: {:?}", config);

    let recorder =
        http::setup_metrics_recorder().context("failed to install metrics recorder")?;
    let router = http::router(recorder);
    let bind = config.bind_address();
    let server = tokio::spawn(async move {
        if let Err(e) = http::serve(router, &bind).await {
            error!("http server failed: {}", e);
        }
    });

    let etcd = EtcdStore::connect(StoreConfig {
        endpoints: config.etcd_endpoint_list(),
        prefix: config.etcd_prefix.clone(),
    })
    .await
    .with_context(|| format!("failed to connect to etcd at {}", config.etcd_endpoints))?;

    let assigner = Assigner::new(
        Arc::new(FlagAssignerStore::new(etcd)),
        AssignerConfig {
            name: config.assigner_name.clone(),
            leader_lease_ttl: config.leader_lease_ttl_secs,
            keepalive_interval: config.leader_keepalive_interval(),
            election_retry_interval: config.election_retry_interval(),
            balance_interval: config.balance_interval(),
            rebalance_debounce_interval: config.rebalance_debounce_interval(),
        },
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal");
            }
            cancel.cancel();
        });
    }

    let result = assigner.run(cancel).await;
    server.abort();

    info!("exiting");
    result.context("flag assigner stopped with an error")
}
