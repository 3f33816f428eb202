use std::time::Duration;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // ── etcd ────────────────────────────────────────────────────────
    #[envconfig(default = "http://localhost:2379")]
    pub etcd_endpoints: String,

    #[envconfig(default = "/kaboom/")]
    pub etcd_prefix: String,

    // ── Health and metrics server ───────────────────────────────────
    #[envconfig(from = "BIND_HOST", default = "0.0.0.0")]
    pub host: String,

    #[envconfig(from = "BIND_PORT", default = "3310")]
    pub port: u16,

    // ── Assigner / leader election ──────────────────────────────────
    #[envconfig(default = "flag-assigner-0")]
    pub assigner_name: String,

    #[envconfig(default = "15")]
    pub leader_lease_ttl_secs: i64,

    #[envconfig(default = "5")]
    pub leader_keepalive_interval_secs: u64,

    #[envconfig(default = "5")]
    pub election_retry_interval_secs: u64,

    // ── Balancing ───────────────────────────────────────────────────
    #[envconfig(default = "30")]
    pub balance_interval_secs: u64,

    #[envconfig(default = "1")]
    pub rebalance_debounce_interval_secs: u64,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn etcd_endpoint_list(&self) -> Vec<String> {
        self.etcd_endpoints
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn leader_keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.leader_keepalive_interval_secs)
    }

    pub fn election_retry_interval(&self) -> Duration {
        Duration::from_secs(self.election_retry_interval_secs)
    }

    pub fn balance_interval(&self) -> Duration {
        Duration::from_secs(self.balance_interval_secs)
    }

    pub fn rebalance_debounce_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_debounce_interval_secs)
    }
}
