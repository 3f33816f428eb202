use serde::{Deserialize, Serialize};

/// A partition the fleet ingests, stored under `{prefix}config/partitions/{id}`.
///
/// `path_template` is where the partition's files land, e.g.
/// `/data/service/logs/%y%M%d/%H/incoming`. Only the part before the
/// time-partitioning suffix matters for flag assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub id: String,
    pub path_template: String,
}

/// A worker registered in etcd under `{prefix}workers/{worker_id}`.
///
/// Each worker writes this on startup with an etcd lease attached. When the
/// lease expires (worker crashed or lost connectivity), the key is deleted and
/// the worker drops out of the registry on the next balance pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredWorker {
    pub worker_id: String,
    /// Relative capacity. A worker with weight 2 is expected to carry twice
    /// the flag propagation of a worker with weight 1.
    pub weight: u32,
    pub registered_at: i64,
}

impl PartitionConfig {
    pub fn new(id: impl Into<String>, path_template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path_template: path_template.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_config_json_shape() {
        let config = PartitionConfig::new("events", "/data/events/%y%M%d/%H/incoming");
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "events",
                "path_template": "/data/events/%y%M%d/%H/incoming",
            })
        );
    }

    #[test]
    fn registered_worker_parses_from_json() {
        let raw = r#"{"worker_id":"kaboom-3","weight":4,"registered_at":1700000000}"#;
        let worker: RegisteredWorker = serde_json::from_str(raw).unwrap();
        assert_eq!(
            worker,
            RegisteredWorker {
                worker_id: "kaboom-3".to_string(),
                weight: 4,
                registered_at: 1700000000,
            }
        );
    }
}
