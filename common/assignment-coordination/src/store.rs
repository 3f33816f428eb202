use etcd_client::{
    Client, Compare, CompareOp, DeleteOptions, GetOptions, PutOptions, Txn, TxnOp, WatchOptions,
    WatchStream,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub endpoints: Vec<String>,
    /// Key prefix for all operations.
    /// e.g. "/kaboom/" or "/test-{uuid}/"
    pub prefix: String,
}

/// Prefixed etcd client with typed JSON helpers and raw string values.
///
/// Provides the generic building blocks that domain-specific stores compose:
/// get, list, put, create-if-absent, delete, watch and lease management.
///
/// `Client` is `Clone` (wraps an inner `Arc`), so each method clones it cheaply.
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    config: StoreConfig,
}

impl EtcdStore {
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let client = Client::connect(&config.endpoints, None).await?;
        Ok(Self { client, config })
    }

    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    // ── JSON helpers ─────────────────────────────────────────────

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let resp = self.client.clone().get(key, None).await?;
        match resp.kvs().first() {
            Some(kv) => Ok(Some(serde_json::from_slice(kv.value())?)),
            None => Ok(None),
        }
    }

    /// List all values under `prefix`, in key order.
    pub async fn list<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>> {
        let options = GetOptions::new().with_prefix();
        let resp = self.client.clone().get(prefix, Some(options)).await?;
        resp.kvs()
            .iter()
            .map(|kv| serde_json::from_slice(kv.value()).map_err(Error::from))
            .collect()
    }

    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        lease_id: Option<i64>,
    ) -> Result<()> {
        let value = serde_json::to_string(value)?;
        let options = lease_id.map(|id| PutOptions::new().with_lease(id));
        self.client.clone().put(key, value, options).await?;
        Ok(())
    }

    // ── Raw string values ────────────────────────────────────────

    /// List the keys directly under `prefix` with the prefix stripped, in key order.
    /// Nested keys such as `{prefix}a/b` are left out.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let options = GetOptions::new().with_prefix().with_keys_only();
        let resp = self.client.clone().get(prefix, Some(options)).await?;
        let mut keys = Vec::with_capacity(resp.kvs().len());
        for kv in resp.kvs() {
            let key = String::from_utf8(kv.key().to_vec()).map_err(|_| Error::InvalidUtf8 {
                key: String::from_utf8_lossy(kv.key()).into_owned(),
            })?;
            if let Some(child) = direct_child(&key, prefix) {
                keys.push(child.to_string());
            }
        }
        Ok(keys)
    }

    pub async fn get_string(&self, key: &str) -> Result<Option<String>> {
        let resp = self.client.clone().get(key, None).await?;
        match resp.kvs().first() {
            Some(kv) => String::from_utf8(kv.value().to_vec())
                .map(Some)
                .map_err(|_| Error::InvalidUtf8 {
                    key: key.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// CAS: write `value` only if `key` does not exist (version == 0).
    ///
    /// Returns `Ok(false)` when the key was already present; nothing is written
    /// in that case.
    pub async fn create_string(&self, key: &str, value: &str) -> Result<bool> {
        let txn = Txn::new()
            .when(vec![Compare::version(key, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(key, value, None)]);
        let resp = self.client.clone().txn(txn).await?;
        Ok(resp.succeeded())
    }

    // ── Deletes ──────────────────────────────────────────────────

    /// Delete a single key. Returns `false` if the key did not exist.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let resp = self.client.clone().delete(key, None).await?;
        Ok(resp.deleted() > 0)
    }

    pub async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let options = DeleteOptions::new().with_prefix();
        self.client.clone().delete(prefix, Some(options)).await?;
        Ok(())
    }

    pub async fn watch(&self, prefix: &str) -> Result<WatchStream> {
        let options = WatchOptions::new().with_prefix();
        let stream = self.client.clone().watch(prefix, Some(options)).await?;
        Ok(stream)
    }

    // ── Lease operations ─────────────────────────────────────────

    pub async fn grant_lease(&self, ttl: i64) -> Result<i64> {
        let resp = self.client.clone().lease_grant(ttl, None).await?;
        Ok(resp.id())
    }

    pub async fn keep_alive(
        &self,
        lease_id: i64,
    ) -> Result<(etcd_client::LeaseKeeper, etcd_client::LeaseKeepAliveStream)> {
        let (keeper, stream) = self.client.clone().lease_keep_alive(lease_id).await?;
        Ok((keeper, stream))
    }

    pub async fn revoke_lease(&self, lease_id: i64) -> Result<()> {
        self.client.clone().lease_revoke(lease_id).await?;
        Ok(())
    }

    // ── Cleanup ──────────────────────────────────────────────────

    pub async fn delete_all(&self) -> Result<()> {
        self.delete_prefix(&self.config.prefix).await
    }
}

fn direct_child<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)
        .filter(|child| !child.is_empty() && !child.contains('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_child_skips_nested_and_empty_keys() {
        let prefix = "/kaboom/flag-assignments/";
        assert_eq!(
            direct_child("/kaboom/flag-assignments/clicks", prefix),
            Some("clicks")
        );
        assert_eq!(direct_child("/kaboom/flag-assignments/a/b", prefix), None);
        assert_eq!(direct_child("/kaboom/flag-assignments/", prefix), None);
        assert_eq!(direct_child("/kaboom/workers/w-0", prefix), None);
    }
}
