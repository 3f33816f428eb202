use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::store::EtcdStore;

const MAX_IDENTIFIER_LEN: usize = 255;

/// Validate that an identifier is safe for use as a single etcd key segment.
///
/// Identifiers (worker ids, partition ids) are interpolated into key paths.
/// Without validation, a name like `../leader` or `a/b` could address keys
/// outside the intended directory, or be listed back as a different child.
pub fn validate_identifier(name: &str) -> Result<()> {
    let invalid = |reason: &'static str| -> Result<()> {
        Err(Error::InvalidIdentifier {
            name: name.to_string(),
            reason,
        })
    };
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return invalid("must be 1-255 characters");
    }
    if name == "." || name == ".." {
        return invalid("relative path segments are not allowed");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return invalid("only alphanumeric, dash, underscore and dot are allowed");
    }
    Ok(())
}

pub fn now_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Keep `lease_id` alive every `interval` until cancelled.
///
/// Returns `LeadershipLost` if etcd stops answering keepalives, which means
/// every key attached to the lease is about to disappear.
pub async fn run_lease_keepalive(
    store: &EtcdStore,
    lease_id: i64,
    interval: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let (mut keeper, mut stream) = store.keep_alive(lease_id).await?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tokio::time::sleep(interval) => {
                keeper.keep_alive().await?;
                match stream.message().await? {
                    Some(resp) if resp.ttl() > 0 => {}
                    _ => return Err(Error::LeadershipLost),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_identifier_accepts_valid() {
        for name in ["w-0", "worker_1", "abc", "events.json", "A-B_C-123"] {
            assert!(validate_identifier(name).is_ok(), "should accept: {name}");
        }
    }

    #[test]
    fn validate_identifier_rejects_empty() {
        assert!(validate_identifier("").is_err());
    }

    #[test]
    fn validate_identifier_rejects_too_long() {
        let long = "a".repeat(256);
        assert!(validate_identifier(&long).is_err());
        assert!(validate_identifier(&"a".repeat(255)).is_ok());
    }

    #[test]
    fn validate_identifier_rejects_path_traversal() {
        for name in ["..", ".", "../../etc", "foo/bar", "hello world", "a%b"] {
            assert!(validate_identifier(name).is_err(), "should reject: {name}");
        }
    }

    #[test]
    fn now_seconds_is_after_2020() {
        assert!(now_seconds() > 1_577_836_800);
    }
}
