use crate::error::{Error, Result};
use crate::store::AssignmentStore;

/// Partitions whose flag propagation is currently assigned to `self_id`.
///
/// A partition whose owner can't be read is left out and logged; only a
/// failure to list the assignments is returned.
pub async fn get_assignments(store: &dyn AssignmentStore, self_id: &str) -> Result<Vec<String>> {
    let partitions = store
        .list_assigned_partitions()
        .await
        .map_err(Error::listing_failed)?;

    let mut assignments = Vec::new();
    for partition_id in partitions {
        match store.read_assigned_worker(&partition_id).await {
            Ok(Some(worker_id)) if worker_id == self_id => assignments.push(partition_id),
            Ok(_) => {}
            Err(e) => {
                tracing::error!(
                    partition_id = %partition_id,
                    worker_id = %self_id,
                    error = %e,
                    "error trying to determine flag propagator assignment"
                );
            }
        }
    }
    Ok(assignments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAssignmentStore;

    #[tokio::test]
    async fn returns_only_own_partitions() {
        let store = MemoryAssignmentStore::with_assignments([
            ("clicks", "w-0"),
            ("views", "w-1"),
            ("billing", "w-0"),
        ]);
        let mine = get_assignments(&store, "w-0").await.unwrap();
        assert_eq!(mine, vec!["billing".to_string(), "clicks".to_string()]);
    }

    #[tokio::test]
    async fn unknown_worker_has_nothing() {
        let store = MemoryAssignmentStore::with_assignments([("clicks", "w-0")]);
        assert!(get_assignments(&store, "w-9").await.unwrap().is_empty());
    }
}
