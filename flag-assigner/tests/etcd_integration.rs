//! Runs against a local etcd at `http://localhost:2379`:
//! `cargo test -p flag-assigner -- --ignored`

mod common;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use assignment_coordination::leader_election;
use common::{
    register_worker, start_assigner, test_store, wait_for_condition, POLL_INTERVAL, WAIT_TIMEOUT,
};
use flag_assigner::error::{Error, Result};
use flag_assigner::query::get_assignments;
use flag_assigner::store::{AssignmentStore, FlagAssignerStore, LEADER_KEY};
use flag_assigner::types::PartitionConfig;
use flag_assigner::worker::{AssignmentChange, AssignmentHandler, WorkerConfig, WorkerHandle};

async fn configure(store: &FlagAssignerStore, partitions: &[(&str, &str)]) {
    for (id, template) in partitions {
        store
            .set_partition_config(&PartitionConfig::new(*id, *template))
            .await
            .unwrap();
    }
}

async fn assigned_to(store: &FlagAssignerStore) -> Vec<(String, Option<String>)> {
    let mut out = Vec::new();
    for partition_id in store.list_assigned_partitions().await.unwrap() {
        let worker = store.read_assigned_worker(&partition_id).await.unwrap();
        out.push((partition_id, worker));
    }
    out
}

#[tokio::test]
#[ignore]
async fn create_never_overwrites_and_delete_reports_missing() {
    let store = test_store("create-delete").await;

    store.create_assignment("clicks", "w-0").await.unwrap();
    let err = store.create_assignment("clicks", "w-1").await.unwrap_err();
    assert!(matches!(err, Error::AlreadyAssigned { .. }));
    assert_eq!(
        store.read_assigned_worker("clicks").await.unwrap().as_deref(),
        Some("w-0")
    );
    assert_eq!(store.list_assigned_partitions().await.unwrap(), vec!["clicks"]);

    store.delete_assignment("clicks").await.unwrap();
    let err = store.delete_assignment("clicks").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(store.read_assigned_worker("clicks").await.unwrap(), None);

    store.delete_all().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn assigner_covers_every_root_and_reassigns_on_departure() {
    let store = test_store("assigner").await;
    configure(
        &store,
        &[
            ("clicks", "/logs/web/%y%M%d/%H/clicks"),
            ("views", "/logs/web/%y%M%d/%H/views"),
            ("billing", "/logs/billing/%y%M%d/%H/x"),
            ("search", "/logs/search/%y%M%d/%H/x"),
            ("broken", "/logs/broken"),
        ],
    )
    .await;

    let lease_a = register_worker(&store, "w-a", 1).await;
    let _lease_b = register_worker(&store, "w-b", 1).await;

    let cancel = CancellationToken::new();
    let handle = start_assigner(store.clone(), cancel.clone());

    // Three distinct roots; `views` shares a root with `clicks`.
    wait_for_condition(WAIT_TIMEOUT, POLL_INTERVAL, || {
        let store = store.clone();
        async move {
            let assigned = assigned_to(&store).await;
            assigned.len() == 3 && assigned.iter().all(|(_, w)| w.is_some())
        }
    })
    .await;

    let partitions: BTreeSet<_> = assigned_to(&store)
        .await
        .into_iter()
        .map(|(p, _)| p)
        .collect();
    assert_eq!(
        partitions,
        BTreeSet::from([
            "billing".to_string(),
            "clicks".to_string(),
            "search".to_string()
        ])
    );

    let leader = leader_election::get_leader(store.inner(), LEADER_KEY)
        .await
        .unwrap()
        .expect("assigner holds leadership");
    assert_eq!(leader.holder, "flag-assigner-0");

    store.revoke_lease(lease_a).await.unwrap();

    wait_for_condition(WAIT_TIMEOUT, POLL_INTERVAL, || {
        let store = store.clone();
        async move { get_assignments(store.as_ref(), "w-b").await.unwrap().len() == 3 }
    })
    .await;

    // Dropping a root's only partition retires its assignment.
    store.delete_partition_config("search").await.unwrap();

    wait_for_condition(WAIT_TIMEOUT, POLL_INTERVAL, || {
        let store = store.clone();
        async move { get_assignments(store.as_ref(), "w-b").await.unwrap() == ["billing", "clicks"] }
    })
    .await;

    cancel.cancel();
    handle.await.unwrap().unwrap();
    store.delete_all().await.unwrap();
}

#[derive(Default)]
struct RecordingHandler {
    changes: Mutex<Vec<AssignmentChange>>,
}

#[async_trait]
impl AssignmentHandler for RecordingHandler {
    async fn assignments_changed(&self, change: &AssignmentChange) -> Result<()> {
        self.changes.lock().unwrap().push(change.clone());
        Ok(())
    }
}

#[tokio::test]
#[ignore]
async fn worker_registers_and_sees_its_assignments() {
    let store = test_store("worker").await;
    configure(&store, &[("clicks", "/logs/web/%y%M%d/%H/clicks")]).await;

    let cancel = CancellationToken::new();
    let handler = Arc::new(RecordingHandler::default());
    let worker = WorkerHandle::new(
        store.clone(),
        WorkerConfig {
            worker_id: "w-0".to_string(),
            weight: 1,
            lease_ttl: 10,
            heartbeat_interval: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
        },
        handler.clone(),
    );
    let worker_handle = {
        let token = cancel.child_token();
        tokio::spawn(async move { worker.run(token).await })
    };
    let assigner_handle = start_assigner(store.clone(), cancel.clone());

    wait_for_condition(WAIT_TIMEOUT, POLL_INTERVAL, || {
        let handler = handler.clone();
        async move {
            handler
                .changes
                .lock()
                .unwrap()
                .iter()
                .any(|c| c.assigned == vec!["clicks".to_string()])
        }
    })
    .await;

    cancel.cancel();
    worker_handle.await.unwrap().unwrap();
    assigner_handle.await.unwrap().unwrap();

    // Shutdown revokes the worker lease, so the registration is gone.
    assert!(store.list_workers().await.unwrap().is_empty());
    store.delete_all().await.unwrap();
}
