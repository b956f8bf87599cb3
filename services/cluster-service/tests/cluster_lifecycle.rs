//! End-to-end lifecycle of a cluster against the in-memory store and mocked
//! capabilities.

mod common;

use std::collections::BTreeSet;

use common::{address, create_request, Harness};
use rda_cluster_service::clients::MockLoad;
use rda_cluster_service::db::Store;
use rda_cluster_service::error::ClusterError;
use rda_cluster_service::model::{ClusterRef, ClusterStatus};
use rda_id::ClusterId;

#[tokio::test]
async fn test_create_allocates_one_shard_per_instance() {
    let harness = Harness::new(4, MockLoad::Done { record_count: 0 });

    let created = harness.controller.create_cluster(create_request()).await.unwrap();

    assert_eq!(created.shards.len(), 4);
    assert_eq!(created.cluster.status, ClusterStatus::Created);
    let distinct: BTreeSet<_> = created.shards.iter().collect();
    assert_eq!(distinct.len(), 4);

    let view = harness
        .controller
        .get_cluster(&ClusterRef::Id(created.cluster.id))
        .await
        .unwrap();
    assert_eq!(view.status, ClusterStatus::Created);
    assert_eq!(view.shards.len(), 4);
}

#[tokio::test]
async fn test_second_cluster_gets_only_leftover_instances() {
    let harness = Harness::new(4, MockLoad::Done { record_count: 0 });

    let first = harness.controller.create_cluster(create_request()).await.unwrap();
    let second = harness.controller.create_cluster(create_request()).await.unwrap();

    assert_eq!(first.shards.len(), 4);
    assert!(second.shards.is_empty());
}

#[tokio::test]
async fn test_concurrent_creations_never_share_instances() {
    let harness = Harness::new(6, MockLoad::Done { record_count: 0 });

    let creations = (0..3).map(|_| {
        let controller = harness.controller.clone();
        tokio::spawn(async move { controller.create_cluster(create_request()).await })
    });

    let mut instances = Vec::new();
    for handle in creations {
        let created = handle.await.unwrap().unwrap();
        let view = harness
            .controller
            .get_cluster(&ClusterRef::Id(created.cluster.id))
            .await
            .unwrap();
        instances.extend(view.shards.into_iter().map(|s| s.instance_identifier));
    }

    let distinct: BTreeSet<_> = instances.iter().collect();
    assert_eq!(instances.len(), 6);
    assert_eq!(distinct.len(), 6);
}

#[tokio::test]
async fn test_get_unknown_cluster_is_not_found() {
    let harness = Harness::new(0, MockLoad::Done { record_count: 0 });

    for reference in [ClusterRef::Id(ClusterId::new()), ClusterRef::parse("invalid")] {
        let err = harness.controller.get_cluster(&reference).await.unwrap_err();
        assert!(matches!(err, ClusterError::NotFound { .. }));
    }

    let err = harness
        .controller
        .initialize_cluster(ClusterRef::parse("invalid"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::NotFound { .. }));
}

#[tokio::test]
async fn test_initialize_until_active() {
    let harness = Harness::new(4, MockLoad::Done { record_count: 2_500 });
    let created = harness.controller.create_cluster(create_request()).await.unwrap();
    let reference = ClusterRef::External(created.cluster.external_id.clone());

    harness.controller.initialize_cluster(reference.clone()).await.unwrap();
    harness.wait_for_status(&reference, ClusterStatus::Active).await;

    let view = harness.controller.get_cluster(&reference).await.unwrap();
    assert_eq!(view.total_loaded_records, 10_000);

    let started = harness.control.started().await;
    assert_eq!(started.len(), 4);
    assert!(started.iter().all(|(_, request)| request.data_source == "sample-storage"
        && request.min_free_memory_percent == 25));
}

#[tokio::test]
async fn test_initialize_waits_for_slow_instances() {
    let harness = Harness::new(2, MockLoad::Done { record_count: 10 });
    harness
        .control
        .script(address(2), MockLoad::DoneAfter { polls: 3, record_count: 10 })
        .await;
    let created = harness.controller.create_cluster(create_request()).await.unwrap();
    let reference = ClusterRef::Id(created.cluster.id);

    harness.controller.initialize_cluster(reference.clone()).await.unwrap();
    harness.wait_for_status(&reference, ClusterStatus::Active).await;

    assert!(harness.control.poll_count(&address(2)).await >= 4);
}

#[tokio::test]
async fn test_poll_error_fails_cluster() {
    let harness = Harness::new(3, MockLoad::Pending { record_count: 1 });
    harness.control.script(address(2), MockLoad::PollError).await;
    let created = harness.controller.create_cluster(create_request()).await.unwrap();
    let reference = ClusterRef::Id(created.cluster.id);

    harness.controller.initialize_cluster(reference.clone()).await.unwrap();
    harness.wait_for_status(&reference, ClusterStatus::Failed).await;
}

#[tokio::test]
async fn test_dispatch_failure_keeps_initializing_then_fails() {
    let harness = Harness::new(2, MockLoad::Done { record_count: 0 });
    harness.control.script(address(1), MockLoad::RejectStart).await;
    let created = harness.controller.create_cluster(create_request()).await.unwrap();
    let reference = ClusterRef::Id(created.cluster.id);

    let err = harness
        .controller
        .initialize_cluster(reference.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::Upstream { .. }));

    // The rejecting instance never answers a poll either.
    harness.wait_for_status(&reference, ClusterStatus::Failed).await;
}

#[tokio::test]
async fn test_initialize_conflict_leaves_status_unchanged() {
    let harness = Harness::new(1, MockLoad::Pending { record_count: 0 });
    let created = harness.controller.create_cluster(create_request()).await.unwrap();
    let reference = ClusterRef::Id(created.cluster.id);
    harness.controller.initialize_cluster(reference.clone()).await.unwrap();

    let err = harness
        .controller
        .initialize_cluster(reference.clone())
        .await
        .unwrap_err();

    assert_eq!(err.conflicting_status(), Some(ClusterStatus::Initializing));
    let view = harness.controller.get_cluster(&reference).await.unwrap();
    assert_eq!(view.status, ClusterStatus::Initializing);
}

#[tokio::test]
async fn test_ended_cluster_is_not_revived_by_monitor() {
    let harness = Harness::new(1, MockLoad::DoneAfter { polls: 5, record_count: 1 });
    let created = harness.controller.create_cluster(create_request()).await.unwrap();
    let reference = ClusterRef::Id(created.cluster.id);

    harness.controller.initialize_cluster(reference.clone()).await.unwrap();
    harness.controller.end_cluster(reference.clone()).await.unwrap();

    // Give the monitor time to see every instance done.
    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    let view = harness.controller.get_cluster(&reference).await.unwrap();
    assert_eq!(view.status, ClusterStatus::Ended);
}

#[tokio::test]
async fn test_find_active_cluster_by_data_set() {
    let harness = Harness::new(2, MockLoad::Done { record_count: 5 });
    let created = harness.controller.create_cluster(create_request()).await.unwrap();
    let reference = ClusterRef::Id(created.cluster.id);

    let err = harness
        .controller
        .find_active_cluster("sample-storage", "sample-set")
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::NotFound { .. }));

    harness.controller.initialize_cluster(reference.clone()).await.unwrap();
    harness.wait_for_status(&reference, ClusterStatus::Active).await;

    let view = harness
        .controller
        .find_active_cluster("sample-storage", "sample-set")
        .await
        .unwrap();
    assert_eq!(view.cluster_id, created.cluster.id);
    assert!(view.shards.iter().all(|s| s.url.is_some()));
}

#[tokio::test]
async fn test_creation_drops_vanished_instances() {
    let harness = Harness::new(4, MockLoad::Done { record_count: 0 });
    harness.controller.create_cluster(create_request()).await.unwrap();

    harness.discovery.set_instances(common::instances(2)).await;
    let mut events = harness.controller.registry().subscribe();
    harness.controller.create_cluster(create_request()).await.unwrap();

    let mut removed = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, rda_cluster_service::inventory::InventoryEvent::Removed(_)) {
            removed += 1;
        }
    }
    assert_eq!(removed, 2);
    assert_eq!(harness.store().list_instances().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_discovery_failure_is_upstream() {
    let harness = Harness::new(2, MockLoad::Done { record_count: 0 });
    harness.discovery.fail_with("registry unreachable").await;

    let err = harness.controller.create_cluster(create_request()).await.unwrap_err();
    assert!(matches!(err, ClusterError::Upstream { capability: "discovery", .. }));
}

#[tokio::test]
async fn test_returning_instance_is_not_shared_with_old_shard() {
    let harness = Harness::new(1, MockLoad::Done { record_count: 7 });
    let first = harness.controller.create_cluster(create_request()).await.unwrap();
    let first_ref = ClusterRef::Id(first.cluster.id);

    // compute-1 leaves discovery, then comes back under the same identifier.
    harness.discovery.set_instances(Vec::new()).await;
    harness.controller.create_cluster(create_request()).await.unwrap();
    harness.discovery.set_instances(common::instances(1)).await;
    let second = harness.controller.create_cluster(create_request()).await.unwrap();
    assert_eq!(second.shards.len(), 1);

    let first_view = harness.controller.get_cluster(&first_ref).await.unwrap();
    assert_eq!(first_view.shards.len(), 1);
    assert!(first_view.shards[0].url.is_none());

    let second_view = harness
        .controller
        .get_cluster(&ClusterRef::Id(second.cluster.id))
        .await
        .unwrap();
    assert_eq!(second_view.shards[0].url.as_deref(), Some(address(1).as_str()));

    let owner = harness.store().list_instances().await.unwrap();
    assert_eq!(owner.len(), 1);
    assert_eq!(owner[0].shard, Some(second.shards[0]));

    // The old cluster must not reach the instance now serving the new one.
    let err = harness
        .controller
        .initialize_cluster(first_ref.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::Upstream { .. }));
    assert!(harness.control.started().await.is_empty());
    harness.wait_for_status(&first_ref, ClusterStatus::Failed).await;
    assert_eq!(harness.control.poll_count(&address(1)).await, 0);
}
