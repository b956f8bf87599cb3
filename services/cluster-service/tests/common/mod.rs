//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rda_cluster_service::allocator::MaxDistribution;
use rda_cluster_service::clients::{MockDiscovery, MockInstanceControl, MockLoad};
use rda_cluster_service::controller::{ClusterController, ControllerSettings, CreateCluster};
use rda_cluster_service::db::{MemoryStore, Store};
use rda_cluster_service::model::{ClusterRef, ClusterStatus, InstanceDescriptor};
use rda_id::{InstanceId, NodeId};

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub discovery: Arc<MockDiscovery>,
    pub control: Arc<MockInstanceControl>,
    pub controller: ClusterController,
}

pub fn address(i: usize) -> String {
    format!("http://10.0.0.{i}:7000")
}

pub fn instances(n: usize) -> Vec<InstanceDescriptor> {
    (1..=n)
        .map(|i| InstanceDescriptor {
            identifier: InstanceId::parse(format!("compute-{i}")).unwrap(),
            available_memory: 8_000_000_000,
            address: address(i),
            node: NodeId::parse(format!("machine-{}", i % 2)).unwrap(),
        })
        .collect()
}

impl Harness {
    /// `n` live instances behaving as `load` unless scripted otherwise.
    pub fn new(n: usize, load: MockLoad) -> Self {
        let store = Arc::new(MemoryStore::new());
        let discovery = Arc::new(MockDiscovery::new(instances(n)));
        let control = Arc::new(MockInstanceControl::new(load));
        let controller = ClusterController::new(
            store.clone(),
            discovery.clone(),
            control.clone(),
            Arc::new(MaxDistribution),
            ControllerSettings {
                monitor_interval: Duration::from_millis(10),
                ..ControllerSettings::default()
            },
        );
        Self {
            store,
            discovery,
            control,
            controller,
        }
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    /// Wait until the cluster reaches `expected`, panicking after two seconds.
    pub async fn wait_for_status(&self, cluster: &ClusterRef, expected: ClusterStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let view = self.controller.get_cluster(cluster).await.unwrap();
            if view.status == expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "cluster {cluster} stuck in {} waiting for {expected}",
                view.status
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

pub fn create_request() -> CreateCluster {
    CreateCluster {
        data_source: "sample-storage".to_string(),
        data_set: "sample-set".to_string(),
        required_memory: 1_000_000,
        record_count: 10_000,
    }
}
