//! In-memory store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use rda_id::{ClusterId, InstanceId, NodeId};
use tokio::sync::RwLock;

use super::{Store, StoreError, StoreResult};
use crate::model::{
    Cluster, ClusterRef, ClusterStatus, ComputeInstance, ComputeNode, NewCluster, Shard,
    ShardAssignment,
};

/// Store backed by process memory. State is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<NodeId, ComputeNode>,
    instances: BTreeMap<InstanceId, ComputeInstance>,
    // ClusterId is time ordered, so iteration order is creation order.
    clusters: BTreeMap<ClusterId, Cluster>,
    shards: Vec<Shard>,
}

impl Inner {
    fn cluster(&self, cluster: &ClusterRef) -> Option<&Cluster> {
        match cluster {
            ClusterRef::Id(id) => self.clusters.get(id),
            ClusterRef::External(external) => {
                self.clusters.values().find(|c| &c.external_id == external)
            }
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn find_node(&self, id: &NodeId) -> StoreResult<Option<ComputeNode>> {
        Ok(self.inner.read().await.nodes.get(id).cloned())
    }

    async fn insert_node(&self, node: &ComputeNode) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .nodes
            .entry(node.identifier.clone())
            .or_insert_with(|| node.clone());
        Ok(())
    }

    async fn list_instances(&self) -> StoreResult<Vec<ComputeInstance>> {
        Ok(self.inner.read().await.instances.values().cloned().collect())
    }

    async fn list_available_instances(&self) -> StoreResult<Vec<ComputeInstance>> {
        Ok(self
            .inner
            .read()
            .await
            .instances
            .values()
            .filter(|i| i.is_available())
            .cloned()
            .collect())
    }

    async fn insert_instance(&self, instance: &ComputeInstance) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.instances.contains_key(&instance.identifier) {
            return Err(StoreError::Conflict(format!(
                "instance '{}' already exists",
                instance.identifier
            )));
        }
        inner
            .instances
            .insert(instance.identifier.clone(), instance.clone());
        Ok(())
    }

    async fn delete_instance(&self, id: &InstanceId) -> StoreResult<bool> {
        Ok(self.inner.write().await.instances.remove(id).is_some())
    }

    async fn set_loaded_record_count(&self, id: &InstanceId, count: u64) -> StoreResult<()> {
        if let Some(instance) = self.inner.write().await.instances.get_mut(id) {
            instance.loaded_record_count = count;
        }
        Ok(())
    }

    async fn insert_cluster(&self, cluster: &NewCluster) -> StoreResult<Cluster> {
        let mut inner = self.inner.write().await;

        if inner.clusters.contains_key(&cluster.id) {
            return Err(StoreError::Conflict(format!(
                "cluster '{}' already exists",
                cluster.id
            )));
        }

        // Validate every binding before writing anything.
        let mut planned = std::collections::BTreeSet::new();
        for plan in &cluster.shards {
            if !planned.insert(&plan.instance) {
                return Err(StoreError::Conflict(format!(
                    "instance '{}' planned twice",
                    plan.instance
                )));
            }
            match inner.instances.get(&plan.instance) {
                None => {
                    return Err(StoreError::Conflict(format!(
                        "instance '{}' does not exist",
                        plan.instance
                    )))
                }
                Some(instance) if !instance.is_available() => {
                    return Err(StoreError::Conflict(format!(
                        "instance '{}' is already bound",
                        plan.instance
                    )))
                }
                Some(_) => {}
            }
        }

        let now = Utc::now();
        let record = Cluster {
            id: cluster.id,
            external_id: cluster.external_id.clone(),
            data_set: cluster.data_set.clone(),
            data_source: cluster.data_source.clone(),
            status: ClusterStatus::Created,
            created_at: now,
            updated_at: now,
        };

        for plan in &cluster.shards {
            if let Some(instance) = inner.instances.get_mut(&plan.instance) {
                instance.shard = Some(plan.shard);
            }
            inner.shards.push(Shard {
                identifier: plan.shard,
                cluster: cluster.id,
                instance: plan.instance.clone(),
            });
        }
        inner.clusters.insert(cluster.id, record.clone());

        Ok(record)
    }

    async fn find_cluster(&self, cluster: &ClusterRef) -> StoreResult<Option<Cluster>> {
        Ok(self.inner.read().await.cluster(cluster).cloned())
    }

    async fn find_clusters_by_status(&self, status: ClusterStatus) -> StoreResult<Vec<Cluster>> {
        Ok(self
            .inner
            .read()
            .await
            .clusters
            .values()
            .filter(|c| c.status == status)
            .cloned()
            .collect())
    }

    async fn find_cluster_for_data_set(
        &self,
        data_source: &str,
        data_set: &str,
        status: ClusterStatus,
    ) -> StoreResult<Option<Cluster>> {
        Ok(self
            .inner
            .read()
            .await
            .clusters
            .values()
            .rev()
            .find(|c| c.status == status && c.data_source == data_source && c.data_set == data_set)
            .cloned())
    }

    async fn cluster_shards(&self, id: &ClusterId) -> StoreResult<Vec<ShardAssignment>> {
        let inner = self.inner.read().await;
        Ok(inner
            .shards
            .iter()
            .filter(|s| &s.cluster == id)
            .map(|shard| ShardAssignment {
                shard: shard.clone(),
                // An instance that left and came back under the same
                // identifier is a different binding.
                instance: inner
                    .instances
                    .get(&shard.instance)
                    .filter(|i| i.shard == Some(shard.identifier))
                    .cloned(),
            })
            .collect())
    }

    async fn transition_cluster(
        &self,
        id: &ClusterId,
        expected: Option<ClusterStatus>,
        next: ClusterStatus,
    ) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        let Some(cluster) = inner.clusters.get_mut(id) else {
            return Ok(false);
        };
        if expected.is_some_and(|expected| cluster.status != expected) {
            return Ok(false);
        }
        cluster.status = next;
        cluster.updated_at = Utc::now();
        Ok(true)
    }

    async fn end_live_clusters(&self) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let mut ended = 0;
        for cluster in inner.clusters.values_mut() {
            if !cluster.status.is_terminal() {
                cluster.status = ClusterStatus::Ended;
                cluster.updated_at = now;
                ended += 1;
            }
        }
        Ok(ended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstanceDescriptor, ShardPlan};
    use rda_id::ShardId;

    fn instance(id: &str) -> ComputeInstance {
        ComputeInstance::discovered(&InstanceDescriptor {
            identifier: InstanceId::parse(id).unwrap(),
            available_memory: 1 << 30,
            address: format!("http://{id}:7000"),
            node: NodeId::parse("node-1").unwrap(),
        })
    }

    fn new_cluster(instances: &[&str]) -> NewCluster {
        NewCluster {
            id: ClusterId::new(),
            external_id: uuid::Uuid::new_v4().to_string(),
            data_set: "ds".to_string(),
            data_source: "src".to_string(),
            shards: instances
                .iter()
                .map(|id| ShardPlan {
                    shard: ShardId::new(),
                    instance: InstanceId::parse(*id).unwrap(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_bound_instances_are_not_available() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            store.insert_instance(&instance(id)).await.unwrap();
        }

        store.insert_cluster(&new_cluster(&["a", "b"])).await.unwrap();

        let available = store.list_available_instances().await.unwrap();
        let ids: Vec<_> = available.iter().map(|i| i.identifier.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[tokio::test]
    async fn test_insert_cluster_rejects_double_binding_atomically() {
        let store = MemoryStore::new();
        for id in ["a", "b"] {
            store.insert_instance(&instance(id)).await.unwrap();
        }
        store.insert_cluster(&new_cluster(&["a"])).await.unwrap();

        let second = new_cluster(&["b", "a"]);
        let err = store.insert_cluster(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        // "b" must not have been bound by the failed insert.
        assert_eq!(store.list_available_instances().await.unwrap().len(), 1);
        assert!(store
            .find_cluster(&ClusterRef::Id(second.id))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_find_cluster_by_external_id() {
        let store = MemoryStore::new();
        let new = new_cluster(&[]);
        store.insert_cluster(&new).await.unwrap();

        let by_external = store
            .find_cluster(&ClusterRef::External(new.external_id.clone()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_external.id, new.id);
        assert_eq!(by_external.status, ClusterStatus::Created);
    }

    #[tokio::test]
    async fn test_transition_respects_expected_status() {
        let store = MemoryStore::new();
        let new = new_cluster(&[]);
        store.insert_cluster(&new).await.unwrap();

        let moved = store
            .transition_cluster(&new.id, Some(ClusterStatus::Initializing), ClusterStatus::Active)
            .await
            .unwrap();
        assert!(!moved);

        let moved = store
            .transition_cluster(&new.id, Some(ClusterStatus::Created), ClusterStatus::Initializing)
            .await
            .unwrap();
        assert!(moved);
    }

    #[tokio::test]
    async fn test_end_live_clusters_keeps_failed() {
        let store = MemoryStore::new();
        let live = new_cluster(&[]);
        let failed = new_cluster(&[]);
        store.insert_cluster(&live).await.unwrap();
        store.insert_cluster(&failed).await.unwrap();
        store
            .transition_cluster(&failed.id, None, ClusterStatus::Failed)
            .await
            .unwrap();

        assert_eq!(store.end_live_clusters().await.unwrap(), 1);

        let failed = store.find_cluster(&failed.id.into()).await.unwrap().unwrap();
        assert_eq!(failed.status, ClusterStatus::Failed);
        let live = store.find_cluster(&live.id.into()).await.unwrap().unwrap();
        assert_eq!(live.status, ClusterStatus::Ended);
    }

    #[tokio::test]
    async fn test_find_by_status_and_data_set() {
        let store = MemoryStore::new();
        let older = new_cluster(&[]);
        let newer = new_cluster(&[]);
        store.insert_cluster(&older).await.unwrap();
        store.insert_cluster(&newer).await.unwrap();
        for id in [&older.id, &newer.id] {
            store
                .transition_cluster(id, None, ClusterStatus::Active)
                .await
                .unwrap();
        }

        let active = store.find_clusters_by_status(ClusterStatus::Active).await.unwrap();
        assert_eq!(active.len(), 2);

        let found = store
            .find_cluster_for_data_set("src", "ds", ClusterStatus::Active)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, newer.id);
        assert!(store
            .find_cluster_for_data_set("src", "other", ClusterStatus::Active)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_cluster_shards_tolerates_vanished_instance() {
        let store = MemoryStore::new();
        store.insert_instance(&instance("a")).await.unwrap();
        let new = new_cluster(&["a"]);
        store.insert_cluster(&new).await.unwrap();
        store
            .delete_instance(&InstanceId::parse("a").unwrap())
            .await
            .unwrap();

        let shards = store.cluster_shards(&new.id).await.unwrap();
        assert_eq!(shards.len(), 1);
        assert!(shards[0].instance.is_none());
    }

    #[tokio::test]
    async fn test_cluster_shards_ignores_rebound_instance() {
        let store = MemoryStore::new();
        store.insert_instance(&instance("a")).await.unwrap();
        let old = new_cluster(&["a"]);
        store.insert_cluster(&old).await.unwrap();

        store
            .delete_instance(&InstanceId::parse("a").unwrap())
            .await
            .unwrap();
        store.insert_instance(&instance("a")).await.unwrap();
        let new = new_cluster(&["a"]);
        store.insert_cluster(&new).await.unwrap();

        let old_shards = store.cluster_shards(&old.id).await.unwrap();
        assert!(old_shards[0].instance.is_none());
        let new_shards = store.cluster_shards(&new.id).await.unwrap();
        let bound = new_shards[0].instance.as_ref().unwrap();
        assert_eq!(bound.shard, Some(new.shards[0].shard));
    }
}
