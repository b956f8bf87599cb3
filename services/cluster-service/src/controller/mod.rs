//! Cluster lifecycle controller.
//!
//! Lifecycle: `created -> initializing -> active | failed`, and any status
//! can be moved to `ended`. Creation and initialization run under the
//! [`ALLOCATION_KEY`] queue lane so two requests never compete for the same
//! instances. Reads bypass the queue and may observe a cluster mid-transition.

mod monitor;

pub use monitor::{MonitorOutcome, StatusMonitor};

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rda_id::{ClusterId, ShardId};
use rda_lock::SerialQueue;
use rda_reconcile::DEFAULT_POLL_INTERVAL;
use tracing::{info, instrument, warn};

use crate::allocator::{verify_plan, CapacityRequirement, ShardAllocator};
use crate::clients::{ClientError, Discovery, InstanceControl, StartLoading};
use crate::db::Store;
use crate::error::{ClusterError, ClusterResult};
use crate::inventory::InstanceRegistry;
use crate::model::{
    Cluster, ClusterRef, ClusterStatus, ClusterView, NewCluster, ShardAssignment,
};

/// Queue key shared by every allocation-affecting operation.
pub const ALLOCATION_KEY: &str = "node-allocation";

/// Controller tuning.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Service type asked of discovery.
    pub service_type: String,

    /// Memory, in percent, instances keep free while loading.
    pub min_free_memory_percent: u8,

    /// Pause between monitor poll cycles.
    pub monitor_interval: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            service_type: "rda-compute".to_string(),
            min_free_memory_percent: 25,
            monitor_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Parameters of a cluster creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCluster {
    pub data_source: String,
    pub data_set: String,
    pub required_memory: u64,
    pub record_count: u64,
}

impl CreateCluster {
    fn validate(&self) -> ClusterResult<()> {
        if self.data_source.trim().is_empty() {
            return Err(ClusterError::validation("dataSource must not be empty"));
        }
        if self.data_set.trim().is_empty() {
            return Err(ClusterError::validation("dataSet must not be empty"));
        }
        if self.required_memory == 0 {
            return Err(ClusterError::validation("requiredMemory must be positive"));
        }
        if self.record_count == 0 {
            return Err(ClusterError::validation("recordCount must be positive"));
        }
        Ok(())
    }
}

/// A freshly persisted cluster and the shards planned for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedCluster {
    pub cluster: Cluster,
    pub shards: Vec<ShardId>,
}

/// Orchestrates cluster creation, initialization and queries.
#[derive(Clone)]
pub struct ClusterController {
    store: Arc<dyn Store>,
    discovery: Arc<dyn Discovery>,
    control: Arc<dyn InstanceControl>,
    allocator: Arc<dyn ShardAllocator>,
    registry: InstanceRegistry,
    queue: SerialQueue,
    settings: Arc<ControllerSettings>,
}

impl ClusterController {
    pub fn new(
        store: Arc<dyn Store>,
        discovery: Arc<dyn Discovery>,
        control: Arc<dyn InstanceControl>,
        allocator: Arc<dyn ShardAllocator>,
        settings: ControllerSettings,
    ) -> Self {
        let queue = SerialQueue::new();
        Self {
            registry: InstanceRegistry::new(store.clone(), queue.clone()),
            store,
            discovery,
            control,
            allocator,
            queue,
            settings: Arc::new(settings),
        }
    }

    /// The instance registry this controller refreshes before allocating.
    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// End every cluster left live by a previous run.
    ///
    /// Called once at start-up, before requests are served.
    pub async fn load(&self) -> ClusterResult<u64> {
        let ended = self.store.end_live_clusters().await?;
        if ended > 0 {
            warn!(count = ended, "Ended clusters left live by a previous run");
        }
        Ok(ended)
    }

    /// Allocate and persist a new cluster in status `created`.
    #[instrument(
        skip(self, request),
        fields(data_source = %request.data_source, data_set = %request.data_set)
    )]
    pub async fn create_cluster(&self, request: CreateCluster) -> ClusterResult<CreatedCluster> {
        request.validate()?;

        let controller = self.clone();
        self.queue
            .enqueue(ALLOCATION_KEY, move || async move {
                controller.create_cluster_locked(request).await
            })
            .await
    }

    async fn create_cluster_locked(&self, request: CreateCluster) -> ClusterResult<CreatedCluster> {
        let live = self
            .discovery
            .list_live_instances(&self.settings.service_type)
            .await?;
        self.registry.reconcile(live).await?;

        let candidates = self.store.list_available_instances().await?;
        let requirement = CapacityRequirement {
            required_memory: request.required_memory,
            record_count: request.record_count,
        };
        let plan = self.allocator.allocate(&candidates, &requirement);
        verify_plan(&plan, &candidates)?;

        let new = NewCluster {
            id: ClusterId::new(),
            external_id: uuid::Uuid::new_v4().to_string(),
            data_set: request.data_set,
            data_source: request.data_source,
            shards: plan,
        };
        let cluster = self.store.insert_cluster(&new).await?;

        info!(
            cluster_id = %cluster.id,
            external_id = %cluster.external_id,
            allocator = self.allocator.name(),
            candidates = candidates.len(),
            shards = new.shards.len(),
            "Cluster created"
        );

        Ok(CreatedCluster {
            cluster,
            shards: new.shards.into_iter().map(|plan| plan.shard).collect(),
        })
    }

    /// Move a `created` cluster to `initializing`, tell every instance to start
    /// loading its shard and start the status monitor.
    ///
    /// Returns once every start signal was acknowledged. A failed start signal
    /// is reported as an upstream error; the cluster stays `initializing` and
    /// the monitor moves it to `failed` once it observes the instance.
    #[instrument(skip(self, cluster), fields(cluster = %cluster))]
    pub async fn initialize_cluster(&self, cluster: ClusterRef) -> ClusterResult<()> {
        let controller = self.clone();
        self.queue
            .enqueue(ALLOCATION_KEY, move || async move {
                controller.initialize_cluster_locked(cluster).await
            })
            .await
    }

    async fn initialize_cluster_locked(&self, reference: ClusterRef) -> ClusterResult<()> {
        let cluster = self.find(&reference).await?;
        if cluster.status != ClusterStatus::Created {
            return Err(ClusterError::Conflict {
                cluster: reference.to_string(),
                status: cluster.status,
                expected: ClusterStatus::Created,
            });
        }

        let moved = self
            .store
            .transition_cluster(
                &cluster.id,
                Some(ClusterStatus::Created),
                ClusterStatus::Initializing,
            )
            .await?;
        if !moved {
            let current = self.find(&reference).await?;
            return Err(ClusterError::Conflict {
                cluster: reference.to_string(),
                status: current.status,
                expected: ClusterStatus::Created,
            });
        }
        info!(cluster_id = %cluster.id, "Cluster initializing");

        let shards = self.store.cluster_shards(&cluster.id).await?;
        let dispatched = join_all(
            shards
                .iter()
                .map(|assignment| self.dispatch(&cluster, assignment)),
        )
        .await;

        self.spawn_monitor(cluster.id);

        let failures: Vec<ClientError> = dispatched.into_iter().filter_map(Result::err).collect();
        match failures.into_iter().next() {
            None => {
                info!(cluster_id = %cluster.id, shards = shards.len(), "Shards dispatched");
                Ok(())
            }
            Some(first) => {
                warn!(cluster_id = %cluster.id, error = %first, "Shard dispatch failed");
                Err(first.into())
            }
        }
    }

    async fn dispatch(
        &self,
        cluster: &Cluster,
        assignment: &ShardAssignment,
    ) -> Result<(), ClientError> {
        let Some(instance) = &assignment.instance else {
            return Err(ClientError::InstanceGone {
                instance: assignment.shard.instance.to_string(),
            });
        };
        let request = StartLoading {
            shard: assignment.shard.identifier,
            data_source: cluster.data_source.clone(),
            min_free_memory_percent: self.settings.min_free_memory_percent,
        };
        self.control.start_loading(&instance.address, &request).await
    }

    fn spawn_monitor(&self, cluster: ClusterId) {
        let monitor = StatusMonitor::new(
            cluster,
            self.store.clone(),
            self.control.clone(),
            self.settings.monitor_interval,
        );
        tokio::spawn(monitor.run());
    }

    /// Look a cluster up by internal or external identifier.
    #[instrument(skip(self, cluster), fields(cluster = %cluster))]
    pub async fn get_cluster(&self, cluster: &ClusterRef) -> ClusterResult<ClusterView> {
        let cluster = self.find(cluster).await?;
        let shards = self.store.cluster_shards(&cluster.id).await?;
        Ok(ClusterView::new(cluster, shards))
    }

    /// The active cluster serving a data set.
    #[instrument(skip(self))]
    pub async fn find_active_cluster(
        &self,
        data_source: &str,
        data_set: &str,
    ) -> ClusterResult<ClusterView> {
        if data_source.trim().is_empty() || data_set.trim().is_empty() {
            return Err(ClusterError::validation(
                "dataSource and dataSet must not be empty",
            ));
        }
        let cluster = self
            .store
            .find_cluster_for_data_set(data_source, data_set, ClusterStatus::Active)
            .await?
            .ok_or_else(|| ClusterError::NotFound {
                entity: "active cluster",
                id: format!("{data_source}/{data_set}"),
            })?;
        let shards = self.store.cluster_shards(&cluster.id).await?;
        Ok(ClusterView::new(cluster, shards))
    }

    /// Move a cluster to `ended`. Ending an ended cluster is a no-op.
    #[instrument(skip(self, cluster), fields(cluster = %cluster))]
    pub async fn end_cluster(&self, cluster: ClusterRef) -> ClusterResult<()> {
        let controller = self.clone();
        self.queue
            .enqueue(ALLOCATION_KEY, move || async move {
                let found = controller.find(&cluster).await?;
                if found.status == ClusterStatus::Ended {
                    return Ok(());
                }
                controller
                    .store
                    .transition_cluster(&found.id, None, ClusterStatus::Ended)
                    .await?;
                info!(cluster_id = %found.id, previous = %found.status, "Cluster ended");
                Ok(())
            })
            .await
    }

    async fn find(&self, cluster: &ClusterRef) -> ClusterResult<Cluster> {
        self.store
            .find_cluster(cluster)
            .await?
            .ok_or_else(|| ClusterError::cluster_not_found(cluster))
    }
}
