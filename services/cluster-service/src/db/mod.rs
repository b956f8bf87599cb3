//! Persistence layer for the compute inventory and clusters.
//!
//! This module provides:
//! - The [`Store`] capability consumed by the registry, the controller and the
//!   status monitor
//! - An in-memory implementation for development and tests
//! - A Postgres implementation using SQLx
//!
//! Every call is a suspension point. Callers that need a consistent view
//! across several calls serialize through the task queue; the store itself
//! only guarantees that each single call is atomic.

mod error;
mod memory;
mod postgres;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use std::time::Duration;

use async_trait::async_trait;
use rda_id::{ClusterId, InstanceId, NodeId};

use crate::model::{
    Cluster, ClusterRef, ClusterStatus, ComputeInstance, ComputeNode, NewCluster, ShardAssignment,
};

/// Persistence capability.
#[async_trait]
pub trait Store: Send + Sync {
    /// Check that the backing storage is reachable.
    async fn health_check(&self) -> StoreResult<()>;

    // -------------------------------------------------------------------------
    // Nodes
    // -------------------------------------------------------------------------

    async fn find_node(&self, id: &NodeId) -> StoreResult<Option<ComputeNode>>;

    /// Insert a node. Inserting a node that already exists is a no-op.
    async fn insert_node(&self, node: &ComputeNode) -> StoreResult<()>;

    // -------------------------------------------------------------------------
    // Instances
    // -------------------------------------------------------------------------

    async fn list_instances(&self) -> StoreResult<Vec<ComputeInstance>>;

    /// Instances not bound to any shard.
    async fn list_available_instances(&self) -> StoreResult<Vec<ComputeInstance>>;

    /// Insert a new instance. Fails with [`StoreError::Conflict`] if the
    /// identifier is taken.
    async fn insert_instance(&self, instance: &ComputeInstance) -> StoreResult<()>;

    /// Delete an instance. Returns false if it did not exist.
    async fn delete_instance(&self, id: &InstanceId) -> StoreResult<bool>;

    async fn set_loaded_record_count(&self, id: &InstanceId, count: u64) -> StoreResult<()>;

    // -------------------------------------------------------------------------
    // Clusters
    // -------------------------------------------------------------------------

    /// Persist a cluster in status `created` with its shards, binding every
    /// planned instance. Either everything is written or nothing is; binding
    /// an instance that is missing or already bound is a
    /// [`StoreError::Conflict`].
    async fn insert_cluster(&self, cluster: &NewCluster) -> StoreResult<Cluster>;

    async fn find_cluster(&self, cluster: &ClusterRef) -> StoreResult<Option<Cluster>>;

    async fn find_clusters_by_status(&self, status: ClusterStatus) -> StoreResult<Vec<Cluster>>;

    /// Most recently created cluster for a data set in the given status.
    async fn find_cluster_for_data_set(
        &self,
        data_source: &str,
        data_set: &str,
        status: ClusterStatus,
    ) -> StoreResult<Option<Cluster>>;

    /// A cluster's shards joined with their instances in one round trip.
    async fn cluster_shards(&self, id: &ClusterId) -> StoreResult<Vec<ShardAssignment>>;

    /// Set a cluster's status.
    ///
    /// With `expected` set, the write only happens if the current status
    /// matches. Returns whether the status was written.
    async fn transition_cluster(
        &self,
        id: &ClusterId,
        expected: Option<ClusterStatus>,
        next: ClusterStatus,
    ) -> StoreResult<bool>;

    /// Move every non-terminal cluster to `ended`. Returns how many moved.
    async fn end_live_clusters(&self) -> StoreResult<u64>;
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: Duration,

    /// Idle connection timeout.
    pub idle_timeout: Duration,

    /// Maximum lifetime of a connection.
    pub max_lifetime: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/rda_cluster".to_string(),
            max_connections: 20,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

impl DbConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let database_url = std::env::var("DATABASE_URL").unwrap_or(defaults.database_url);

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_connections);

        let min_connections = std::env::var("DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.min_connections);

        Self {
            database_url,
            max_connections,
            min_connections,
            ..defaults
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 1);
    }
}
