//! Domain model for the compute inventory and sharded clusters.

use chrono::{DateTime, Utc};
use rda_id::{ClusterId, InstanceId, NodeId, ShardId};
use serde::{Deserialize, Serialize};

/// A physical machine hosting one or more compute instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeNode {
    pub identifier: NodeId,
    pub created_at: DateTime<Utc>,
}

impl ComputeNode {
    pub fn new(identifier: NodeId) -> Self {
        Self {
            identifier,
            created_at: Utc::now(),
        }
    }
}

/// A live worker as reported by service discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceDescriptor {
    pub identifier: InstanceId,
    pub available_memory: u64,
    pub address: String,
    pub node: NodeId,
}

/// A persisted worker process able to load and serve one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeInstance {
    pub identifier: InstanceId,
    pub node: NodeId,
    pub address: String,
    pub available_memory: u64,

    /// Shard this instance serves. `None` means available.
    pub shard: Option<ShardId>,

    /// Records loaded so far, as last reported by the instance.
    pub loaded_record_count: u64,
}

impl ComputeInstance {
    /// Record a freshly discovered, unassigned instance.
    pub fn discovered(descriptor: &InstanceDescriptor) -> Self {
        Self {
            identifier: descriptor.identifier.clone(),
            node: descriptor.node.clone(),
            address: descriptor.address.clone(),
            available_memory: descriptor.available_memory,
            shard: None,
            loaded_record_count: 0,
        }
    }

    /// Returns true if the instance may be offered for a new allocation.
    pub fn is_available(&self) -> bool {
        self.shard.is_none()
    }
}

/// Lifecycle status of a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Created,
    Initializing,
    Active,
    Ended,
    Failed,
}

impl ClusterStatus {
    pub const ALL: [ClusterStatus; 5] = [
        Self::Created,
        Self::Initializing,
        Self::Active,
        Self::Ended,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Initializing => "initializing",
            Self::Active => "active",
            Self::Ended => "ended",
            Self::Failed => "failed",
        }
    }

    /// Terminal clusters never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ClusterStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown cluster status '{s}'"))
    }
}

/// A partition of a data set, permanently bound to one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    pub identifier: ShardId,
    pub cluster: ClusterId,
    pub instance: InstanceId,
}

/// A set of shards serving one data set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub id: ClusterId,

    /// Reference handed out to callers alongside `id`.
    pub external_id: String,
    pub data_set: String,
    pub data_source: String,
    pub status: ClusterStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A shard joined with its instance.
///
/// `instance` is `None` when the instance stopped being reported live after
/// the shard was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardAssignment {
    pub shard: Shard,
    pub instance: Option<ComputeInstance>,
}

/// One shard-to-instance binding produced by an allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardPlan {
    pub shard: ShardId,
    pub instance: InstanceId,
}

/// Everything needed to persist a new cluster in status `created`.
#[derive(Debug, Clone)]
pub struct NewCluster {
    pub id: ClusterId,
    pub external_id: String,
    pub data_set: String,
    pub data_source: String,
    pub shards: Vec<ShardPlan>,
}

/// How a caller names a cluster: by internal id or by external reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterRef {
    Id(ClusterId),
    External(String),
}

impl ClusterRef {
    /// Anything that parses as a [`ClusterId`] is an internal id.
    pub fn parse(s: &str) -> Self {
        match ClusterId::parse(s) {
            Ok(id) => Self::Id(id),
            Err(_) => Self::External(s.to_string()),
        }
    }
}

impl std::fmt::Display for ClusterRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::External(external) => f.write_str(external),
        }
    }
}

impl From<ClusterId> for ClusterRef {
    fn from(id: ClusterId) -> Self {
        Self::Id(id)
    }
}

/// Read model returned by cluster queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterView {
    pub cluster_id: ClusterId,
    pub cluster_identifier: String,
    pub status: ClusterStatus,
    pub data_set: String,
    pub data_source: String,
    pub shards: Vec<ShardView>,
    pub total_loaded_records: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardView {
    pub identifier: ShardId,
    pub instance_identifier: InstanceId,
    pub loaded_record_count: u64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ClusterView {
    pub fn new(cluster: Cluster, assignments: Vec<ShardAssignment>) -> Self {
        let shards: Vec<ShardView> = assignments
            .into_iter()
            .map(|assignment| ShardView {
                identifier: assignment.shard.identifier,
                instance_identifier: assignment.shard.instance,
                loaded_record_count: assignment
                    .instance
                    .as_ref()
                    .map_or(0, |i| i.loaded_record_count),
                url: assignment.instance.map(|i| i.address),
            })
            .collect();

        let total_loaded_records = shards.iter().map(|s| s.loaded_record_count).sum();

        Self {
            cluster_id: cluster.id,
            cluster_identifier: cluster.external_id,
            status: cluster.status,
            data_set: cluster.data_set,
            data_source: cluster.data_source,
            shards,
            total_loaded_records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(records: Option<u64>) -> ShardAssignment {
        let instance_id = InstanceId::parse(format!("i-{}", ShardId::new())).unwrap();
        ShardAssignment {
            shard: Shard {
                identifier: ShardId::new(),
                cluster: ClusterId::new(),
                instance: instance_id.clone(),
            },
            instance: records.map(|loaded_record_count| ComputeInstance {
                identifier: instance_id,
                node: NodeId::parse("node-1").unwrap(),
                address: "http://10.0.0.1:7000".to_string(),
                available_memory: 1 << 30,
                shard: None,
                loaded_record_count,
            }),
        }
    }

    #[test]
    fn test_status_parse_roundtrip() {
        for status in ClusterStatus::ALL {
            assert_eq!(status.as_str().parse::<ClusterStatus>().unwrap(), status);
        }
        assert!("initialized".parse::<ClusterStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        let terminal: Vec<_> = ClusterStatus::ALL
            .into_iter()
            .filter(ClusterStatus::is_terminal)
            .collect();
        assert_eq!(terminal, vec![ClusterStatus::Ended, ClusterStatus::Failed]);
    }

    #[test]
    fn test_cluster_ref_parse() {
        let id = ClusterId::new();
        assert_eq!(ClusterRef::parse(&id.to_string()), ClusterRef::Id(id));
        assert_eq!(
            ClusterRef::parse("3c9e1f1e-0000-4000-8000-000000000000"),
            ClusterRef::External("3c9e1f1e-0000-4000-8000-000000000000".to_string())
        );
    }

    #[test]
    fn test_view_totals_loaded_records() {
        let cluster = Cluster {
            id: ClusterId::new(),
            external_id: "ext".to_string(),
            data_set: "ds".to_string(),
            data_source: "src".to_string(),
            status: ClusterStatus::Initializing,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let view = ClusterView::new(
            cluster,
            vec![assignment(Some(100)), assignment(Some(250)), assignment(None)],
        );

        assert_eq!(view.total_loaded_records, 350);
        assert_eq!(view.shards.len(), 3);
        assert!(view.shards[2].url.is_none());
    }

    #[test]
    fn test_view_wire_names() {
        let cluster = Cluster {
            id: ClusterId::new(),
            external_id: "ext".to_string(),
            data_set: "ds".to_string(),
            data_source: "src".to_string(),
            status: ClusterStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_value(ClusterView::new(cluster, vec![])).unwrap();
        assert_eq!(json["status"], "active");
        assert_eq!(json["clusterIdentifier"], "ext");
        assert_eq!(json["totalLoadedRecords"], 0);
    }
}
