//! Shard allocation policies.
//!
//! An allocator maps the currently available instances to a shard plan. The
//! policy is pluggable; [`MaxDistribution`] is the baseline and places one
//! shard on every candidate, ignoring capacity.

use std::collections::BTreeSet;

use rda_id::{InstanceId, ShardId};

use crate::error::{ClusterError, ClusterResult};
use crate::model::{ComputeInstance, ShardPlan};

/// What a cluster needs to hold its data set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityRequirement {
    /// Memory, in bytes, needed across the cluster.
    pub required_memory: u64,

    /// Records in the data set.
    pub record_count: u64,
}

/// Shard placement policy.
pub trait ShardAllocator: Send + Sync {
    /// Policy name, for logs.
    fn name(&self) -> &'static str;

    /// Plan shards over `candidates`. An empty candidate list yields an
    /// empty plan.
    fn allocate(
        &self,
        candidates: &[ComputeInstance],
        requirement: &CapacityRequirement,
    ) -> Vec<ShardPlan>;
}

/// One shard per available instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxDistribution;

impl ShardAllocator for MaxDistribution {
    fn name(&self) -> &'static str {
        "max-distribution"
    }

    fn allocate(
        &self,
        candidates: &[ComputeInstance],
        _requirement: &CapacityRequirement,
    ) -> Vec<ShardPlan> {
        candidates
            .iter()
            .map(|instance| ShardPlan {
                shard: ShardId::new(),
                instance: instance.identifier.clone(),
            })
            .collect()
    }
}

/// Check that `plan` only uses candidates, each at most once, with distinct
/// shard identifiers.
pub fn verify_plan(plan: &[ShardPlan], candidates: &[ComputeInstance]) -> ClusterResult<()> {
    let allowed: BTreeSet<&InstanceId> = candidates.iter().map(|c| &c.identifier).collect();
    let mut used = BTreeSet::new();
    let mut shards = BTreeSet::new();

    for entry in plan {
        if !allowed.contains(&entry.instance) {
            return Err(ClusterError::Internal(format!(
                "allocation placed shard on unknown instance '{}'",
                entry.instance
            )));
        }
        if !used.insert(&entry.instance) {
            return Err(ClusterError::Internal(format!(
                "allocation placed two shards on instance '{}'",
                entry.instance
            )));
        }
        if !shards.insert(entry.shard) {
            return Err(ClusterError::Internal(format!(
                "allocation reused shard identifier '{}'",
                entry.shard
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InstanceDescriptor;
    use proptest::prelude::*;
    use rda_id::NodeId;

    const REQUIREMENT: CapacityRequirement = CapacityRequirement {
        required_memory: 1_000_000,
        record_count: 10_000,
    };

    fn candidates(n: usize) -> Vec<ComputeInstance> {
        (0..n)
            .map(|i| {
                ComputeInstance::discovered(&InstanceDescriptor {
                    identifier: InstanceId::parse(format!("inst-{i}")).unwrap(),
                    available_memory: 1,
                    address: format!("http://10.0.0.{i}:7000"),
                    node: NodeId::parse("node").unwrap(),
                })
            })
            .collect()
    }

    #[test]
    fn test_empty_candidates_empty_plan() {
        assert!(MaxDistribution.allocate(&[], &REQUIREMENT).is_empty());
    }

    #[test]
    fn test_capacity_is_ignored() {
        // Candidates with one byte each still all get a shard.
        let plan = MaxDistribution.allocate(&candidates(4), &REQUIREMENT);
        assert_eq!(plan.len(), 4);
    }

    #[test]
    fn test_verify_rejects_unknown_instance() {
        let pool = candidates(2);
        let plan = vec![ShardPlan {
            shard: ShardId::new(),
            instance: InstanceId::parse("elsewhere").unwrap(),
        }];
        assert!(matches!(verify_plan(&plan, &pool), Err(ClusterError::Internal(_))));
    }

    #[test]
    fn test_verify_rejects_duplicate_instance() {
        let pool = candidates(2);
        let plan = vec![
            ShardPlan {
                shard: ShardId::new(),
                instance: pool[0].identifier.clone(),
            },
            ShardPlan {
                shard: ShardId::new(),
                instance: pool[0].identifier.clone(),
            },
        ];
        assert!(matches!(verify_plan(&plan, &pool), Err(ClusterError::Internal(_))));
    }

    proptest! {
        #[test]
        fn max_distribution_covers_every_candidate_once(n in 0usize..64) {
            let pool = candidates(n);
            let plan = MaxDistribution.allocate(&pool, &REQUIREMENT);

            prop_assert_eq!(plan.len(), n);
            prop_assert!(verify_plan(&plan, &pool).is_ok());
        }
    }
}
