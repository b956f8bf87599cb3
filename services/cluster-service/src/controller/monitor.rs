//! Status monitor: polls a cluster's instances until loading settles.
//!
//! The monitor is a small state machine. Every cycle polls all shard
//! instances concurrently, records the reported counts and classifies the
//! round:
//!
//! - every instance done: the cluster becomes `active`
//! - any poll failed: the cluster becomes `failed`
//! - otherwise: sleep for the poll interval and poll again
//!
//! There is no iteration cap and no cancellation. A monitor only ever writes
//! a status over `initializing`, so a cluster ended meanwhile stays ended.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rda_id::ClusterId;
use rda_reconcile::ConvergenceStatus;
use tracing::{debug, info, instrument, warn};

use crate::clients::{ClientError, ClientResult, InstanceControl, LoadStatus};
use crate::db::Store;
use crate::model::{ClusterStatus, ShardAssignment};

/// How a monitor finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Every shard finished loading.
    Active,

    /// Loading could not be observed to completion.
    Failed(String),
}

impl MonitorOutcome {
    pub fn status(&self) -> ClusterStatus {
        match self {
            Self::Active => ClusterStatus::Active,
            Self::Failed(_) => ClusterStatus::Failed,
        }
    }
}

enum Phase {
    Polling { cycle: u64 },
    Settled(MonitorOutcome),
}

/// Drives one cluster from `initializing` to `active` or `failed`.
pub struct StatusMonitor {
    cluster: ClusterId,
    store: Arc<dyn Store>,
    control: Arc<dyn InstanceControl>,
    interval: Duration,
}

impl StatusMonitor {
    pub fn new(
        cluster: ClusterId,
        store: Arc<dyn Store>,
        control: Arc<dyn InstanceControl>,
        interval: Duration,
    ) -> Self {
        Self {
            cluster,
            store,
            control,
            interval,
        }
    }

    /// Run until the cluster settles.
    #[instrument(skip(self), fields(cluster_id = %self.cluster))]
    pub async fn run(self) -> MonitorOutcome {
        let mut phase = Phase::Polling { cycle: 1 };
        loop {
            phase = match phase {
                Phase::Polling { cycle } => self.poll_cycle(cycle).await,
                Phase::Settled(outcome) => {
                    self.settle(&outcome).await;
                    return outcome;
                }
            };
        }
    }

    async fn poll_cycle(&self, cycle: u64) -> Phase {
        let shards = match self.store.cluster_shards(&self.cluster).await {
            Ok(shards) => shards,
            Err(e) => return Phase::Settled(MonitorOutcome::Failed(e.to_string())),
        };

        let round: Vec<ClientResult<LoadStatus>> =
            join_all(shards.iter().map(|assignment| self.poll(assignment))).await;

        for (assignment, result) in shards.iter().zip(&round) {
            let Ok(LoadStatus {
                record_count: Some(count),
                ..
            }) = result
            else {
                continue;
            };
            if let Err(e) = self
                .store
                .set_loaded_record_count(&assignment.shard.instance, *count)
                .await
            {
                return Phase::Settled(MonitorOutcome::Failed(e.to_string()));
            }
        }

        let observations: Vec<Result<bool, String>> = round
            .into_iter()
            .map(|result| result.map(|status| status.done).map_err(|e| e.to_string()))
            .collect();

        match ConvergenceStatus::classify(&observations) {
            ConvergenceStatus::Converged => Phase::Settled(MonitorOutcome::Active),
            ConvergenceStatus::Diverged => {
                let reason = observations
                    .into_iter()
                    .find_map(Result::err)
                    .unwrap_or_default();
                Phase::Settled(MonitorOutcome::Failed(reason))
            }
            ConvergenceStatus::Converging => {
                let done = observations.iter().filter(|o| matches!(o, Ok(true))).count();
                debug!(cycle, done, shards = observations.len(), "Cluster still loading");
                tokio::time::sleep(self.interval).await;
                Phase::Polling { cycle: cycle + 1 }
            }
        }
    }

    async fn poll(&self, assignment: &ShardAssignment) -> ClientResult<LoadStatus> {
        match &assignment.instance {
            Some(instance) => self.control.poll_load_status(&instance.address).await,
            None => Err(ClientError::InstanceGone {
                instance: assignment.shard.instance.to_string(),
            }),
        }
    }

    async fn settle(&self, outcome: &MonitorOutcome) {
        let next = outcome.status();
        let written = self
            .store
            .transition_cluster(&self.cluster, Some(ClusterStatus::Initializing), next)
            .await;

        match (written, outcome) {
            (Ok(true), MonitorOutcome::Active) => info!("Cluster active"),
            (Ok(true), MonitorOutcome::Failed(reason)) => {
                warn!(reason = %reason, "Cluster failed while loading")
            }
            (Ok(false), _) => info!(
                status = %next,
                "Cluster left initializing before monitor settled, status not written"
            ),
            (Err(e), _) => warn!(error = %e, status = %next, "Failed to persist monitor outcome"),
        }
    }
}
