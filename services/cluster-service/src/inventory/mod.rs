//! Instance registry: keeps the persisted inventory aligned with discovery.
//!
//! The live instance list handed to [`InstanceRegistry::reconcile`] is ground
//! truth. Persisted instances missing from it are deleted, live instances
//! missing from the store are inserted (creating their node on first sight).
//! Every change is published as an [`InventoryEvent`].

use std::sync::Arc;

use rda_id::InstanceId;
use rda_lock::SerialQueue;
use rda_reconcile::diff_by_key;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};

use crate::db::{Store, StoreResult};
use crate::model::{ComputeInstance, ComputeNode, InstanceDescriptor};

/// Queue key guarding inventory mutation.
pub const REGISTRY_KEY: &str = "instance-registry";

const EVENT_CAPACITY: usize = 256;

/// Inventory change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InventoryEvent {
    Added(ComputeInstance),
    Removed(ComputeInstance),
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub added: Vec<InstanceId>,
    pub removed: Vec<InstanceId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Reconciler over the persisted compute inventory.
#[derive(Clone)]
pub struct InstanceRegistry {
    store: Arc<dyn Store>,
    queue: SerialQueue,
    events: broadcast::Sender<InventoryEvent>,
}

impl InstanceRegistry {
    pub fn new(store: Arc<dyn Store>, queue: SerialQueue) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            queue,
            events,
        }
    }

    /// Receive inventory changes published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<InventoryEvent> {
        self.events.subscribe()
    }

    /// Align the persisted inventory with `live`.
    ///
    /// Runs under [`REGISTRY_KEY`], so no two passes interleave. Repeating a
    /// pass with the same snapshot changes nothing.
    #[instrument(skip(self, live), fields(live = live.len()))]
    pub async fn reconcile(&self, live: Vec<InstanceDescriptor>) -> StoreResult<ReconcileReport> {
        let registry = self.clone();
        self.queue
            .enqueue(REGISTRY_KEY, move || async move { registry.reconcile_locked(live).await })
            .await
    }

    async fn reconcile_locked(
        &self,
        live: Vec<InstanceDescriptor>,
    ) -> StoreResult<ReconcileReport> {
        let persisted = self.store.list_instances().await?;
        let diff = diff_by_key(
            persisted,
            live,
            |instance: &ComputeInstance| instance.identifier.clone(),
            |descriptor: &InstanceDescriptor| descriptor.identifier.clone(),
        );

        if diff.is_converged() {
            debug!(instances = diff.retained.len(), "Inventory already in sync");
            return Ok(ReconcileReport::default());
        }

        let mut report = ReconcileReport::default();

        for instance in diff.removed {
            self.store.delete_instance(&instance.identifier).await?;
            info!(
                instance_id = %instance.identifier,
                bound = !instance.is_available(),
                "Instance no longer live, removed"
            );
            report.removed.push(instance.identifier.clone());
            self.publish(InventoryEvent::Removed(instance));
        }

        for descriptor in diff.added {
            self.ensure_node(&descriptor).await?;
            let instance = ComputeInstance::discovered(&descriptor);
            self.store.insert_instance(&instance).await?;
            info!(
                instance_id = %instance.identifier,
                node_id = %instance.node,
                available_memory = instance.available_memory,
                "Instance discovered"
            );
            report.added.push(instance.identifier.clone());
            self.publish(InventoryEvent::Added(instance));
        }

        Ok(report)
    }

    async fn ensure_node(&self, descriptor: &InstanceDescriptor) -> StoreResult<()> {
        if self.store.find_node(&descriptor.node).await?.is_none() {
            debug!(node_id = %descriptor.node, "New compute node");
            self.store
                .insert_node(&ComputeNode::new(descriptor.node.clone()))
                .await?;
        }
        Ok(())
    }

    fn publish(&self, event: InventoryEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
