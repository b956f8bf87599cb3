//! In-process capability doubles for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;

use super::{ClientError, ClientResult, Discovery, InstanceControl, LoadStatus, StartLoading};
use crate::model::InstanceDescriptor;

/// Discovery returning a configurable instance list.
#[derive(Default)]
pub struct MockDiscovery {
    instances: Mutex<Vec<InstanceDescriptor>>,
    failure: Mutex<Option<String>>,
}

impl MockDiscovery {
    pub fn new(instances: Vec<InstanceDescriptor>) -> Self {
        Self {
            instances: Mutex::new(instances),
            failure: Mutex::new(None),
        }
    }

    /// Replace the live instance list.
    pub async fn set_instances(&self, instances: Vec<InstanceDescriptor>) {
        *self.instances.lock().await = instances;
    }

    /// Make every following call fail with `message`.
    pub async fn fail_with(&self, message: impl Into<String>) {
        *self.failure.lock().await = Some(message.into());
    }
}

#[async_trait]
impl Discovery for MockDiscovery {
    async fn list_live_instances(
        &self,
        service_type: &str,
    ) -> ClientResult<Vec<InstanceDescriptor>> {
        if let Some(message) = self.failure.lock().await.clone() {
            return Err(ClientError::Injected {
                capability: "discovery",
                message,
            });
        }
        let instances = self.instances.lock().await.clone();
        info!(service_type, count = instances.len(), "[MOCK] Listing live instances");
        Ok(instances)
    }
}

/// Scripted behavior of one mocked instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockLoad {
    /// Every poll reports loading finished.
    Done { record_count: u64 },

    /// Every poll reports loading in progress.
    Pending { record_count: u64 },

    /// Pending for `polls` polls, done afterwards.
    DoneAfter { polls: u32, record_count: u64 },

    /// Start loading is rejected.
    RejectStart,

    /// Every poll fails.
    PollError,
}

#[derive(Default)]
struct ControlState {
    scripts: HashMap<String, MockLoad>,
    polls: HashMap<String, u32>,
    started: Vec<(String, StartLoading)>,
}

/// Instance control following a per-address script.
pub struct MockInstanceControl {
    fallback: MockLoad,
    state: Mutex<ControlState>,
}

impl Default for MockInstanceControl {
    fn default() -> Self {
        Self::new(MockLoad::Done { record_count: 0 })
    }
}

impl MockInstanceControl {
    /// Addresses without a script behave as `fallback`.
    pub fn new(fallback: MockLoad) -> Self {
        Self {
            fallback,
            state: Mutex::new(ControlState::default()),
        }
    }

    /// Script the instance at `address`.
    pub async fn script(&self, address: impl Into<String>, load: MockLoad) {
        self.state.lock().await.scripts.insert(address.into(), load);
    }

    /// Every start loading call received so far, in arrival order.
    pub async fn started(&self) -> Vec<(String, StartLoading)> {
        self.state.lock().await.started.clone()
    }

    /// How many times `address` was polled.
    pub async fn poll_count(&self, address: &str) -> u32 {
        self.state.lock().await.polls.get(address).copied().unwrap_or(0)
    }
}

#[async_trait]
impl InstanceControl for MockInstanceControl {
    async fn start_loading(&self, address: &str, request: &StartLoading) -> ClientResult<()> {
        let mut state = self.state.lock().await;
        let load = state.scripts.get(address).copied().unwrap_or(self.fallback);
        if load == MockLoad::RejectStart {
            return Err(ClientError::Injected {
                capability: "instance control",
                message: format!("{address} rejected shard {}", request.shard),
            });
        }
        info!(address, shard_id = %request.shard, "[MOCK] Start loading");
        state.started.push((address.to_string(), request.clone()));
        Ok(())
    }

    async fn poll_load_status(&self, address: &str) -> ClientResult<LoadStatus> {
        let mut state = self.state.lock().await;
        let load = state.scripts.get(address).copied().unwrap_or(self.fallback);
        let polls = state.polls.entry(address.to_string()).or_insert(0);
        *polls += 1;
        let polls = *polls;

        match load {
            MockLoad::Done { record_count } => Ok(LoadStatus {
                record_count: Some(record_count),
                done: true,
            }),
            MockLoad::Pending { record_count } => Ok(LoadStatus {
                record_count: Some(record_count),
                done: false,
            }),
            MockLoad::DoneAfter {
                polls: needed,
                record_count,
            } => Ok(LoadStatus {
                record_count: Some(record_count),
                done: polls > needed,
            }),
            MockLoad::RejectStart | MockLoad::PollError => Err(ClientError::Injected {
                capability: "instance control",
                message: format!("{address} did not answer"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rda_id::ShardId;

    fn start() -> StartLoading {
        StartLoading {
            shard: ShardId::new(),
            data_source: "src".to_string(),
            min_free_memory_percent: 25,
        }
    }

    #[tokio::test]
    async fn test_done_after_counts_polls() {
        let control = MockInstanceControl::default();
        control
            .script("a", MockLoad::DoneAfter { polls: 2, record_count: 7 })
            .await;

        assert!(!control.poll_load_status("a").await.unwrap().done);
        assert!(!control.poll_load_status("a").await.unwrap().done);
        assert!(control.poll_load_status("a").await.unwrap().done);
        assert_eq!(control.poll_count("a").await, 3);
    }

    #[tokio::test]
    async fn test_rejected_start_is_not_recorded() {
        let control = MockInstanceControl::default();
        control.script("a", MockLoad::RejectStart).await;

        assert!(control.start_loading("a", &start()).await.is_err());
        control.start_loading("b", &start()).await.unwrap();

        let started = control.started().await;
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].0, "b");
    }

    #[tokio::test]
    async fn test_discovery_failure() {
        let discovery = MockDiscovery::default();
        discovery.fail_with("registry down").await;
        let err = discovery.list_live_instances("rda-compute").await.unwrap_err();
        assert_eq!(err.capability(), "discovery");
    }
}
