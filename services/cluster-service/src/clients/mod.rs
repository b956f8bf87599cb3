//! Capabilities consumed from outside the service.
//!
//! - [`Discovery`]: which compute instances are live right now
//! - [`InstanceControl`]: tell an instance to load a shard, ask how far it got
//!
//! HTTP implementations talk to the service registry and to the compute
//! instances. Mock implementations are provided for testing and development.

mod http;
mod mock;

pub use http::{ComputeClient, RegistryClient};
pub use mock::{MockDiscovery, MockInstanceControl, MockLoad};

use async_trait::async_trait;
use rda_id::ShardId;
use thiserror::Error;

use crate::model::InstanceDescriptor;

/// Result type for capability calls.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors from capability calls.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be sent or the response could not be read.
    #[error("{capability}: request to {url} failed: {source}")]
    Transport {
        capability: &'static str,
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The peer answered with an unexpected status.
    #[error("{capability}: {url} answered {status}: {body}")]
    Status {
        capability: &'static str,
        url: String,
        status: u16,
        body: String,
    },

    /// The peer answered with a payload we cannot use.
    #[error("{capability}: invalid response from {url}: {message}")]
    InvalidResponse {
        capability: &'static str,
        url: String,
        message: String,
    },

    /// The instance a shard is bound to is no longer in the inventory.
    #[error("instance control: instance '{instance}' is no longer live")]
    InstanceGone { instance: String },

    /// A mock was told to fail.
    #[error("{capability}: {message}")]
    Injected {
        capability: &'static str,
        message: String,
    },
}

impl ClientError {
    /// Which capability produced the error.
    pub fn capability(&self) -> &'static str {
        match self {
            Self::Transport { capability, .. }
            | Self::Status { capability, .. }
            | Self::InvalidResponse { capability, .. }
            | Self::Injected { capability, .. } => capability,
            Self::InstanceGone { .. } => "instance control",
        }
    }
}

/// Instruction for an instance to load one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartLoading {
    pub shard: ShardId,
    pub data_source: String,

    /// Memory, in percent, the instance must keep free while loading.
    pub min_free_memory_percent: u8,
}

/// Loading progress reported by an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadStatus {
    /// Records loaded so far, if the instance reported a count.
    pub record_count: Option<u64>,

    /// True once the shard is fully loaded.
    pub done: bool,
}

/// Service discovery capability.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// List every live instance of `service_type`.
    async fn list_live_instances(
        &self,
        service_type: &str,
    ) -> ClientResult<Vec<InstanceDescriptor>>;
}

/// Compute instance control capability.
#[async_trait]
pub trait InstanceControl: Send + Sync {
    /// Tell the instance at `address` to start loading a shard.
    async fn start_loading(&self, address: &str, request: &StartLoading) -> ClientResult<()>;

    /// Ask the instance at `address` how far loading got.
    async fn poll_load_status(&self, address: &str) -> ClientResult<LoadStatus>;
}
