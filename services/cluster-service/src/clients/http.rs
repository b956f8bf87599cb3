//! HTTP clients for the service registry and the compute instances.

use std::time::Duration;

use async_trait::async_trait;
use rda_id::{InstanceId, NodeId};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{ClientError, ClientResult, Discovery, InstanceControl, LoadStatus, StartLoading};
use crate::model::InstanceDescriptor;

const DISCOVERY: &str = "discovery";
const INSTANCE_CONTROL: &str = "instance control";

fn build_http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|e| {
            error!(error = %e, "Failed to build HTTP client, falling back to defaults");
            reqwest::Client::new()
        })
}

async fn error_body(response: reqwest::Response) -> String {
    response.text().await.unwrap_or_default()
}

// =============================================================================
// Service registry
// =============================================================================

/// Discovery backed by the service registry.
#[derive(Clone)]
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
}

/// One entry of the registry's instance listing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryInstance {
    identifier: String,
    available_memory: u64,
    ipv4address: String,
    machine_id: String,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: build_http_client(timeout),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Discovery for RegistryClient {
    async fn list_live_instances(
        &self,
        service_type: &str,
    ) -> ClientResult<Vec<InstanceDescriptor>> {
        let url = format!("{}/rda-service-registry.service-instance", self.base_url);
        debug!(url = %url, service_type, "Listing live instances");

        let response = self
            .client
            .get(&url)
            .query(&[("serviceType", service_type)])
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                capability: DISCOVERY,
                url: url.clone(),
                source,
            })?;

        if response.status() != StatusCode::OK {
            let status = response.status().as_u16();
            let body = error_body(response).await;
            error!(status, body = %body, "Failed to list live instances");
            return Err(ClientError::Status {
                capability: DISCOVERY,
                url,
                status,
                body,
            });
        }

        let entries: Vec<RegistryInstance> =
            response.json().await.map_err(|source| ClientError::Transport {
                capability: DISCOVERY,
                url: url.clone(),
                source,
            })?;

        entries
            .into_iter()
            .map(|entry| {
                let invalid = |e: rda_id::IdError| ClientError::InvalidResponse {
                    capability: DISCOVERY,
                    url: url.clone(),
                    message: e.to_string(),
                };
                Ok(InstanceDescriptor {
                    identifier: InstanceId::parse(entry.identifier).map_err(invalid)?,
                    available_memory: entry.available_memory,
                    address: entry.ipv4address,
                    node: NodeId::parse(entry.machine_id).map_err(invalid)?,
                })
            })
            .collect()
    }
}

// =============================================================================
// Compute instances
// =============================================================================

/// Instance control over each instance's data-set endpoint.
#[derive(Clone)]
pub struct ComputeClient {
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StartLoadingBody<'a> {
    data_source: &'a str,
    shard_identifier: String,
    min_free_memory: u8,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatusBody {
    #[serde(default)]
    record_count: Option<u64>,
}

impl ComputeClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: build_http_client(timeout),
        }
    }

    fn data_set_url(address: &str) -> String {
        format!("{}/rda-compute.data-set", address.trim_end_matches('/'))
    }
}

#[async_trait]
impl InstanceControl for ComputeClient {
    async fn start_loading(&self, address: &str, request: &StartLoading) -> ClientResult<()> {
        let url = Self::data_set_url(address);
        debug!(url = %url, shard_id = %request.shard, "Dispatching start loading");

        let body = StartLoadingBody {
            data_source: &request.data_source,
            shard_identifier: request.shard.to_string(),
            min_free_memory: request.min_free_memory_percent,
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                capability: INSTANCE_CONTROL,
                url: url.clone(),
                source,
            })?;

        if response.status() != StatusCode::CREATED {
            let status = response.status().as_u16();
            let body = error_body(response).await;
            error!(status, body = %body, "Instance rejected start loading");
            return Err(ClientError::Status {
                capability: INSTANCE_CONTROL,
                url,
                status,
                body,
            });
        }

        Ok(())
    }

    async fn poll_load_status(&self, address: &str) -> ClientResult<LoadStatus> {
        let url = Self::data_set_url(address);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| ClientError::Transport {
                capability: INSTANCE_CONTROL,
                url: url.clone(),
                source,
            })?;

        // 201 = finished loading, 200 = still loading.
        let done = match response.status() {
            StatusCode::CREATED => true,
            StatusCode::OK => false,
            other => {
                let body = error_body(response).await;
                return Err(ClientError::Status {
                    capability: INSTANCE_CONTROL,
                    url,
                    status: other.as_u16(),
                    body,
                });
            }
        };

        let bytes = response.bytes().await.map_err(|source| ClientError::Transport {
            capability: INSTANCE_CONTROL,
            url: url.clone(),
            source,
        })?;

        let body: LoadStatusBody = if bytes.is_empty() {
            LoadStatusBody::default()
        } else {
            serde_json::from_slice(&bytes).map_err(|e| ClientError::InvalidResponse {
                capability: INSTANCE_CONTROL,
                url: url.clone(),
                message: e.to_string(),
            })?
        };

        Ok(LoadStatus {
            record_count: body.record_count,
            done,
        })
    }
}
