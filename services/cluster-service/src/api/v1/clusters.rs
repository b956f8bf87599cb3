//! Cluster endpoints.
//!
//! - `POST   /v1/clusters`       allocate a cluster (201)
//! - `GET    /v1/clusters/{id}`  read a cluster, status code follows the lifecycle
//! - `PATCH  /v1/clusters/{id}`  initialize (200)
//! - `DELETE /v1/clusters/{id}`  end (204)
//!
//! `{id}` is either the internal cluster id or the external identifier.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rda_id::{ClusterId, ShardId};
use serde::{Deserialize, Serialize};

use super::read_status_code;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::controller::CreateCluster;
use crate::model::ClusterRef;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", post(create_cluster)).route(
        "/{cluster_id}",
        get(get_cluster).patch(initialize_cluster).delete(end_cluster),
    )
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClusterRequest {
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub data_set: Option<String>,
    #[serde(default)]
    pub required_memory: Option<i64>,
    #[serde(default)]
    pub record_count: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateClusterResponse {
    pub cluster_id: ClusterId,
    pub cluster_identifier: String,
    pub shards: Vec<ShardId>,
}

fn positive(value: Option<i64>, field: &str, request_id: &str) -> Result<u64, ApiError> {
    match value {
        Some(v) if v > 0 => Ok(v as u64),
        Some(_) => Err(ApiError::bad_request(
            "invalid_request",
            format!("'{field}' must be positive"),
        )
        .with_request_id(request_id)),
        None => Err(ApiError::bad_request(
            "invalid_request",
            format!("missing parameter '{field}' in request body"),
        )
        .with_request_id(request_id)),
    }
}

fn present(value: Option<String>, field: &str, request_id: &str) -> Result<String, ApiError> {
    value.ok_or_else(|| {
        ApiError::bad_request(
            "invalid_request",
            format!("missing parameter '{field}' in request body"),
        )
        .with_request_id(request_id)
    })
}

async fn create_cluster(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: Result<Json<CreateClusterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let request_id = ctx.request_id;

    let Json(body) = body.map_err(|e| {
        ApiError::bad_request("invalid_body", e.body_text()).with_request_id(request_id.clone())
    })?;

    let request = CreateCluster {
        required_memory: positive(body.required_memory, "requiredMemory", &request_id)?,
        record_count: positive(body.record_count, "recordCount", &request_id)?,
        data_set: present(body.data_set, "dataSet", &request_id)?,
        data_source: present(body.data_source, "dataSource", &request_id)?,
    };

    let created = state
        .controller()
        .create_cluster(request)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, request_id = %request_id, "Failed to create cluster");
            ApiError::from(e).with_request_id(request_id.clone())
        })?;

    Ok((
        StatusCode::CREATED,
        Json(CreateClusterResponse {
            cluster_id: created.cluster.id,
            cluster_identifier: created.cluster.external_id,
            shards: created.shards,
        }),
    ))
}

async fn get_cluster(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(cluster_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .controller()
        .get_cluster(&ClusterRef::parse(&cluster_id))
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;

    Ok((read_status_code(view.status), Json(view)))
}

async fn initialize_cluster(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(cluster_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .controller()
        .initialize_cluster(ClusterRef::parse(&cluster_id))
        .await
        .map_err(|e| {
            tracing::warn!(
                error = %e,
                request_id = %ctx.request_id,
                cluster = %cluster_id,
                "Failed to initialize cluster"
            );
            ApiError::from(e).with_request_id(ctx.request_id.clone())
        })?;

    Ok(StatusCode::OK)
}

async fn end_cluster(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(cluster_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .controller()
        .end_cluster(ClusterRef::parse(&cluster_id))
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;

    Ok(StatusCode::NO_CONTENT)
}
