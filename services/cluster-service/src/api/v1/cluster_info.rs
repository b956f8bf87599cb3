//! `GET /v1/cluster-info?dataSource=..&dataSet=..`
//!
//! Where to reach the active cluster serving a data set, shard by shard.

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use super::read_status_code;
use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(find_active_cluster))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfoQuery {
    #[serde(default)]
    pub data_source: String,
    #[serde(default)]
    pub data_set: String,
}

async fn find_active_cluster(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<ClusterInfoQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state
        .controller()
        .find_active_cluster(&query.data_source, &query.data_set)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;

    Ok((read_status_code(view.status), Json(view)))
}
