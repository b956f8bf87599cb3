//! API v1 routes.

mod cluster_info;
mod clusters;

use axum::http::StatusCode;
use axum::Router;

use crate::model::ClusterStatus;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/clusters", clusters::routes())
        .nest("/cluster-info", cluster_info::routes())
}

/// Transport status for a cluster read. Clients poll on this, so `active`
/// answers 201 and terminal statuses answer as errors.
pub(crate) fn read_status_code(status: ClusterStatus) -> StatusCode {
    match status {
        ClusterStatus::Created | ClusterStatus::Initializing => StatusCode::OK,
        ClusterStatus::Active => StatusCode::CREATED,
        ClusterStatus::Ended => StatusCode::NOT_FOUND,
        ClusterStatus::Failed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ClusterStatus::Created, 200)]
    #[case(ClusterStatus::Initializing, 200)]
    #[case(ClusterStatus::Active, 201)]
    #[case(ClusterStatus::Ended, 404)]
    #[case(ClusterStatus::Failed, 500)]
    fn test_read_status_code(#[case] status: ClusterStatus, #[case] code: u16) {
        assert_eq!(read_status_code(status).as_u16(), code);
    }
}
