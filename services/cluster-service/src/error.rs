//! Domain errors for cluster operations.

use thiserror::Error;

use crate::clients::ClientError;
use crate::db::StoreError;
use crate::model::ClusterStatus;

/// Result type for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors surfaced by the lifecycle controller.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Malformed input. Never leaves state behind.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The referenced entity does not exist.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// The operation is not valid for the cluster's current status.
    #[error("cluster '{cluster}' has status '{status}', expected '{expected}'")]
    Conflict {
        cluster: String,
        status: ClusterStatus,
        expected: ClusterStatus,
    },

    /// A downstream capability call failed.
    #[error("{capability} call failed: {message}")]
    Upstream {
        capability: &'static str,
        message: String,
    },

    /// An internal invariant was violated.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClusterError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn cluster_not_found(id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity: "cluster",
            id: id.to_string(),
        }
    }

    pub fn upstream(capability: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Upstream {
            capability,
            message: err.to_string(),
        }
    }

    /// Status the cluster was actually in, for conflicts.
    pub fn conflicting_status(&self) -> Option<ClusterStatus> {
        match self {
            Self::Conflict { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<StoreError> for ClusterError {
    fn from(err: StoreError) -> Self {
        Self::upstream("persistence", err)
    }
}

impl From<ClientError> for ClusterError {
    fn from(err: ClientError) -> Self {
        Self::upstream(err.capability(), err)
    }
}
