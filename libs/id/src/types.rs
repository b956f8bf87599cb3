//! Typed ID definitions for cluster resources.

use crate::{define_external_id, define_id};

// =============================================================================
// Locally generated
// =============================================================================

define_id!(ClusterId, "cls");
define_id!(ShardId, "shard");
define_id!(RequestId, "req");

// =============================================================================
// Assigned by the worker pool
// =============================================================================

define_external_id!(InstanceId);
define_external_id!(NodeId);

// =============================================================================
// Tests
// =============================================================================
