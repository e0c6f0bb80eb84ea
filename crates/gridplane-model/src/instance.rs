//! Deployed instance records.

use serde::{Deserialize, Serialize};

/// One placed instance of a service element on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub element_name: String,
    /// Monotonically increasing, unique per element.
    pub instance_id: u64,
    pub node_id: String,
    pub host_address: String,
    /// Unix timestamp in milliseconds.
    pub started_at: u64,
}
