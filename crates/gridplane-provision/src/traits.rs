//! Collaborator interfaces the engine is constructed with.

use async_trait::async_trait;

use gridplane_model::{NodeView, PlacementRequest, ServiceInstance};

/// Performs the actual hosting of an instance on a node.
///
/// The engine never blocks on the outcome: `launch` runs on a worker task
/// and its result is routed back through the engine's success/failure
/// paths. There is no cancellation or deadline beyond what the
/// implementation itself enforces.
#[async_trait]
pub trait InstanceLauncher: Send + Sync {
    /// Host one instance of the request's element on the given node.
    ///
    /// `instance_id` is allocated by the engine, monotonic per element.
    async fn launch(
        &self,
        request: &PlacementRequest,
        node: &NodeView,
        instance_id: u64,
    ) -> anyhow::Result<ServiceInstance>;

    /// Tear down a placed instance. A returned error never blocks local
    /// bookkeeping; the engine force-cleans its records regardless.
    async fn destroy(&self, instance: &ServiceInstance) -> anyhow::Result<()>;
}

/// Fetches a node's live deployed-record list, for heartbeats that carry
/// none. Calls are retried with bounded fixed backoff by the engine.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_records(&self, node_id: &str) -> anyhow::Result<Vec<ServiceInstance>>;
}

/// Allocates instance ids, monotonically increasing and unique per
/// element.
pub trait InstanceIdAllocator: Send + Sync {
    fn next(&self, element: &str) -> u64;
}
