//! Node pool selection — picks one candidate per placement request.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, trace};

use gridplane_match::{MatchError, MatchOutcome, StrategyRegistry, can_place};
use gridplane_model::PlacementRequest;

use crate::node::NodeHandle;
use crate::registry::LeaseRegistry;

/// Iteration order over the candidate snapshot.
pub trait SelectionPolicy: Send + Sync {
    /// Indices into a snapshot of `len` candidates, in visit order.
    fn order(&self, len: usize) -> Vec<usize>;
}

/// Default policy: round-robin starting after the last-selected index,
/// wrapping. Lock-free via an atomic cursor.
pub struct RoundRobinPolicy {
    cursor: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl SelectionPolicy for RoundRobinPolicy {
    fn order(&self, len: usize) -> Vec<usize> {
        if len == 0 {
            return Vec::new();
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        (0..len).map(|i| (start + i) % len).collect()
    }
}

/// Walks live nodes and returns the first candidate the matcher accepts.
pub struct NodeSelector {
    policy: Box<dyn SelectionPolicy>,
    strategies: StrategyRegistry,
}

impl NodeSelector {
    pub fn new(policy: Box<dyn SelectionPolicy>, strategies: StrategyRegistry) -> Self {
        Self { policy, strategies }
    }

    /// Select a node for the request, or `None` when no candidate accepts.
    ///
    /// Works over a snapshot of the pool, so concurrent registrations are
    /// never blocked by a long match loop. The request's `requested_node`
    /// is tried first when present; `exclude_node` and nodes that
    /// blacklisted the element are skipped. All accumulated failure
    /// reasons stay on the request for diagnostics.
    pub fn select(
        &self,
        request: &mut PlacementRequest,
        registry: &LeaseRegistry,
    ) -> Result<Option<Arc<NodeHandle>>, MatchError> {
        let handles = registry.snapshot();
        let mut order = self.policy.order(handles.len());

        // Sticky placement: move the requested node to the front.
        if let Some(requested) = request.requested_node.clone() {
            if let Some(pos) = order
                .iter()
                .position(|&i| handles[i].id() == requested)
            {
                let idx = order.remove(pos);
                order.insert(0, idx);
            }
        }

        let element = request.element.name.clone();
        for i in order {
            let handle = &handles[i];
            if request.exclude_node.as_deref() == Some(handle.id()) {
                trace!(node = %handle.id(), "skipping excluded node");
                continue;
            }
            let view = handle.view();
            if view.uninstantiable.contains(&element) {
                trace!(node = %handle.id(), %element, "skipping blacklisted node");
                continue;
            }
            match can_place(request, &view, &self.strategies)? {
                MatchOutcome::Accepted { .. } => {
                    debug!(node = %handle.id(), %element, "candidate selected");
                    return Ok(Some(Arc::clone(handle)));
                }
                MatchOutcome::Rejected => continue,
            }
        }

        debug!(%element, candidates = handles.len(), "no candidate accepted");
        Ok(None)
    }
}
