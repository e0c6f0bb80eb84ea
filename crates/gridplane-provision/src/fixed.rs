//! Fixed-placement queue — reconciles pinned elements against the pool.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use gridplane_model::{NodeView, PlacementRequest, ServiceElement};

/// Holds one representative request per fixed element and plans the
/// placements needed to keep every eligible node at its allowed count.
///
/// The plan is recomputed from node views each pass; tracking for nodes
/// that no longer exist is pruned so a departed node never pins state.
#[derive(Default)]
pub struct FixedQueue {
    entries: HashMap<String, PlacementRequest>,
    /// Element → node ids seen during the last reconciliation pass.
    reconciled: HashMap<String, HashSet<String>>,
}

impl FixedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a fixed element. Replaces any previous representative.
    pub fn add(&mut self, request: PlacementRequest) {
        debug!(element = %request.element.name, "fixed element tracked");
        self.entries.insert(request.element.name.clone(), request);
    }

    /// Stop tracking an element, e.g. on undeploy or uninstantiable.
    pub fn remove(&mut self, element: &str) -> Option<PlacementRequest> {
        self.reconciled.remove(element);
        self.entries.remove(element)
    }

    /// Replace the stale element snapshot inside the tracked request.
    pub fn update_snapshot(&mut self, element: &ServiceElement) {
        if let Some(request) = self.entries.get_mut(&element.name) {
            request.set_element(element.clone());
        }
    }

    pub fn contains(&self, element: &str) -> bool {
        self.entries.contains_key(element)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compute the placements needed to fill missing fixed slots on the
    /// given nodes: one request per missing slot, pinned to that node via
    /// `requested_node`. `live_node_ids` is the full current pool, used to
    /// prune tracking for nodes that vanished.
    pub fn plan(&mut self, views: &[NodeView], live_node_ids: &[String]) -> Vec<PlacementRequest> {
        // Drop tracking for departed nodes.
        let live: HashSet<&str> = live_node_ids.iter().map(String::as_str).collect();
        for seen in self.reconciled.values_mut() {
            seen.retain(|id| live.contains(id.as_str()));
        }

        let mut planned = Vec::new();
        for (name, request) in &self.entries {
            let element = &request.element;
            let allowed = element.per_node_cap();
            for view in views {
                let present = view.deployed_count(name) + view.in_flight_count(name);
                let missing = allowed.saturating_sub(present);
                if missing > 0 {
                    debug!(
                        element = %name,
                        node = %view.node_id,
                        missing,
                        "fixed slots missing"
                    );
                }
                for _ in 0..missing {
                    planned.push(request.clone().with_requested(view.node_id.clone()));
                }
                self.reconciled
                    .entry(name.clone())
                    .or_default()
                    .insert(view.node_id.clone());
            }
        }
        planned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridplane_model::{CapabilitySnapshot, RequestKind, ServiceInstance};

    fn view(id: &str) -> NodeView {
        NodeView {
            node_id: id.to_string(),
            name: id.to_string(),
            service_limit: 10,
            capability: CapabilitySnapshot::default(),
            deployed: HashMap::new(),
            in_flight: HashMap::new(),
            uninstantiable: HashSet::new(),
        }
    }

    fn fixed_request(name: &str, planned: u32, max_per_machine: Option<u32>) -> PlacementRequest {
        let mut element = ServiceElement::fixed(name, planned);
        element.max_per_machine = max_per_machine;
        PlacementRequest::new(element, RequestKind::Place)
    }

    #[test]
    fn plans_one_request_per_missing_slot() {
        let mut q = FixedQueue::new();
        q.add(fixed_request("agent", 2, None));

        let planned = q.plan(&[view("n1")], &["n1".to_string()]);
        assert_eq!(planned.len(), 2);
        assert!(planned.iter().all(|r| r.requested_node.as_deref() == Some("n1")));
    }

    #[test]
    fn per_machine_cap_bounds_the_plan() {
        let mut q = FixedQueue::new();
        q.add(fixed_request("agent", 3, Some(1)));

        let planned = q.plan(
            &[view("n1"), view("n2")],
            &["n1".to_string(), "n2".to_string()],
        );
        assert_eq!(planned.len(), 2); // one per node
    }

    #[test]
    fn present_instances_reduce_the_plan() {
        let mut q = FixedQueue::new();
        q.add(fixed_request("agent", 2, None));

        let mut v = view("n1");
        v.deployed.insert(
            "agent".to_string(),
            vec![ServiceInstance {
                element_name: "agent".to_string(),
                instance_id: 1,
                node_id: "n1".to_string(),
                host_address: String::new(),
                started_at: 0,
            }],
        );
        v.in_flight.insert("agent".to_string(), 1);

        let planned = q.plan(&[v], &["n1".to_string()]);
        assert!(planned.is_empty());
    }

    #[test]
    fn vanished_nodes_are_pruned_from_tracking() {
        let mut q = FixedQueue::new();
        q.add(fixed_request("agent", 1, None));

        q.plan(&[view("n1")], &["n1".to_string()]);
        assert!(q.reconciled["agent"].contains("n1"));

        // n1 left the pool; a pass against the remaining pool prunes it.
        q.plan(&[view("n2")], &["n2".to_string()]);
        assert!(!q.reconciled["agent"].contains("n1"));
        assert!(q.reconciled["agent"].contains("n2"));
    }

    #[test]
    fn remove_evicts_tracking() {
        let mut q = FixedQueue::new();
        q.add(fixed_request("agent", 1, None));
        q.plan(&[view("n1")], &["n1".to_string()]);

        assert!(q.remove("agent").is_some());
        assert!(q.is_empty());
        assert!(!q.reconciled.contains_key("agent"));
    }

    #[test]
    fn update_snapshot_changes_future_plans() {
        let mut q = FixedQueue::new();
        q.add(fixed_request("agent", 1, None));

        let mut element = ServiceElement::fixed("agent", 3);
        element.max_per_machine = None;
        q.update_snapshot(&element);

        let planned = q.plan(&[view("n1")], &["n1".to_string()]);
        assert_eq!(planned.len(), 3);
    }
}
