//! Immutable per-node snapshots used during matching.

use std::collections::{HashMap, HashSet};

use crate::capability::CapabilitySnapshot;
use crate::instance::ServiceInstance;

/// A copy of one node's tracked state at a point in time.
///
/// The pool hands these out so a long-running match loop never holds the
/// live node lock; mutating the node after a view is taken does not
/// affect decisions already in progress.
#[derive(Debug, Clone)]
pub struct NodeView {
    pub node_id: String,
    pub name: String,
    /// Declared limit on instances this node will host per element.
    pub service_limit: u32,
    pub capability: CapabilitySnapshot,
    /// Element name → deployed instance records on this node.
    pub deployed: HashMap<String, Vec<ServiceInstance>>,
    /// Element name → placements dispatched but not yet completed.
    pub in_flight: HashMap<String, u32>,
    /// Elements this node reported it can never host.
    pub uninstantiable: HashSet<String>,
}

impl NodeView {
    pub fn deployed_count(&self, element: &str) -> u32 {
        self.deployed.get(element).map_or(0, |v| v.len() as u32)
    }

    pub fn in_flight_count(&self, element: &str) -> u32 {
        self.in_flight.get(element).copied().unwrap_or(0)
    }

    /// Whether the element is present on this node, deployed or in flight.
    pub fn hosts(&self, element: &str) -> bool {
        self.deployed_count(element) > 0 || self.in_flight_count(element) > 0
    }

    /// Names of all elements present on this node, deployed or in flight.
    pub fn present_elements(&self) -> impl Iterator<Item = &str> {
        self.deployed
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, _)| k.as_str())
            .chain(
                self.in_flight
                    .iter()
                    .filter(|(_, n)| **n > 0)
                    .map(|(k, _)| k.as_str()),
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> NodeView {
        NodeView {
            node_id: "n1".to_string(),
            name: "worker".to_string(),
            service_limit: 10,
            capability: CapabilitySnapshot::default(),
            deployed: HashMap::new(),
            in_flight: HashMap::new(),
            uninstantiable: HashSet::new(),
        }
    }

    #[test]
    fn counts_default_to_zero() {
        let v = view();
        assert_eq!(v.deployed_count("web"), 0);
        assert_eq!(v.in_flight_count("web"), 0);
        assert!(!v.hosts("web"));
    }

    #[test]
    fn in_flight_counts_as_hosting() {
        let mut v = view();
        v.in_flight.insert("web".to_string(), 1);
        assert!(v.hosts("web"));
        assert_eq!(v.deployed_count("web"), 0);
    }

    #[test]
    fn present_elements_skips_empty_entries() {
        let mut v = view();
        v.deployed.insert("old".to_string(), Vec::new());
        v.in_flight.insert("gone".to_string(), 0);
        v.in_flight.insert("web".to_string(), 2);

        let present: Vec<&str> = v.present_elements().collect();
        assert_eq!(present, vec!["web"]);
    }
}
