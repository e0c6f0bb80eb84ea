//! Per-registered-node tracked state.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use gridplane_model::{CapabilitySnapshot, HostAddress, NodeView, ServiceInstance};

/// Identifying fields a node supplies when registering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// Stable id, chosen by the node, unique across the pool.
    pub id: String,
    /// Display name for logs and events.
    pub name: String,
}

impl NodeDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug)]
struct NodeState {
    service_limit: u32,
    capability: CapabilitySnapshot,
    deployed: HashMap<String, Vec<ServiceInstance>>,
    in_flight: HashMap<String, u32>,
    uninstantiable: HashSet<String>,
}

/// The engine's tracked state for one registered compute node.
///
/// Mutated by heartbeats and by placement success/failure callbacks;
/// readers take a [`NodeView`] copy so matching never holds the lock.
#[derive(Debug)]
pub struct NodeHandle {
    id: String,
    name: String,
    state: Mutex<NodeState>,
}

impl NodeHandle {
    pub fn new(
        descriptor: NodeDescriptor,
        capability: CapabilitySnapshot,
        deployed: Vec<ServiceInstance>,
        service_limit: u32,
    ) -> Self {
        let mut map: HashMap<String, Vec<ServiceInstance>> = HashMap::new();
        for record in deployed {
            map.entry(record.element_name.clone()).or_default().push(record);
        }
        Self {
            id: descriptor.id,
            name: descriptor.name,
            state: Mutex::new(NodeState {
                service_limit,
                capability,
                deployed: map,
                in_flight: HashMap::new(),
                uninstantiable: HashSet::new(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host_address(&self) -> HostAddress {
        self.lock().capability.address.clone()
    }

    /// Copy-on-read snapshot for matching and diagnostics.
    pub fn view(&self) -> NodeView {
        let state = self.lock();
        NodeView {
            node_id: self.id.clone(),
            name: self.name.clone(),
            service_limit: state.service_limit,
            capability: state.capability.clone(),
            deployed: state.deployed.clone(),
            in_flight: state.in_flight.clone(),
            uninstantiable: state.uninstantiable.clone(),
        }
    }

    /// Replace the capability/deployed snapshot, as a heartbeat does.
    /// In-flight counts and the uninstantiable set are preserved.
    pub fn replace_snapshot(
        &self,
        capability: CapabilitySnapshot,
        deployed: Vec<ServiceInstance>,
        service_limit: u32,
    ) {
        let mut map: HashMap<String, Vec<ServiceInstance>> = HashMap::new();
        for record in deployed {
            map.entry(record.element_name.clone()).or_default().push(record);
        }
        let mut state = self.lock();
        state.capability = capability;
        state.deployed = map;
        state.service_limit = service_limit;
    }

    pub fn add_in_flight(&self, element: &str) {
        let mut state = self.lock();
        *state.in_flight.entry(element.to_string()).or_insert(0) += 1;
    }

    pub fn clear_in_flight(&self, element: &str) {
        let mut state = self.lock();
        if let Some(count) = state.in_flight.get_mut(element) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.in_flight.remove(element);
            }
        }
    }

    pub fn record_deployed(&self, instance: ServiceInstance) {
        let mut state = self.lock();
        state
            .deployed
            .entry(instance.element_name.clone())
            .or_default()
            .push(instance);
    }

    /// Remove one deployed record. Used both by normal teardown and by the
    /// force-clean path after a failed destroy.
    pub fn remove_deployed(&self, element: &str, instance_id: u64) -> Option<ServiceInstance> {
        let mut state = self.lock();
        let records = state.deployed.get_mut(element)?;
        let idx = records.iter().position(|r| r.instance_id == instance_id)?;
        let removed = records.remove(idx);
        if records.is_empty() {
            state.deployed.remove(element);
        }
        Some(removed)
    }

    /// Most recently started deployed record for an element, if any.
    pub fn newest_deployed(&self, element: &str) -> Option<ServiceInstance> {
        let state = self.lock();
        state
            .deployed
            .get(element)
            .and_then(|records| records.iter().max_by_key(|r| r.started_at).cloned())
    }

    pub fn deployed_count(&self, element: &str) -> u32 {
        self.lock().deployed.get(element).map_or(0, |v| v.len() as u32)
    }

    pub fn in_flight_count(&self, element: &str) -> u32 {
        self.lock().in_flight.get(element).copied().unwrap_or(0)
    }

    pub fn blacklist(&self, element: &str) {
        self.lock().uninstantiable.insert(element.to_string());
    }

    pub fn clear_blacklist(&self, element: &str) {
        self.lock().uninstantiable.remove(element);
    }

    pub fn is_blacklisted(&self, element: &str) -> bool {
        self.lock().uninstantiable.contains(element)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NodeState> {
        // A panic while holding the lock leaves counters best-effort;
        // continue with the inner state rather than poisoning the pool.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
