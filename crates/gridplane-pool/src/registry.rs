//! The lease registry — owns the node add/renew/expire/remove lifecycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use std::sync::Arc;

use tracing::{debug, info, warn};

use gridplane_events::{EngineEvent, EventBus};
use gridplane_model::{CapabilitySnapshot, NodeView, ServiceInstance};

use crate::error::{PoolError, PoolResult};
use crate::lease::{Lease, LeasePolicy};
use crate::node::{NodeDescriptor, NodeHandle};

/// Tracks every registered node behind a time-bounded lease.
///
/// Removal (expiry or explicit) fires a `NodeRemoved` event for node-count
/// telemetry only; retry-queue reprocessing is driven by registration and
/// heartbeat, never by removal.
pub struct LeaseRegistry {
    nodes: RwLock<HashMap<String, Arc<NodeHandle>>>,
    leases: Mutex<HashMap<String, Lease>>,
    policy: Box<dyn LeasePolicy>,
    events: EventBus,
    lease_seq: AtomicU64,
}

impl LeaseRegistry {
    pub fn new(policy: Box<dyn LeasePolicy>, events: EventBus) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            leases: Mutex::new(HashMap::new()),
            policy,
            events,
            lease_seq: AtomicU64::new(1),
        }
    }

    /// Register a node and install its lease.
    ///
    /// Re-registration of a known id replaces the handle and its lease.
    pub fn register(
        &self,
        descriptor: NodeDescriptor,
        capability: CapabilitySnapshot,
        deployed: Vec<ServiceInstance>,
        service_limit: u32,
        requested: Option<Duration>,
    ) -> PoolResult<(Arc<NodeHandle>, Lease)> {
        if descriptor.id.is_empty() {
            return Err(PoolError::LeaseDenied("node id is empty".into()));
        }
        if capability.address.ip.is_empty() && capability.address.hostname.is_empty() {
            return Err(PoolError::LeaseDenied(format!(
                "node `{}` has no usable address",
                descriptor.id
            )));
        }

        let node_id = descriptor.id.clone();
        let handle = Arc::new(NodeHandle::new(
            descriptor,
            capability,
            deployed,
            service_limit,
        ));
        let lease = self.issue_lease(&node_id, requested);

        self.write_nodes().insert(node_id.clone(), Arc::clone(&handle));
        self.lock_leases().insert(node_id.clone(), lease.clone());

        info!(
            node_id = %node_id,
            granted_ms = lease.granted.as_millis() as u64,
            "node registered"
        );
        self.events.publish(EngineEvent::NodeRegistered { node_id });
        Ok((handle, lease))
    }

    /// Renew a node's lease, replacing its capability/deployed snapshot.
    ///
    /// If the registry is completely empty when a renewal arrives, all
    /// leases are force-cleared first — stale-state recovery for a node
    /// that outlived a registry restart — and the renewal still fails.
    pub fn renew(
        &self,
        node_id: &str,
        capability: CapabilitySnapshot,
        deployed: Vec<ServiceInstance>,
        service_limit: u32,
    ) -> PoolResult<Lease> {
        let handle = {
            let nodes = self.read_nodes();
            if nodes.is_empty() {
                drop(nodes);
                warn!(%node_id, "renewal against an empty registry, clearing all leases");
                self.lock_leases().clear();
                return Err(PoolError::UnknownLease(node_id.to_string()));
            }
            nodes
                .get(node_id)
                .cloned()
                .ok_or_else(|| PoolError::UnknownLease(node_id.to_string()))?
        };

        handle.replace_snapshot(capability, deployed, service_limit);
        let lease = self.issue_lease(node_id, None);
        self.lock_leases().insert(node_id.to_string(), lease.clone());
        debug!(%node_id, "lease renewed");
        Ok(lease)
    }

    /// Administrative removal. Fires `NodeRemoved` if the node existed.
    pub fn remove(&self, node_id: &str) -> Option<Arc<NodeHandle>> {
        let handle = self.write_nodes().remove(node_id);
        self.lock_leases().remove(node_id);
        if handle.is_some() {
            info!(%node_id, "node removed from pool");
            self.events.publish(EngineEvent::NodeRemoved {
                node_id: node_id.to_string(),
            });
        }
        handle
    }

    /// Evict every node whose lease expired before `now_ms`.
    pub fn sweep_expired_at(&self, now_ms: u64) -> Vec<String> {
        let overdue: Vec<String> = {
            let leases = self.lock_leases();
            leases
                .values()
                .filter(|l| l.is_expired_at(now_ms))
                .map(|l| l.node_id.clone())
                .collect()
        };

        let mut evicted = Vec::new();
        for node_id in overdue {
            if self.remove(&node_id).is_some() {
                warn!(%node_id, "lease expired, node evicted");
                evicted.push(node_id);
            }
        }
        evicted
    }

    /// Evict overdue leases as of now.
    pub fn sweep_expired(&self) -> Vec<String> {
        self.sweep_expired_at(epoch_millis())
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<NodeHandle>> {
        self.read_nodes().get(node_id).cloned()
    }

    /// Copy of the live handle set; iteration never blocks registrations.
    pub fn snapshot(&self) -> Vec<Arc<NodeHandle>> {
        self.read_nodes().values().cloned().collect()
    }

    pub fn views(&self) -> Vec<NodeView> {
        self.snapshot().iter().map(|h| h.view()).collect()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.read_nodes().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_nodes().is_empty()
    }

    fn issue_lease(&self, node_id: &str, requested: Option<Duration>) -> Lease {
        let granted = self.policy.grant(requested);
        Lease {
            id: self.lease_seq.fetch_add(1, Ordering::Relaxed),
            node_id: node_id.to_string(),
            expires_at_ms: epoch_millis() + granted.as_millis() as u64,
            granted,
        }
    }

    fn read_nodes(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<NodeHandle>>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_nodes(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<NodeHandle>>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_leases(&self) -> std::sync::MutexGuard<'_, HashMap<String, Lease>> {
        self.leases.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
