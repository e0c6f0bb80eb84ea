//! The provisioning engine — dispatch, reconciliation, and node lifecycle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use gridplane_events::{EngineEvent, EventBus};
use gridplane_match::{AssociationMatcher, StrategyRegistry};
use gridplane_model::{
    CapabilitySnapshot, NodeView, PlacementListener, PlacementRequest, ProvisionMode,
    RequestKind, ServiceElement, ServiceInstance,
};
use gridplane_pool::{
    BoundedLeasePolicy, Lease, LeaseRegistry, NodeDescriptor, NodeHandle, NodeSelector,
    RoundRobinPolicy, SelectionPolicy,
};

use crate::config::EngineConfig;
use crate::error::{ProvisionError, ProvisionResult};
use crate::fixed::FixedQueue;
use crate::ids::MonotonicIdAllocator;
use crate::pending::PendingQueue;
use crate::traits::{InstanceIdAllocator, InstanceLauncher, RecordSource};

/// Builder for [`ProvisionEngine`]. Configuration errors are fatal at
/// `build`; the engine refuses to start with a bad config.
pub struct EngineBuilder {
    config: EngineConfig,
    launcher: Arc<dyn InstanceLauncher>,
    records: Option<Arc<dyn RecordSource>>,
    ids: Option<Arc<dyn InstanceIdAllocator>>,
    strategies: StrategyRegistry,
    policy: Option<Box<dyn SelectionPolicy>>,
}

impl EngineBuilder {
    pub fn new(launcher: Arc<dyn InstanceLauncher>) -> Self {
        Self {
            config: EngineConfig::default(),
            launcher,
            records: None,
            ids: None,
            strategies: StrategyRegistry::new(),
            policy: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn record_source(mut self, records: Arc<dyn RecordSource>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn id_allocator(mut self, ids: Arc<dyn InstanceIdAllocator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Register a named association-matching strategy.
    pub fn strategy(mut self, name: impl Into<String>, matcher: Arc<dyn AssociationMatcher>) -> Self {
        self.strategies.register(name, matcher);
        self
    }

    pub fn selection_policy(mut self, policy: Box<dyn SelectionPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn build(self) -> ProvisionResult<Arc<ProvisionEngine>> {
        self.config.validate()?;
        let events = EventBus::new(self.config.event_capacity);
        let lease_policy =
            BoundedLeasePolicy::new(self.config.default_lease, self.config.max_lease)?;
        let registry = Arc::new(LeaseRegistry::new(Box::new(lease_policy), events.clone()));
        let selector = NodeSelector::new(
            self.policy
                .unwrap_or_else(|| Box::new(RoundRobinPolicy::new())),
            self.strategies,
        );
        let limiter = Arc::new(Semaphore::new(self.config.max_in_flight));

        Ok(Arc::new(ProvisionEngine {
            registry,
            selector,
            pending: Mutex::new(PendingQueue::new()),
            fixed: Mutex::new(FixedQueue::new()),
            events,
            launcher: self.launcher,
            records: self.records,
            ids: self
                .ids
                .unwrap_or_else(|| Arc::new(MonotonicIdAllocator::new())),
            limiter,
            element_locks: StdMutex::new(HashMap::new()),
            config: self.config,
        }))
    }
}

/// Orchestrates end-to-end placement.
///
/// `dispatch` never blocks on a placement outcome: a selected candidate
/// gets the element marked in-flight and the attempt runs on a bounded
/// worker task whose result feeds back through the success/failure paths.
/// The match-then-reserve sequence is not atomic end to end; two
/// concurrent dispatches may both pass the matcher before either marks
/// in-flight. The transient over-allocation self-corrects on the next
/// reconciliation pass.
pub struct ProvisionEngine {
    registry: Arc<LeaseRegistry>,
    selector: NodeSelector,
    pending: Mutex<PendingQueue>,
    fixed: Mutex<FixedQueue>,
    events: EventBus,
    launcher: Arc<dyn InstanceLauncher>,
    records: Option<Arc<dyn RecordSource>>,
    ids: Arc<dyn InstanceIdAllocator>,
    limiter: Arc<Semaphore>,
    /// Per-element critical sections for desired-count mutation.
    element_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    config: EngineConfig,
}

impl ProvisionEngine {
    pub fn builder(launcher: Arc<dyn InstanceLauncher>) -> EngineBuilder {
        EngineBuilder::new(launcher)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<LeaseRegistry> {
        &self.registry
    }

    // ── Node lifecycle ──────────────────────────────────────────────

    /// Register a node, install its lease, then reconcile the fixed queue
    /// against it and drain one pass of the pending queue.
    pub async fn register_node(
        self: &Arc<Self>,
        descriptor: NodeDescriptor,
        capability: CapabilitySnapshot,
        deployed: Vec<ServiceInstance>,
        service_limit: u32,
        lease_duration: Option<Duration>,
    ) -> ProvisionResult<Lease> {
        let (handle, lease) = self.registry.register(
            descriptor,
            capability,
            deployed,
            service_limit,
            lease_duration,
        )?;
        self.reconcile(Some(handle)).await;
        Ok(lease)
    }

    /// Renew a node's lease and replace its snapshot, then reconcile.
    ///
    /// A heartbeat that carries no deployed list triggers a bounded-retry
    /// fetch from the record source.
    pub async fn heartbeat(
        self: &Arc<Self>,
        node_id: &str,
        capability: CapabilitySnapshot,
        deployed: Option<Vec<ServiceInstance>>,
        service_limit: u32,
    ) -> ProvisionResult<Lease> {
        let deployed = match deployed {
            Some(records) => records,
            None => self.fetch_records(node_id).await?,
        };
        let lease = self
            .registry
            .renew(node_id, capability, deployed, service_limit)?;
        let handle = self.registry.get(node_id);
        self.reconcile(handle).await;
        Ok(lease)
    }

    /// Administrative deregistration. Removal does not reprocess retry
    /// queues; reprocessing is driven by registration.
    pub fn remove_node(&self, node_id: &str) -> Option<Arc<NodeHandle>> {
        self.registry.remove(node_id)
    }

    /// Background lease-expiry sweep at the configured interval.
    pub fn start_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let interval = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.sweep_expired();
            }
        })
    }

    // ── Placement ───────────────────────────────────────────────────

    /// Submit a placement request, fire-and-forget. Outcomes arrive via
    /// the listener callback and the event stream.
    pub async fn submit(
        self: &Arc<Self>,
        element: ServiceElement,
        kind: RequestKind,
        prior: Option<ServiceInstance>,
        exclude_node: Option<String>,
        requested_node: Option<String>,
        listener: Option<Arc<dyn PlacementListener>>,
    ) -> ProvisionResult<()> {
        if kind == RequestKind::Uninstantiable {
            self.mark_uninstantiable(&element.name).await;
            return Ok(());
        }

        let mut request = PlacementRequest::new(element, kind);
        request.prior = prior;
        request.exclude_node = exclude_node;
        request.requested_node = requested_node;
        request.listener = listener;

        match request.element.mode {
            ProvisionMode::External => {
                debug!(element = %request.element.name, "external element, not scheduled here");
                Ok(())
            }
            ProvisionMode::Fixed => {
                self.fixed.lock().await.add(request);
                self.reconcile(None).await;
                Ok(())
            }
            ProvisionMode::Dynamic => self.dispatch(request).await,
        }
    }

    /// One placement attempt: select a candidate, mark the element
    /// in-flight, and launch asynchronously. Returns without waiting for
    /// the outcome. No candidate routes through the failure path:
    /// listener callback, pending-queue re-queue (except relocations),
    /// and a `PlacementFailed` event.
    pub async fn dispatch(self: &Arc<Self>, mut request: PlacementRequest) -> ProvisionResult<()> {
        let selected = self.selector.select(&mut request, &self.registry)?;
        match selected {
            Some(node) => {
                node.add_in_flight(&request.element.name);
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    engine.run_placement(request, node).await;
                });
                Ok(())
            }
            None => {
                self.placement_failed(request).await;
                Ok(())
            }
        }
    }

    /// Re-attempt every queued pending request. Each is removed before
    /// dispatch so a repeat failure re-queues cleanly.
    pub async fn process_pending(self: &Arc<Self>) {
        let drained = { self.pending.lock().await.drain() };
        if drained.is_empty() {
            return;
        }
        debug!(count = drained.len(), "replaying pending queue");
        for request in drained {
            let retry = request.clone();
            if let Err(e) = self.dispatch(request).await {
                // A hard dispatch error must not lose the retry entry;
                // park it for the next pass.
                error!(error = %e, "pending replay dispatch failed, re-queueing");
                self.pending.lock().await.add(retry);
            }
        }
    }

    /// Signal that a placed instance died. The local record is cleaned
    /// and a fresh placement attempt is dispatched. Lease expiry alone
    /// never triggers this; node liveness and instance failure are
    /// tracked separately.
    pub async fn instance_failed(
        self: &Arc<Self>,
        element: ServiceElement,
        instance: ServiceInstance,
        listener: Option<Arc<dyn PlacementListener>>,
    ) -> ProvisionResult<()> {
        if let Some(handle) = self.registry.get(&instance.node_id) {
            handle.remove_deployed(&instance.element_name, instance.instance_id);
        }
        warn!(
            element = %instance.element_name,
            instance = instance.instance_id,
            node = %instance.node_id,
            "instance failed, re-queueing"
        );
        let mut request = PlacementRequest::new(element, RequestKind::Place).with_prior(instance);
        request.listener = listener;
        self.dispatch(request).await
    }

    /// Declare that an element can never be placed. Drops its retry
    /// backlog and blacklists it on every node until the element is
    /// updated.
    pub async fn mark_uninstantiable(&self, element: &str) {
        let dropped = self.pending.lock().await.remove_element(element);
        self.fixed.lock().await.remove(element);
        for handle in self.registry.snapshot() {
            handle.blacklist(element);
        }
        warn!(%element, dropped, "element marked uninstantiable");
    }

    /// Pick up an element config update: refresh queued snapshots and
    /// clear any uninstantiable state.
    pub async fn update_element(&self, element: &ServiceElement) {
        self.pending.lock().await.update_snapshot(element);
        self.fixed.lock().await.update_snapshot(element);
        for handle in self.registry.snapshot() {
            handle.clear_blacklist(&element.name);
        }
        debug!(element = %element.name, planned = element.planned, "element snapshot updated");
    }

    // ── Operator-driven count mutation (serialized per element) ─────

    /// Raise the desired count by one and dispatch a fresh attempt.
    pub async fn increment(
        self: &Arc<Self>,
        element: &mut ServiceElement,
        listener: Option<Arc<dyn PlacementListener>>,
    ) -> ProvisionResult<()> {
        let lock = self.element_lock(&element.name);
        let _guard = lock.lock().await;

        element.planned += 1;
        self.update_element(element).await;

        let mut request = PlacementRequest::new(element.clone(), RequestKind::Place);
        request.listener = listener;
        self.dispatch(request).await
    }

    /// Lower the desired count by one. Sheds queued backlog first;
    /// otherwise tears down the most recently started instance. Returns
    /// the instance that was torn down, if any.
    pub async fn decrement(
        self: &Arc<Self>,
        element: &mut ServiceElement,
    ) -> ProvisionResult<Option<ServiceInstance>> {
        let lock = self.element_lock(&element.name);
        let _guard = lock.lock().await;

        element.planned = element.planned.saturating_sub(1);
        self.update_element(element).await;

        let trimmed = self.pending.lock().await.remove_up_to(&element.name, 1);
        if !trimmed.is_empty() {
            debug!(element = %element.name, "decrement satisfied from pending queue");
            return Ok(None);
        }

        let newest = self
            .registry
            .snapshot()
            .iter()
            .filter_map(|h| h.newest_deployed(&element.name))
            .max_by_key(|i| (i.started_at, i.instance_id));
        match newest {
            Some(instance) => {
                self.terminate(&instance).await;
                Ok(Some(instance))
            }
            None => Ok(None),
        }
    }

    /// Move an instance off its current node. Relocation failures are
    /// terminal for the attempt; they are never auto-retried.
    pub async fn redeploy(
        self: &Arc<Self>,
        element: ServiceElement,
        instance: ServiceInstance,
        listener: Option<Arc<dyn PlacementListener>>,
    ) -> ProvisionResult<()> {
        let mut request = PlacementRequest::new(element, RequestKind::Relocate)
            .with_exclude(instance.node_id.clone())
            .with_prior(instance);
        request.listener = listener;
        self.dispatch(request).await
    }

    /// Tear down an instance. A destroy error is logged and the local
    /// deployed record is force-cleaned regardless, so slot accounting
    /// never leaks.
    pub async fn terminate(&self, instance: &ServiceInstance) {
        if let Err(e) = self.launcher.destroy(instance).await {
            warn!(
                element = %instance.element_name,
                instance = instance.instance_id,
                error = %e,
                "destroy failed, force-cleaning local records"
            );
        }
        if let Some(handle) = self.registry.get(&instance.node_id) {
            handle.remove_deployed(&instance.element_name, instance.instance_id);
        }
    }

    // ── Queue introspection ─────────────────────────────────────────

    pub async fn pending_count(&self, element: &str) -> usize {
        self.pending.lock().await.count(element)
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    // ── Internal ────────────────────────────────────────────────────

    /// Reconcile the fixed queue against one node (or all nodes), then
    /// drain one pass of the pending queue.
    async fn reconcile(self: &Arc<Self>, node: Option<Arc<NodeHandle>>) {
        let views: Vec<NodeView> = match &node {
            Some(handle) => vec![handle.view()],
            None => self.registry.views(),
        };
        let live = self.registry.node_ids();
        let planned = { self.fixed.lock().await.plan(&views, &live) };
        for request in planned {
            if let Err(e) = self.dispatch(request).await {
                // The representative stays in the fixed queue; the slot
                // is planned again on the next pass.
                error!(error = %e, "fixed reconciliation dispatch failed");
            }
        }
        self.process_pending().await;
    }

    async fn run_placement(self: Arc<Self>, mut request: PlacementRequest, node: Arc<NodeHandle>) {
        let Ok(_permit) = Arc::clone(&self.limiter).acquire_owned().await else {
            return; // engine torn down
        };

        let element = request.element.name.clone();
        let view = node.view();
        let instance_id = self.ids.next(&element);

        match self.launcher.launch(&request, &view, instance_id).await {
            Ok(instance) => {
                node.record_deployed(instance.clone());
                node.clear_in_flight(&element);
                info!(
                    element = %element,
                    node = %node.id(),
                    instance = instance.instance_id,
                    "instance placed"
                );
                if let Some(listener) = &request.listener {
                    if let Err(e) = listener.on_placed(&instance) {
                        warn!(error = %e, "placement listener failed");
                    }
                }
                self.events
                    .publish(EngineEvent::PlacementSucceeded { instance });
            }
            Err(e) => {
                node.clear_in_flight(&element);
                warn!(
                    element = %element,
                    node = %node.id(),
                    error = %e,
                    "placement attempt failed"
                );
                request.add_reason(format!("placement on node `{}` failed: {e}", node.id()));
                self.placement_failed(request).await;
            }
        }
    }

    /// The no-qualifying-node path: listener callback (best-effort),
    /// re-queue where the pending queue owns the retry, failure event
    /// with the accumulated reasons.
    ///
    /// Only dynamic elements land in the pending queue. Fixed elements
    /// stay tracked by the fixed queue, which re-plans the missing slot
    /// on every reconcile pass; queueing them here as well would add one
    /// ghost copy per pass. Relocations are terminal per attempt.
    async fn placement_failed(self: &Arc<Self>, request: PlacementRequest) {
        let will_retry = request.kind != RequestKind::Relocate;
        if let Some(listener) = &request.listener {
            if let Err(e) = listener.on_failed(&request.element, will_retry) {
                warn!(error = %e, "failure listener error");
            }
        }

        let element = request.element.name.clone();
        let reasons = request.failure_reasons.clone();
        warn!(element = %element, ?reasons, "no qualifying node");

        if will_retry && request.element.mode == ProvisionMode::Dynamic {
            self.pending.lock().await.add(request);
        }
        self.events
            .publish(EngineEvent::PlacementFailed { element, reasons });
    }

    /// Fetch a node's live record list with bounded retry.
    async fn fetch_records(&self, node_id: &str) -> ProvisionResult<Vec<ServiceInstance>> {
        let Some(source) = &self.records else {
            return Ok(Vec::new());
        };

        let attempts = self.config.record_fetch_attempts;
        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 1..=attempts {
            match source.fetch_records(node_id).await {
                Ok(records) => return Ok(records),
                Err(e) => {
                    warn!(%node_id, attempt, error = %e, "record fetch failed");
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.record_fetch_backoff).await;
                    }
                }
            }
        }
        Err(ProvisionError::RecordFetch {
            node_id: node_id.to_string(),
            attempts,
            source: last_err.unwrap_or_else(|| anyhow::anyhow!("no attempts made")),
        })
    }

    fn element_lock(&self, element: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .element_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(element.to_string()).or_default())
    }
}
