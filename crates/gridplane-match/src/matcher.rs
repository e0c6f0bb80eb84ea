//! The placement predicate: `can_place(request, node)`.
//!
//! Gates run in a fixed order; the first rejection wins and its reason is
//! appended to the request's deduplicated failure-reason list. Association
//! gates run colocated → opposed → isolated. Qualitative platform
//! requirements get a second pass: requirements the node does not support
//! may still be satisfied by staged provisioning if every one of them is
//! downloadable and the total payload fits the node's free storage.

use thiserror::Error;
use tracing::{debug, trace};

use gridplane_model::{
    AssociationKind, NodeView, PlacementRequest, PlatformKind, PlatformRequirement,
    ProvisionMode, SYSTEM_THRESHOLD_ID,
};

use crate::strategy::StrategyRegistry;

/// Hard failures during matching. Ordinary non-matches are not errors.
#[derive(Debug, Error)]
pub enum MatchError {
    /// A staged capability's payload size could not be determined. This is
    /// a placement-infrastructure error, not a "no match".
    #[error("cannot determine download size for capability `{0}`")]
    SizeUnavailable(String),
}

/// Result of evaluating one node for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The node may host the element. `provisionable` lists staged
    /// capabilities that must be downloaded before hosting.
    Accepted { provisionable: Vec<String> },
    /// The node may not host the element; the reason was appended to the
    /// request.
    Rejected,
}

impl MatchOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MatchOutcome::Accepted { .. })
    }
}

/// Evaluate whether `node` can host an instance of the request's element.
///
/// On acceptance the request's `provisionable` list is updated with any
/// staged capabilities the node must download first.
pub fn can_place(
    request: &mut PlacementRequest,
    node: &NodeView,
    strategies: &StrategyRegistry,
) -> Result<MatchOutcome, MatchError> {
    let element = request.element.clone();
    let name = element.name.as_str();
    let deployed = node.deployed_count(name);
    let in_flight = node.in_flight_count(name);

    // Gate 1: nothing to place.
    if element.planned == 0 {
        return reject(request, format!("element `{name}` has zero planned instances"));
    }

    // Gate 2: per-element service limit, waived for fixed elements.
    if element.mode != ProvisionMode::Fixed && deployed >= node.service_limit {
        return reject(
            request,
            format!(
                "node `{}` is at its service limit ({}) for element `{name}`",
                node.node_id, node.service_limit
            ),
        );
    }

    // Gate 3: per-machine cap counts deployed plus in-flight.
    if let Some(max) = element.max_per_machine {
        if deployed + in_flight >= max {
            return reject(
                request,
                format!(
                    "per-machine cap ({max}) for element `{name}` reached on node `{}`",
                    node.node_id
                ),
            );
        }
    }

    // Gate 4: fixed elements track remaining slots against this node.
    if element.mode == ProvisionMode::Fixed {
        let remaining = element.planned as i64 - (deployed + in_flight) as i64;
        if remaining <= 0 {
            return reject(
                request,
                format!(
                    "no remaining fixed slots for element `{name}` on node `{}`",
                    node.node_id
                ),
            );
        }
    }

    // Gates 5-6: association constraints, colocated → opposed → isolated.
    if let Some(reason) = check_associations(&element, node, strategies) {
        return reject(request, reason);
    }

    // Gate 7: every measured resource must sit inside its own band.
    for r in &node.capability.resources {
        if !r.within_band() {
            return reject(
                request,
                format!(
                    "resource `{}` out of band on node `{}`: {} not in [{}, {}]",
                    r.id, node.node_id, r.value, r.low, r.high
                ),
            );
        }
    }

    // Gate 8: machine-cluster allowlist.
    if !element.machine_cluster.is_empty() {
        let member = element
            .machine_cluster
            .iter()
            .any(|m| node.capability.address.matches(m));
        if !member {
            return reject(
                request,
                format!(
                    "node `{}` ({}) is not in the machine cluster for element `{name}`",
                    node.node_id, node.capability.address.hostname
                ),
            );
        }
    }

    // Gate 9: quantitative SLA thresholds.
    for t in &element.requirements.thresholds {
        if t.id == SYSTEM_THRESHOLD_ID {
            let u = node.capability.system_utilization;
            if u < t.low || u > t.high {
                return reject(
                    request,
                    format!(
                        "system utilization on node `{}` is {u}, outside [{}, {}]",
                        node.node_id, t.low, t.high
                    ),
                );
            }
            continue;
        }
        match node.capability.resource(&t.id) {
            Some(r) if r.satisfies(t) => {}
            Some(r) => {
                return reject(
                    request,
                    format!(
                        "threshold `{}` not met on node `{}`: {} not in [{}, {}]",
                        t.id, node.node_id, r.value, t.low, t.high
                    ),
                );
            }
            None => {
                return reject(
                    request,
                    format!(
                        "node `{}` reports no measured resource for threshold `{}`",
                        node.node_id, t.id
                    ),
                );
            }
        }
    }

    // Gate 10: qualitative platform requirements.
    let mut unsupported: Vec<&PlatformRequirement> = Vec::new();
    for kind in [
        PlatformKind::Architecture,
        PlatformKind::OperatingSystem,
        PlatformKind::MachineAddress,
    ] {
        if let Some(reason) = check_platform_group(&element.requirements.platform, kind, node) {
            return reject(request, reason);
        }
    }
    for req in element
        .requirements
        .platform
        .iter()
        .filter(|r| r.kind == PlatformKind::Component)
    {
        // Excluded generic requirements are skipped, not counted as failures.
        if req.excluded {
            continue;
        }
        if !node.capability.platform.iter().any(|c| c.supports(req)) {
            unsupported.push(req);
        }
    }

    // Gate 11: second pass — staged provisioning for unsupported components.
    if unsupported.is_empty() {
        trace!(node = %node.node_id, element = %name, "match accepted");
        return Ok(MatchOutcome::Accepted {
            provisionable: Vec::new(),
        });
    }

    if !node.capability.supports_staging {
        let names: Vec<&str> = unsupported.iter().map(|r| r.name.as_str()).collect();
        return reject(
            request,
            format!(
                "node `{}` does not support staged provisioning (missing: {})",
                node.node_id,
                names.join(", ")
            ),
        );
    }

    let mut total: u64 = 0;
    for req in &unsupported {
        let Some(download) = &req.download else {
            return reject(
                request,
                format!(
                    "capability `{}` is not downloadable and node `{}` lacks it",
                    req.name, node.node_id
                ),
            );
        };
        // An unresolvable size is infrastructure trouble, never a non-match.
        let size = download
            .size_bytes
            .ok_or_else(|| MatchError::SizeUnavailable(req.name.clone()))?;
        total += size + download.post_install_bytes.unwrap_or(0);
    }

    if total > node.capability.storage_free_bytes {
        return reject(
            request,
            format!(
                "insufficient disk space on node `{}`: need {total} bytes, {} free",
                node.node_id, node.capability.storage_free_bytes
            ),
        );
    }

    let provisionable: Vec<String> = unsupported.iter().map(|r| r.name.clone()).collect();
    debug!(
        node = %node.node_id,
        element = %name,
        capabilities = ?provisionable,
        "match accepted with staged provisioning"
    );
    request.provisionable = provisionable.clone();
    Ok(MatchOutcome::Accepted { provisionable })
}

fn reject(request: &mut PlacementRequest, reason: String) -> Result<MatchOutcome, MatchError> {
    trace!(element = %request.element.name, %reason, "match rejected");
    request.add_reason(reason);
    Ok(MatchOutcome::Rejected)
}

/// Association gates. Returns a rejection reason, or `None` when all
/// constraints hold. Opposed is evaluated before isolated when both are
/// declared on the same pair.
fn check_associations(
    element: &gridplane_model::ServiceElement,
    node: &NodeView,
    strategies: &StrategyRegistry,
) -> Option<String> {
    // Colocated: at least one partner present (deployed or in flight).
    for c in element
        .associations
        .iter()
        .filter(|c| c.kind == AssociationKind::Colocated)
    {
        let matcher = strategies.resolve(c.strategy.as_deref());
        let present = node.present_elements().any(|e| matcher.matches(c, e));
        if !present {
            return Some(format!(
                "missing colocated partner `{}` for element `{}` on node `{}`",
                c.partner, element.name, node.node_id
            ));
        }
    }

    // Opposed: partner must be absent.
    for c in element
        .associations
        .iter()
        .filter(|c| c.kind == AssociationKind::Opposed)
    {
        let matcher = strategies.resolve(c.strategy.as_deref());
        if node.present_elements().any(|e| matcher.matches(c, e)) {
            return Some(format!(
                "opposed element `{}` is present on node `{}`",
                c.partner, node.node_id
            ));
        }
    }

    // Isolated: partner absent, and the node must not be a known host.
    for c in element
        .associations
        .iter()
        .filter(|c| c.kind == AssociationKind::Isolated)
    {
        let matcher = strategies.resolve(c.strategy.as_deref());
        if node.present_elements().any(|e| matcher.matches(c, e)) {
            return Some(format!(
                "isolated element `{}` is present on node `{}`",
                c.partner, node.node_id
            ));
        }
        if c.known_hosts
            .iter()
            .any(|h| node.capability.address.matches(h))
        {
            return Some(format!(
                "node `{}` is already known to isolated element `{}`",
                node.node_id, c.partner
            ));
        }
    }

    None
}

/// Architecture / OS / machine-address requirement groups.
///
/// The node must match at least one non-excluded requirement of the group,
/// or — when the group only declares exclusions — must match none of them.
fn check_platform_group(
    requirements: &[PlatformRequirement],
    kind: PlatformKind,
    node: &NodeView,
) -> Option<String> {
    let group: Vec<&PlatformRequirement> =
        requirements.iter().filter(|r| r.kind == kind).collect();
    if group.is_empty() {
        return None;
    }

    let label = match kind {
        PlatformKind::Architecture => "architecture",
        PlatformKind::OperatingSystem => "operating system",
        PlatformKind::MachineAddress => "machine address",
        PlatformKind::Component => "component",
    };

    let included: Vec<&&PlatformRequirement> = group.iter().filter(|r| !r.excluded).collect();
    if included.is_empty() {
        // Exclusion-only group: the node must match none of them.
        if let Some(hit) = group.iter().find(|r| node_matches(node, r)) {
            return Some(format!(
                "node `{}` matches excluded {label} requirement `{}`",
                node.node_id, hit.name
            ));
        }
        return None;
    }

    if included.iter().any(|r| node_matches(node, r)) {
        return None;
    }

    let wanted: Vec<&str> = included.iter().map(|r| r.name.as_str()).collect();
    Some(format!(
        "node `{}` satisfies none of the required {label}s: {}",
        node.node_id,
        wanted.join(", ")
    ))
}

fn node_matches(node: &NodeView, req: &PlatformRequirement) -> bool {
    if req.kind == PlatformKind::MachineAddress {
        return node.capability.address.matches(&req.name);
    }
    node.capability.platform.iter().any(|c| c.supports(req))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    use gridplane_model::{
        AssociationConstraint, CapabilitySnapshot, HostAddress, MeasuredResource,
        PlatformCapability, RequestKind, ServiceElement, ServiceInstance, SlaThreshold,
        StagedDownload,
    };

    fn node(id: &str) -> NodeView {
        NodeView {
            node_id: id.to_string(),
            name: id.to_string(),
            service_limit: 10,
            capability: CapabilitySnapshot {
                address: HostAddress::new("10.0.0.1", "worker-a"),
                storage_free_bytes: 1024,
                supports_staging: false,
                platform: vec![
                    PlatformCapability::new(PlatformKind::Architecture, "x86_64", ""),
                    PlatformCapability::new(PlatformKind::OperatingSystem, "linux", "6.8"),
                ],
                resources: Vec::new(),
                system_utilization: 0.2,
            },
            deployed: HashMap::new(),
            in_flight: HashMap::new(),
            uninstantiable: HashSet::new(),
        }
    }

    fn request(element: ServiceElement) -> PlacementRequest {
        PlacementRequest::new(element, RequestKind::Place)
    }

    fn deploy(view: &mut NodeView, element: &str, count: usize) {
        let records: Vec<ServiceInstance> = (0..count)
            .map(|i| ServiceInstance {
                element_name: element.to_string(),
                instance_id: i as u64,
                node_id: view.node_id.clone(),
                host_address: "10.0.0.1".to_string(),
                started_at: 0,
            })
            .collect();
        view.deployed.insert(element.to_string(), records);
    }

    fn accepts(req: &mut PlacementRequest, view: &NodeView) -> bool {
        can_place(req, view, &StrategyRegistry::new())
            .unwrap()
            .is_accepted()
    }

    #[test]
    fn zero_planned_rejects() {
        let mut req = request(ServiceElement::dynamic("web", 0));
        assert!(!accepts(&mut req, &node("n1")));
        assert!(req.failure_reasons[0].contains("zero planned"));
    }

    #[test]
    fn service_limit_gate_counts_this_element() {
        let mut view = node("n1");
        view.service_limit = 2;
        deploy(&mut view, "web", 2);

        let mut req = request(ServiceElement::dynamic("web", 5));
        assert!(!accepts(&mut req, &view));
        assert!(req.failure_reasons[0].contains("service limit"));
    }

    #[test]
    fn service_limit_waived_for_fixed() {
        let mut view = node("n1");
        view.service_limit = 1;
        deploy(&mut view, "agent", 1);

        // Fixed skips gate 2 but gate 4 still bounds it by planned.
        let mut req = request(ServiceElement::fixed("agent", 3));
        assert!(accepts(&mut req, &view));
    }

    #[test]
    fn per_machine_cap_counts_in_flight() {
        let mut view = node("n1");
        view.in_flight.insert("web".to_string(), 1);

        let mut element = ServiceElement::dynamic("web", 5);
        element.max_per_machine = Some(1);
        let mut req = request(element);
        assert!(!accepts(&mut req, &view));
        assert!(req.failure_reasons[0].contains("per-machine cap"));
    }

    #[test]
    fn fixed_remaining_gate() {
        let mut view = node("n1");
        deploy(&mut view, "agent", 1);
        view.in_flight.insert("agent".to_string(), 1);

        let mut req = request(ServiceElement::fixed("agent", 2));
        assert!(!accepts(&mut req, &view));
        assert!(req.failure_reasons[0].contains("no remaining fixed slots"));
    }

    #[test]
    fn colocated_partner_missing_rejects_with_partner_name() {
        let mut element = ServiceElement::dynamic("web", 1);
        element
            .associations
            .push(AssociationConstraint::new(AssociationKind::Colocated, "cache"));

        let mut req = request(element);
        assert!(!accepts(&mut req, &node("n1")));
        assert!(req.failure_reasons[0].contains("colocated partner `cache`"));
    }

    #[test]
    fn colocated_partner_in_flight_satisfies() {
        let mut view = node("n1");
        view.in_flight.insert("cache".to_string(), 1);

        let mut element = ServiceElement::dynamic("web", 1);
        element
            .associations
            .push(AssociationConstraint::new(AssociationKind::Colocated, "cache"));
        let mut req = request(element);
        assert!(accepts(&mut req, &view));
    }

    #[test]
    fn opposed_partner_present_rejects() {
        let mut view = node("n1");
        deploy(&mut view, "analytics", 1);

        let mut element = ServiceElement::dynamic("web", 1);
        element
            .associations
            .push(AssociationConstraint::new(AssociationKind::Opposed, "analytics"));
        let mut req = request(element);
        assert!(!accepts(&mut req, &view));
        assert!(req.failure_reasons[0].contains("opposed element `analytics`"));
    }

    #[test]
    fn opposed_checked_before_isolated() {
        let mut view = node("n1");
        deploy(&mut view, "analytics", 1);

        let mut element = ServiceElement::dynamic("web", 1);
        let mut isolated = AssociationConstraint::new(AssociationKind::Isolated, "analytics");
        isolated.known_hosts = vec!["worker-a".to_string()];
        element
            .associations
            .push(AssociationConstraint::new(AssociationKind::Opposed, "analytics"));
        element.associations.push(isolated);

        let mut req = request(element);
        assert!(!accepts(&mut req, &view));
        assert!(req.failure_reasons[0].contains("opposed"));
    }

    #[test]
    fn isolated_known_host_rejects() {
        let mut element = ServiceElement::dynamic("web", 1);
        let mut c = AssociationConstraint::new(AssociationKind::Isolated, "web-peer");
        c.known_hosts = vec!["worker-a".to_string()];
        element.associations.push(c);

        let mut req = request(element);
        assert!(!accepts(&mut req, &node("n1")));
        assert!(req.failure_reasons[0].contains("already known to isolated"));
    }

    #[test]
    fn isolated_empty_known_hosts_is_vacuous() {
        let mut element = ServiceElement::dynamic("web", 1);
        element
            .associations
            .push(AssociationConstraint::new(AssociationKind::Isolated, "web-peer"));

        let mut req = request(element);
        assert!(accepts(&mut req, &node("n1")));
    }

    #[test]
    fn resource_out_of_band_rejects() {
        let mut view = node("n1");
        view.capability.resources.push(MeasuredResource {
            id: "memory".to_string(),
            value: 0.95,
            low: 0.0,
            high: 0.9,
        });

        let mut req = request(ServiceElement::dynamic("web", 1));
        assert!(!accepts(&mut req, &view));
        assert!(req.failure_reasons[0].contains("out of band"));
    }

    #[test]
    fn machine_cluster_allowlist() {
        let mut element = ServiceElement::dynamic("web", 1);
        element.machine_cluster = vec!["worker-b".to_string()];
        let mut req = request(element.clone());
        assert!(!accepts(&mut req, &node("n1")));

        element.machine_cluster = vec!["worker-a".to_string()];
        let mut req = request(element);
        assert!(accepts(&mut req, &node("n1")));
    }

    #[test]
    fn threshold_against_measured_resource() {
        let mut view = node("n1");
        view.capability.resources.push(MeasuredResource {
            id: "cpu".to_string(),
            value: 0.7,
            low: 0.0,
            high: 1.0,
        });

        let mut element = ServiceElement::dynamic("web", 1);
        element.requirements.thresholds.push(SlaThreshold {
            id: "cpu".to_string(),
            low: 0.0,
            high: 0.5,
        });
        let mut req = request(element);
        assert!(!accepts(&mut req, &view));
        assert!(req.failure_reasons[0].contains("threshold `cpu`"));
    }

    #[test]
    fn missing_measured_resource_for_threshold_rejects() {
        let mut element = ServiceElement::dynamic("web", 1);
        element.requirements.thresholds.push(SlaThreshold {
            id: "gpu-mem".to_string(),
            low: 0.0,
            high: 1.0,
        });
        let mut req = request(element);
        assert!(!accepts(&mut req, &node("n1")));
        assert!(req.failure_reasons[0].contains("no measured resource"));
    }

    #[test]
    fn system_threshold_uses_aggregate_utilization() {
        let mut view = node("n1");
        view.capability.system_utilization = 0.9;

        let mut element = ServiceElement::dynamic("web", 1);
        element.requirements.thresholds.push(SlaThreshold {
            id: SYSTEM_THRESHOLD_ID.to_string(),
            low: 0.0,
            high: 0.8,
        });
        let mut req = request(element);
        assert!(!accepts(&mut req, &view));
        assert!(req.failure_reasons[0].contains("system utilization"));
    }

    #[test]
    fn architecture_requirement_must_match_one() {
        let mut element = ServiceElement::dynamic("web", 1);
        element
            .requirements
            .platform
            .push(PlatformRequirement::new(PlatformKind::Architecture, "aarch64"));
        let mut req = request(element);
        assert!(!accepts(&mut req, &node("n1")));
        assert!(req.failure_reasons[0].contains("architecture"));
    }

    #[test]
    fn excluded_os_requirement_rejects_matching_node() {
        let mut element = ServiceElement::dynamic("web", 1);
        let mut r = PlatformRequirement::new(PlatformKind::OperatingSystem, "linux");
        r.excluded = true;
        element.requirements.platform.push(r);

        let mut req = request(element);
        assert!(!accepts(&mut req, &node("n1")));
        assert!(req.failure_reasons[0].contains("excluded operating system"));
    }

    #[test]
    fn machine_address_requirement_matches_hostname() {
        let mut element = ServiceElement::dynamic("web", 1);
        element
            .requirements
            .platform
            .push(PlatformRequirement::new(PlatformKind::MachineAddress, "worker-a"));
        let mut req = request(element);
        assert!(accepts(&mut req, &node("n1")));
    }

    #[test]
    fn unsupported_component_without_staging_rejects() {
        let mut element = ServiceElement::dynamic("web", 1);
        element
            .requirements
            .platform
            .push(PlatformRequirement::new(PlatformKind::Component, "libfoo"));
        let mut req = request(element);
        assert!(!accepts(&mut req, &node("n1")));
        assert!(req.failure_reasons[0].contains("staged provisioning"));
    }

    #[test]
    fn excluded_component_is_skipped_not_failed() {
        let mut element = ServiceElement::dynamic("web", 1);
        let mut r = PlatformRequirement::new(PlatformKind::Component, "libfoo");
        r.excluded = true;
        element.requirements.platform.push(r);

        let mut req = request(element);
        assert!(accepts(&mut req, &node("n1")));
    }

    #[test]
    fn downloadable_component_accepted_when_it_fits() {
        let mut view = node("n1");
        view.capability.supports_staging = true;
        view.capability.storage_free_bytes = 500;

        let mut element = ServiceElement::dynamic("web", 1);
        let mut r = PlatformRequirement::new(PlatformKind::Component, "libfoo");
        r.download = Some(StagedDownload {
            size_bytes: Some(300),
            post_install_bytes: Some(100),
        });
        element.requirements.platform.push(r);

        let mut req = request(element);
        let outcome = can_place(&mut req, &view, &StrategyRegistry::new()).unwrap();
        assert_eq!(
            outcome,
            MatchOutcome::Accepted {
                provisionable: vec!["libfoo".to_string()]
            }
        );
        assert_eq!(req.provisionable, vec!["libfoo".to_string()]);
    }

    #[test]
    fn downloadable_component_rejected_when_too_large() {
        let mut view = node("n1");
        view.capability.supports_staging = true;
        view.capability.storage_free_bytes = 100;

        let mut element = ServiceElement::dynamic("web", 1);
        let mut r = PlatformRequirement::new(PlatformKind::Component, "libfoo");
        r.download = Some(StagedDownload {
            size_bytes: Some(300),
            post_install_bytes: None,
        });
        element.requirements.platform.push(r);

        let mut req = request(element);
        assert!(!accepts(&mut req, &view));
        assert!(req.failure_reasons[0].contains("insufficient disk space"));
    }

    #[test]
    fn unknown_download_size_is_a_hard_error() {
        let mut view = node("n1");
        view.capability.supports_staging = true;

        let mut element = ServiceElement::dynamic("web", 1);
        let mut r = PlatformRequirement::new(PlatformKind::Component, "libfoo");
        r.download = Some(StagedDownload {
            size_bytes: None,
            post_install_bytes: None,
        });
        element.requirements.platform.push(r);

        let mut req = request(element);
        let result = can_place(&mut req, &view, &StrategyRegistry::new());
        assert!(matches!(result, Err(MatchError::SizeUnavailable(name)) if name == "libfoo"));
    }

    #[test]
    fn reasons_accumulate_across_nodes() {
        let mut element = ServiceElement::dynamic("web", 1);
        element
            .associations
            .push(AssociationConstraint::new(AssociationKind::Colocated, "cache"));
        let mut req = request(element);

        assert!(!accepts(&mut req, &node("n1")));
        assert!(!accepts(&mut req, &node("n2")));
        // One reason per node, deduplicated by exact text.
        assert_eq!(req.failure_reasons.len(), 2);
    }

    #[test]
    fn plain_element_matches_plain_node() {
        let mut req = request(ServiceElement::dynamic("web", 3));
        assert!(accepts(&mut req, &node("n1")));
        assert!(req.failure_reasons.is_empty());
    }
}
