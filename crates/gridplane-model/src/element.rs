//! Declared service elements and their association constraints.

use serde::{Deserialize, Serialize};

use crate::capability::ServiceRequirements;

/// How instances of an element are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionMode {
    /// Elastically scheduled up to `planned` instances cluster-wide.
    Dynamic,
    /// Pinned to every qualifying node, bounded by `planned` and the
    /// per-machine cap.
    Fixed,
    /// Managed outside this engine; never scheduled here.
    External,
}

/// Relationship kinds between two service elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    /// Partner must be present on the same node.
    Colocated,
    /// Partner must be absent from the node.
    Opposed,
    /// Partner must be absent and the node must not appear in the
    /// constraint's known-hosts set.
    Isolated,
}

/// A declared relationship between this element and a partner element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationConstraint {
    pub kind: AssociationKind,
    /// Name of the partner element, interpreted by the matching strategy.
    pub partner: String,
    /// Name of a registered association-matching strategy; `None` or an
    /// unknown name falls back to the default exact-name strategy.
    pub strategy: Option<String>,
    /// Hosts already known to an isolated partner. Only meaningful for
    /// [`AssociationKind::Isolated`]; an empty set conflicts with nothing.
    pub known_hosts: Vec<String>,
}

impl AssociationConstraint {
    pub fn new(kind: AssociationKind, partner: impl Into<String>) -> Self {
        Self {
            kind,
            partner: partner.into(),
            strategy: None,
            known_hosts: Vec::new(),
        }
    }
}

/// A declared workload: desired replica count plus placement constraints.
///
/// Owned by the external deployment manager; the engine reads it and only
/// mutates the count-derived fields. Queued placement requests carry their
/// own clone so later edits cannot corrupt in-flight work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceElement {
    /// Unique element name.
    pub name: String,
    /// Desired replica count.
    pub planned: u32,
    pub mode: ProvisionMode,
    /// Upper bound on instances of this element per node.
    pub max_per_machine: Option<u32>,
    /// Allowlist of node addresses/hostnames; empty means any node.
    pub machine_cluster: Vec<String>,
    pub requirements: ServiceRequirements,
    pub associations: Vec<AssociationConstraint>,
}

impl ServiceElement {
    /// A dynamic element with no constraints, mostly useful as a starting
    /// point for builders and tests.
    pub fn dynamic(name: impl Into<String>, planned: u32) -> Self {
        Self {
            name: name.into(),
            planned,
            mode: ProvisionMode::Dynamic,
            max_per_machine: None,
            machine_cluster: Vec::new(),
            requirements: ServiceRequirements::default(),
            associations: Vec::new(),
        }
    }

    /// A fixed element pinned to every qualifying node.
    pub fn fixed(name: impl Into<String>, planned: u32) -> Self {
        Self {
            mode: ProvisionMode::Fixed,
            ..Self::dynamic(name, planned)
        }
    }

    /// Effective per-node cap: `min(planned, max_per_machine)`.
    pub fn per_node_cap(&self) -> u32 {
        match self.max_per_machine {
            Some(cap) => self.planned.min(cap),
            None => self.planned,
        }
    }
}
