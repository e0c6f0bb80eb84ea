//! gridplane-model — domain types for the provisioning engine.
//!
//! These types describe the declared side (what the operator wants placed)
//! and the observed side (what a registered node looks like right now):
//!
//! - [`ServiceElement`] — a declared workload with a desired replica count
//!   and placement constraints
//! - [`PlacementRequest`] — one unit of scheduling work, carrying its own
//!   element snapshot and accumulated failure reasons
//! - [`CapabilitySnapshot`] — a node's declared platform capabilities and
//!   measured resources
//! - [`NodeView`] — an immutable copy of a node's tracked state handed out
//!   by the pool for matching

pub mod capability;
pub mod element;
pub mod instance;
pub mod listener;
pub mod node_view;
pub mod request;

pub use capability::{
    CapabilitySnapshot, HostAddress, MeasuredResource, PlatformCapability,
    PlatformKind, PlatformRequirement, ServiceRequirements, SlaThreshold,
    StagedDownload, SYSTEM_THRESHOLD_ID,
};
pub use element::{AssociationConstraint, AssociationKind, ProvisionMode, ServiceElement};
pub use instance::ServiceInstance;
pub use listener::PlacementListener;
pub use node_view::NodeView;
pub use request::{PlacementRequest, RequestKind};

/// Unique identifier for a registered compute node.
pub type NodeId = String;

/// Unique name of a declared service element.
pub type ElementName = String;
