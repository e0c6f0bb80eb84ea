//! Placement requests — the unit of scheduling work.

use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::element::ServiceElement;
use crate::instance::ServiceInstance;
use crate::listener::PlacementListener;

/// What kind of work a placement request represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    /// Place a new instance.
    Place,
    /// Move an existing instance off its current node. Not auto-retried
    /// on failure.
    Relocate,
    /// Signal that the element can never be placed; removes it from
    /// retry consideration until the element is updated.
    Uninstantiable,
}

/// One placement attempt for a service element.
///
/// Each attempt carries its own [`ServiceElement`] snapshot; requeuing
/// clones the request, so a later edit of the live element never mutates
/// queued work. Failure reasons accumulate (deduplicated) across every
/// node tried, for diagnostics when no candidate accepts.
#[derive(Clone)]
pub struct PlacementRequest {
    pub element: ServiceElement,
    pub kind: RequestKind,
    /// Prior instance for relocate/redeploy attempts.
    pub prior: Option<ServiceInstance>,
    /// Node the selector must skip (relocation source).
    pub exclude_node: Option<String>,
    /// Sticky placement target, honored when still eligible.
    pub requested_node: Option<String>,
    /// Human-readable reasons why nodes rejected this request.
    pub failure_reasons: Vec<String>,
    /// Capabilities to stage onto the chosen node before hosting.
    pub provisionable: Vec<String>,
    /// Unix timestamp in milliseconds.
    pub created_at: u64,
    pub listener: Option<Arc<dyn PlacementListener>>,
}

impl PlacementRequest {
    pub fn new(element: ServiceElement, kind: RequestKind) -> Self {
        Self {
            element,
            kind,
            prior: None,
            exclude_node: None,
            requested_node: None,
            failure_reasons: Vec::new(),
            provisionable: Vec::new(),
            created_at: epoch_millis(),
            listener: None,
        }
    }

    pub fn with_prior(mut self, prior: ServiceInstance) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn with_exclude(mut self, node_id: impl Into<String>) -> Self {
        self.exclude_node = Some(node_id.into());
        self
    }

    pub fn with_requested(mut self, node_id: impl Into<String>) -> Self {
        self.requested_node = Some(node_id.into());
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn PlacementListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Append a failure reason, skipping exact duplicates.
    pub fn add_reason(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        if !self.failure_reasons.contains(&reason) {
            self.failure_reasons.push(reason);
        }
    }

    /// Replace the element snapshot, preserving everything else.
    ///
    /// Used when a queued request must pick up a config update without
    /// losing its queue position or accumulated reasons.
    pub fn set_element(&mut self, element: ServiceElement) {
        self.element = element;
    }
}

impl fmt::Debug for PlacementRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlacementRequest")
            .field("element", &self.element.name)
            .field("kind", &self.kind)
            .field("exclude_node", &self.exclude_node)
            .field("requested_node", &self.requested_node)
            .field("failure_reasons", &self.failure_reasons)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
