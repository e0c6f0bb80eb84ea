//! Callback interface consumed by the external deployment manager.

use crate::element::ServiceElement;
use crate::instance::ServiceInstance;

/// Outcome callbacks for a placement request.
///
/// Invoked best-effort from engine worker tasks: a returned error is
/// logged by the engine and never propagated into the dispatch path.
pub trait PlacementListener: Send + Sync {
    /// An instance was placed successfully.
    fn on_placed(&self, instance: &ServiceInstance) -> anyhow::Result<()>;

    /// No node could host the element. `will_retry` is false for
    /// relocation attempts, which are terminal on failure.
    fn on_failed(&self, element: &ServiceElement, will_retry: bool) -> anyhow::Result<()>;
}
