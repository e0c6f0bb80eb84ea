//! gridplane-events — engine event stream.
//!
//! The [`EventBus`] is an explicitly constructed broadcast channel passed
//! to every component that publishes or consumes engine events. It is
//! created during engine construction and torn down with it; nothing here
//! is process-global.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use gridplane_model::ServiceInstance;

/// Events produced by the provisioning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    PlacementSucceeded {
        instance: ServiceInstance,
    },
    PlacementFailed {
        element: String,
        reasons: Vec<String>,
    },
    NodeRegistered {
        node_id: String,
    },
    NodeRemoved {
        node_id: String,
    },
}

/// Broadcast bus for [`EngineEvent`]s.
///
/// Cloning shares the underlying channel. Publishing with no subscribers
/// is not an error; slow subscribers may observe lagged receives, which
/// is the standard broadcast-channel tradeoff.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: EngineEvent) {
        debug!(?event, "engine event");
        // No receivers is fine; events are best-effort telemetry.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
