//! gridplane-provision — the provisioning engine.
//!
//! Orchestrates end-to-end placement: the engine accepts placement
//! requests, asks the selector for a candidate, launches asynchronous
//! placement attempts through a bounded worker pool, and keeps actual
//! placement converged to desired counts as nodes register, heartbeat,
//! and disappear.
//!
//! # Architecture
//!
//! ```text
//! ProvisionEngine
//!   ├── LeaseRegistry (node pool, add/renew/expire lifecycle)
//!   ├── NodeSelector (snapshot walk + capability matcher)
//!   ├── PendingQueue (elastic retry backlog)
//!   ├── FixedQueue (pinned-element reconciliation)
//!   ├── EventBus (placement/node lifecycle events)
//!   └── collaborators: InstanceLauncher, RecordSource, id allocator
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod fixed;
pub mod ids;
pub mod pending;
pub mod traits;

pub use config::EngineConfig;
pub use engine::{EngineBuilder, ProvisionEngine};
pub use error::{ProvisionError, ProvisionResult};
pub use fixed::FixedQueue;
pub use ids::MonotonicIdAllocator;
pub use pending::PendingQueue;
pub use traits::{InstanceIdAllocator, InstanceLauncher, RecordSource};
