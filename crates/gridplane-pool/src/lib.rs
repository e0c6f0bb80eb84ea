//! gridplane-pool — the registered-node pool.
//!
//! Nodes register behind time-bounded leases and renew them via
//! heartbeats. The [`LeaseRegistry`] owns the add/renew/expire/remove
//! lifecycle; the [`NodeSelector`] walks a snapshot of live nodes and
//! picks the first one the matcher accepts.

pub mod error;
pub mod lease;
pub mod node;
pub mod registry;
pub mod selector;

pub use error::{PoolError, PoolResult};
pub use lease::{BoundedLeasePolicy, Lease, LeasePolicy};
pub use node::{NodeDescriptor, NodeHandle};
pub use registry::LeaseRegistry;
pub use selector::{NodeSelector, RoundRobinPolicy, SelectionPolicy};
