//! Engine error types.

use thiserror::Error;

use gridplane_match::MatchError;
use gridplane_pool::PoolError;

/// Errors from the provisioning engine.
///
/// A placement that simply finds no qualifying node is not an error; it
/// is recorded, queued, and surfaced through events and listeners.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Invalid engine configuration; fatal at construction.
    #[error("invalid engine configuration: {0}")]
    Config(String),

    /// Lease registry errors: denied registrations, unknown leases.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Hard matching failures, e.g. an unresolvable download size.
    #[error("placement infrastructure error: {0}")]
    Infrastructure(#[from] MatchError),

    /// A node's deployed-record list could not be fetched within the
    /// configured retry budget.
    #[error("failed to fetch deployed records from node `{node_id}` after {attempts} attempts")]
    RecordFetch {
        node_id: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;
