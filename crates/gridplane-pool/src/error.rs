//! Pool error types.

use thiserror::Error;

/// Errors from the lease registry and node pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Renewal for a node the registry does not know.
    #[error("unknown lease for node `{0}`")]
    UnknownLease(String),

    /// Registration refused because the node descriptor is unusable.
    #[error("lease denied: {0}")]
    LeaseDenied(String),

    /// Invalid lease policy configuration; fatal at construction.
    #[error("invalid lease policy: {0}")]
    Config(String),
}

pub type PoolResult<T> = Result<T, PoolError>;
