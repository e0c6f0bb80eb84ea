//! Time-bounded leases and the policy that grants them.

use std::time::Duration;

use crate::error::{PoolError, PoolResult};

/// Default lease duration granted when a node requests none.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(5 * 60);

/// Longest lease the default policy will grant.
pub const MAX_LEASE: Duration = Duration::from_secs(24 * 60 * 60);

/// A node's registration window. Renewed by heartbeat; the registry
/// evicts the node once `expires_at_ms` passes without renewal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub id: u64,
    pub node_id: String,
    /// Unix timestamp in milliseconds after which the lease is expired.
    pub expires_at_ms: u64,
    /// Duration actually granted by the policy.
    pub granted: Duration,
}

impl Lease {
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }
}

/// Computes the granted lease duration from the requested one.
pub trait LeasePolicy: Send + Sync {
    fn grant(&self, requested: Option<Duration>) -> Duration;
}

/// Default policy: clamp to `[default, max]`; renewal extends from "now".
pub struct BoundedLeasePolicy {
    default: Duration,
    max: Duration,
}

impl BoundedLeasePolicy {
    pub fn new(default: Duration, max: Duration) -> PoolResult<Self> {
        if default.is_zero() {
            return Err(PoolError::Config("default lease must be non-zero".into()));
        }
        if max < default {
            return Err(PoolError::Config(
                "maximum lease must be at least the default".into(),
            ));
        }
        Ok(Self { default, max })
    }
}

impl Default for BoundedLeasePolicy {
    fn default() -> Self {
        Self {
            default: DEFAULT_LEASE,
            max: MAX_LEASE,
        }
    }
}

impl LeasePolicy for BoundedLeasePolicy {
    fn grant(&self, requested: Option<Duration>) -> Duration {
        match requested {
            None => self.default,
            Some(d) if d.is_zero() => self.default,
            Some(d) => d.min(self.max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_default_when_unspecified() {
        let policy = BoundedLeasePolicy::default();
        assert_eq!(policy.grant(None), DEFAULT_LEASE);
        assert_eq!(policy.grant(Some(Duration::ZERO)), DEFAULT_LEASE);
    }

    #[test]
    fn clamps_to_maximum() {
        let policy = BoundedLeasePolicy::default();
        let huge = Duration::from_secs(7 * 24 * 60 * 60);
        assert_eq!(policy.grant(Some(huge)), MAX_LEASE);
    }

    #[test]
    fn honors_requested_within_bounds() {
        let policy = BoundedLeasePolicy::default();
        let d = Duration::from_secs(90);
        assert_eq!(policy.grant(Some(d)), d);
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(BoundedLeasePolicy::new(Duration::ZERO, MAX_LEASE).is_err());
        assert!(
            BoundedLeasePolicy::new(Duration::from_secs(60), Duration::from_secs(30)).is_err()
        );
    }

    #[test]
    fn expiry_check() {
        let lease = Lease {
            id: 1,
            node_id: "n1".to_string(),
            expires_at_ms: 1_000,
            granted: Duration::from_millis(1_000),
        };
        assert!(!lease.is_expired_at(1_000));
        assert!(lease.is_expired_at(1_001));
    }
}
