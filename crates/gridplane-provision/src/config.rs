//! Engine configuration.

use std::time::Duration;

use crate::error::{ProvisionError, ProvisionResult};

/// Tunables for the provisioning engine. Validated at construction; a bad
/// configuration refuses to start the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lease granted when a registering node requests none.
    pub default_lease: Duration,
    /// Longest lease the policy will grant.
    pub max_lease: Duration,
    /// Bound on concurrently running placement tasks.
    pub max_in_flight: usize,
    /// Attempts when fetching a node's deployed-record list.
    pub record_fetch_attempts: u32,
    /// Fixed backoff between record-fetch attempts.
    pub record_fetch_backoff: Duration,
    /// Interval of the background lease-expiry sweep.
    pub sweep_interval: Duration,
    /// Capacity of the engine event channel.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_lease: Duration::from_secs(5 * 60),
            max_lease: Duration::from_secs(24 * 60 * 60),
            max_in_flight: 8,
            record_fetch_attempts: 3,
            record_fetch_backoff: Duration::from_secs(1),
            sweep_interval: Duration::from_secs(10),
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> ProvisionResult<()> {
        if self.default_lease.is_zero() {
            return Err(ProvisionError::Config("default_lease must be non-zero".into()));
        }
        if self.max_lease < self.default_lease {
            return Err(ProvisionError::Config(
                "max_lease must be at least default_lease".into(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(ProvisionError::Config("max_in_flight must be non-zero".into()));
        }
        if self.record_fetch_attempts == 0 {
            return Err(ProvisionError::Config(
                "record_fetch_attempts must be non-zero".into(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(ProvisionError::Config("sweep_interval must be non-zero".into()));
        }
        Ok(())
    }
}
