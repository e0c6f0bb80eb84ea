//! Capability snapshots and placement requirements.
//!
//! A node reports a [`CapabilitySnapshot`] on registration and every
//! heartbeat: declared platform capabilities (OS, architecture, named
//! components) plus measured resources with threshold bands. A service
//! element declares [`ServiceRequirements`] that the matcher evaluates
//! against the snapshot.

use serde::{Deserialize, Serialize};

/// Threshold id for the aggregate system-utilization figure.
///
/// A declared [`SlaThreshold`] with this id is compared against
/// [`CapabilitySnapshot::system_utilization`] rather than a named
/// measured resource.
pub const SYSTEM_THRESHOLD_ID: &str = "system";

/// Network identity of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HostAddress {
    pub ip: String,
    pub hostname: String,
}

impl HostAddress {
    pub fn new(ip: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            hostname: hostname.into(),
        }
    }

    /// Whether either the IP or hostname matches the given member string.
    pub fn matches(&self, member: &str) -> bool {
        self.ip == member || self.hostname.eq_ignore_ascii_case(member)
    }
}

/// Category of a declared platform capability or requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    Architecture,
    OperatingSystem,
    MachineAddress,
    /// Any named component (library, runtime, device, ...).
    Component,
}

/// A single platform capability a node declares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformCapability {
    pub kind: PlatformKind,
    pub name: String,
    /// Empty string when the capability is unversioned.
    pub version: String,
}

impl PlatformCapability {
    pub fn new(kind: PlatformKind, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            version: version.into(),
        }
    }

    /// Whether this capability satisfies the given requirement.
    ///
    /// Names compare case-insensitively; a versioned requirement is
    /// satisfied by any capability version with that prefix.
    pub fn supports(&self, req: &PlatformRequirement) -> bool {
        if self.kind != req.kind {
            return false;
        }
        if !self.name.eq_ignore_ascii_case(&req.name) {
            return false;
        }
        req.version.is_empty() || self.version.starts_with(&req.version)
    }
}

/// A measured resource reading with its configured threshold band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasuredResource {
    pub id: String,
    pub value: f64,
    pub low: f64,
    pub high: f64,
}

impl MeasuredResource {
    /// Whether the current reading sits inside its own [low, high] band.
    pub fn within_band(&self) -> bool {
        self.value >= self.low && self.value <= self.high
    }

    /// Whether the current reading satisfies a declared threshold.
    pub fn satisfies(&self, threshold: &SlaThreshold) -> bool {
        self.value >= threshold.low && self.value <= threshold.high
    }
}

/// Per-node declared capabilities plus measured resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub address: HostAddress,
    /// Free storage available for staged capability downloads, in bytes.
    pub storage_free_bytes: u64,
    /// Whether the node can provision staged/downloadable capabilities.
    pub supports_staging: bool,
    pub platform: Vec<PlatformCapability>,
    pub resources: Vec<MeasuredResource>,
    /// Aggregate utilization figure in `0.0..=1.0`.
    pub system_utilization: f64,
}

impl Default for CapabilitySnapshot {
    fn default() -> Self {
        Self {
            address: HostAddress::default(),
            storage_free_bytes: 0,
            supports_staging: false,
            platform: Vec::new(),
            resources: Vec::new(),
            system_utilization: 0.0,
        }
    }
}

impl CapabilitySnapshot {
    /// Find a measured resource by id.
    pub fn resource(&self, id: &str) -> Option<&MeasuredResource> {
        self.resources.iter().find(|r| r.id == id)
    }
}

/// A quantitative SLA threshold declared by a service element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaThreshold {
    /// Matches the id of a measured resource, or [`SYSTEM_THRESHOLD_ID`].
    pub id: String,
    pub low: f64,
    pub high: f64,
}

/// Payload sizes for a staged/downloadable platform capability.
///
/// `None` means the size could not be determined; the matcher treats that
/// as a hard error rather than a non-match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StagedDownload {
    pub size_bytes: Option<u64>,
    pub post_install_bytes: Option<u64>,
}

/// A qualitative platform requirement declared by a service element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformRequirement {
    pub kind: PlatformKind,
    pub name: String,
    /// Empty string to accept any version.
    pub version: String,
    /// Excluded requirements invert the check: the node must *not* match.
    pub excluded: bool,
    /// Present when the capability can be provisioned on demand.
    pub download: Option<StagedDownload>,
}

impl PlatformRequirement {
    pub fn new(kind: PlatformKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            version: String::new(),
            excluded: false,
            download: None,
        }
    }
}

/// Everything a service element requires of a hosting node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ServiceRequirements {
    pub thresholds: Vec<SlaThreshold>,
    pub platform: Vec<PlatformRequirement>,
}
