//! Type definitions for device capability classification.

use serde::{Deserialize, Serialize};

/// Coarse performance classification used to parameterize compression
/// and upload concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceTier {
    Low,
    Medium,
    High,
}

impl PerformanceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceTier::Low => "low",
            PerformanceTier::Medium => "medium",
            PerformanceTier::High => "high",
        }
    }

    /// Constrained tiers get cooperative yields and sequential compression.
    pub fn is_constrained(&self) -> bool {
        matches!(self, PerformanceTier::Low)
    }
}

/// Browser family reported by the embedding shell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BrowserFamily {
    Chromium,
    Firefox,
    Safari,
    Other,
}

/// Connection-type hint, refreshed on connection-change events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    Wifi,
    Cellular4g,
    Cellular3g,
    Cellular2g,
    Unknown,
}

impl ConnectionType {
    pub fn is_metered(&self) -> bool {
        matches!(
            self,
            ConnectionType::Cellular4g | ConnectionType::Cellular3g | ConnectionType::Cellular2g
        )
    }
}

/// Raw environment signals handed in by the embedding shell.
///
/// Capability detection is heuristic by nature, so everything here is
/// optional or best-effort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentHints {
    pub memory_mb: Option<u64>,
    pub logical_cores: Option<usize>,
    pub is_mobile: bool,
    pub browser: BrowserFamily,
    pub connection: ConnectionType,
}

impl Default for EnvironmentHints {
    fn default() -> Self {
        Self {
            memory_mb: None,
            logical_cores: None,
            is_mobile: false,
            browser: BrowserFamily::Other,
            connection: ConnectionType::Unknown,
        }
    }
}

/// Derived runtime profile. Not persisted; recomputed at session start and
/// on connection-change events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub tier: PerformanceTier,
    pub memory_mb: Option<u64>,
    pub logical_cores: usize,
    pub is_mobile: bool,
    pub browser: BrowserFamily,
    pub connection: ConnectionType,
}

impl DeviceProfile {
    /// Upload transfers allowed in parallel on this device.
    pub fn safe_upload_concurrency(&self) -> usize {
        match self.tier {
            PerformanceTier::Low => 1,
            PerformanceTier::Medium => 2,
            PerformanceTier::High => 3,
        }
    }
}
