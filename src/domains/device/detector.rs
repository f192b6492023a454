//! Capability classification behind an injectable policy.

use super::types::{
    BrowserFamily, DeviceProfile, EnvironmentHints, PerformanceTier,
};

/// Classifies the runtime environment into a [`DeviceProfile`].
///
/// Environment sniffing drifts over time, so the policy is a trait: tests
/// and embedders can pin a tier deterministically instead of depending on
/// the heuristic.
pub trait CapabilityDetector: Send + Sync {
    fn classify(&self, hints: &EnvironmentHints) -> DeviceProfile;
}

/// Score-based heuristic over memory, core count and form factor.
pub struct HeuristicCapabilityDetector;

impl HeuristicCapabilityDetector {
    pub fn new() -> Self {
        Self
    }

    fn score(hints: &EnvironmentHints) -> u32 {
        let mut score = 0u32;

        match hints.memory_mb {
            Some(mb) if mb >= 8192 => score += 3,
            Some(mb) if mb >= 4096 => score += 2,
            Some(mb) if mb >= 2048 => score += 1,
            Some(_) => {}
            // No estimate available: assume mid-range rather than punishing
            None => score += 1,
        }

        match hints.logical_cores {
            Some(cores) if cores >= 8 => score += 3,
            Some(cores) if cores >= 4 => score += 2,
            Some(cores) if cores >= 2 => score += 1,
            _ => {}
        }

        // Mobile hardware throttles under sustained load even when the raw
        // numbers look good.
        if hints.is_mobile {
            score = score.saturating_sub(2);
        }

        score
    }
}

impl Default for HeuristicCapabilityDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityDetector for HeuristicCapabilityDetector {
    fn classify(&self, hints: &EnvironmentHints) -> DeviceProfile {
        let score = Self::score(hints);
        let tier = if score >= 5 {
            PerformanceTier::High
        } else if score >= 2 {
            PerformanceTier::Medium
        } else {
            PerformanceTier::Low
        };

        DeviceProfile {
            tier,
            memory_mb: hints.memory_mb,
            logical_cores: hints.logical_cores.unwrap_or(1),
            is_mobile: hints.is_mobile,
            browser: hints.browser,
            connection: hints.connection,
        }
    }
}

/// Detector that always reports the same profile. Used by tests and by
/// embedders that already know their hardware.
pub struct FixedCapabilityDetector {
    profile: DeviceProfile,
}

impl FixedCapabilityDetector {
    pub fn new(profile: DeviceProfile) -> Self {
        Self { profile }
    }

    pub fn for_tier(tier: PerformanceTier) -> Self {
        Self {
            profile: DeviceProfile {
                tier,
                memory_mb: None,
                logical_cores: 4,
                is_mobile: false,
                browser: BrowserFamily::Chromium,
                connection: super::types::ConnectionType::Wifi,
            },
        }
    }
}

impl CapabilityDetector for FixedCapabilityDetector {
    fn classify(&self, hints: &EnvironmentHints) -> DeviceProfile {
        let mut profile = self.profile.clone();
        // Connection state still tracks the live hints; only the tier is pinned
        profile.connection = hints.connection;
        profile
    }
}
