// Declare submodules for the device capability domain
pub mod detector;
pub mod types;

pub use detector::{CapabilityDetector, FixedCapabilityDetector, HeuristicCapabilityDetector};
pub use types::{BrowserFamily, ConnectionType, DeviceProfile, EnvironmentHints, PerformanceTier};
