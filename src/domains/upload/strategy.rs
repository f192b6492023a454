//! Per-upload choice between the background worker and a direct transfer.

use crate::domains::device::{BrowserFamily, DeviceProfile};

/// How a single upload is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadChannel {
    /// Durable queue drained by the background worker
    Worker,
    /// Immediate transfer from the submitting context
    Direct,
}

/// Platform combinations where the background worker is known to be
/// unreliable (suspended or killed mid-transfer).
fn worker_channel_unreliable(profile: &DeviceProfile) -> bool {
    profile.is_mobile && matches!(profile.browser, BrowserFamily::Safari | BrowserFamily::Other)
}

/// Pick the channel for one upload. Evaluated per upload, not per session:
/// worker readiness can change while the app is open.
pub fn select_channel(profile: &DeviceProfile, worker_ready: bool) -> UploadChannel {
    if worker_channel_unreliable(profile) {
        return UploadChannel::Direct;
    }
    if worker_ready {
        UploadChannel::Worker
    } else {
        UploadChannel::Direct
    }
}
