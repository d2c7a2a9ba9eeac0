use std::path::Path;

use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device, FourCC};

// Detected capture device info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundDevice {
    pub path: String,
    pub card: String,
}

impl FoundDevice {
    pub fn new(path: String, card: String) -> Self {
        Self { path, card }
    }
}

/// Check whether `path` is a V4L2 capture node that can produce MJPEG.
pub fn probe_mjpeg_device(path: &str) -> Option<FoundDevice> {
    if !Path::new(path).exists() {
        return None;
    }

    let dev = Device::with_path(path).ok()?;
    let caps = dev.query_caps().ok()?;
    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        debug!("{} has no capture capability", path);
        return None;
    }

    let formats = dev.enum_formats().ok()?;
    if formats.iter().any(|fmt| fmt.fourcc == FourCC::new(b"MJPG")) {
        info!("Found MJPEG device: {} - {}", path, caps.card);
        Some(FoundDevice::new(path.to_string(), caps.card))
    } else {
        debug!("{} ({}) does not offer MJPEG", path, caps.card);
        None
    }
}

/// Find a camera, preferring `preferred` when it is set.
pub fn find_capture_device(preferred: &str) -> Option<FoundDevice> {
    if !preferred.is_empty() {
        return probe_mjpeg_device(preferred);
    }

    info!("Auto-detecting capture devices...");
    (0..10).find_map(|i| probe_mjpeg_device(&format!("/dev/video{}", i)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_node_is_not_a_device() {
        assert!(probe_mjpeg_device("/dev/camwatch-does-not-exist").is_none());
        assert!(find_capture_device("/dev/camwatch-does-not-exist").is_none());
    }
}
