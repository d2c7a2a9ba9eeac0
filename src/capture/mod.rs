pub mod decoder;
pub mod frame;
pub mod simulated;
pub mod v4l2;

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

pub use frame::Frame;
pub use simulated::SimulatedCamera;
pub use v4l2::V4l2Camera;

use crate::pipeline::FrameBuffer;
use crate::utils::{self, FoundDevice};
use crate::{CameraBackend, Config, Result};

/// A frame source that can be switched on and off.
///
/// Implementations run their capture loop on a dedicated thread and write
/// raw JPEG bytes into the sink they were started with.
pub trait CameraDevice: Send {
    /// Human readable name for logs
    fn name(&self) -> &str;

    /// Start producing frames into `sink`. Returns once production has
    /// started, or `DeviceUnavailable` when it cannot.
    fn begin(&mut self, sink: Arc<FrameBuffer>) -> Result<()>;

    /// Stop producing frames. Must not return before the capture thread has
    /// been joined.
    fn end(&mut self);

    /// Take one still image and write it as a JPEG file to `dest`.
    ///
    /// Only called while the continuous capture is stopped.
    fn capture_still(&mut self, dest: &Path) -> Result<()>;
}

/// Pick the camera implementation once, at startup.
pub fn probe(config: &Config) -> Box<dyn CameraDevice> {
    match config.capture.backend {
        CameraBackend::Simulated => {
            info!("Simulated camera selected by configuration");
            Box::new(SimulatedCamera::from_config(&config.simulated))
        }
        CameraBackend::Hardware => {
            let device = utils::find_capture_device(&config.capture.device).unwrap_or_else(|| {
                let path = if config.capture.device.is_empty() {
                    "/dev/video0".to_string()
                } else {
                    config.capture.device.clone()
                };
                warn!("Hardware camera requested but {} did not probe as MJPEG capable", path);
                FoundDevice::new(path, "unknown".into())
            });
            Box::new(V4l2Camera::new(device, config.capture.clone(), config.snapshot.clone()))
        }
        CameraBackend::Auto => match utils::find_capture_device(&config.capture.device) {
            Some(device) => {
                Box::new(V4l2Camera::new(device, config.capture.clone(), config.snapshot.clone()))
            }
            None => {
                info!("No capture hardware found, falling back to the simulated camera");
                Box::new(SimulatedCamera::from_config(&config.simulated))
            }
        },
    }
}
