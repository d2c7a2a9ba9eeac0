use std::time::Duration;

use thiserror::Error;

/// Errors produced by the camera engine.
///
/// Device failures are fatal to the operation in progress only. Frame
/// timeouts and closed streams end a single viewer's stream.
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("no frame published within {0:?}")]
    FrameTimeout(Duration),

    #[error("camera session stopped")]
    StreamClosed,

    #[error("annotation resource missing: {0}")]
    AnnotationResourceMissing(String),

    #[error("snapshot capture failed: {0}")]
    CaptureFailed(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CameraError {
    pub(crate) fn device(err: impl std::fmt::Display) -> Self {
        Self::DeviceUnavailable(err.to_string())
    }

    /// True for the errors that simply mean "no frame for this viewer".
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::FrameTimeout(_) | Self::StreamClosed)
    }
}

pub type Result<T> = std::result::Result<T, CameraError>;
