pub mod capture;
pub mod error;
pub mod pipeline;
pub mod snapshot;
pub mod store;
pub mod stream;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use capture::{CameraDevice, Frame};
pub use error::{CameraError, Result};
pub use pipeline::{CameraSession, FrameAnnotator, FrameBuffer, Lease, SessionState};
pub use snapshot::{ImageHandle, SnapshotController};
pub use store::{ImageRecord, ImageStore, MemoryImageStore, RecordId};
pub use stream::LiveStreamSession;

/// Prefix for environment overrides, e.g. `CAMWATCH__STREAM__WARMUP_MS=0`
pub const ENV_PREFIX: &str = "CAMWATCH";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub stream: StreamConfig,
    pub snapshot: SnapshotConfig,
    pub annotate: AnnotateConfig,
    pub simulated: SimulatedConfig,
    pub server: ServerConfig,
}

/// Which camera implementation the capability probe may pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    /// Hardware when a capture device is found, simulated otherwise
    #[default]
    Auto,
    Hardware,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub backend: CameraBackend,
    /// Empty means auto-detect
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub buffer_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub warmup_ms: u64,
    pub frame_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub width: u32,
    pub height: u32,
    pub warmup_ms: u64,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnotateConfig {
    pub font_path: PathBuf,
    pub font_size: f32,
    pub label_prefix: String,
    pub timestamp_format: String,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    /// Canned frames cycled in order; empty means generated frames
    pub frames: Vec<PathBuf>,
    pub still: Option<PathBuf>,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CameraBackend::Auto,
            device: String::new(),
            width: 1296,
            height: 730,
            fps: 24,
            buffer_count: 4,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            warmup_ms: 10_000,
            frame_timeout_ms: 5_000,
        }
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            warmup_ms: 2_000,
            output_dir: PathBuf::from("captures"),
        }
    }
}

impl Default for AnnotateConfig {
    fn default() -> Self {
        Self {
            font_path: PathBuf::from("/usr/share/fonts/truetype/freefont/FreeSans.ttf"),
            font_size: 25.0,
            label_prefix: "Live stream: ".into(),
            timestamp_format: "%Y-%m-%d %H:%M:%S".into(),
            jpeg_quality: 85,
        }
    }
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            still: None,
            interval_ms: 1_000,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:4443".into(),
        }
    }
}

impl StreamConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }
}

impl SnapshotConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }
}

impl SimulatedConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_camera_module() {
        let config = Config::default();
        assert_eq!((config.capture.width, config.capture.height), (1296, 730));
        assert_eq!(config.capture.fps, 24);
        assert_eq!(config.stream.warmup(), Duration::from_secs(10));
        assert_eq!((config.snapshot.width, config.snapshot.height), (1024, 768));
        assert_eq!(config.annotate.label_prefix, "Live stream: ");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[capture]\nbackend = \"simulated\"\n\n[stream]\nwarmup_ms = 0\n"
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.capture.backend, CameraBackend::Simulated);
        assert_eq!(config.stream.warmup_ms, 0);
        assert_eq!(config.stream.frame_timeout_ms, 5_000);
        assert_eq!(config.capture.fps, 24);
    }
}
