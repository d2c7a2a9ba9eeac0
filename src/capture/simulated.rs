//! Camera stand-in for machines without capture hardware

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use flume::{RecvTimeoutError, Sender};
use tracing::{debug, info, trace};

use super::decoder::solid_jpeg;
use super::CameraDevice;
use crate::pipeline::FrameBuffer;
use crate::{CameraError, Result, SimulatedConfig};

/// Where canned frames come from
#[derive(Debug, Clone)]
enum Source {
    Files(Vec<PathBuf>),
    Memory(Vec<Bytes>),
    /// Two generated test cards
    Generated,
}

/// Cycles through a fixed set of canned JPEG frames on a fixed interval.
pub struct SimulatedCamera {
    source: Source,
    still: Option<PathBuf>,
    interval: Duration,
    worker: Option<Worker>,
}

struct Worker {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl SimulatedCamera {
    pub fn from_config(config: &SimulatedConfig) -> Self {
        let source = if config.frames.is_empty() {
            Source::Generated
        } else {
            Source::Files(config.frames.clone())
        };
        Self {
            source,
            still: config.still.clone(),
            interval: config.interval(),
            worker: None,
        }
    }

    /// Simulator over in-memory frames, mostly for tests.
    pub fn with_frames(frames: Vec<Bytes>, interval: Duration) -> Self {
        Self {
            source: Source::Memory(frames),
            still: None,
            interval,
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    fn load_frames(&self) -> Result<Vec<Bytes>> {
        let frames = match &self.source {
            Source::Files(paths) => paths
                .iter()
                .map(|path| {
                    fs::read(path).map(Bytes::from).map_err(|e| {
                        CameraError::DeviceUnavailable(format!(
                            "canned frame {}: {}",
                            path.display(),
                            e
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            Source::Memory(frames) => frames.clone(),
            Source::Generated => [[40, 40, 40], [80, 80, 80]]
                .into_iter()
                .map(|rgb| solid_jpeg(320, 240, rgb).map_err(CameraError::device))
                .collect::<Result<Vec<_>>>()?,
        };

        if frames.is_empty() {
            return Err(CameraError::DeviceUnavailable("no canned frames".into()));
        }
        Ok(frames)
    }
}

impl CameraDevice for SimulatedCamera {
    fn name(&self) -> &str {
        "simulated"
    }

    fn begin(&mut self, sink: Arc<FrameBuffer>) -> Result<()> {
        if self.worker.is_some() {
            return Err(CameraError::DeviceUnavailable(
                "simulated camera already recording".into(),
            ));
        }

        let frames = self.load_frames()?;
        let interval = self.interval;
        let (stop, stop_rx) = flume::bounded::<()>(1);

        debug!("Simulated camera starting with {} frames", frames.len());
        let handle = thread::Builder::new()
            .name("simulated-capture".into())
            .spawn(move || {
                let mut next = 0;
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            trace!("simulated camera sending frame {}", next);
                            sink.write(&frames[next]);
                            next = (next + 1) % frames.len();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!("Simulated record loop ended");
            })
            .map_err(CameraError::device)?;

        self.worker = Some(Worker { stop, handle });
        Ok(())
    }

    fn end(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        let _ = worker.stop.send(());
        debug!("Waiting for simulated camera to shut down...");
        if worker.handle.join().is_err() {
            tracing::error!("Simulated capture thread panicked");
        }
        debug!("Simulated camera shut down");
    }

    fn capture_still(&mut self, dest: &Path) -> Result<()> {
        match &self.still {
            Some(still) => {
                fs::copy(still, dest).map_err(|e| {
                    CameraError::DeviceUnavailable(format!("canned still {}: {}", still.display(), e))
                })?;
            }
            None => {
                let frames = self.load_frames()?;
                fs::write(dest, &frames[0])?;
            }
        }
        info!("Simulated still written to {}", dest.display());
        Ok(())
    }
}

impl Drop for SimulatedCamera {
    fn drop(&mut self) {
        self.end();
    }
}
