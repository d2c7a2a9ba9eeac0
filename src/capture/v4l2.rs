//! V4L2 MJPEG capture for the physical camera

use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, instrument, warn};
use v4l::buffer::Type;
use v4l::capability::Flags as CapFlags;
use v4l::io::traits::CaptureStream;
use v4l::prelude::MmapStream;
use v4l::video::capture::Parameters;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use super::CameraDevice;
use crate::pipeline::FrameBuffer;
use crate::utils::FoundDevice;
use crate::{CameraError, CaptureConfig, Result, SnapshotConfig};

/// How long a dequeue may block before the loop re-checks its stop flag
const DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Hardware camera driven through V4L2 memory-mapped streaming
pub struct V4l2Camera {
    device: FoundDevice,
    config: CaptureConfig,
    still: SnapshotConfig,
    worker: Option<CaptureWorker>,
}

struct CaptureWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct Mode {
    width: u32,
    height: u32,
    fps: u32,
    buffers: u32,
}

impl V4l2Camera {
    pub fn new(device: FoundDevice, config: CaptureConfig, still: SnapshotConfig) -> Self {
        info!("Using capture device: {:?}", device);
        Self {
            device,
            config,
            still,
            worker: None,
        }
    }

    fn video_mode(&self) -> Mode {
        Mode {
            width: self.config.width,
            height: self.config.height,
            fps: self.config.fps,
            buffers: self.config.buffer_count,
        }
    }

    fn still_mode(&self) -> Mode {
        Mode {
            width: self.still.width,
            height: self.still.height,
            fps: self.config.fps,
            buffers: 2,
        }
    }
}

/// Open `path` in MJPEG mode and start memory-mapped streaming.
fn open_stream(path: &str, mode: &Mode) -> io::Result<(Device, MmapStream<'static>)> {
    let device = Device::with_path(path)?;

    let caps = device.query_caps()?;
    debug!("Device: {} ({})", caps.card, caps.driver);
    if !caps.capabilities.contains(CapFlags::VIDEO_CAPTURE) {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "device doesn't support video capture",
        ));
    }

    let mut fmt = device.format()?;
    fmt.width = mode.width;
    fmt.height = mode.height;
    fmt.fourcc = FourCC::new(b"MJPG");
    let fmt = device.set_format(&fmt)?;
    if fmt.fourcc != FourCC::new(b"MJPG") {
        return Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("device negotiated {} instead of MJPG", fmt.fourcc),
        ));
    }
    if (fmt.width, fmt.height) != (mode.width, mode.height) {
        warn!(
            "Requested {}x{}, device negotiated {}x{}",
            mode.width, mode.height, fmt.width, fmt.height
        );
    }

    if let Err(e) = device.set_params(&Parameters::with_fps(mode.fps)) {
        warn!("Could not set frame rate to {}: {}", mode.fps, e);
    }

    let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, mode.buffers)?;
    stream.set_timeout(DEQUEUE_TIMEOUT);
    Ok((device, stream))
}

impl CameraDevice for V4l2Camera {
    fn name(&self) -> &str {
        &self.device.path
    }

    #[instrument(skip(self, sink), fields(device = %self.device.path))]
    fn begin(&mut self, sink: Arc<FrameBuffer>) -> Result<()> {
        if self.worker.is_some() {
            return Err(CameraError::DeviceUnavailable(format!(
                "{} is already recording",
                self.device.path
            )));
        }

        let path = self.device.path.clone();
        let mode = self.video_mode();
        let stop = Arc::new(AtomicBool::new(false));
        let (started_tx, started_rx) = flume::bounded::<io::Result<()>>(1);

        let thread_stop = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || {
                // The stream must outlive every dequeued buffer, so the device
                // is opened on the capture thread itself.
                let (_device, mut stream) = match open_stream(&path, &mode) {
                    Ok(opened) => {
                        let _ = started_tx.send(Ok(()));
                        opened
                    }
                    Err(e) => {
                        let _ = started_tx.send(Err(e));
                        return;
                    }
                };
                info!(
                    "Recording {}x{} @ {}fps from {}",
                    mode.width, mode.height, mode.fps, path
                );

                while !thread_stop.load(Ordering::Acquire) {
                    match stream.next() {
                        Ok((buf, meta)) => {
                            let used = (meta.bytesused as usize).min(buf.len());
                            sink.write(&buf[..used]);
                        }
                        Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                        Err(e) => {
                            error!("Capture error on {}: {}", path, e);
                            break;
                        }
                    }
                }
                debug!("Recording thread exiting");
            })
            .map_err(CameraError::device)?;

        let started = started_rx
            .recv()
            .unwrap_or_else(|_| Err(io::Error::other("capture thread exited during startup")));

        match started {
            Ok(()) => {
                self.worker = Some(CaptureWorker { stop, handle });
                Ok(())
            }
            Err(e) => {
                let _ = handle.join();
                Err(CameraError::DeviceUnavailable(format!(
                    "{}: {}",
                    self.device.path, e
                )))
            }
        }
    }

    fn end(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        debug!("Signalling recording thread...");
        worker.stop.store(true, Ordering::Release);
        if worker.handle.join().is_err() {
            error!("Recording thread panicked");
        }
        debug!("Recording thread joined");
    }

    #[instrument(skip(self), fields(device = %self.device.path))]
    fn capture_still(&mut self, dest: &Path) -> Result<()> {
        let mode = self.still_mode();
        let (_device, mut stream) =
            open_stream(&self.device.path, &mode).map_err(CameraError::device)?;

        info!("Capturing still image...");

        // Sensor warm-up: let exposure settle before keeping a frame.
        let warmup_until = Instant::now() + self.still.warmup();
        let image = loop {
            let (buf, meta) = stream.next().map_err(CameraError::device)?;
            if Instant::now() >= warmup_until {
                let used = (meta.bytesused as usize).min(buf.len());
                break buf[..used].to_vec();
            }
        };

        if let Err(e) = fs::write(dest, &image) {
            let _ = fs::remove_file(dest);
            return Err(e.into());
        }
        info!("Captured image, saved to {}", dest.display());
        Ok(())
    }
}

impl Drop for V4l2Camera {
    fn drop(&mut self) {
        self.end();
    }
}
