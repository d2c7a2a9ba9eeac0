pub mod mjpeg;

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Local;
use tracing::{debug, info, warn};

use crate::pipeline::{CameraSession, FrameAnnotator, Lease};
use crate::Result;

/// One viewer's pull-based MJPEG stream.
///
/// Opening attaches to the shared [`CameraSession`]; each call to
/// [`LiveStreamSession::next_chunk`] waits for the next frame, stamps it and
/// returns it as a multipart part. The stream ends on a frame timeout or when
/// the session is stopped underneath it, and it cannot be restarted. The
/// session lease is returned exactly once, at the latest when the stream is
/// dropped.
pub struct LiveStreamSession {
    session: Arc<CameraSession>,
    annotator: Arc<FrameAnnotator>,
    frame_timeout: Duration,
    lease: Option<Lease>,
    frames_sent: u64,
}

impl LiveStreamSession {
    pub fn open(
        session: Arc<CameraSession>,
        annotator: Arc<FrameAnnotator>,
        frame_timeout: Duration,
    ) -> Result<Self> {
        let lease = session.acquire()?;
        info!("Live stream opened (run {})", lease.epoch());
        Ok(Self {
            session,
            annotator,
            frame_timeout,
            lease: Some(lease),
            frames_sent: 0,
        })
    }

    pub fn is_live(&self) -> bool {
        self.lease.is_some()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Next wire chunk, or `None` once the stream has ended.
    pub fn next_chunk(&mut self) -> Option<Bytes> {
        let epoch = self.lease.as_ref()?.epoch();

        match self
            .session
            .buffer()
            .read_latest_for(epoch, self.frame_timeout)
        {
            Ok(frame) => {
                let frame = self.annotator.annotate(&frame, Local::now());
                self.frames_sent += 1;
                Some(mjpeg::encode_part(&frame.data))
            }
            Err(e) if e.is_not_ready() => {
                info!("Live stream ending: {}", e);
                self.close();
                None
            }
            Err(e) => {
                warn!("Live stream failed: {}", e);
                self.close();
                None
            }
        }
    }

    /// Write chunks to `out` until the stream ends or the consumer goes away.
    pub fn stream_to<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        while let Some(chunk) = self.next_chunk() {
            if let Err(e) = out.write_all(&chunk).and_then(|_| out.flush()) {
                debug!("Viewer disconnected after {} frames: {}", self.frames_sent, e);
                self.close();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Detach from the camera session. Safe to call more than once.
    pub fn close(&mut self) {
        if let Some(lease) = self.lease.take() {
            debug!("Releasing camera after {} frames", self.frames_sent);
            self.session.release(lease);
        }
    }
}

impl Iterator for LiveStreamSession {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        self.next_chunk()
    }
}

impl Drop for LiveStreamSession {
    fn drop(&mut self) {
        self.close();
    }
}
