//! Single-slot frame monitor between a capture thread and any number of viewers

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use crossbeam::utils::CachePadded;
use tracing::trace;

use crate::capture::frame::{starts_with_soi, Frame};
use crate::{CameraError, Result};

/// Holds the most recent complete frame and wakes readers on every publish.
///
/// The producer appends raw chunks with [`FrameBuffer::write`]. A chunk that
/// begins with the JPEG SOI marker closes the frame accumulated so far, which
/// is then published atomically. Readers block in [`FrameBuffer::read_latest`]
/// until the next publish and receive a cheap copy of the current frame.
/// Nothing is queued: a slow reader silently skips frames.
pub struct FrameBuffer {
    /// One lock for both the producer's accumulation and the published slot
    slot: Mutex<Slot>,
    ready: Condvar,

    stats: CachePadded<Stats>,
}

struct Slot {
    /// Bytes of the frame currently being written
    pending: BytesMut,
    frame: Option<Frame>,
    /// Number of frames published so far
    published: u64,
    /// Reads served from the current frame
    reads: u64,
    /// Device run this buffer belongs to, bumped by `open`
    epoch: u64,
    closed: bool,
}

#[derive(Default)]
struct Stats {
    frames_published: AtomicU64,
    frames_read: AtomicU64,
    frames_skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameBufferStats {
    pub published: u64,
    pub read: u64,
    /// Frames overwritten before any reader copied them
    pub skipped: u64,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                pending: BytesMut::new(),
                frame: None,
                published: 0,
                reads: 0,
                epoch: 0,
                closed: false,
            }),
            ready: Condvar::new(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Append a chunk of the producer's byte stream.
    pub fn write(&self, chunk: &[u8]) {
        let mut slot = self.lock_slot();
        if starts_with_soi(chunk) && !slot.pending.is_empty() {
            let data = slot.pending.split().freeze();
            self.publish(&mut slot, data);
        }
        slot.pending.extend_from_slice(chunk);
    }

    fn publish(&self, slot: &mut Slot, data: Bytes) {
        if slot.closed {
            trace!("dropping frame written to a closed buffer");
            return;
        }

        if slot.frame.is_some() && slot.reads == 0 {
            self.stats.frames_skipped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("camwatch_frames_skipped_total").increment(1);
        }

        slot.published += 1;
        slot.reads = 0;
        slot.frame = Some(Frame::new(data, slot.published));
        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("camwatch_frames_published_total").increment(1);

        self.ready.notify_all();
    }

    /// Wait for the next publish and return the current frame.
    pub fn read_latest(&self, timeout: Duration) -> Result<Frame> {
        let epoch = self.epoch();
        self.read_latest_for(epoch, timeout)
    }

    /// Like [`FrameBuffer::read_latest`], but reports [`CameraError::StreamClosed`]
    /// once the run identified by `epoch` has ended.
    pub fn read_latest_for(&self, epoch: u64, timeout: Duration) -> Result<Frame> {
        let slot = self.lock_slot();
        if slot.closed || slot.epoch != epoch {
            return Err(CameraError::StreamClosed);
        }

        let seen = slot.published;
        let (mut slot, _) = self
            .ready
            .wait_timeout_while(slot, timeout, |s| {
                s.published == seen && !s.closed && s.epoch == epoch
            })
            .unwrap_or_else(PoisonError::into_inner);

        if slot.closed || slot.epoch != epoch {
            return Err(CameraError::StreamClosed);
        }
        if slot.published == seen {
            return Err(CameraError::FrameTimeout(timeout));
        }

        slot.reads += 1;
        self.stats.frames_read.fetch_add(1, Ordering::Relaxed);
        slot.frame.clone().ok_or(CameraError::FrameTimeout(timeout))
    }

    /// Start a new run: clear state and accept frames again.
    pub fn open(&self) -> u64 {
        let mut slot = self.lock_slot();
        slot.pending.clear();
        slot.epoch += 1;
        slot.closed = false;
        slot.frame = None;
        slot.reads = 0;
        slot.epoch
    }

    /// End the current run and wake every blocked reader.
    pub fn close(&self) {
        let mut slot = self.lock_slot();
        slot.closed = true;
        slot.frame = None;
        slot.pending.clear();
        self.ready.notify_all();
    }

    pub fn epoch(&self) -> u64 {
        self.lock_slot().epoch
    }

    pub fn is_closed(&self) -> bool {
        self.lock_slot().closed
    }

    /// Bytes accumulated for the frame currently being written
    pub fn pending_len(&self) -> usize {
        self.lock_slot().pending.len()
    }

    pub fn stats(&self) -> FrameBufferStats {
        FrameBufferStats {
            published: self.stats.frames_published.load(Ordering::Relaxed),
            read: self.stats.frames_read.load(Ordering::Relaxed),
            skipped: self.stats.frames_skipped.load(Ordering::Relaxed),
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
