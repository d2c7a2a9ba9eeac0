use std::time::Instant;

use bytes::Bytes;

/// JPEG start-of-image marker, the head of every complete frame
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Returns true when `chunk` opens a new JPEG image.
pub fn starts_with_soi(chunk: &[u8]) -> bool {
    chunk.starts_with(&JPEG_SOI)
}

/// One complete encoded JPEG image
#[derive(Debug, Clone)]
pub struct Frame {
    /// Immutable frame data - can be shared across readers without copying
    pub data: Bytes,

    /// Publish counter of the buffer that produced this frame
    pub sequence: u64,

    /// When the frame was published
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(data: Bytes, sequence: u64) -> Self {
        Self {
            data,
            sequence,
            timestamp: Instant::now(),
        }
    }

    /// Same frame metadata with different bytes.
    pub fn with_data(&self, data: Bytes) -> Self {
        Self {
            data,
            sequence: self.sequence,
            timestamp: self.timestamp,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_jpeg(&self) -> bool {
        starts_with_soi(&self.data)
    }
}
