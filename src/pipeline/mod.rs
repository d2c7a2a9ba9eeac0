pub mod annotate;
pub mod frame_buffer;
pub mod session;

pub use annotate::FrameAnnotator;
pub use frame_buffer::{FrameBuffer, FrameBufferStats};
pub use session::{CameraSession, Lease, SessionState, SessionStatus};
