//! multipart/x-mixed-replace framing for MJPEG over HTTP

use bytes::{BufMut, Bytes, BytesMut};

pub const BOUNDARY: &str = "frame";

/// Value for the response `Content-Type` header.
pub fn content_type() -> String {
    format!("multipart/x-mixed-replace; boundary={}", BOUNDARY)
}

/// Wrap one JPEG image as a multipart part.
pub fn encode_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        jpeg.len()
    );

    let mut part = BytesMut::with_capacity(header.len() + jpeg.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(jpeg);
    part.put_slice(b"\r\n");
    part.freeze()
}
