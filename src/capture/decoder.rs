use std::io::Cursor;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};

use crate::Result;

pub fn decode_jpeg(data: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory_with_format(data, ImageFormat::Jpeg)?;
    Ok(image.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Bytes> {
    let mut out = Cursor::new(Vec::with_capacity(image.as_raw().len() / 8));
    JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100)).encode_image(image)?;
    Ok(Bytes::from(out.into_inner()))
}

/// Solid colour test card, used for generated simulator frames.
pub fn solid_jpeg(width: u32, height: u32, rgb: [u8; 3]) -> Result<Bytes> {
    let image = RgbImage::from_pixel(width, height, image::Rgb(rgb));
    encode_jpeg(&image, 80)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::frame::starts_with_soi;

    #[test]
    fn encoded_frames_carry_soi_marker() {
        let jpeg = solid_jpeg(32, 16, [200, 10, 10]).unwrap();
        assert!(starts_with_soi(&jpeg));

        let decoded = decode_jpeg(&jpeg).unwrap();
        assert_eq!(decoded.dimensions(), (32, 16));
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(decode_jpeg(b"not a jpeg").is_err());
    }
}
