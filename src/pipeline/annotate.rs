//! Timestamp overlay burned into every streamed frame

use std::fs;
use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use chrono::{DateTime, Local};
use image::Rgb;
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use once_cell::sync::OnceCell;
use tracing::{debug, error};

use crate::capture::decoder::{decode_jpeg, encode_jpeg};
use crate::capture::Frame;
use crate::{AnnotateConfig, CameraError, Result};

/// Horizontal and vertical padding around the label text
const MARGIN_X: u32 = 10;
const MARGIN_Y: u32 = 5;

const LABEL_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const LABEL_FOREGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Draws a "Live stream: <time>" label into the top-left corner of a frame.
///
/// Annotation never fails the stream: when the font cannot be loaded, or the
/// frame does not round-trip through the JPEG codec, the input frame is
/// returned untouched.
pub struct FrameAnnotator {
    config: AnnotateConfig,
    /// Loaded on first use; `None` records that the font is missing
    font: OnceCell<Option<FontArc>>,
}

impl FrameAnnotator {
    pub fn new(config: AnnotateConfig) -> Self {
        Self {
            config,
            font: OnceCell::new(),
        }
    }

    /// Annotator that draws with an already loaded font.
    pub fn with_font(config: AnnotateConfig, font: FontArc) -> Self {
        Self {
            config,
            font: OnceCell::with_value(Some(font)),
        }
    }

    pub fn label_text(&self, now: &DateTime<Local>) -> String {
        format!(
            "{}{}",
            self.config.label_prefix,
            now.format(&self.config.timestamp_format)
        )
    }

    /// Return a copy of `frame` with the timestamp label drawn in.
    pub fn annotate(&self, frame: &Frame, now: DateTime<Local>) -> Frame {
        let Some(font) = self.font() else {
            metrics::counter!("camwatch_annotation_fallback_total").increment(1);
            return frame.clone();
        };

        match self.draw_label(frame, font, &now) {
            Ok(annotated) => annotated,
            Err(e) => {
                debug!("Leaving frame {} unannotated: {}", frame.sequence, e);
                metrics::counter!("camwatch_annotation_fallback_total").increment(1);
                frame.clone()
            }
        }
    }

    fn draw_label(&self, frame: &Frame, font: &FontArc, now: &DateTime<Local>) -> Result<Frame> {
        let mut image = decode_jpeg(&frame.data)?;

        let text = self.label_text(now);
        let scale = PxScale::from(self.config.font_size);
        let (text_w, text_h) = text_size(scale, font, &text);

        let box_w = (text_w + 2 * MARGIN_X).min(image.width());
        let box_h = (text_h + 2 * MARGIN_Y).min(image.height());
        if box_w > 0 && box_h > 0 {
            draw_filled_rect_mut(&mut image, Rect::at(0, 0).of_size(box_w, box_h), LABEL_BACKGROUND);
        }
        draw_text_mut(
            &mut image,
            LABEL_FOREGROUND,
            MARGIN_X as i32,
            MARGIN_Y as i32,
            scale,
            font,
            &text,
        );

        let data = encode_jpeg(&image, self.config.jpeg_quality)?;
        Ok(frame.with_data(data))
    }

    fn font(&self) -> Option<&FontArc> {
        self.font
            .get_or_init(|| match load_font(&self.config.font_path) {
                Ok(font) => Some(font),
                Err(e) => {
                    // Logged once, the result is cached for the annotator's lifetime.
                    error!("Timestamp overlay disabled: {}", e);
                    None
                }
            })
            .as_ref()
    }
}

fn load_font(path: &Path) -> Result<FontArc> {
    let missing = |reason: String| {
        CameraError::AnnotationResourceMissing(format!("{}: {}", path.display(), reason))
    };
    let bytes = fs::read(path).map_err(|e| missing(e.to_string()))?;
    FontArc::try_from_vec(bytes).map_err(|e| missing(e.to_string()))
}
