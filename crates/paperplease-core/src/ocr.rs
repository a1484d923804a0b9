//! Text-extraction contract between the analyzer and an OCR engine.
//!
//! The analyzer only depends on the shape of [`OcrOutput`]; transport and
//! engine details live in the adapter crates.

use std::io::Cursor;

use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR engine unavailable: {0}")]
    Unavailable(String),
    #[error("OCR backend error: {0}")]
    Backend(String),
    #[error("unexpected OCR response: {0}")]
    InvalidResponse(String),
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

/// How the engine should treat the submitted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrMode {
    /// A short crop, typically one line of text.
    Text,
    /// A full page with layout.
    Document,
}

/// Axis-aligned word box in pixels of the submitted image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrWord {
    pub text: String,
    pub bounding_box: BoundingBox,
}

/// A block of text with the engine's recognition confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrBlock {
    pub confidence: f32,
    #[serde(default)]
    pub words: Vec<OcrWord>,
}

/// Engine output. Engines without layout analysis return no blocks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrOutput {
    pub full_text: String,
    #[serde(default)]
    pub blocks: Vec<OcrBlock>,
}

impl OcrOutput {
    pub fn text(full_text: impl Into<String>) -> Self {
        Self {
            full_text: full_text.into(),
            blocks: Vec::new(),
        }
    }

    /// Lowest block confidence, if the engine reported any blocks.
    pub fn min_block_confidence(&self) -> Option<f32> {
        self.blocks
            .iter()
            .map(|b| b.confidence)
            .min_by(|a, b| a.total_cmp(b))
    }
}

/// An OCR engine the analyzer can call on encoded image bytes.
///
/// Implementations must be shareable across worker threads.
pub trait TextExtractor: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    fn run_ocr(&self, image_bytes: &[u8], mode: OcrMode) -> Result<OcrOutput, OcrError>;
}

/// Encode an image (usually a crop) as PNG for submission to an engine.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, OcrError> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}
