//! Signature presence detection from ink density.
//!
//! Handwritten ink covers a narrow, predictable fraction of the signature
//! area: blank paper sits below it, printed text and graphics above it.
//! The detector measures that fraction on a luminance crop and maps it to a
//! verdict with a confidence.
//!
//! Two presets are in use and are kept apart rather than reconciled:
//!
//! | preset             | ink below | blank  | present band | sweet spot   | dense                |
//! |--------------------|-----------|--------|--------------|--------------|----------------------|
//! | `offline`          | 170       | < 0.02 | 0.02 - 0.10  | 0.025 - 0.07 | present, 0.55        |
//! | `service_assisted` | 180       | < 0.01 | 0.01 - 0.20  | 0.03 - 0.10  | OCR handwriting check |

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ocr::{OcrError, OcrMode, TextExtractor, encode_png};
use crate::region::Region;

/// Handwriting block-confidence cutoff for the service-assisted preset.
pub const DEFAULT_HANDWRITING_CUTOFF: f32 = 0.8;

/// What to conclude when ink density is above the present band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum DenseInkPolicy {
    /// Call it a signature at a fixed, low confidence.
    Accept { confidence: f32 },
    /// OCR the crop: any block scored below `cutoff` is taken as handwriting.
    HandwritingCheck {
        cutoff: f32,
        present_confidence: f32,
        absent_confidence: f32,
    },
}

/// Density bands and confidences for one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignatureThresholds {
    /// Luminance strictly below this counts as ink.
    pub dark_threshold: u8,
    /// Density below this is blank.
    pub blank_below: f64,
    /// Density up to and including this is a signature.
    pub present_max: f64,
    /// Inclusive density range that earns `sweet_confidence`.
    pub sweet_spot: (f64, f64),
    pub blank_confidence: f32,
    pub sweet_confidence: f32,
    pub band_confidence: f32,
    pub dense: DenseInkPolicy,
}

impl SignatureThresholds {
    /// Pure pixel heuristic, no OCR involvement.
    pub fn offline() -> Self {
        Self {
            dark_threshold: 170,
            blank_below: 0.02,
            present_max: 0.10,
            sweet_spot: (0.025, 0.07),
            blank_confidence: 0.92,
            sweet_confidence: 0.88,
            band_confidence: 0.72,
            dense: DenseInkPolicy::Accept { confidence: 0.55 },
        }
    }

    /// Wider band, with an OCR confidence check to settle dense crops.
    pub fn service_assisted() -> Self {
        Self {
            dark_threshold: 180,
            blank_below: 0.01,
            present_max: 0.20,
            sweet_spot: (0.03, 0.10),
            blank_confidence: 0.90,
            sweet_confidence: 0.90,
            band_confidence: 0.70,
            dense: DenseInkPolicy::HandwritingCheck {
                cutoff: DEFAULT_HANDWRITING_CUTOFF,
                present_confidence: 0.75,
                absent_confidence: 0.50,
            },
        }
    }

    /// Override the handwriting cutoff. No effect on presets that accept dense ink.
    pub fn with_handwriting_cutoff(mut self, new_cutoff: f32) -> Self {
        if let DenseInkPolicy::HandwritingCheck { cutoff, .. } = &mut self.dense {
            *cutoff = new_cutoff;
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignatureVerdict {
    pub has_signature: bool,
    /// Confidence in `has_signature`, set for absence as well as presence.
    pub confidence: f32,
    /// Measured density, absent when the region could not be measured.
    pub ink_density: Option<f64>,
}

impl SignatureVerdict {
    /// "Can't tell": degenerate region or unreadable image.
    pub const UNDETERMINED: Self = Self {
        has_signature: false,
        confidence: 0.5,
        ink_density: None,
    };
}

/// Outcome of the density policy alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DensityCall {
    Decided(SignatureVerdict),
    /// Above the present band and the preset wants a second opinion.
    Ambiguous,
}

#[derive(Debug, Clone)]
pub struct SignatureDetector {
    thresholds: SignatureThresholds,
}

impl SignatureDetector {
    pub fn new(thresholds: SignatureThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &SignatureThresholds {
        &self.thresholds
    }

    /// Detect a signature in `region` of encoded image bytes.
    ///
    /// Undecodable bytes and degenerate regions give
    /// [`SignatureVerdict::UNDETERMINED`]. Only the handwriting check's OCR
    /// call can fail.
    pub fn detect(
        &self,
        image_bytes: &[u8],
        region: &Region,
        ocr: Option<&dyn TextExtractor>,
    ) -> Result<SignatureVerdict, OcrError> {
        match image::load_from_memory(image_bytes) {
            Ok(image) => self.detect_image(&image, region, ocr),
            Err(e) => {
                debug!(error = %e, "signature image not decodable");
                Ok(SignatureVerdict::UNDETERMINED)
            }
        }
    }

    /// Detect a signature in `region` of an already decoded image.
    pub fn detect_image(
        &self,
        image: &DynamicImage,
        region: &Region,
        ocr: Option<&dyn TextExtractor>,
    ) -> Result<SignatureVerdict, OcrError> {
        let Some(bx) = region.resolve(image.width(), image.height()) else {
            debug!(?region, "degenerate signature region");
            return Ok(SignatureVerdict::UNDETERMINED);
        };

        let crop = image.crop_imm(bx.left, bx.top, bx.width(), bx.height());
        let Some(density) = ink_density(&crop.to_luma8(), self.thresholds.dark_threshold) else {
            return Ok(SignatureVerdict::UNDETERMINED);
        };

        match self.classify(density) {
            DensityCall::Decided(verdict) => {
                debug!(density, has_signature = verdict.has_signature, "signature density");
                Ok(verdict)
            }
            DensityCall::Ambiguous => self.handwriting_check(&crop, density, ocr),
        }
    }

    /// Apply the density bands.
    pub fn classify(&self, density: f64) -> DensityCall {
        let t = &self.thresholds;
        let decided = |has_signature, confidence| {
            DensityCall::Decided(SignatureVerdict {
                has_signature,
                confidence,
                ink_density: Some(density),
            })
        };

        if density < t.blank_below {
            decided(false, t.blank_confidence)
        } else if density <= t.present_max {
            let (lo, hi) = t.sweet_spot;
            let confidence = if (lo..=hi).contains(&density) {
                t.sweet_confidence
            } else {
                t.band_confidence
            };
            decided(true, confidence)
        } else {
            match t.dense {
                DenseInkPolicy::Accept { confidence } => decided(true, confidence),
                DenseInkPolicy::HandwritingCheck { .. } => DensityCall::Ambiguous,
            }
        }
    }

    fn handwriting_check(
        &self,
        crop: &DynamicImage,
        density: f64,
        ocr: Option<&dyn TextExtractor>,
    ) -> Result<SignatureVerdict, OcrError> {
        let DenseInkPolicy::HandwritingCheck {
            cutoff,
            present_confidence,
            absent_confidence,
        } = self.thresholds.dense
        else {
            return Ok(SignatureVerdict::UNDETERMINED);
        };

        let min_confidence = match ocr {
            Some(engine) => engine
                .run_ocr(&encode_png(crop)?, OcrMode::Document)?
                .min_block_confidence(),
            None => None,
        };
        let handwritten = min_confidence.is_some_and(|c| c < cutoff);
        debug!(
            density,
            ?min_confidence,
            handwritten,
            "dense signature region, handwriting check"
        );

        Ok(SignatureVerdict {
            has_signature: handwritten,
            confidence: if handwritten {
                present_confidence
            } else {
                absent_confidence
            },
            ink_density: Some(density),
        })
    }
}

/// Fraction of pixels with luminance below `dark_threshold`; `None` for an empty image.
pub fn ink_density(gray: &GrayImage, dark_threshold: u8) -> Option<f64> {
    let total = gray.width() as u64 * gray.height() as u64;
    if total == 0 {
        return None;
    }
    let ink = gray.pixels().filter(|p| p.0[0] < dark_threshold).count() as u64;
    Some(ink as f64 / total as f64)
}
