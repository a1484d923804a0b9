//! OCR adapters implementing [`paperplease_core::TextExtractor`].

mod tesseract;
pub use tesseract::TesseractOcr;

#[cfg(feature = "vision")]
mod vision;
#[cfg(feature = "vision")]
pub use vision::VisionOcr;
