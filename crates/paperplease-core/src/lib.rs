//! Signature and technician inference for scanned service tickets.
//!
//! Pure, synchronous core: image bytes in, [`TicketAnalysis`] out. OCR is
//! reached only through the [`TextExtractor`] contract.

pub mod analyzer;
pub mod fields;
pub mod names;
pub mod ocr;
pub mod region;
pub mod signature;
pub mod ticket;

pub use analyzer::{AnalysisMode, AnalyzeError, AnalyzerConfig, TicketAnalyzer};
pub use names::{NameNormalizer, TechnicianRegistry};
pub use ocr::{BoundingBox, OcrBlock, OcrError, OcrMode, OcrOutput, OcrWord, TextExtractor};
pub use region::{PixelBox, Region, RegionConfig, RegionError};
pub use signature::{SignatureDetector, SignatureThresholds, SignatureVerdict};
pub use ticket::{AuditRecord, TicketAnalysis, TicketSource, UNKNOWN_TECHNICIAN};
