//! One-pass ticket analysis.
//!
//! Each field is read independently: the name line and the header are OCR'd
//! as narrow crops, the signature area is measured for ink. A failure in one
//! step leaves that field absent and never stops the others, so even a
//! corrupt image yields a best-effort [`TicketAnalysis`].

use std::sync::Arc;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::fields::{self, extract_date, extract_technician, extract_ticket_number};
use crate::names::NameNormalizer;
use crate::ocr::{OcrError, OcrMode, TextExtractor, encode_png};
use crate::region::{Region, RegionConfig};
use crate::signature::{SignatureDetector, SignatureThresholds, SignatureVerdict};
use crate::ticket::TicketAnalysis;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("OCR backend failed: {0}")]
    Backend(#[from] OcrError),
}

/// Deployment flavour of the analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Local OCR and pixel heuristics only. Every ticket is treated as
    /// requiring a signature.
    Offline,
    /// Cloud OCR: full-page text decides whether a signature is required,
    /// and dense signature crops get a handwriting check.
    ServiceAssisted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerConfig {
    pub mode: AnalysisMode,
    pub regions: RegionConfig,
    pub thresholds: SignatureThresholds,
}

impl AnalyzerConfig {
    pub fn offline() -> Self {
        Self {
            mode: AnalysisMode::Offline,
            regions: RegionConfig::default(),
            thresholds: SignatureThresholds::offline(),
        }
    }

    pub fn service_assisted() -> Self {
        Self {
            mode: AnalysisMode::ServiceAssisted,
            regions: RegionConfig::default(),
            thresholds: SignatureThresholds::service_assisted(),
        }
    }

    pub fn for_mode(mode: AnalysisMode) -> Self {
        match mode {
            AnalysisMode::Offline => Self::offline(),
            AnalysisMode::ServiceAssisted => Self::service_assisted(),
        }
    }

    pub fn with_regions(mut self, regions: RegionConfig) -> Self {
        self.regions = regions;
        self
    }

    pub fn with_thresholds(mut self, thresholds: SignatureThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}

/// Result of one pass plus the first OCR backend failure, if any.
struct Pass {
    analysis: TicketAnalysis,
    failure: Option<OcrError>,
}

/// Turns ticket image bytes into a [`TicketAnalysis`].
///
/// Holds no per-image state; share one instance across worker threads.
pub struct TicketAnalyzer {
    config: AnalyzerConfig,
    detector: SignatureDetector,
    normalizer: Arc<NameNormalizer>,
    ocr: Arc<dyn TextExtractor>,
}

impl TicketAnalyzer {
    pub fn new(
        config: AnalyzerConfig,
        normalizer: Arc<NameNormalizer>,
        ocr: Arc<dyn TextExtractor>,
    ) -> Self {
        let detector = SignatureDetector::new(config.thresholds);
        Self {
            config,
            detector,
            normalizer,
            ocr,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &NameNormalizer {
        &self.normalizer
    }

    /// Analyze one image. Never fails: unreadable parts come back absent.
    pub fn analyze(&self, image_bytes: &[u8]) -> TicketAnalysis {
        self.run(image_bytes).analysis
    }

    /// Analyze one image, failing if any OCR backend call failed.
    ///
    /// Batch callers use this to skip the image and retry it on a later run
    /// rather than persist a record degraded by a transport error.
    pub fn analyze_strict(&self, image_bytes: &[u8]) -> Result<TicketAnalysis, AnalyzeError> {
        let pass = self.run(image_bytes);
        match pass.failure {
            Some(e) => Err(AnalyzeError::Backend(e)),
            None => Ok(pass.analysis),
        }
    }

    fn run(&self, image_bytes: &[u8]) -> Pass {
        let mode = self.config.mode;
        let mut failure = None;

        let image = match image::load_from_memory(image_bytes) {
            Ok(image) => image,
            Err(e) => {
                warn!(error = %e, bytes = image_bytes.len(), "ticket image not decodable");
                return Pass {
                    analysis: TicketAnalysis::degraded(mode == AnalysisMode::Offline),
                    failure,
                };
            }
        };

        let page_text = match mode {
            AnalysisMode::ServiceAssisted => {
                self.ocr_image(&image, OcrMode::Document, &mut failure)
            }
            AnalysisMode::Offline => None,
        };

        // Crops first; full-page text only backs them up.
        let name_text = self.ocr_region(&image, &self.config.regions.name, &mut failure);
        let technician = name_text
            .as_deref()
            .and_then(extract_technician)
            .or_else(|| page_text.as_deref().and_then(extract_technician));
        let technician_name = self
            .normalizer
            .normalize(technician.as_ref().map(|t| t.name.as_str()));
        let technician_role = technician.and_then(|t| t.role);

        let header_text = self.ocr_region(&image, &self.config.regions.header, &mut failure);
        let ticket_number = header_text
            .as_deref()
            .and_then(extract_ticket_number)
            .or_else(|| page_text.as_deref().and_then(extract_ticket_number));
        let ticket_date = header_text
            .as_deref()
            .and_then(extract_date)
            .or_else(|| page_text.as_deref().and_then(extract_date));

        let signature = match self.detector.detect_image(
            &image,
            &self.config.regions.signature,
            Some(self.ocr.as_ref()),
        ) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(backend = self.ocr.name(), error = %e, "handwriting check failed");
                keep_first(&mut failure, e);
                SignatureVerdict::UNDETERMINED
            }
        };

        let has_legal_text = match mode {
            AnalysisMode::Offline => true,
            AnalysisMode::ServiceAssisted => page_text.as_deref().is_some_and(fields::has_legal_text),
        };

        debug!(
            technician = ?technician_name,
            ticket = ?ticket_number,
            has_signature = signature.has_signature,
            confidence = signature.confidence,
            "ticket analyzed"
        );

        Pass {
            analysis: TicketAnalysis {
                technician_name,
                technician_role,
                has_signature: signature.has_signature,
                signature_confidence: signature.confidence,
                ticket_number,
                ticket_date,
                has_legal_text,
            },
            failure,
        }
    }

    fn ocr_region(
        &self,
        image: &DynamicImage,
        region: &Region,
        failure: &mut Option<OcrError>,
    ) -> Option<String> {
        let Some(bx) = region.resolve(image.width(), image.height()) else {
            debug!(?region, "degenerate OCR region");
            return None;
        };
        let crop = image.crop_imm(bx.left, bx.top, bx.width(), bx.height());
        self.ocr_image(&crop, OcrMode::Text, failure)
    }

    fn ocr_image(
        &self,
        image: &DynamicImage,
        mode: OcrMode,
        failure: &mut Option<OcrError>,
    ) -> Option<String> {
        match encode_png(image).and_then(|png| self.ocr.run_ocr(&png, mode)) {
            Ok(output) => Some(output.full_text),
            Err(OcrError::Image(e)) => {
                debug!(error = %e, "crop could not be encoded");
                None
            }
            Err(e) => {
                warn!(backend = self.ocr.name(), ?mode, error = %e, "OCR failed");
                keep_first(failure, e);
                None
            }
        }
    }
}

fn keep_first(failure: &mut Option<OcrError>, e: OcrError) {
    if failure.is_none() {
        *failure = Some(e);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use image::{GrayImage, Luma};

    use super::*;
    use crate::names::TechnicianRegistry;
    use crate::ocr::{OcrBlock, OcrOutput};

    /// Replies by mode: `text` for crops, `document` for full pages.
    struct ScriptedOcr {
        text: String,
        document: OcrOutput,
        calls: AtomicUsize,
    }

    impl ScriptedOcr {
        fn new(text: &str, document: &str) -> Self {
            Self {
                text: text.to_string(),
                document: OcrOutput::text(document),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl TextExtractor for ScriptedOcr {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn run_ocr(&self, image_bytes: &[u8], mode: OcrMode) -> Result<OcrOutput, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(image::load_from_memory(image_bytes).is_ok());
            Ok(match mode {
                OcrMode::Text => OcrOutput::text(self.text.clone()),
                OcrMode::Document => self.document.clone(),
            })
        }
    }

    struct FailingOcr;

    impl TextExtractor for FailingOcr {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn run_ocr(&self, _: &[u8], _: OcrMode) -> Result<OcrOutput, OcrError> {
            Err(OcrError::Backend("connection reset".into()))
        }
    }

    fn px(left: i64, top: i64, width: i64, height: i64) -> Region {
        Region::Pixels {
            left,
            top,
            width,
            height,
        }
    }

    /// Name top-left, header top-right, signature the bottom half.
    fn test_regions() -> RegionConfig {
        RegionConfig {
            name: px(0, 0, 50, 10),
            header: px(50, 0, 50, 10),
            signature: px(0, 50, 100, 50),
        }
    }

    /// 100x100 white ticket with `ink` dark pixels at the top of the signature half.
    fn ticket_png(ink: u32) -> Vec<u8> {
        let img = GrayImage::from_fn(100, 100, |x, y| {
            let offset = y.checked_sub(50).map(|row| row * 100 + x);
            match offset {
                Some(i) if i < ink => Luma([10]),
                _ => Luma([250]),
            }
        });
        encode_png(&DynamicImage::ImageLuma8(img)).unwrap()
    }

    fn roster(names: &[&str]) -> Arc<NameNormalizer> {
        let mut registry = TechnicianRegistry::empty();
        for name in names {
            registry.register(name);
        }
        Arc::new(NameNormalizer::new(registry))
    }

    fn analyzer(config: AnalyzerConfig, ocr: Arc<dyn TextExtractor>) -> TicketAnalyzer {
        TicketAnalyzer::new(
            config.with_regions(test_regions()),
            roster(&["John D", "Koby H"]),
            ocr,
        )
    }

    #[test]
    fn offline_reads_every_field() {
        let ocr = Arc::new(ScriptedOcr::new("by John D Technician #123456 1/15/26", ""));
        let a = analyzer(AnalyzerConfig::offline(), ocr.clone()).analyze(&ticket_png(250));

        assert_eq!(a.technician_name.as_deref(), Some("John D"));
        assert_eq!(a.technician_role.as_deref(), Some("Technician"));
        assert_eq!(a.ticket_number.as_deref(), Some("123456"));
        assert_eq!(a.ticket_date.as_deref(), Some("1/15/26"));
        assert!(a.has_signature);
        assert_eq!(a.signature_confidence, 0.88);
        assert!(a.has_legal_text);
        // Name crop and header crop only.
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn offline_blank_signature() {
        let ocr = Arc::new(ScriptedOcr::new("by John D Technician", ""));
        let a = analyzer(AnalyzerConfig::offline(), ocr).analyze(&ticket_png(0));
        assert!(!a.has_signature);
        assert_eq!(a.signature_confidence, 0.92);
        assert!(a.missing_signature());
    }

    #[test]
    fn unknown_technician_keeps_role_only() {
        let ocr = Arc::new(ScriptedOcr::new("by Zzyzx Q Dispatcher", ""));
        let a = analyzer(AnalyzerConfig::offline(), ocr).analyze(&ticket_png(250));
        assert_eq!(a.technician_name, None);
        assert_eq!(a.technician_role.as_deref(), Some("Dispatcher"));
    }

    #[test]
    fn fuzzy_read_resolves_to_roster() {
        let ocr = Arc::new(ScriptedOcr::new("by Kobv H Technician", ""));
        let a = analyzer(AnalyzerConfig::offline(), ocr).analyze(&ticket_png(250));
        assert_eq!(a.technician_name.as_deref(), Some("Koby H"));
    }

    #[test]
    fn service_assisted_uses_page_text_for_legal_and_fallback() {
        let ocr = Arc::new(ScriptedOcr::new(
            "",
            "Ticket #654321 2/3/26\nby Koby H Technician\nI have reviewed this form",
        ));
        let a = analyzer(AnalyzerConfig::service_assisted(), ocr.clone()).analyze(&ticket_png(250));

        assert!(a.has_legal_text);
        assert_eq!(a.technician_name.as_deref(), Some("Koby H"));
        assert_eq!(a.ticket_number.as_deref(), Some("654321"));
        assert_eq!(a.ticket_date.as_deref(), Some("2/3/26"));
        assert!(a.has_signature);
        assert_eq!(a.signature_confidence, 0.90);
        // Full page, name crop, header crop.
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn service_assisted_without_legal_phrase() {
        let ocr = Arc::new(ScriptedOcr::new("by Koby H Technician", "Invoice only"));
        let a = analyzer(AnalyzerConfig::service_assisted(), ocr).analyze(&ticket_png(250));
        assert!(!a.has_legal_text);
        assert!(!a.missing_signature());
    }

    #[test]
    fn service_assisted_dense_signature_uses_block_confidence() {
        let ocr = Arc::new(ScriptedOcr {
            text: String::new(),
            document: OcrOutput {
                full_text: "I have reviewed this form".into(),
                blocks: vec![OcrBlock {
                    confidence: 0.4,
                    words: vec![],
                }],
            },
            calls: AtomicUsize::new(0),
        });
        let a = analyzer(AnalyzerConfig::service_assisted(), ocr).analyze(&ticket_png(2_500));
        assert!(a.has_signature);
        assert_eq!(a.signature_confidence, 0.75);
    }

    #[test]
    fn corrupt_image_yields_degraded_record() {
        for bytes in [&b""[..], &b"\x89PNG garbage"[..]] {
            let offline = analyzer(AnalyzerConfig::offline(), Arc::new(FailingOcr));
            let a = offline.analyze(bytes);
            assert_eq!(a, TicketAnalysis::degraded(true));
            assert!(offline.analyze_strict(bytes).is_ok());

            let service = analyzer(AnalyzerConfig::service_assisted(), Arc::new(FailingOcr));
            assert_eq!(service.analyze(bytes), TicketAnalysis::degraded(false));
        }
    }

    #[test]
    fn backend_failure_degrades_fields_but_not_signature() {
        let a = analyzer(AnalyzerConfig::offline(), Arc::new(FailingOcr));
        let result = a.analyze(&ticket_png(250));
        assert_eq!(result.technician_name, None);
        assert_eq!(result.ticket_number, None);
        assert!(result.has_signature);
        assert_eq!(result.signature_confidence, 0.88);
    }

    #[test]
    fn strict_analysis_surfaces_backend_failure() {
        let a = analyzer(AnalyzerConfig::offline(), Arc::new(FailingOcr));
        assert!(matches!(
            a.analyze_strict(&ticket_png(250)),
            Err(AnalyzeError::Backend(OcrError::Backend(_)))
        ));

        let ok = analyzer(
            AnalyzerConfig::offline(),
            Arc::new(ScriptedOcr::new("by John D Technician", "")),
        );
        assert!(ok.analyze_strict(&ticket_png(250)).is_ok());
    }

    #[test]
    fn degenerate_regions_never_panic() {
        let inverted = Region::Percentage {
            left: 0.5,
            top: 0.9,
            right: 0.4,
            bottom: 0.1,
        };
        let config = AnalyzerConfig::offline();
        let ocr = Arc::new(ScriptedOcr::new("by John D Technician #123456", ""));
        let a = TicketAnalyzer::new(
            config.with_regions(RegionConfig {
                name: inverted,
                header: inverted,
                signature: inverted,
            }),
            roster(&["John D"]),
            ocr.clone(),
        )
        .analyze(&ticket_png(250));

        assert_eq!(a.technician_name, None);
        assert_eq!(a.ticket_number, None);
        assert!(!a.has_signature);
        assert_eq!(a.signature_confidence, 0.5);
        assert_eq!(ocr.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn analyzer_is_shareable_across_threads() {
        let a = Arc::new(analyzer(
            AnalyzerConfig::offline(),
            Arc::new(ScriptedOcr::new("by John D Technician", "")),
        ));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let a = Arc::clone(&a);
                std::thread::spawn(move || a.analyze(&ticket_png(i * 100)))
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap().technician_name.as_deref(), Some("John D"));
        }
    }
}
