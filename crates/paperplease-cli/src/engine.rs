//! Analyzer construction from command-line settings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Args;
use paperplease_core::{
    AnalysisMode, AnalyzerConfig, NameNormalizer, RegionConfig, TechnicianRegistry,
    TextExtractor, TicketAnalyzer,
};
use paperplease_ocr::{TesseractOcr, VisionOcr};
use paperplease_store::AuditStore;
use tracing::info;

/// Settings shared by every command that analyzes images.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Use Cloud Vision OCR with the service-assisted thresholds
    #[arg(long)]
    pub service: bool,

    /// Cloud Vision API key (service-assisted mode)
    #[arg(long, env = "GOOGLE_VISION_API_KEY", hide_env_values = true)]
    pub vision_api_key: Option<String>,

    /// Tesseract executable (offline mode)
    #[arg(long, env = "PAPERPLEASE_TESSERACT", default_value = "tesseract")]
    pub tesseract: PathBuf,

    /// Tesseract language
    #[arg(long, env = "PAPERPLEASE_OCR_LANG", default_value = "eng")]
    pub ocr_lang: String,

    /// JSON file with name/header/signature regions
    #[arg(long, env = "PAPERPLEASE_REGIONS")]
    pub regions: Option<PathBuf>,

    /// Minimum similarity for fuzzy technician-name matches (0-1)
    #[arg(long, env = "PAPERPLEASE_MIN_SIMILARITY")]
    pub min_similarity: Option<f64>,

    /// Block confidence below which dense ink counts as handwriting (0-1)
    #[arg(long, env = "PAPERPLEASE_HANDWRITING_CUTOFF")]
    pub handwriting_cutoff: Option<f32>,
}

impl EngineArgs {
    pub fn mode(&self) -> AnalysisMode {
        if self.service {
            AnalysisMode::ServiceAssisted
        } else {
            AnalysisMode::Offline
        }
    }

    pub fn analyzer_config(&self) -> anyhow::Result<AnalyzerConfig> {
        let mut config = AnalyzerConfig::for_mode(self.mode());
        if let Some(path) = &self.regions {
            config = config.with_regions(load_regions(path)?);
        }
        if let Some(cutoff) = self.handwriting_cutoff {
            if !(0.0..=1.0).contains(&cutoff) {
                bail!("--handwriting-cutoff must be within 0..=1, got {cutoff}");
            }
            let thresholds = config.thresholds.with_handwriting_cutoff(cutoff);
            config = config.with_thresholds(thresholds);
        }
        Ok(config)
    }

    pub fn normalizer(&self, registry: TechnicianRegistry) -> anyhow::Result<NameNormalizer> {
        let normalizer = NameNormalizer::new(registry);
        match self.min_similarity {
            Some(s) if !(0.0..=1.0).contains(&s) => {
                bail!("--min-similarity must be within 0..=1, got {s}")
            }
            Some(s) => Ok(normalizer.with_min_similarity(s)),
            None => Ok(normalizer),
        }
    }

    pub fn text_extractor(&self) -> anyhow::Result<Arc<dyn TextExtractor>> {
        match self.mode() {
            AnalysisMode::Offline => Ok(Arc::new(
                TesseractOcr::new()
                    .with_executable(&self.tesseract)
                    .with_language(&self.ocr_lang),
            )),
            AnalysisMode::ServiceAssisted => {
                let Some(key) = &self.vision_api_key else {
                    bail!("service-assisted mode needs --vision-api-key or GOOGLE_VISION_API_KEY");
                };
                Ok(Arc::new(VisionOcr::new(key.clone())))
            }
        }
    }

    /// Build the analyzer. Must run outside the async runtime, since the
    /// Vision client is blocking.
    pub fn build(&self, registry: TechnicianRegistry) -> anyhow::Result<TicketAnalyzer> {
        let config = self.analyzer_config()?;
        let normalizer = self.normalizer(registry)?;
        let ocr = self.text_extractor()?;
        info!(
            mode = ?config.mode,
            ocr = ocr.name(),
            technicians = normalizer.registry().len(),
            min_similarity = normalizer.min_similarity(),
            "analyzer ready"
        );
        Ok(TicketAnalyzer::new(config, Arc::new(normalizer), ocr))
    }
}

/// Read and validate a region layout file.
pub fn load_regions(path: &Path) -> anyhow::Result<RegionConfig> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading regions file {}", path.display()))?;
    let regions = RegionConfig::from_json(&json)
        .with_context(|| format!("parsing regions file {}", path.display()))?;
    regions
        .validate()
        .with_context(|| format!("invalid regions in {}", path.display()))?;
    Ok(regions)
}

/// Built-in roster plus the technicians added through `techs add`.
pub fn load_registry(store: &AuditStore) -> anyhow::Result<TechnicianRegistry> {
    let mut registry = TechnicianRegistry::with_defaults();
    for name in store.technicians().context("loading technician roster")? {
        registry.register(&name);
    }
    Ok(registry)
}
