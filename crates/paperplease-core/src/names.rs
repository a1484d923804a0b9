//! Technician name normalisation against a closed roster.
//!
//! OCR reads of the "by <Name>" line are noisy: last initials get swapped for
//! lookalike capitals and first names pick up stray letters. A raw read is
//! mapped onto the roster in three steps:
//!
//! 1. Manual corrections: exact match on a known recurring misread
//! 2. Exact match on a canonical name
//! 3. Best case-insensitive similarity ratio, accepted at or above the threshold
//!
//! Anything else resolves to `None`. A raw OCR string is never returned.

use std::collections::HashMap;

use tracing::debug;

/// Minimum similarity ratio for a fuzzy match to be accepted.
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.65;

/// Recurring OCR misreads and the canonical name they stand for.
const DEFAULT_CORRECTIONS: &[(&str, &str)] = &[
    ("Dgrtey B", "Darren B"),
    ("Nigh F", "Nick F"),
    ("Aap B", "Anthony B"),
    ("Chugk B", "Chuck D"),
    ("Chugk D", "Chuck D"),
    // H is read as A, I or D.
    ("Koby A", "Koby H"),
    ("Koby I", "Koby H"),
    ("Koby D", "Koby H"),
    // B is read as P or D.
    ("Darren P", "Darren B"),
    ("Darren D", "Darren B"),
    ("Chuck B", "Chuck D"),
    ("Chance A", "Chance H"),
    ("Chance I", "Chance H"),
];

/// Canonical "FirstName LastInitial" roster shipped with the binary.
const DEFAULT_TECHNICIANS: &[&str] = &[
    "Ali Z",
    "Anthony A",
    "Anthony B",
    "Austin L",
    "Bryce K",
    "Chance H",
    "Chris S",
    "Chuck D",
    "Darren B",
    "Darrin S",
    "Derek F",
    "Jimmy Y",
    "Kelvin B",
    "Koby H",
    "Ky S",
    "Lucas H",
    "Mark F",
    "Michael M",
    "Mike F",
    "Nick F",
    "Rory T",
    "Shannon G",
    "Travis M",
];

/// The closed set of known technicians plus exact-match OCR corrections.
///
/// Canonical names are kept sorted and deduplicated. Every correction maps to
/// a canonical name, so lookups can only ever produce roster members.
#[derive(Debug, Clone)]
pub struct TechnicianRegistry {
    canonical: Vec<String>,
    corrections: HashMap<String, String>,
}

impl Default for TechnicianRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl TechnicianRegistry {
    /// A registry with no technicians and no corrections.
    pub fn empty() -> Self {
        Self {
            canonical: Vec::new(),
            corrections: HashMap::new(),
        }
    }

    /// The built-in roster and correction table.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for name in DEFAULT_TECHNICIANS {
            registry.register(name);
        }
        for (raw, canonical) in DEFAULT_CORRECTIONS {
            registry.add_correction(raw, canonical);
        }
        registry
    }

    /// Canonical names in sorted order.
    pub fn names(&self) -> &[String] {
        &self.canonical
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.canonical.binary_search_by(|n| n.as_str().cmp(name)).is_ok()
    }

    /// Canonical target of a known misread, if `raw` is one.
    pub fn correction(&self, raw: &str) -> Option<&str> {
        self.corrections.get(raw).map(String::as_str)
    }

    /// All `(misread, canonical)` pairs, in no particular order.
    pub fn corrections(&self) -> impl Iterator<Item = (&str, &str)> {
        self.corrections
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Add a canonical name. Returns `false` if it was empty or already known.
    pub fn register(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        match self.canonical.binary_search_by(|n| n.as_str().cmp(name)) {
            Ok(_) => false,
            Err(pos) => {
                self.canonical.insert(pos, name.to_string());
                true
            }
        }
    }

    /// Add an exact-match correction. The target must already be registered.
    pub fn add_correction(&mut self, raw: &str, canonical: &str) -> bool {
        if !self.contains(canonical) {
            return false;
        }
        self.corrections
            .insert(raw.trim().to_string(), canonical.to_string());
        true
    }
}

/// Case-insensitive similarity ratio in `[0, 1]` (normalised Levenshtein).
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
}

/// Maps noisy OCR name reads onto a [`TechnicianRegistry`].
///
/// Lookups take `&self` and are safe to share across threads. Registration
/// takes `&mut self`, so adding a technician needs exclusive access: wrap in
/// an `Arc` for a batch run and register between batches.
#[derive(Debug, Clone)]
pub struct NameNormalizer {
    registry: TechnicianRegistry,
    min_similarity: f64,
}

impl Default for NameNormalizer {
    fn default() -> Self {
        Self::new(TechnicianRegistry::with_defaults())
    }
}

impl NameNormalizer {
    pub fn new(registry: TechnicianRegistry) -> Self {
        Self {
            registry,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        }
    }

    /// Override the fuzzy-match acceptance threshold.
    pub fn with_min_similarity(mut self, min_similarity: f64) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    pub fn min_similarity(&self) -> f64 {
        self.min_similarity
    }

    pub fn registry(&self) -> &TechnicianRegistry {
        &self.registry
    }

    /// Register a new canonical technician name.
    pub fn register(&mut self, name: &str) -> bool {
        self.registry.register(name)
    }

    /// Resolve a raw OCR name to a canonical technician, or `None`.
    pub fn normalize(&self, raw: Option<&str>) -> Option<String> {
        let name = raw?.trim();
        if name.is_empty() {
            return None;
        }

        if let Some(canonical) = self.registry.correction(name) {
            return Some(canonical.to_string());
        }

        if self.registry.contains(name) {
            return Some(name.to_string());
        }

        // Strictly greater keeps the first of equally scored names.
        let mut best: Option<(&str, f64)> = None;
        for known in self.registry.names() {
            let score = similarity(name, known);
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((known, score));
            }
        }

        match best {
            Some((known, score)) if score >= self.min_similarity => {
                debug!(raw = name, matched = known, score, "fuzzy technician match");
                Some(known.to_string())
            }
            _ => {
                debug!(raw = name, "no technician match");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> NameNormalizer {
        NameNormalizer::default()
    }

    #[test]
    fn empty_and_missing_input() {
        let n = normalizer();
        assert_eq!(n.normalize(None), None);
        assert_eq!(n.normalize(Some("")), None);
        assert_eq!(n.normalize(Some("   ")), None);
    }

    #[test]
    fn exact_canonical_after_trim() {
        let n = normalizer();
        assert_eq!(n.normalize(Some("  Koby H ")).as_deref(), Some("Koby H"));
    }

    #[test]
    fn every_correction_applies() {
        let n = normalizer();
        for (raw, canonical) in n.registry().corrections() {
            assert_eq!(n.normalize(Some(raw)).as_deref(), Some(canonical), "{raw}");
        }
    }

    #[test]
    fn correction_beats_better_fuzzy_candidate() {
        let mut registry = TechnicianRegistry::empty();
        registry.register("Kobe A");
        registry.register("Koby H");
        assert!(registry.add_correction("Koby A", "Koby H"));

        // Without the correction the tie would go to "Kobe A" (sorted first).
        let uncorrected = {
            let mut r = TechnicianRegistry::empty();
            r.register("Kobe A");
            r.register("Koby H");
            NameNormalizer::new(r)
        };
        assert_eq!(uncorrected.normalize(Some("Koby A")).as_deref(), Some("Kobe A"));

        let n = NameNormalizer::new(registry);
        assert_eq!(n.normalize(Some("Koby A")).as_deref(), Some("Koby H"));
    }

    #[test]
    fn idempotent_on_canonical_names() {
        let n = normalizer();
        for name in n.registry().names() {
            let once = n.normalize(Some(name));
            let twice = n.normalize(once.as_deref());
            assert_eq!(once, twice, "{name}");
            assert_eq!(once.as_deref(), Some(name.as_str()));
        }
    }

    #[test]
    fn fuzzy_match_close_reads() {
        let n = normalizer();
        assert_eq!(n.normalize(Some("Kelvn B")).as_deref(), Some("Kelvin B"));
        assert_eq!(n.normalize(Some("travis m")).as_deref(), Some("Travis M"));
        assert_eq!(n.normalize(Some("Shannon C")).as_deref(), Some("Shannon G"));
    }

    #[test]
    fn garbage_is_rejected() {
        let n = normalizer();
        assert_eq!(n.normalize(Some("completely unrelated garbage string")), None);
        assert_eq!(n.normalize(Some("Hmsfec I")), None);
        assert_eq!(n.normalize(Some("Anthgpybptec G")), None);
    }

    #[test]
    fn threshold_is_configurable() {
        let strict = normalizer().with_min_similarity(0.99);
        assert_eq!(strict.normalize(Some("Kelvn B")), None);
        assert_eq!(strict.normalize(Some("Kelvin B")).as_deref(), Some("Kelvin B"));
    }

    #[test]
    fn register_keeps_sorted_and_deduplicated() {
        let mut n = NameNormalizer::new(TechnicianRegistry::empty());
        assert!(n.register("Zed Q"));
        assert!(n.register("Abe C"));
        assert!(!n.register("Zed Q"));
        assert!(!n.register("  "));
        assert_eq!(n.registry().names(), &["Abe C".to_string(), "Zed Q".to_string()]);
        assert_eq!(n.normalize(Some("Zed Q")).as_deref(), Some("Zed Q"));
    }

    #[test]
    fn correction_requires_registered_target() {
        let mut registry = TechnicianRegistry::empty();
        assert!(!registry.add_correction("Jon D", "John D"));
        registry.register("John D");
        assert!(registry.add_correction("Jon D", "John D"));
        assert_eq!(registry.correction("Jon D"), Some("John D"));
    }

    #[test]
    fn similarity_is_case_insensitive() {
        assert_eq!(similarity("KOBY H", "koby h"), 1.0);
        assert!(similarity("abc", "xyz") < 0.1);
    }
}
