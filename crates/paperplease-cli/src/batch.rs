//! Local batch audit: scan, analyze with bounded concurrency, persist.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use futures::StreamExt;
use paperplease_core::{AuditRecord, TicketAnalyzer};
use paperplease_store::AuditStore;
use tracing::{info, warn};

use crate::scan::{LocalScanner, ScanFilter, TicketImage};

/// What to audit in one run.
#[derive(Debug, Clone, Default)]
pub struct AuditPlan {
    /// Month folders. When empty, the latest one, or every month if a date
    /// window is set.
    pub months: Vec<String>,
    /// Only tickets modified on or after this local day.
    pub since: Option<NaiveDate>,
    /// Only tickets modified on or before this local day.
    pub until: Option<NaiveDate>,
    /// Analyze at most this many images, spread across the selection.
    pub sample: Option<usize>,
    /// Re-analyze images that already have a record.
    pub reprocess: bool,
    /// Concurrent analyses.
    pub jobs: usize,
}

pub struct BatchOutcome {
    pub records: Vec<AuditRecord>,
    pub skipped: usize,
    pub failed: usize,
    pub elapsed_secs: f64,
}

/// Run one local audit and store the results.
pub async fn run_local_audit(
    scanner: &LocalScanner,
    store: &mut AuditStore,
    analyzer: Arc<TicketAnalyzer>,
    plan: &AuditPlan,
) -> anyhow::Result<BatchOutcome> {
    let start = Instant::now();

    let windowed = plan.since.is_some() || plan.until.is_some();
    let months = if !plan.months.is_empty() {
        Some(plan.months.clone())
    } else if windowed {
        None
    } else {
        Some(scanner.latest_month()?.into_iter().collect())
    };
    info!(
        months = ?months,
        since = ?plan.since,
        until = ?plan.until,
        root = %scanner.root().display(),
        "scanning tickets"
    );

    let found = scanner.scan(&ScanFilter {
        months,
        since: plan.since,
        until: plan.until,
    })?;

    let processed = if plan.reprocess {
        HashSet::new()
    } else {
        store.processed_paths().context("reading processed paths")?
    };
    let (images, skipped) = select_new(found, &processed);
    let images = match plan.sample {
        Some(n) => sample_evenly(images, n),
        None => images,
    };
    info!(
        count = images.len(),
        skipped,
        jobs = plan.jobs,
        "analyzing tickets"
    );

    let (records, failed) = analyze_images(analyzer, images, plan.jobs).await;
    if !records.is_empty() {
        store
            .upsert_records(&records)
            .context("saving audit records")?;
    }

    Ok(BatchOutcome {
        records,
        skipped,
        failed,
        elapsed_secs: start.elapsed().as_secs_f64(),
    })
}

/// Analyze images on the blocking pool, at most `jobs` at a time.
///
/// Images whose file cannot be read or whose OCR backend failed are logged
/// and counted; they get no record so a later run retries them.
pub async fn analyze_images(
    analyzer: Arc<TicketAnalyzer>,
    images: Vec<TicketImage>,
    jobs: usize,
) -> (Vec<AuditRecord>, usize) {
    let total = images.len();
    let mut results = futures::stream::iter(images)
        .map(|image| {
            let analyzer = Arc::clone(&analyzer);
            tokio::task::spawn_blocking(move || {
                let result = std::fs::read(&image.path)
                    .map_err(anyhow::Error::from)
                    .and_then(|bytes| Ok(analyzer.analyze_strict(&bytes)?));
                (image, result)
            })
        })
        .buffer_unordered(jobs.max(1));

    let mut records = Vec::with_capacity(total);
    let mut failed = 0;
    while let Some(joined) = results.next().await {
        match joined {
            Ok((image, Ok(analysis))) => {
                let audit_date = Local::now().to_rfc3339();
                records.push(AuditRecord::new(image.source(), analysis, audit_date));
                eprint!("\r  Analyzed {}/{total}", records.len() + failed);
            }
            Ok((image, Err(e))) => {
                failed += 1;
                warn!(path = %image.path.display(), error = %e, "skipping ticket");
            }
            Err(e) => {
                failed += 1;
                warn!(error = %e, "analysis task panicked");
            }
        }
    }
    if total > 0 {
        eprintln!();
    }
    (records, failed)
}

fn select_new(images: Vec<TicketImage>, processed: &HashSet<String>) -> (Vec<TicketImage>, usize) {
    let before = images.len();
    let fresh: Vec<_> = images
        .into_iter()
        .filter(|img| !processed.contains(&img.path.display().to_string()))
        .collect();
    let skipped = before - fresh.len();
    (fresh, skipped)
}

/// Keep `n` items evenly spaced across the input, preserving order.
fn sample_evenly<T>(items: Vec<T>, n: usize) -> Vec<T> {
    let len = items.len();
    if n >= len {
        return items;
    }
    if n == 0 {
        return Vec::new();
    }
    let mut picks = (0..n).map(|i| i * len / n).peekable();
    items
        .into_iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            if picks.peek() == Some(&idx) {
                picks.next();
                Some(item)
            } else {
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;

    use image::{DynamicImage, GrayImage, ImageFormat, Luma};
    use paperplease_core::{
        AnalyzerConfig, NameNormalizer, OcrError, OcrMode, OcrOutput, TextExtractor,
    };
    use tempfile::TempDir;

    struct FixedOcr(&'static str);

    impl TextExtractor for FixedOcr {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn run_ocr(&self, _: &[u8], _: OcrMode) -> Result<OcrOutput, OcrError> {
            Ok(OcrOutput::text(self.0))
        }
    }

    struct DownOcr;

    impl TextExtractor for DownOcr {
        fn name(&self) -> &'static str {
            "down"
        }

        fn run_ocr(&self, _: &[u8], _: OcrMode) -> Result<OcrOutput, OcrError> {
            Err(OcrError::Unavailable("no engine".into()))
        }
    }

    fn analyzer(ocr: Arc<dyn TextExtractor>) -> Arc<TicketAnalyzer> {
        Arc::new(TicketAnalyzer::new(
            AnalyzerConfig::offline(),
            Arc::new(NameNormalizer::default()),
            ocr,
        ))
    }

    fn png() -> Vec<u8> {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(200, 200, Luma([255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn tickets(months: &[(&str, &[&str])]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        let bytes = png();
        for (month, files) in months {
            fs::create_dir(tmp.path().join(month)).unwrap();
            for f in *files {
                fs::write(tmp.path().join(month).join(f), &bytes).unwrap();
            }
        }
        tmp
    }

    #[test]
    fn sample_is_even_and_ordered() {
        assert_eq!(sample_evenly((0..10).collect(), 3), [0, 3, 6]);
        assert_eq!(sample_evenly((0..4).collect(), 10), [0, 1, 2, 3]);
        assert!(sample_evenly((0..4).collect::<Vec<_>>(), 0).is_empty());
    }

    #[tokio::test]
    async fn audits_latest_month_and_skips_processed() {
        let tmp = tickets(&[
            ("2025-12", &["100001a.png"]),
            ("2026-01", &["100002a.png", "100003a.png"]),
        ]);
        let scanner = LocalScanner::new(tmp.path()).unwrap();
        let mut store = AuditStore::open().unwrap();
        let analyzer = analyzer(Arc::new(FixedOcr("by Koby H Technician #100002 1/15/26")));
        let plan = AuditPlan {
            jobs: 2,
            ..Default::default()
        };

        let first = run_local_audit(&scanner, &mut store, Arc::clone(&analyzer), &plan)
            .await
            .unwrap();
        assert_eq!(first.records.len(), 2);
        assert_eq!(first.failed, 0);
        assert!(first.records.iter().all(|r| r.month_folder == "2026-01"));
        assert!(
            first
                .records
                .iter()
                .all(|r| r.technician_name.as_deref() == Some("Koby H"))
        );
        assert_eq!(store.record_count().unwrap(), 2);

        let second = run_local_audit(&scanner, &mut store, Arc::clone(&analyzer), &plan)
            .await
            .unwrap();
        assert!(second.records.is_empty());
        assert_eq!(second.skipped, 2);

        let again = AuditPlan {
            reprocess: true,
            months: vec!["2025-12".into(), "2026-01".into()],
            ..plan
        };
        let third = run_local_audit(&scanner, &mut store, analyzer, &again)
            .await
            .unwrap();
        assert_eq!(third.records.len(), 3);
        assert_eq!(store.record_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn backend_failures_are_counted_not_stored() {
        let tmp = tickets(&[("2026-01", &["100002a.png", "100003a.png"])]);
        let scanner = LocalScanner::new(tmp.path()).unwrap();
        let mut store = AuditStore::open().unwrap();
        let plan = AuditPlan {
            jobs: 1,
            ..Default::default()
        };

        let outcome = run_local_audit(&scanner, &mut store, analyzer(Arc::new(DownOcr)), &plan)
            .await
            .unwrap();
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.failed, 2);
        assert_eq!(store.record_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn date_window_spans_all_months() {
        let tmp = tickets(&[
            ("2025-12", &["100001a.png"]),
            ("2026-01", &["100002a.png"]),
        ]);
        let scanner = LocalScanner::new(tmp.path()).unwrap();
        let mut store = AuditStore::open().unwrap();
        let analyzer = analyzer(Arc::new(FixedOcr("")));

        let today = Local::now().date_naive();
        let plan = AuditPlan {
            since: Some(today),
            jobs: 2,
            ..Default::default()
        };
        let outcome = run_local_audit(&scanner, &mut store, Arc::clone(&analyzer), &plan)
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 2);

        let before = AuditPlan {
            until: NaiveDate::from_ymd_opt(2000, 1, 1),
            reprocess: true,
            ..plan
        };
        let outcome = run_local_audit(&scanner, &mut store, analyzer, &before)
            .await
            .unwrap();
        assert!(outcome.records.is_empty());
    }

    #[tokio::test]
    async fn sample_limits_batch() {
        let tmp = tickets(&[(
            "2026-01",
            &["100001a.png", "100002a.png", "100003a.png", "100004a.png"],
        )]);
        let scanner = LocalScanner::new(tmp.path()).unwrap();
        let mut store = AuditStore::open().unwrap();
        let plan = AuditPlan {
            sample: Some(2),
            jobs: 4,
            ..Default::default()
        };
        let outcome = run_local_audit(&scanner, &mut store, analyzer(Arc::new(FixedOcr(""))), &plan)
            .await
            .unwrap();
        assert_eq!(outcome.records.len(), 2);
    }
}
