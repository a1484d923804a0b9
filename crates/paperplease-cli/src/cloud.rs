//! Cloud audit: Drive images in, service-assisted analysis, Sheets rows out.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use futures::StreamExt;
use paperplease_core::TicketAnalyzer;
use paperplease_sync::{DriveClient, DriveImage, SheetRow, SheetsClient};
use tracing::{debug, info, warn};

/// Finished analyses per worker held before an append to the audit log.
const ROWS_PER_JOB: usize = 5;

pub struct CloudOutcome {
    pub rows: Vec<SheetRow>,
    pub skipped: usize,
    pub failed: usize,
}

pub async fn run_cloud_audit(
    drive: &DriveClient,
    sheets: &SheetsClient,
    analyzer: Arc<TicketAnalyzer>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    jobs: usize,
) -> anyhow::Result<CloudOutcome> {
    sheets
        .ensure_audit_log()
        .await
        .context("preparing audit log sheet")?;

    let images = drive
        .list_images(since, until)
        .await
        .context("listing drive images")?;
    let processed = sheets
        .processed_image_ids()
        .await
        .context("reading processed image ids")?;
    let (images, skipped) = select_new(images, &processed);
    info!(
        folder = drive.folder_id(),
        count = images.len(),
        skipped,
        "analyzing drive images"
    );

    let mut results = futures::stream::iter(images)
        .map(|image| {
            let analyzer = Arc::clone(&analyzer);
            async move {
                let result = analyze_one(drive, analyzer, &image).await;
                (image, result)
            }
        })
        .buffer_unordered(jobs.max(1));

    let mut pending = RowBuffer::new(jobs.max(1) * ROWS_PER_JOB);
    let mut rows = Vec::new();
    let mut failed = 0;
    while let Some((image, result)) = results.next().await {
        match result {
            Ok(row) => {
                if let Some(chunk) = pending.push(row) {
                    append_chunk(sheets, chunk, &mut rows).await?;
                }
            }
            Err(e) => {
                failed += 1;
                warn!(id = %image.id, name = %image.name, error = %e, "skipping drive image");
            }
        }
    }
    append_chunk(sheets, pending.finish(), &mut rows).await?;

    Ok(CloudOutcome {
        rows,
        skipped,
        failed,
    })
}

async fn analyze_one(
    drive: &DriveClient,
    analyzer: Arc<TicketAnalyzer>,
    image: &DriveImage,
) -> anyhow::Result<SheetRow> {
    let bytes = drive.download(&image.id).await?;
    let analysis = tokio::task::spawn_blocking(move || analyzer.analyze_strict(&bytes)).await??;
    Ok(SheetRow::new(image, &analysis, Local::now().naive_local()))
}

/// Append one chunk to the audit log and move it into `logged`.
async fn append_chunk(
    sheets: &SheetsClient,
    chunk: Vec<SheetRow>,
    logged: &mut Vec<SheetRow>,
) -> anyhow::Result<()> {
    if chunk.is_empty() {
        return Ok(());
    }
    sheets.append_rows(&chunk).await.with_context(|| {
        format!(
            "writing audit rows ({} logged before the failure)",
            logged.len()
        )
    })?;
    debug!(rows = chunk.len(), total = logged.len() + chunk.len(), "appended audit rows");
    logged.extend(chunk);
    Ok(())
}

/// Collects rows and hands them back in chunks of `capacity`.
struct RowBuffer {
    rows: Vec<SheetRow>,
    capacity: usize,
}

impl RowBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            rows: Vec::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, row: SheetRow) -> Option<Vec<SheetRow>> {
        self.rows.push(row);
        (self.rows.len() >= self.capacity).then(|| std::mem::take(&mut self.rows))
    }

    fn finish(self) -> Vec<SheetRow> {
        self.rows
    }
}

fn select_new(images: Vec<DriveImage>, processed: &HashSet<String>) -> (Vec<DriveImage>, usize) {
    let before = images.len();
    let fresh: Vec<_> = images
        .into_iter()
        .filter(|img| !processed.contains(&img.id))
        .collect();
    let skipped = before - fresh.len();
    (fresh, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn image(id: &str) -> DriveImage {
        let t = Utc.with_ymd_and_hms(2026, 1, 20, 10, 0, 0).unwrap();
        DriveImage {
            id: id.into(),
            name: format!("{id}.png"),
            mime_type: "image/png".into(),
            created_time: t,
            modified_time: t,
        }
    }

    fn row(id: &str) -> SheetRow {
        SheetRow {
            image_id: id.into(),
            filename: format!("{id}.png"),
            technician_name: None,
            has_signature: true,
            confidence: 0.9,
            audited_at: Utc
                .with_ymd_and_hms(2026, 1, 21, 9, 0, 0)
                .unwrap()
                .naive_utc(),
            ticket_date: None,
        }
    }

    #[test]
    fn rows_flush_in_chunks() {
        let mut buffer = RowBuffer::new(2);
        assert!(buffer.push(row("a")).is_none());
        let chunk = buffer.push(row("b")).unwrap();
        let ids: Vec<_> = chunk.iter().map(|r| r.image_id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);

        assert!(buffer.push(row("c")).is_none());
        let rest = buffer.finish();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].image_id, "c");
    }

    #[test]
    fn empty_buffer_finishes_empty() {
        assert!(RowBuffer::new(3).finish().is_empty());
    }

    #[test]
    fn already_logged_images_are_skipped() {
        let processed: HashSet<String> = ["b".to_string()].into();
        let (fresh, skipped) = select_new(vec![image("a"), image("b"), image("c")], &processed);
        let ids: Vec<_> = fresh.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["a", "c"]);
        assert_eq!(skipped, 1);
    }
}
