//! Local ticket tree: `<root>/<YYYY-MM>/<digits><letter>.png`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, bail};
use chrono::{DateTime, Local, NaiveDate};
use paperplease_core::TicketSource;
use regex::Regex;

static MONTH_FOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}$").unwrap());
static TICKET_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(\d+)([a-z])\.png$").unwrap());

/// A ticket image found on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct TicketImage {
    pub path: PathBuf,
    pub ticket_number: String,
    /// Lower-cased page letter.
    pub variant: String,
    pub month_folder: String,
    pub modified_time: DateTime<Local>,
}

impl TicketImage {
    pub fn source(&self) -> TicketSource {
        TicketSource {
            ticket_number: self.ticket_number.clone(),
            variant: self.variant.clone(),
            month_folder: self.month_folder.clone(),
            file_path: self.path.display().to_string(),
        }
    }
}

/// Which images a scan returns.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Month folders to visit; all of them when `None`.
    pub months: Option<Vec<String>>,
    /// First local modification day kept, inclusive.
    pub since: Option<NaiveDate>,
    /// Last local modification day kept, inclusive.
    pub until: Option<NaiveDate>,
}

impl ScanFilter {
    fn admits(&self, image: &TicketImage) -> bool {
        let day = image.modified_time.date_naive();
        self.since.is_none_or(|d| day >= d) && self.until.is_none_or(|d| day <= d)
    }
}

pub struct LocalScanner {
    root: PathBuf,
}

impl LocalScanner {
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            bail!("tickets folder not found: {}", root.display());
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `YYYY-MM` folders, oldest first.
    pub fn month_folders(&self) -> anyhow::Result<Vec<String>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("reading {}", self.root.display()))?;
        let mut months = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type()?.is_dir() && MONTH_FOLDER.is_match(&name) {
                months.push(name);
            }
        }
        months.sort();
        Ok(months)
    }

    pub fn latest_month(&self) -> anyhow::Result<Option<String>> {
        Ok(self.month_folders()?.pop())
    }

    /// Ticket images in one month folder, sorted by file name. A missing
    /// folder has no images.
    pub fn scan_month(&self, month: &str) -> anyhow::Result<Vec<TicketImage>> {
        let dir = self.root.join(month);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut images = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("reading {}", dir.display()))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(caps) = TICKET_FILE.captures(&name) else {
                continue;
            };
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            images.push(TicketImage {
                path: entry.path(),
                ticket_number: caps[1].to_string(),
                variant: caps[2].to_ascii_lowercase(),
                month_folder: month.to_string(),
                modified_time: DateTime::from(metadata.modified()?),
            });
        }
        images.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(images)
    }

    pub fn scan(&self, filter: &ScanFilter) -> anyhow::Result<Vec<TicketImage>> {
        let months = match &filter.months {
            Some(months) => months.clone(),
            None => self.month_folders()?,
        };
        let mut images = Vec::new();
        for month in &months {
            images.extend(
                self.scan_month(month)?
                    .into_iter()
                    .filter(|img| filter.admits(img)),
            );
        }
        Ok(images)
    }

    /// Ticket image count per month folder.
    pub fn count_by_month(&self) -> anyhow::Result<BTreeMap<String, usize>> {
        self.month_folders()?
            .into_iter()
            .map(|month| {
                let n = self.scan_month(&month)?.len();
                Ok((month, n))
            })
            .collect()
    }
}
