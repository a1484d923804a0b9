//! Drive v3 client listing and downloading ticket images from one folder.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info};

use crate::http::{SyncError, ensure_success, trim_base};

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/drive/v3";

const PAGE_SIZE: &str = "100";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, createdTime, modifiedTime)";

static ISO_DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap());
static US_DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{2}-\d{2}-\d{4}").unwrap());
static COMPACT_DATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{8}").unwrap());

/// Image file metadata. Content is fetched separately with [`DriveClient::download`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveImage {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    pub created_time: DateTime<Utc>,
    pub modified_time: DateTime<Utc>,
}

impl DriveImage {
    /// Date embedded in the file name, else the upload date.
    pub fn ticket_date(&self) -> NaiveDate {
        date_from_filename(&self.name).unwrap_or_else(|| self.created_time.date_naive())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveImage>,
    next_page_token: Option<String>,
}

/// Drive client scoped to a single folder, authenticated with an OAuth access token.
pub struct DriveClient {
    client: reqwest::Client,
    base_url: String,
    folder_id: String,
    access_token: String,
}

impl DriveClient {
    pub fn new(folder_id: String, access_token: String) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string(), folder_id, access_token)
    }

    pub fn with_base_url(base_url: String, folder_id: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: trim_base(&base_url),
            folder_id,
            access_token,
        }
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    /// List PNG and JPEG images in the folder, optionally bounded by
    /// modification time (exclusive on both ends).
    pub async fn list_images(
        &self,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<DriveImage>, SyncError> {
        let url = format!("{}/files", self.base_url);
        let q = list_query(&self.folder_id, since, until);
        info!(folder = %self.folder_id, query = %q, "listing drive images");

        let mut images = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut req = self
                .client
                .get(&url)
                .bearer_auth(&self.access_token)
                .query(&[
                    ("q", q.as_str()),
                    ("spaces", "drive"),
                    ("fields", LIST_FIELDS),
                    ("pageSize", PAGE_SIZE),
                ]);
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token.as_str())]);
            }

            let resp = ensure_success(req.send().await?).await?;
            let page: FileList = resp.json().await?;
            debug!(count = page.files.len(), "drive page");
            images.extend(page.files);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        info!(count = images.len(), "listed drive images");
        Ok(images)
    }

    /// Download a file's content by id.
    pub async fn download(&self, id: &str) -> Result<Vec<u8>, SyncError> {
        let url = format!("{}/files/{id}", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[("alt", "media")])
            .send()
            .await?;
        let bytes = ensure_success(resp).await?.bytes().await?;
        debug!(id, bytes = bytes.len(), "downloaded drive file");
        Ok(bytes.to_vec())
    }
}

fn list_query(
    folder_id: &str,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> String {
    let mut parts = vec![
        format!("'{}' in parents", folder_id.replace('\'', "\\'")),
        "(mimeType='image/png' or mimeType='image/jpeg')".to_string(),
        "trashed=false".to_string(),
    ];
    if let Some(ts) = since {
        parts.push(format!(
            "modifiedTime > '{}'",
            ts.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    if let Some(ts) = until {
        parts.push(format!(
            "modifiedTime < '{}'",
            ts.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    parts.join(" and ")
}

/// Find a calendar date in a file name: `2026-01-13`, `01-13-2026`,
/// `20260113` or `01132026`.
pub fn date_from_filename(name: &str) -> Option<NaiveDate> {
    if let Some(m) = ISO_DATE.find(name)
        && let Ok(date) = NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d")
    {
        return Some(date);
    }
    if let Some(m) = US_DATE.find(name)
        && let Ok(date) = NaiveDate::parse_from_str(m.as_str(), "%m-%d-%Y")
    {
        return Some(date);
    }
    let compact = COMPACT_DATE.find(name)?.as_str();
    NaiveDate::parse_from_str(compact, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(compact, "%m%d%Y"))
        .ok()
}
