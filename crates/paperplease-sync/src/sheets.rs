//! Sheets v4 client writing the flat audit log.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveDateTime};
use paperplease_core::{TicketAnalysis, UNKNOWN_TECHNICIAN};
use reqwest::Url;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::drive::DriveImage;
use crate::http::{SyncError, ensure_success, trim_base};

pub const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com/v4";

pub const AUDIT_LOG_SHEET: &str = "Audit Log";

pub const AUDIT_LOG_HEADERS: [&str; 7] = [
    "Image ID",
    "Filename",
    "Technician",
    "Signature Present",
    "Confidence",
    "Audit Date",
    "Ticket Date",
];

/// One audit-log row.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetRow {
    pub image_id: String,
    pub filename: String,
    pub technician_name: Option<String>,
    pub has_signature: bool,
    pub confidence: f32,
    pub audited_at: NaiveDateTime,
    pub ticket_date: Option<NaiveDate>,
}

impl SheetRow {
    /// Build a row for a Drive image. The ticket date is the one printed on the
    /// ticket when it parses, else the date from the image itself.
    pub fn new(image: &DriveImage, analysis: &TicketAnalysis, audited_at: NaiveDateTime) -> Self {
        let printed = analysis
            .ticket_date
            .as_deref()
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%m/%d/%y").ok());
        Self {
            image_id: image.id.clone(),
            filename: image.name.clone(),
            technician_name: analysis.technician_name.clone(),
            has_signature: analysis.has_signature,
            confidence: analysis.signature_confidence,
            audited_at,
            ticket_date: Some(printed.unwrap_or_else(|| image.ticket_date())),
        }
    }

    /// Cell values in [`AUDIT_LOG_HEADERS`] order.
    pub fn to_values(&self) -> Vec<Value> {
        let confidence = (f64::from(self.confidence) * 100.0).round() / 100.0;
        vec![
            json!(self.image_id),
            json!(self.filename),
            json!(self.technician_name.as_deref().unwrap_or(UNKNOWN_TECHNICIAN)),
            json!(if self.has_signature { "Yes" } else { "No" }),
            json!(confidence),
            json!(self.audited_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            json!(
                self.ticket_date
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default()
            ),
        ]
    }
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<Sheet>,
}

#[derive(Deserialize)]
struct Sheet {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

/// Sheets client for one spreadsheet, authenticated with an OAuth access token.
pub struct SheetsClient {
    client: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    access_token: String,
}

impl SheetsClient {
    pub fn new(spreadsheet_id: String, access_token: String) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL.to_string(), spreadsheet_id, access_token)
    }

    pub fn with_base_url(base_url: String, spreadsheet_id: String, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: trim_base(&base_url),
            spreadsheet_id,
            access_token,
        }
    }

    /// Create the audit-log sheet with its header row if it is missing.
    ///
    /// Returns `true` when the sheet was created.
    pub async fn ensure_audit_log(&self) -> Result<bool, SyncError> {
        let url = self.spreadsheet_url("")?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(&[("fields", "sheets.properties.title")])
            .send()
            .await?;
        let sheet: Spreadsheet = ensure_success(resp).await?.json().await?;
        if sheet
            .sheets
            .iter()
            .any(|s| s.properties.title == AUDIT_LOG_SHEET)
        {
            return Ok(false);
        }

        let url = self.spreadsheet_url(":batchUpdate")?;
        let body = json!({
            "requests": [{"addSheet": {"properties": {"title": AUDIT_LOG_SHEET}}}]
        });
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        ensure_success(resp).await?;

        let headers: Vec<Value> = AUDIT_LOG_HEADERS.iter().map(|h| json!(h)).collect();
        self.append_values(vec![headers]).await?;
        info!(sheet = AUDIT_LOG_SHEET, "created audit log sheet");
        Ok(true)
    }

    /// Append rows to the audit log. Returns the number of rows written.
    pub async fn append_rows(&self, rows: &[SheetRow]) -> Result<usize, SyncError> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.append_values(rows.iter().map(SheetRow::to_values).collect())
            .await?;
        info!(count = rows.len(), "appended audit rows");
        Ok(rows.len())
    }

    /// Image ids already in the audit log (column A, header skipped).
    pub async fn processed_image_ids(&self) -> Result<HashSet<String>, SyncError> {
        let url = self.values_url(&format!("'{AUDIT_LOG_SHEET}'!A:A"), "")?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let range: ValueRange = ensure_success(resp).await?.json().await?;
        let ids = ids_from_column(range);
        info!(count = ids.len(), "read processed image ids");
        Ok(ids)
    }

    async fn append_values(&self, values: Vec<Vec<Value>>) -> Result<(), SyncError> {
        let url = self.values_url(&format!("'{AUDIT_LOG_SHEET}'!A:G"), ":append")?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": values }))
            .send()
            .await?;
        ensure_success(resp).await?;
        Ok(())
    }

    fn spreadsheet_url(&self, suffix: &str) -> Result<Url, SyncError> {
        self.url_with(&["spreadsheets", &format!("{}{suffix}", self.spreadsheet_id)])
    }

    fn values_url(&self, range: &str, suffix: &str) -> Result<Url, SyncError> {
        self.url_with(&[
            "spreadsheets",
            &self.spreadsheet_id,
            "values",
            &format!("{range}{suffix}"),
        ])
    }

    fn url_with(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

fn ids_from_column(range: ValueRange) -> HashSet<String> {
    range
        .values
        .into_iter()
        .skip(1)
        .filter_map(|row| match row.into_iter().next()? {
            Value::String(s) if !s.is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect()
}
