//! Analysis result and the flat audit row persisted by callers.

use serde::{Deserialize, Serialize};

/// Label reports use for tickets with no identified technician.
pub const UNKNOWN_TECHNICIAN: &str = "UNKNOWN";

/// Judgment for one ticket image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketAnalysis {
    /// Always a roster member when present.
    pub technician_name: Option<String>,
    /// Raw role token from the "by ..." line.
    pub technician_role: Option<String>,
    pub has_signature: bool,
    /// Confidence in `has_signature`, in `[0, 1]`.
    pub signature_confidence: f32,
    /// 5-7 digits.
    pub ticket_number: Option<String>,
    /// Raw `M/DD/YY` token, unparsed.
    pub ticket_date: Option<String>,
    /// Whether the compliance phrase (signature required) was found.
    pub has_legal_text: bool,
}

impl TicketAnalysis {
    /// Best-effort record for an image nothing could be read from.
    pub fn degraded(has_legal_text: bool) -> Self {
        Self {
            technician_name: None,
            technician_role: None,
            has_signature: false,
            signature_confidence: 0.5,
            ticket_number: None,
            ticket_date: None,
            has_legal_text,
        }
    }

    /// Signature required but not found.
    pub fn missing_signature(&self) -> bool {
        self.has_legal_text && !self.has_signature
    }
}

/// Where a ticket image came from, as derived by the image source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSource {
    /// Ticket number from the file name.
    pub ticket_number: String,
    /// Page suffix letter (`a`, `b`, ...).
    pub variant: String,
    /// `YYYY-MM` folder.
    pub month_folder: String,
    /// Unique key: local path or remote object id.
    pub file_path: String,
}

/// One persisted audit row: caller identifiers plus the analysis fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ticket_number: String,
    pub variant: String,
    pub month_folder: String,
    pub file_path: String,
    pub technician_name: Option<String>,
    pub technician_role: Option<String>,
    pub has_signature: bool,
    pub signature_confidence: f32,
    pub ticket_date: Option<String>,
    /// ISO 8601 timestamp string.
    pub audit_date: String,
    pub has_legal_text: bool,
}

impl AuditRecord {
    pub fn new(source: TicketSource, analysis: TicketAnalysis, audit_date: String) -> Self {
        Self {
            ticket_number: source.ticket_number,
            variant: source.variant,
            month_folder: source.month_folder,
            file_path: source.file_path,
            technician_name: analysis.technician_name,
            technician_role: analysis.technician_role,
            has_signature: analysis.has_signature,
            signature_confidence: analysis.signature_confidence,
            ticket_date: analysis.ticket_date,
            audit_date,
            has_legal_text: analysis.has_legal_text,
        }
    }
}
