//! Report rows produced by the reporting queries.

/// Whole-database summary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TotalStats {
    pub total_tickets: u64,
    /// Distinct identified technicians; unknown names are not counted.
    pub unique_technicians: u64,
    pub months_covered: u64,
    pub total_with_sig: u64,
    /// Tickets carrying the compliance phrase.
    pub total_sig_required: u64,
    /// Percentage signed among required, 1 dp. `None` when nothing is required.
    pub overall_signature_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonthStats {
    pub month_folder: String,
    pub total: u64,
    pub with_sig: u64,
    /// Signature required but absent.
    pub missing_sig: u64,
    pub no_sig_required: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TechnicianStats {
    /// `UNKNOWN` for tickets with no identified technician.
    pub technician: String,
    pub total: u64,
    pub with_sig: u64,
    pub missing_sig: u64,
    pub signature_rate: Option<f64>,
}

/// Per technician per month, over signature-required tickets only.
#[derive(Debug, Clone, PartialEq)]
pub struct TechMonthStats {
    pub month_folder: String,
    pub technician: String,
    pub total: u64,
    pub with_sig: u64,
    pub missing_sig: u64,
    pub signature_rate: Option<f64>,
}

impl TechnicianStats {
    pub fn is_unknown(&self) -> bool {
        self.technician == paperplease_core::UNKNOWN_TECHNICIAN
    }
}
