//! Plain-text reports for the terminal.

use std::collections::BTreeMap;

use paperplease_core::{AuditRecord, UNKNOWN_TECHNICIAN};
use paperplease_store::{MonthStats, TechMonthStats, TechnicianStats, TotalStats};

// ── Quick summary ──

/// Counts for a freshly analyzed batch.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct QuickSummary {
    pub total: usize,
    pub required: usize,
    pub signed: usize,
    /// Required but unsigned.
    pub missing: usize,
}

impl QuickSummary {
    pub fn from_records(records: &[AuditRecord]) -> Self {
        let required = records.iter().filter(|r| r.has_legal_text).count();
        let missing = records
            .iter()
            .filter(|r| r.has_legal_text && !r.has_signature)
            .count();
        Self {
            total: records.len(),
            required,
            signed: records.iter().filter(|r| r.has_signature).count(),
            missing,
        }
    }

    /// Percentage of required tickets that were signed.
    pub fn rate(&self) -> Option<f64> {
        (self.required > 0)
            .then(|| (self.required - self.missing) as f64 / self.required as f64 * 100.0)
    }
}

pub fn print_quick_summary(records: &[AuditRecord]) {
    if records.is_empty() {
        return;
    }
    let s = QuickSummary::from_records(records);
    println!();
    println!("Quick summary");
    println!("  Total tickets:      {}", s.total);
    println!("  Signature required: {}", s.required);
    println!("  With signature:     {}", s.signed);
    println!("  Missing signature:  {}", s.missing);
    if let Some(rate) = s.rate() {
        println!("  Signature rate:     {rate:.1}% {}", grade(rate));
    }
}

// ── Stored statistics ──

pub fn print_stats(totals: &TotalStats, techs: &[TechnicianStats], months: &[MonthStats]) {
    println!("Overall statistics");
    println!("  Total tickets:       {}", totals.total_tickets);
    println!("  Unique technicians:  {}", totals.unique_technicians);
    println!("  Months covered:      {}", totals.months_covered);
    if let Some(rate) = totals.overall_signature_rate {
        println!("  Overall sig. rate:   {rate:.1}% {}", grade(rate));
    }

    if !techs.is_empty() {
        println!();
        println!("Signature rates by technician");
        println!(
            "  {:<24} {:>7} {:>7} {:>8} {:>7}",
            "Technician", "Total", "Signed", "Missing", "Rate"
        );
        for t in techs {
            println!(
                "  {:<24} {:>7} {:>7} {:>8} {:>7}",
                t.technician,
                t.total,
                t.with_sig,
                t.missing_sig,
                format_rate(t.signature_rate)
            );
        }
    }

    if !months.is_empty() {
        println!();
        println!("Signature rates by month");
        println!(
            "  {:<9} {:>7} {:>7} {:>8} {:>11}",
            "Month", "Total", "Signed", "Missing", "No sig req"
        );
        for m in months {
            println!(
                "  {:<9} {:>7} {:>7} {:>8} {:>11}",
                m.month_folder, m.total, m.with_sig, m.missing_sig, m.no_sig_required
            );
        }
    }
}

pub fn print_tech_months(rows: &[TechMonthStats]) {
    if rows.is_empty() {
        println!("No signature-required tickets stored");
        return;
    }
    println!("Signature rates by technician and month");
    println!(
        "  {:<9} {:<24} {:>8} {:>7} {:>8} {:>7}",
        "Month", "Technician", "Required", "Signed", "Missing", "Rate"
    );
    for r in rows {
        println!(
            "  {:<9} {:<24} {:>8} {:>7} {:>8} {:>7}",
            r.month_folder,
            r.technician,
            r.total,
            r.with_sig,
            r.missing_sig,
            format_rate(r.signature_rate)
        );
    }
}

pub fn print_technician(stats: &TechnicianStats, records: &[AuditRecord]) {
    if stats.is_unknown() {
        println!("{} (no technician name read)", stats.technician);
    } else {
        println!("{}", stats.technician);
    }
    println!("  Total tickets:      {}", stats.total);
    println!("  With signature:     {}", stats.with_sig);
    println!("  Missing signature:  {}", stats.missing_sig);
    match stats.signature_rate {
        Some(rate) => println!("  Signature rate:     {rate:.1}% {}", grade(rate)),
        None => println!("  Signature rate:     N/A"),
    }

    let missing = missing_signatures(records);
    if !missing.is_empty() {
        println!();
        println!("Tickets missing a signature");
        for r in missing {
            println!(
                "  {:<9} {:>8}{}  {}",
                r.month_folder, r.ticket_number, r.variant, r.file_path
            );
        }
    }
}

pub fn print_records(month: &str, records: &[AuditRecord]) {
    if records.is_empty() {
        println!("No records for {month}");
        return;
    }
    println!("{month}: {} tickets", records.len());
    println!(
        "  {:<10} {:<24} {:>9} {:>10} {:>6}",
        "Ticket", "Technician", "Signed", "Required", "Conf."
    );
    for r in records {
        println!(
            "  {:<10} {:<24} {:>9} {:>10} {:>6.2}",
            format!("{}{}", r.ticket_number, r.variant),
            r.technician_name.as_deref().unwrap_or(UNKNOWN_TECHNICIAN),
            yes_no(r.has_signature),
            yes_no(r.has_legal_text),
            r.signature_confidence
        );
    }
}

pub fn print_month_counts(counts: &BTreeMap<String, usize>) {
    if counts.is_empty() {
        return;
    }
    println!();
    println!("Tickets on disk");
    for (month, n) in counts {
        println!("  {month}  {n:>6}");
    }
}

pub fn print_roster(names: &[String], stored: &[String]) {
    println!("{} technicians", names.len());
    for name in names {
        let marker = if stored.contains(name) { " (added)" } else { "" };
        println!("  {name}{marker}");
    }
}

/// Required tickets with no signature, in input order.
fn missing_signatures(records: &[AuditRecord]) -> Vec<&AuditRecord> {
    records
        .iter()
        .filter(|r| r.has_legal_text && !r.has_signature)
        .collect()
}

fn yes_no(b: bool) -> &'static str {
    if b { "yes" } else { "no" }
}

fn format_rate(rate: Option<f64>) -> String {
    match rate {
        Some(r) => format!("{r:.1}%"),
        None => "N/A".to_string(),
    }
}

/// Coarse label for a signature rate.
fn grade(rate: f64) -> &'static str {
    if rate >= 90.0 {
        "(good)"
    } else if rate >= 70.0 {
        "(fair)"
    } else {
        "(poor)"
    }
}
