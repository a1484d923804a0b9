//! Storage layer: DuckDB-backed audit records, technician roster, and reports.

mod error;
mod stats;
pub use error::StoreError;
pub use stats::{MonthStats, TechMonthStats, TechnicianStats, TotalStats};

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
pub use duck::AuditStore;
