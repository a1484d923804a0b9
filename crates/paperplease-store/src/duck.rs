//! DuckDB storage for audit records and the technician roster.

use std::collections::HashSet;
use std::path::Path;

use duckdb::{Connection, Row, params};
use paperplease_core::AuditRecord;
use tracing::info;

use crate::{MonthStats, StoreError, TechMonthStats, TechnicianStats, TotalStats};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS audit_records (
    file_path            VARCHAR PRIMARY KEY,
    ticket_number        VARCHAR NOT NULL,
    variant              VARCHAR NOT NULL,
    month_folder         VARCHAR NOT NULL,
    technician_name      VARCHAR,
    technician_role      VARCHAR,
    has_signature        BOOLEAN NOT NULL,
    signature_confidence DOUBLE NOT NULL,
    ticket_date          VARCHAR,
    audit_date           VARCHAR NOT NULL,
    has_legal_text       BOOLEAN NOT NULL
);
CREATE TABLE IF NOT EXISTS technicians (
    name     VARCHAR PRIMARY KEY,
    added_at TIMESTAMP NOT NULL DEFAULT current_timestamp
);
";

const INSERT_RECORD: &str = "
INSERT OR REPLACE INTO audit_records (
    file_path, ticket_number, variant, month_folder, technician_name,
    technician_role, has_signature, signature_confidence, ticket_date,
    audit_date, has_legal_text
) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

const SELECT_RECORDS: &str = "
SELECT file_path, ticket_number, variant, month_folder, technician_name,
       technician_role, has_signature, signature_confidence, ticket_date,
       audit_date, has_legal_text
FROM audit_records";

// Shared CASE expressions for the reports.
const WITH_SIG: &str = "COALESCE(SUM(CASE WHEN has_signature THEN 1 ELSE 0 END), 0)::BIGINT";
const MISSING_SIG: &str =
    "COALESCE(SUM(CASE WHEN NOT has_signature AND has_legal_text THEN 1 ELSE 0 END), 0)::BIGINT";
const REQUIRED: &str = "COALESCE(SUM(CASE WHEN has_legal_text THEN 1 ELSE 0 END), 0)::BIGINT";
const TECHNICIAN_MATCH: &str = "lower(COALESCE(technician_name, 'UNKNOWN')) = lower(?)";

/// Bind an [`AuditRecord`] in `INSERT_RECORD` column order.
macro_rules! record_params {
    ($r:expr) => {
        params![
            $r.file_path,
            $r.ticket_number,
            $r.variant,
            $r.month_folder,
            $r.technician_name,
            $r.technician_role,
            $r.has_signature,
            f64::from($r.signature_confidence),
            $r.ticket_date,
            $r.audit_date,
            $r.has_legal_text,
        ]
    };
}

/// DuckDB store for audit records.
///
/// One row per ticket image keyed by `file_path`; re-analysing an image
/// replaces its row. Use [`open`](Self::open) for in-memory and
/// [`open_persistent`](Self::open_persistent) for a database file that
/// survives across runs.
pub struct AuditStore {
    conn: Connection,
}

impl AuditStore {
    /// Open an in-memory database.
    pub fn open() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    /// Open or create a database file at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        let store = Self::init(Connection::open(path)?)?;
        info!(path = %path.display(), records = store.record_count()?, "opened audit store");
        Ok(store)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // ── Audit records ──

    /// Insert records in one transaction, replacing earlier rows for the same files.
    pub fn upsert_records(&mut self, records: &[AuditRecord]) -> Result<usize, StoreError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(INSERT_RECORD)?;
            for record in records {
                stmt.execute(record_params!(record))?;
            }
        }
        tx.commit()?;
        info!(count = records.len(), "stored audit records");
        Ok(records.len())
    }

    pub fn record_count(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT count(*) FROM audit_records", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Paths of every image already analysed.
    pub fn processed_paths(&self) -> Result<HashSet<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT file_path FROM audit_records")?;
        let paths = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(paths)
    }

    pub fn records_by_month(&self, month: &str) -> Result<Vec<AuditRecord>, StoreError> {
        let sql = format!(
            "{SELECT_RECORDS} WHERE month_folder = ? ORDER BY ticket_number, variant"
        );
        self.query_records(&sql, [month])
    }

    /// Records for one technician, matched case-insensitively. `UNKNOWN`
    /// selects tickets with no identified technician.
    pub fn records_by_technician(&self, name: &str) -> Result<Vec<AuditRecord>, StoreError> {
        let sql = format!(
            "{SELECT_RECORDS} WHERE {TECHNICIAN_MATCH} ORDER BY month_folder, ticket_number, variant"
        );
        self.query_records(&sql, [name])
    }

    fn query_records<P: duckdb::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<AuditRecord>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let records = stmt
            .query_map(params, row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // ── Reports ──

    pub fn total_stats(&self) -> Result<TotalStats, StoreError> {
        let sql = format!(
            "SELECT count(*),
                    count(DISTINCT technician_name),
                    count(DISTINCT month_folder),
                    {WITH_SIG},
                    {REQUIRED},
                    ROUND(100.0 * {WITH_SIG} / NULLIF({REQUIRED}, 0), 1)::DOUBLE
             FROM audit_records"
        );
        let stats = self.conn.query_row(&sql, [], |row| {
            Ok(TotalStats {
                total_tickets: count(row, 0)?,
                unique_technicians: count(row, 1)?,
                months_covered: count(row, 2)?,
                total_with_sig: count(row, 3)?,
                total_sig_required: count(row, 4)?,
                overall_signature_rate: row.get(5)?,
            })
        })?;
        Ok(stats)
    }

    /// Per-month counts, oldest month first.
    pub fn month_stats(&self) -> Result<Vec<MonthStats>, StoreError> {
        let sql = format!(
            "SELECT month_folder,
                    count(*),
                    {WITH_SIG},
                    {MISSING_SIG},
                    COALESCE(SUM(CASE WHEN NOT has_legal_text THEN 1 ELSE 0 END), 0)::BIGINT
             FROM audit_records
             GROUP BY month_folder
             ORDER BY month_folder"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(MonthStats {
                    month_folder: row.get(0)?,
                    total: count(row, 1)?,
                    with_sig: count(row, 2)?,
                    missing_sig: count(row, 3)?,
                    no_sig_required: count(row, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Per-technician compliance, worst signature rate first.
    ///
    /// Technicians with nothing requiring a signature have no rate and sort first.
    pub fn technician_stats(&self) -> Result<Vec<TechnicianStats>, StoreError> {
        let sql = format!(
            "SELECT COALESCE(technician_name, 'UNKNOWN') AS technician,
                    count(*),
                    {WITH_SIG},
                    {MISSING_SIG},
                    ROUND(100.0 * {WITH_SIG} / NULLIF({REQUIRED}, 0), 1)::DOUBLE AS signature_rate
             FROM audit_records
             GROUP BY technician_name
             ORDER BY signature_rate ASC NULLS FIRST, technician"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TechnicianStats {
                    technician: row.get(0)?,
                    total: count(row, 1)?,
                    with_sig: count(row, 2)?,
                    missing_sig: count(row, 3)?,
                    signature_rate: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Compliance for one technician, matched case-insensitively.
    pub fn technician_summary(&self, name: &str) -> Result<TechnicianStats, StoreError> {
        let sql = format!(
            "SELECT min(COALESCE(technician_name, 'UNKNOWN')),
                    count(*),
                    {WITH_SIG},
                    {MISSING_SIG},
                    ROUND(100.0 * {WITH_SIG} / NULLIF({REQUIRED}, 0), 1)::DOUBLE
             FROM audit_records
             WHERE {TECHNICIAN_MATCH}"
        );
        let (technician, stats) = self.conn.query_row(&sql, [name], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                TechnicianStats {
                    technician: String::new(),
                    total: count(row, 1)?,
                    with_sig: count(row, 2)?,
                    missing_sig: count(row, 3)?,
                    signature_rate: row.get(4)?,
                },
            ))
        })?;
        match technician {
            Some(technician) => Ok(TechnicianStats { technician, ..stats }),
            None => Err(StoreError::NoResults),
        }
    }

    /// Per technician per month over signature-required tickets.
    pub fn tech_month_stats(&self) -> Result<Vec<TechMonthStats>, StoreError> {
        let sql = format!(
            "SELECT month_folder,
                    COALESCE(technician_name, 'UNKNOWN') AS technician,
                    count(*),
                    {WITH_SIG},
                    {MISSING_SIG},
                    ROUND(100.0 * {WITH_SIG} / NULLIF({REQUIRED}, 0), 1)::DOUBLE
             FROM audit_records
             WHERE has_legal_text
             GROUP BY month_folder, technician_name
             ORDER BY month_folder, technician"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(TechMonthStats {
                    month_folder: row.get(0)?,
                    technician: row.get(1)?,
                    total: count(row, 2)?,
                    with_sig: count(row, 3)?,
                    missing_sig: count(row, 4)?,
                    signature_rate: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ── Technician roster ──

    /// Persist a roster addition. Returns `false` if the name was already stored.
    pub fn add_technician(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        let existing: i64 = self.conn.query_row(
            "SELECT count(*) FROM technicians WHERE name = ?",
            [name],
            |row| row.get(0),
        )?;
        if existing > 0 {
            return Ok(false);
        }
        self.conn
            .execute("INSERT INTO technicians (name) VALUES (?)", [name])?;
        info!(name, "added technician to roster");
        Ok(true)
    }

    /// Stored roster additions in name order.
    pub fn technicians(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM technicians ORDER BY name")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

fn row_to_record(row: &Row<'_>) -> duckdb::Result<AuditRecord> {
    Ok(AuditRecord {
        file_path: row.get(0)?,
        ticket_number: row.get(1)?,
        variant: row.get(2)?,
        month_folder: row.get(3)?,
        technician_name: row.get(4)?,
        technician_role: row.get(5)?,
        has_signature: row.get(6)?,
        signature_confidence: row.get::<_, f64>(7)? as f32,
        ticket_date: row.get(8)?,
        audit_date: row.get(9)?,
        has_legal_text: row.get(10)?,
    })
}

fn count(row: &Row<'_>, idx: usize) -> duckdb::Result<u64> {
    Ok(row.get::<_, i64>(idx)?.max(0) as u64)
}
