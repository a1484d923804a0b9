mod batch;
mod cloud;
mod display;
mod engine;
mod scan;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use paperplease_core::{TechnicianRegistry, TicketAnalyzer};
use paperplease_store::{AuditStore, StoreError};
use paperplease_sync::{DriveClient, SheetsClient};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::batch::{AuditPlan, BatchOutcome};
use crate::engine::{EngineArgs, load_registry};
use crate::scan::LocalScanner;

#[derive(Parser)]
#[command(
    name = "paperplease",
    version,
    about = "Audit scanned service tickets for technician signatures"
)]
struct Cli {
    /// DuckDB database file holding audit records and roster additions
    #[arg(
        long,
        env = "PAPERPLEASE_DB",
        default_value = "paperplease.duckdb",
        global = true
    )]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze one ticket image and print the result as JSON
    Analyze {
        image: PathBuf,
        #[command(flatten)]
        engine: EngineArgs,
    },
    /// Audit local ticket images and store the results
    Audit(AuditArgs),
    /// Audit Drive images and append the results to the Sheets audit log
    CloudAudit(CloudArgs),
    /// Show stored signature statistics
    Stats(StatsArgs),
    /// Manage the technician roster
    Techs {
        #[command(subcommand)]
        action: TechsAction,
    },
    /// Run the local audit now and then on a fixed interval until Ctrl-C
    Watch {
        /// Hours between runs
        #[arg(long, env = "PAPERPLEASE_EVERY_HOURS", default_value_t = 24)]
        every_hours: u64,
        #[command(flatten)]
        audit: AuditArgs,
    },
}

// No flag prints totals and the per-technician and per-month tables.
#[derive(Args)]
#[group(multiple = false)]
struct StatsArgs {
    /// One technician's compliance and unsigned tickets (case-insensitive)
    #[arg(long, short = 't')]
    tech: Option<String>,

    /// Per-technician rates for every month
    #[arg(long)]
    monthly: bool,

    /// Every stored ticket in one month folder (YYYY-MM)
    #[arg(long, value_parser = parse_month)]
    month: Option<String>,
}

#[derive(Subcommand)]
enum TechsAction {
    /// List known technicians
    List,
    /// Add a technician so fuzzy matching can resolve to them
    Add { name: String },
}

#[derive(Args)]
struct AuditArgs {
    /// Month folder (YYYY-MM); defaults to the latest
    #[arg(value_parser = parse_month)]
    month: Option<String>,

    /// Analyze at most N tickets, spread across the month
    #[arg(long)]
    sample: Option<usize>,

    /// Re-analyze tickets that already have a record
    #[arg(long)]
    reprocess: bool,

    /// Only tickets modified on or after this day (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    since: Option<NaiveDate>,

    /// Only tickets modified on or before this day (YYYY-MM-DD)
    #[arg(long, value_parser = parse_day)]
    until: Option<NaiveDate>,

    /// Root folder containing YYYY-MM ticket folders
    #[arg(long, env = "PAPERPLEASE_TICKETS", default_value = "tickets")]
    tickets: PathBuf,

    /// Concurrent analyses
    #[arg(long, env = "PAPERPLEASE_JOBS", default_value_t = 4)]
    jobs: usize,

    #[command(flatten)]
    engine: EngineArgs,
}

impl AuditArgs {
    fn plan(&self) -> anyhow::Result<AuditPlan> {
        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            bail!("--since {since} is after --until {until}");
        }
        Ok(AuditPlan {
            months: self.month.iter().cloned().collect(),
            since: self.since,
            until: self.until,
            sample: self.sample,
            reprocess: self.reprocess,
            jobs: self.jobs,
        })
    }
}

#[derive(Args)]
struct CloudArgs {
    /// Drive folder holding ticket images
    #[arg(long, env = "GOOGLE_DRIVE_FOLDER_ID")]
    folder_id: String,

    /// Spreadsheet receiving the audit log
    #[arg(long, env = "GOOGLE_SPREADSHEET_ID")]
    spreadsheet_id: String,

    /// OAuth access token with Drive read and Sheets scopes
    #[arg(long, env = "GOOGLE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,

    /// Only images modified after this time (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_time)]
    since: Option<DateTime<Utc>>,

    /// Only images modified before this time (RFC 3339 or YYYY-MM-DD)
    #[arg(long, value_parser = parse_time)]
    until: Option<DateTime<Utc>>,

    /// Concurrent downloads and analyses
    #[arg(long, env = "PAPERPLEASE_JOBS", default_value_t = 4)]
    jobs: usize,

    #[command(flatten)]
    engine: EngineArgs,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    info!("paperplease v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    match cli.command {
        Command::Analyze { image, engine } => cmd_analyze(&cli.db, &image, &engine),
        Command::Audit(args) => cmd_audit(&cli.db, &args),
        Command::CloudAudit(args) => cmd_cloud_audit(&cli.db, args),
        Command::Stats(args) => cmd_stats(&cli.db, &args),
        Command::Techs { action } => cmd_techs(&cli.db, action),
        Command::Watch { every_hours, audit } => cmd_watch(&cli.db, every_hours, &audit),
    }
}

// The analyzer may hold a blocking HTTP client, so it is built and dropped
// outside the runtime; analyses run on the blocking pool.
fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")
}

fn open_store(db: &Path) -> anyhow::Result<AuditStore> {
    AuditStore::open_persistent(db).with_context(|| format!("opening {}", db.display()))
}

// ── Commands ──

fn cmd_analyze(db: &Path, image: &Path, engine: &EngineArgs) -> anyhow::Result<()> {
    let registry = if db.exists() {
        load_registry(&open_store(db)?)?
    } else {
        TechnicianRegistry::with_defaults()
    };
    let analyzer = engine.build(registry)?;
    let bytes = std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let analysis = analyzer
        .analyze_strict(&bytes)
        .with_context(|| format!("analyzing {}", image.display()))?;
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}

fn cmd_audit(db: &Path, args: &AuditArgs) -> anyhow::Result<()> {
    let mut store = open_store(db)?;
    let scanner = LocalScanner::new(&args.tickets)?;
    let plan = args.plan()?;
    let analyzer = Arc::new(args.engine.build(load_registry(&store)?)?);

    let outcome = runtime()?.block_on(batch::run_local_audit(
        &scanner,
        &mut store,
        Arc::clone(&analyzer),
        &plan,
    ))?;
    report_batch(&outcome);
    display::print_month_counts(&scanner.count_by_month()?);
    Ok(())
}

fn cmd_cloud_audit(db: &Path, mut args: CloudArgs) -> anyhow::Result<()> {
    args.engine.service = true;
    let registry = if db.exists() {
        load_registry(&open_store(db)?)?
    } else {
        TechnicianRegistry::with_defaults()
    };
    let analyzer: Arc<TicketAnalyzer> = Arc::new(args.engine.build(registry)?);
    if let (Some(since), Some(until)) = (args.since, args.until)
        && since >= until
    {
        bail!("--since must be before --until");
    }

    let drive = DriveClient::new(args.folder_id.clone(), args.access_token.clone());
    let sheets = SheetsClient::new(args.spreadsheet_id.clone(), args.access_token.clone());
    let outcome = runtime()?.block_on(cloud::run_cloud_audit(
        &drive,
        &sheets,
        Arc::clone(&analyzer),
        args.since,
        args.until,
        args.jobs,
    ))?;

    eprintln!(
        "  Logged {} images ({} already logged, {} failed)",
        outcome.rows.len(),
        outcome.skipped,
        outcome.failed
    );
    let signed = outcome.rows.iter().filter(|r| r.has_signature).count();
    println!("Signed: {signed}/{}", outcome.rows.len());
    Ok(())
}

fn cmd_stats(db: &Path, args: &StatsArgs) -> anyhow::Result<()> {
    let store = open_store(db)?;
    if let Some(name) = &args.tech {
        match store.technician_summary(name) {
            Ok(stats) => {
                let records = store.records_by_technician(name)?;
                display::print_technician(&stats, &records);
            }
            Err(StoreError::NoResults) => println!("No data found for technician: {name}"),
            Err(e) => return Err(e.into()),
        }
        return Ok(());
    }
    if args.monthly {
        display::print_tech_months(&store.tech_month_stats()?);
        return Ok(());
    }
    if let Some(month) = &args.month {
        display::print_records(month, &store.records_by_month(month)?);
        return Ok(());
    }

    let totals = store.total_stats()?;
    let techs = store.technician_stats()?;
    let months = store.month_stats()?;
    display::print_stats(&totals, &techs, &months);
    Ok(())
}

fn cmd_techs(db: &Path, action: TechsAction) -> anyhow::Result<()> {
    let store = open_store(db)?;
    match action {
        TechsAction::List => {
            let registry = load_registry(&store)?;
            display::print_roster(registry.names(), &store.technicians()?);
        }
        TechsAction::Add { name } => {
            if add_technician(&store, &name)? {
                println!("Added {}", name.trim());
            } else {
                println!("{} is already on the roster", name.trim());
            }
        }
    }
    Ok(())
}

/// Persist a roster addition unless the name is already known, built-in or
/// stored. Later commands pick it up through [`load_registry`].
fn add_technician(store: &AuditStore, name: &str) -> anyhow::Result<bool> {
    if load_registry(store)?.contains(name.trim()) {
        return Ok(false);
    }
    Ok(store.add_technician(name)?)
}

fn cmd_watch(db: &Path, every_hours: u64, args: &AuditArgs) -> anyhow::Result<()> {
    if every_hours == 0 {
        bail!("--every-hours must be at least 1");
    }
    let mut store = open_store(db)?;
    let scanner = LocalScanner::new(&args.tickets)?;
    let plan = args.plan()?;
    let analyzer = Arc::new(args.engine.build(load_registry(&store)?)?);

    info!(every_hours, "starting scheduled audits, Ctrl-C to stop");
    runtime()?.block_on(async {
        let mut ticker = tokio::time::interval(Duration::from_secs(every_hours * 3600));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    info!("scheduled audit starting");
                    match batch::run_local_audit(&scanner, &mut store, Arc::clone(&analyzer), &plan).await {
                        Ok(outcome) => report_batch(&outcome),
                        Err(e) => warn!(error = %e, "scheduled audit failed"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutting down scheduler");
                    break;
                }
            }
        }
    });
    Ok(())
}

fn report_batch(outcome: &BatchOutcome) {
    eprintln!(
        "  Saved {} records in {:.1}s ({} already processed, {} failed)",
        outcome.records.len(),
        outcome.elapsed_secs,
        outcome.skipped,
        outcome.failed
    );
    if outcome.records.is_empty() {
        println!("No new tickets to process");
    }
    display::print_quick_summary(&outcome.records);
}

// ── Argument parsers ──

fn parse_month(s: &str) -> Result<String, String> {
    let valid = s.len() == 7 && NaiveDate::parse_from_str(&format!("{s}-01"), "%Y-%m-%d").is_ok();
    if valid {
        Ok(s.to_string())
    } else {
        Err(format!("expected YYYY-MM, got {s:?}"))
    }
}

fn parse_day(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| format!("expected YYYY-MM-DD, got {s:?}"))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
        .map_err(|_| format!("expected RFC 3339 timestamp or YYYY-MM-DD, got {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn months() {
        assert_eq!(parse_month("2026-01").unwrap(), "2026-01");
        assert!(parse_month("2026-1").is_err());
        assert!(parse_month("2026-13").is_err());
        assert!(parse_month("january").is_err());
    }

    #[test]
    fn times() {
        assert_eq!(
            parse_time("2026-01-13").unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 13, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_time("2026-01-13T10:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2026, 1, 13, 8, 30, 0).unwrap()
        );
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn audit_args_to_plan() {
        let cli = Cli::try_parse_from([
            "paperplease",
            "audit",
            "2026-01",
            "--sample",
            "10",
            "--reprocess",
            "--jobs",
            "2",
        ])
        .unwrap();
        let Command::Audit(args) = cli.command else {
            panic!("expected audit command");
        };
        let plan = args.plan().unwrap();
        assert_eq!(plan.months, ["2026-01"]);
        assert_eq!(plan.sample, Some(10));
        assert!(plan.reprocess);
        assert_eq!(plan.jobs, 2);
    }

    #[test]
    fn audit_date_window() {
        let cli = Cli::try_parse_from([
            "paperplease",
            "audit",
            "--since",
            "2026-01-05",
            "--until",
            "2026-01-31",
        ])
        .unwrap();
        let Command::Audit(args) = cli.command else {
            panic!("expected audit command");
        };
        let plan = args.plan().unwrap();
        assert!(plan.months.is_empty());
        assert_eq!(plan.since, NaiveDate::from_ymd_opt(2026, 1, 5));
        assert_eq!(plan.until, NaiveDate::from_ymd_opt(2026, 1, 31));

        let backwards = AuditArgs {
            since: NaiveDate::from_ymd_opt(2026, 2, 1),
            ..args
        };
        assert!(backwards.plan().is_err());
        assert!(parse_day("2026-02-30").is_err());
    }

    #[test]
    fn stats_views_are_exclusive() {
        let cli = Cli::try_parse_from(["paperplease", "stats", "--tech", "koby h"]).unwrap();
        let Command::Stats(args) = cli.command else {
            panic!("expected stats command");
        };
        assert_eq!(args.tech.as_deref(), Some("koby h"));
        assert!(!args.monthly);

        assert!(Cli::try_parse_from(["paperplease", "stats", "--monthly"]).is_ok());
        assert!(Cli::try_parse_from(["paperplease", "stats", "--month", "2026-01"]).is_ok());
        assert!(Cli::try_parse_from(["paperplease", "stats", "--tech", "x", "--monthly"]).is_err());
    }

    #[test]
    fn techs_add_persists_new_names_only() {
        let store = AuditStore::open().unwrap();
        assert!(add_technician(&store, " Zed Q ").unwrap());
        assert!(!add_technician(&store, "Zed Q").unwrap());
        // Built-in roster names are not stored again.
        assert!(!add_technician(&store, "Koby H").unwrap());
        assert_eq!(store.technicians().unwrap(), ["Zed Q"]);
        assert!(load_registry(&store).unwrap().contains("Zed Q"));
    }

    #[test]
    fn watch_takes_audit_args() {
        let cli = Cli::try_parse_from([
            "paperplease",
            "watch",
            "--every-hours",
            "6",
            "--tickets",
            "/srv/tickets",
        ])
        .unwrap();
        let Command::Watch { every_hours, audit } = cli.command else {
            panic!("expected watch command");
        };
        assert_eq!(every_hours, 6);
        assert_eq!(audit.tickets, PathBuf::from("/srv/tickets"));
        assert!(audit.month.is_none());
    }
}
