use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use crate::commands::{self, CommandReport, WatchOptions};
use crate::migrator::util::parse_legacy_datetime;

#[derive(Parser)]
#[command(name = "challenge-migrator")]
#[command(about = "Migrate legacy challenges into the modernized stores and keep them in sync", long_about = None)]
struct Cli {
    /// Print the command report as JSON.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone, Copy)]
struct BackgroundArgs {
    /// Run the pass on a worker thread and follow it until it finishes.
    #[arg(long, default_value_t = false)]
    background: bool,
    /// Seconds between progress log lines while following a background pass.
    #[arg(long, default_value_t = 5, requires = "background")]
    heartbeat_secs: u64,
    /// Cancel a background pass that runs longer than this many seconds.
    #[arg(long, requires = "background")]
    deadline_secs: Option<u64>,
}

impl BackgroundArgs {
    fn watch(self) -> Option<WatchOptions> {
        self.background.then(|| WatchOptions {
            heartbeat: Duration::from_secs(self.heartbeat_secs.max(1)),
            deadline: self.deadline_secs.map(Duration::from_secs),
        })
    }
}

#[derive(Subcommand)]
enum Command {
    /// Migrate legacy challenges modified inside a window (or one id).
    Migrate {
        #[arg(long, value_parser = parse_date_arg)]
        start_date: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_date_arg)]
        end_date: Option<DateTime<Utc>>,
        #[arg(long)]
        legacy_id: Option<i64>,
        /// Re-migrate entities that already succeeded.
        #[arg(long, default_value_t = false)]
        force: bool,
        #[command(flatten)]
        run: BackgroundArgs,
    },
    /// Queue drifted entities and drain the sync queue.
    Sync {
        #[arg(long, value_parser = parse_date_arg)]
        start_date: Option<DateTime<Utc>>,
        #[arg(long, value_parser = parse_date_arg)]
        end_date: Option<DateTime<Utc>>,
        #[arg(long)]
        legacy_id: Option<i64>,
        /// Resync every listed entity regardless of drift.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Only drain records that are already queued.
        #[arg(long, default_value_t = false)]
        skip_scan: bool,
        #[command(flatten)]
        run: BackgroundArgs,
    },
    /// List progress records.
    Progress {
        /// QUEUED, IN_PROGRESS, SUCCESS or FAILED.
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        legacy_id: Option<i64>,
        #[arg(long, default_value_t = 1)]
        page: u64,
        #[arg(long, default_value_t = 20)]
        per_page: u64,
    },
    /// Requeue one id, or every FAILED record, then drain.
    Retry {
        #[arg(long)]
        legacy_id: Option<i64>,
        #[command(flatten)]
        run: BackgroundArgs,
    },
    /// Ask the active run to stop after its current entity.
    Cancel,
    /// Show run state, progress counts and the last run summary.
    Status,
    /// Delete a migrated challenge and forget its progress record.
    Destroy {
        #[arg(long)]
        legacy_id: i64,
    },
    /// Check paths, config, environment and the run lock.
    Health,
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, or a bare `YYYY-MM-DD` (midnight UTC).
fn parse_date_arg(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Some(parsed) = parse_legacy_datetime(raw) {
        return Ok(parsed);
    }
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .ok_or_else(|| format!("invalid date {raw:?}; expected RFC 3339 or YYYY-MM-DD"))
}

fn print_report(report: &CommandReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("{}: {}", report.command, if report.ok { "ok" } else { "issues" });
    for detail in &report.details {
        println!("  {detail}");
    }
    for issue in &report.issues {
        println!("  ! {issue}");
    }
    Ok(())
}

/// Parse arguments, run the command and return the process exit code.
pub fn run() -> Result<i32> {
    let cli = Cli::parse();
    let report = match cli.command {
        Command::Migrate {
            start_date,
            end_date,
            legacy_id,
            force,
            run,
        } => commands::migrate::run(&commands::migrate::MigrateOptions {
            start_date,
            end_date,
            legacy_id,
            force,
            background: run.watch(),
        })?,
        Command::Sync {
            start_date,
            end_date,
            legacy_id,
            force,
            skip_scan,
            run,
        } => commands::sync::run(&commands::sync::SyncOptions {
            start_date,
            end_date,
            legacy_id,
            force,
            skip_scan,
            background: run.watch(),
        })?,
        Command::Progress {
            status,
            legacy_id,
            page,
            per_page,
        } => commands::progress::run(status.as_deref(), legacy_id, page, per_page)?,
        Command::Retry { legacy_id, run } => commands::retry::run(legacy_id, run.watch())?,
        Command::Cancel => commands::cancel::run()?,
        Command::Status => commands::status::run()?,
        Command::Destroy { legacy_id } => commands::destroy::run(legacy_id)?,
        Command::Health => commands::health::run()?,
    };
    print_report(&report, cli.json)?;
    Ok(if report.ok { 0 } else { 2 })
}
