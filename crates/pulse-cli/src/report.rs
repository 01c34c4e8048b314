//! Report command handlers: aggregate changes over a window, optionally store
//! the result, and list stored reports.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::Subcommand;
use pulse_core::Report;
use pulse_tracker::PgStore;

const DEFAULT_WINDOW_DAYS: i64 = 7;

/// Sub-commands available under `report`.
#[derive(Debug, Subcommand)]
pub enum ReportCommands {
    /// Aggregate changes detected in `[from, to)`
    Build {
        /// Window start, RFC 3339 or YYYY-MM-DD (defaults to seven days before `to`)
        #[arg(long, value_parser = parse_instant)]
        from: Option<DateTime<Utc>>,
        /// Window end, exclusive (defaults to now)
        #[arg(long, value_parser = parse_instant)]
        to: Option<DateTime<Utc>>,
        /// Store the report, replacing any stored report for the same window
        #[arg(long)]
        save: bool,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored reports, newest window first
    List {
        #[arg(long, default_value = "10")]
        limit: i64,
    },
}

/// Parse an RFC 3339 timestamp or a bare date (midnight UTC).
pub(crate) fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("'{value}' is neither RFC 3339 nor YYYY-MM-DD"))
}

/// Fill in missing window bounds relative to `now`.
pub(crate) fn resolve_window(
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = to.unwrap_or(now);
    let start = from.unwrap_or(end - Duration::days(DEFAULT_WINDOW_DAYS));
    (start, end)
}

/// # Errors
///
/// Returns an error if the window is empty or inverted, or a database
/// operation fails.
pub(crate) async fn run_report_build(
    pool: &sqlx::PgPool,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    save: bool,
    json: bool,
) -> anyhow::Result<()> {
    let (start, end) = resolve_window(from, to, Utc::now());
    let store = PgStore::new(pool.clone());
    let report = pulse_tracker::build_report(&store, start, end).await?;

    if save {
        let id = pulse_db::upsert_report(pool, &report).await?;
        tracing::info!(report_id = %id, week = %report.week_label, "report stored");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

/// # Errors
///
/// Returns an error if the database query fails.
pub(crate) async fn run_report_list(pool: &sqlx::PgPool, limit: i64) -> anyhow::Result<()> {
    let reports = pulse_db::list_reports(pool, limit.clamp(1, 100)).await?;

    if reports.is_empty() {
        println!("no stored reports; run `report build --save` first");
        return Ok(());
    }

    println!("{:<10}{:<22}{:<22}CHANGES", "WEEK", "FROM", "TO");
    for report in &reports {
        let contents = &report.contents;
        println!(
            "{:<10}{:<22}{:<22}{}",
            report.week_label,
            contents.window_start.format("%Y-%m-%d %H:%M").to_string(),
            contents.window_end.format("%Y-%m-%d %H:%M").to_string(),
            contents.total_changes
        );
    }
    Ok(())
}

fn print_report(report: &Report) {
    let contents = &report.contents;
    println!("# Change Report {}", report.week_label);
    println!();
    println!(
        "**Window**: {} to {}",
        contents.window_start.to_rfc3339(),
        contents.window_end.to_rfc3339()
    );
    println!("**Total changes**: {}", contents.total_changes);

    if contents.total_changes == 0 {
        println!();
        println!("No changes detected in this window.");
        return;
    }

    println!();
    println!("## By kind");
    println!();
    for (kind, count) in &contents.by_kind {
        println!("- {}: {count}", kind.as_str());
    }

    println!();
    println!("## By subject");
    println!();
    for subject in &contents.subjects {
        let kinds = subject
            .by_kind
            .iter()
            .map(|(kind, count)| format!("{} {count}", kind.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        println!("- **{}**: {} ({kinds})", subject.subject_name, subject.total);
    }
}
