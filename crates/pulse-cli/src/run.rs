//! Tracking run command handlers.
//!
//! `run start` drives a run to completion in this process. Ctrl-C asks the
//! run to stop picking up new targets; targets already in flight finish.

use std::sync::Arc;

use clap::Subcommand;
use pulse_core::{AppConfig, Run};
use pulse_tracker::{PgStore, Stores, TrackError};

/// Sub-commands available under `run`.
#[derive(Debug, Subcommand)]
pub enum RunCommands {
    /// Run a tracking pass over all active subjects and wait for it to finish
    Start {
        /// Restrict the run to a single subject (by slug)
        #[arg(long)]
        subject: Option<String>,
    },
    /// Show the running run, or the most recent one
    Status,
    /// List recent runs
    List {
        /// Maximum number of runs to show
        #[arg(long, default_value = "20")]
        limit: i64,
    },
    /// Force-finish a run left `running` by a process that died
    Reset {
        /// Reason recorded on the run
        #[arg(long, default_value = "reset by operator")]
        reason: String,
    },
}

/// Run one tracking pass and print its outcome.
///
/// # Errors
///
/// Returns an error if another run is active, the subject is unknown, or the
/// run cannot be created or finalized.
pub(crate) async fn run_tracking(
    pool: &sqlx::PgPool,
    config: &AppConfig,
    subject: Option<&str>,
) -> anyhow::Result<()> {
    let stores = Stores::shared(Arc::new(PgStore::new(pool.clone())));
    let tracker = pulse_tracker::build_tracker(config, stores)?;

    let stopper = tracker.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("stop requested; waiting for in-flight targets");
            stopper.stop();
        }
    });

    let result = tracker.run_once(subject).await;
    interrupt.abort();

    let run = match result {
        Ok(run) => run,
        Err(TrackError::ConcurrencyViolation { active_run_id }) => {
            let active = active_run_id.map_or_else(|| "unknown".to_string(), |id| id.to_string());
            anyhow::bail!(
                "a tracking run is already active ({active}); use `run reset` if its process is gone"
            );
        }
        Err(err) => return Err(err.into()),
    };

    print_run(&run);
    Ok(())
}

/// # Errors
///
/// Returns an error if the database query fails.
pub(crate) async fn run_status(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let run = match pulse_db::active_run(pool).await? {
        Some(run) => Some(run),
        None => pulse_db::latest_run(pool).await?,
    };

    match run {
        Some(run) => print_run(&run),
        None => println!("no tracking runs yet; run `run start` first"),
    }
    Ok(())
}

/// # Errors
///
/// Returns an error if the database query fails.
pub(crate) async fn run_list(pool: &sqlx::PgPool, limit: i64) -> anyhow::Result<()> {
    let runs = pulse_db::list_runs(pool, limit.clamp(1, 200)).await?;

    if runs.is_empty() {
        println!("no tracking runs yet");
        return Ok(());
    }

    println!(
        "{:<38}{:<11}{:<18}{:<7}{:<8}{:<8}SCOPE",
        "RUN", "STATUS", "STARTED", "OK", "FAILED", "CHANGES"
    );
    for run in &runs {
        println!(
            "{:<38}{:<11}{:<18}{:<7}{:<8}{:<8}{}",
            run.id.to_string(),
            run.status.as_str(),
            run.started_at.format("%Y-%m-%d %H:%M").to_string(),
            run.counters.succeeded,
            run.counters.failed,
            run.counters.changes(),
            run.scope.as_deref().unwrap_or("all")
        );
    }
    Ok(())
}

/// Release the run lock held by a dead process.
///
/// # Errors
///
/// Returns an error if the database update fails.
pub(crate) async fn run_reset(pool: &sqlx::PgPool, reason: &str) -> anyhow::Result<()> {
    match pulse_db::force_release_run_lock(pool, reason).await? {
        Some(id) => {
            tracing::warn!(run_id = %id, reason, "run lock force-released");
            println!("run {id} marked as error; a new run can start");
        }
        None => println!("no active run; nothing to reset"),
    }
    Ok(())
}

fn print_run(run: &Run) {
    let counters = &run.counters;
    println!("Run:       {}", run.id);
    println!("Status:    {}", run.status);
    println!("Scope:     {}", run.scope.as_deref().unwrap_or("all subjects"));
    println!("Started:   {}", run.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(finished) = run.finished_at {
        println!("Finished:  {}", finished.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!(
        "Targets:   {} processed, {} succeeded, {} failed",
        counters.processed(),
        counters.succeeded,
        counters.failed
    );
    println!(
        "Outcomes:  {} baseline, {} unchanged, {} classified, {} unclassified",
        counters.baseline,
        counters.skipped_insignificant,
        counters.classified,
        counters.unclassified
    );
    if let Some(message) = &run.error_message {
        println!("Error:     {message}");
    }
}
