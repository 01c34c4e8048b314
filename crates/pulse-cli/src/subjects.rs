//! Subject management: load `subjects.yaml` into the database and list what
//! is being tracked.

use std::path::{Path, PathBuf};

use clap::Subcommand;

/// Sub-commands available under `subjects`.
#[derive(Debug, Subcommand)]
pub enum SubjectCommands {
    /// Upsert subjects and targets from the YAML config, removing stale targets
    Sync {
        /// Path to the subjects file (defaults to `PULSE_SUBJECTS_PATH`)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Validate and print the file without writing to the database
        #[arg(long)]
        dry_run: bool,
    },
    /// List active subjects and their targets
    List,
}

/// Validate the subjects file and sync it into the database.
///
/// # Errors
///
/// Returns an error if the file fails validation or the sync transaction fails.
pub(crate) async fn run_subjects_sync(
    pool: &sqlx::PgPool,
    path: &Path,
    dry_run: bool,
) -> anyhow::Result<()> {
    let file = pulse_core::load_subjects(path)?;

    if dry_run {
        println!(
            "[dry-run] {} subject(s) in {}",
            file.subjects.len(),
            path.display()
        );
        for subject in &file.subjects {
            println!(
                "  {:<24}{:<10}{} target(s)",
                subject.slug(),
                subject.status.to_string(),
                subject.targets.len()
            );
        }
        return Ok(());
    }

    let summary = pulse_db::sync_subjects(pool, &file.subjects).await?;
    tracing::info!(
        subjects = summary.subjects,
        targets = summary.targets,
        targets_removed = summary.targets_removed,
        "subjects synced"
    );
    println!(
        "synced {} subject(s), {} target(s); removed {} stale target(s)",
        summary.subjects, summary.targets, summary.targets_removed
    );
    Ok(())
}

/// Print every active subject with its targets.
///
/// # Errors
///
/// Returns an error if the database query fails.
pub(crate) async fn run_subjects_list(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    let subjects = pulse_db::list_active_subjects(pool, None).await?;

    if subjects.is_empty() {
        println!("no active subjects; run `subjects sync` first");
        return Ok(());
    }

    println!("{:<24}{:<20}{:<22}TARGETS", "SLUG", "CATEGORY", "LAST OBSERVED");
    for subject in &subjects {
        let observed = subject.last_observed_at.map_or_else(
            || "never".to_string(),
            |at| at.format("%Y-%m-%d %H:%M").to_string(),
        );
        println!(
            "{:<24}{:<20}{:<22}{}",
            subject.slug,
            subject.category.as_deref().unwrap_or("-"),
            observed,
            subject.targets.len()
        );
        for target in &subject.targets {
            println!("    {:<12}{}", target.kind.as_str(), target.url);
        }
    }
    Ok(())
}
