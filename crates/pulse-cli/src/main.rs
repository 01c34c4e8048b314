mod report;
mod run;
mod subjects;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::report::ReportCommands;
use crate::run::RunCommands;
use crate::subjects::SubjectCommands;

#[derive(Debug, Parser)]
#[command(name = "pulse-cli")]
#[command(about = "Competitor change tracking command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Manage tracked subjects
    Subjects {
        #[command(subcommand)]
        command: SubjectCommands,
    },
    /// Start and inspect tracking runs
    Run {
        #[command(subcommand)]
        command: RunCommands,
    },
    /// Build and list change reports
    Report {
        #[command(subcommand)]
        command: ReportCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check database connectivity
    Ping,
    /// Apply pending migrations
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("pulse-cli ready; run `pulse-cli --help` for commands");
        return Ok(());
    };

    let config = pulse_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = pulse_db::PoolConfig::from_app_config(&config);
    let pool = pulse_db::connect_pool(&config.database_url, pool_config).await?;

    match command {
        Commands::Db { command } => match command {
            DbCommands::Ping => {
                pulse_db::ping(&pool).await?;
                println!("database ok");
            }
            DbCommands::Migrate => {
                let applied = pulse_db::run_migrations(&pool).await?;
                println!("applied {applied} migration(s)");
            }
        },
        Commands::Subjects { command } => match command {
            SubjectCommands::Sync { path, dry_run } => {
                let path = path.unwrap_or_else(|| config.subjects_path.clone());
                subjects::run_subjects_sync(&pool, &path, dry_run).await?;
            }
            SubjectCommands::List => subjects::run_subjects_list(&pool).await?,
        },
        Commands::Run { command } => match command {
            RunCommands::Start { subject } => {
                run::run_tracking(&pool, &config, subject.as_deref()).await?;
            }
            RunCommands::Status => run::run_status(&pool).await?,
            RunCommands::List { limit } => run::run_list(&pool, limit).await?,
            RunCommands::Reset { reason } => run::run_reset(&pool, &reason).await?,
        },
        Commands::Report { command } => match command {
            ReportCommands::Build {
                from,
                to,
                save,
                json,
            } => report::run_report_build(&pool, from, to, save, json).await?,
            ReportCommands::List { limit } => report::run_report_list(&pool, limit).await?,
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests;
