use super::*;
use crate::report::{parse_instant, resolve_window};
use chrono::{TimeZone, Utc};

#[test]
fn no_command_is_none() {
    let cli = Cli::try_parse_from(["pulse-cli"]).expect("expected valid cli args");
    assert!(cli.command.is_none());
}

#[test]
fn parses_db_migrate_command() {
    let cli = Cli::try_parse_from(["pulse-cli", "db", "migrate"]).expect("expected valid cli args");

    assert!(matches!(
        cli.command,
        Some(Commands::Db {
            command: DbCommands::Migrate
        })
    ));
}

#[test]
fn parses_subjects_sync_with_path_and_dry_run() {
    let cli = Cli::try_parse_from([
        "pulse-cli",
        "subjects",
        "sync",
        "--path",
        "config/other.yaml",
        "--dry-run",
    ])
    .unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Subjects {
            command: SubjectCommands::Sync {
                path: Some(ref p),
                dry_run: true
            }
        }) if p.to_str() == Some("config/other.yaml")
    ));
}

#[test]
fn run_start_defaults_to_all_subjects() {
    let cli = Cli::try_parse_from(["pulse-cli", "run", "start"]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Run {
            command: RunCommands::Start { subject: None }
        })
    ));
}

#[test]
fn run_start_accepts_subject_filter() {
    let cli = Cli::try_parse_from(["pulse-cli", "run", "start", "--subject", "acme"]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Run {
            command: RunCommands::Start { subject: Some(ref s) }
        }) if s == "acme"
    ));
}

#[test]
fn run_list_default_limit() {
    let cli = Cli::try_parse_from(["pulse-cli", "run", "list"]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Run {
            command: RunCommands::List { limit: 20 }
        })
    ));
}

#[test]
fn run_reset_has_default_reason() {
    let cli = Cli::try_parse_from(["pulse-cli", "run", "reset"]).unwrap();
    assert!(matches!(
        cli.command,
        Some(Commands::Run {
            command: RunCommands::Reset { ref reason }
        }) if reason == "reset by operator"
    ));
}

#[test]
fn report_build_parses_dates_and_flags() {
    let cli = Cli::try_parse_from([
        "pulse-cli",
        "report",
        "build",
        "--from",
        "2025-08-18",
        "--to",
        "2025-08-25T00:00:00Z",
        "--save",
    ])
    .unwrap();
    let Some(Commands::Report {
        command:
            ReportCommands::Build {
                from,
                to,
                save,
                json,
            },
    }) = cli.command
    else {
        panic!("expected report build");
    };
    assert_eq!(from, Some(Utc.with_ymd_and_hms(2025, 8, 18, 0, 0, 0).unwrap()));
    assert_eq!(to, Some(Utc.with_ymd_and_hms(2025, 8, 25, 0, 0, 0).unwrap()));
    assert!(save);
    assert!(!json);
}

#[test]
fn report_build_rejects_garbage_dates() {
    let result = Cli::try_parse_from(["pulse-cli", "report", "build", "--from", "last week"]);
    assert!(result.is_err());
}

#[test]
fn parse_instant_normalizes_offsets_to_utc() {
    let at = parse_instant("2025-08-18T09:00:00+02:00").unwrap();
    assert_eq!(at, Utc.with_ymd_and_hms(2025, 8, 18, 7, 0, 0).unwrap());
}

#[test]
fn resolve_window_defaults_to_previous_seven_days() {
    let now = Utc.with_ymd_and_hms(2025, 8, 25, 9, 0, 0).unwrap();
    let (start, end) = resolve_window(None, None, now);
    assert_eq!(end, now);
    assert_eq!(start, Utc.with_ymd_and_hms(2025, 8, 18, 9, 0, 0).unwrap());
}

#[test]
fn resolve_window_keeps_explicit_bounds() {
    let now = Utc::now();
    let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
    assert_eq!(resolve_window(Some(from), Some(to), now), (from, to));
}
