//! Background job scheduler.
//!
//! Registers the weekly tracking job: a full run at the configured weekday
//! and UTC time, followed by the report for the seven days before that day.

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc, Weekday};
use pulse_core::AppConfig;
use pulse_tracker::{TrackError, Tracker};
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

const REPORT_WINDOW_DAYS: i64 = 7;

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive for
/// the lifetime of the process. Dropping it shuts down all scheduled jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised, the
/// weekly job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(
    tracker: Tracker,
    config: &AppConfig,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    register_weekly_job(
        &scheduler,
        tracker,
        config.weekly_run_day,
        config.weekly_run_time,
    )
    .await?;
    scheduler.start().await?;
    Ok(scheduler)
}

/// Six-field cron expression (`sec min hour dom month dow`) for a weekly slot.
pub(crate) fn weekly_cron(day: Weekday, time: NaiveTime) -> String {
    format!("0 {} {} * * {day}", time.minute(), time.hour())
}

/// The seven full days before the day containing `now`, as `[start, end)`.
///
/// A rerun later the same day yields the same window and replaces the stored report.
pub(crate) fn report_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    (end - Duration::days(REPORT_WINDOW_DAYS), end)
}

async fn register_weekly_job(
    scheduler: &JobScheduler,
    tracker: Tracker,
    day: Weekday,
    time: NaiveTime,
) -> Result<(), JobSchedulerError> {
    let schedule = weekly_cron(day, time);
    tracing::info!(schedule = %schedule, "scheduler: registering weekly tracking job");

    let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
        let tracker = tracker.clone();
        Box::pin(async move {
            tracing::info!("scheduler: starting weekly tracking run");
            run_weekly(&tracker).await;
            tracing::info!("scheduler: weekly tracking job complete");
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}

/// Run a full tracking pass, then store the weekly report.
///
/// A run already in progress is left alone; the report is still built.
pub(crate) async fn run_weekly(tracker: &Tracker) {
    match tracker.run_once(None).await {
        Ok(run) => tracing::info!(
            run_id = %run.id,
            status = %run.status,
            changes = run.counters.changes(),
            failed = run.counters.failed,
            "scheduler: weekly run finished"
        ),
        Err(TrackError::ConcurrencyViolation { active_run_id }) => tracing::info!(
            active_run_id = ?active_run_id,
            "scheduler: a run is already active; skipping weekly run"
        ),
        Err(err) => tracing::error!(error = %err, "scheduler: weekly run failed"),
    }

    let (start, end) = report_window(Utc::now());
    if let Err(err) = tracker.publish_report(start, end).await {
        tracing::error!(error = %err, "scheduler: failed to store weekly report");
    }
}
