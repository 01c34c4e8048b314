use chrono::{NaiveTime, Weekday};

use crate::app_config::{AppConfig, Environment};
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if required env vars are missing or values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
#[allow(clippy::too_many_lines)]
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;

    let require = |var: &str| -> Result<String, ConfigError> {
        lookup(var).map_err(|_| ConfigError::MissingEnvVar(var.to_string()))
    };

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_addr = |var: &str, default: &str| -> Result<SocketAddr, ConfigError> {
        or_default(var, default)
            .parse::<SocketAddr>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let at_least_one_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let value = parse_u32(var, default)?;
        if value == 0 {
            return Err(invalid(var, "must be at least 1".to_string()));
        }
        Ok(value)
    };

    let database_url = require("DATABASE_URL")?;
    let env = parse_environment(&or_default("PULSE_ENV", "development"));

    let bind_addr = parse_addr("PULSE_BIND_ADDR", "0.0.0.0:3000")?;
    let log_level = or_default("PULSE_LOG_LEVEL", "info");
    let subjects_path = PathBuf::from(or_default(
        "PULSE_SUBJECTS_PATH",
        "./config/subjects.yaml",
    ));

    let db_max_connections = parse_u32("PULSE_DB_MAX_CONNECTIONS", "10")?;
    let db_min_connections = parse_u32("PULSE_DB_MIN_CONNECTIONS", "1")?;
    let db_acquire_timeout_secs = parse_u64("PULSE_DB_ACQUIRE_TIMEOUT_SECS", "10")?;

    let fetch_timeout_secs = parse_u64("PULSE_FETCH_TIMEOUT_SECS", "30")?;
    let scraper_user_agent = or_default("PULSE_SCRAPER_USER_AGENT", "pulse/0.1 (change-tracking)");
    let render_url = lookup("PULSE_RENDER_URL").ok().filter(|s| !s.is_empty());
    let max_concurrent_targets = parse_usize("PULSE_MAX_CONCURRENT_TARGETS", "4")?;
    if max_concurrent_targets == 0 {
        return Err(invalid(
            "PULSE_MAX_CONCURRENT_TARGETS",
            "must be at least 1".to_string(),
        ));
    }
    let fetch_max_attempts = at_least_one_u32("PULSE_FETCH_MAX_ATTEMPTS", "3")?;
    let fetch_retry_delay_secs = parse_u64("PULSE_FETCH_RETRY_DELAY_SECS", "60")?;
    let run_timeout_secs = match lookup("PULSE_RUN_TIMEOUT_SECS") {
        Ok(raw) if !raw.is_empty() => Some(
            raw.parse::<u64>()
                .map_err(|e| invalid("PULSE_RUN_TIMEOUT_SECS", e.to_string()))?,
        ),
        _ => None,
    };
    let max_social_posts = parse_usize("PULSE_MAX_SOCIAL_POSTS", "10")?;

    let significance_threshold = parse_threshold(&or_default(
        "PULSE_SIGNIFICANCE_THRESHOLD",
        "0.02",
    ))?;
    let canonical_max_bytes = parse_usize("PULSE_CANONICAL_MAX_BYTES", "204800")?;

    let classifier_api_key = lookup("OPENAI_API_KEY").ok().filter(|s| !s.is_empty());
    let classifier_base_url = or_default("PULSE_CLASSIFIER_BASE_URL", "https://api.openai.com/v1")
        .trim_end_matches('/')
        .to_string();
    let classifier_model = or_default("PULSE_CLASSIFIER_MODEL", "gpt-4o-mini");
    let classifier_timeout_secs = parse_u64("PULSE_CLASSIFIER_TIMEOUT_SECS", "30")?;
    let classifier_max_attempts = at_least_one_u32("PULSE_CLASSIFIER_MAX_ATTEMPTS", "3")?;
    let classifier_backoff_base_secs = parse_u64("PULSE_CLASSIFIER_BACKOFF_BASE_SECS", "2")?;
    let breaker_failure_threshold = at_least_one_u32("PULSE_BREAKER_FAILURE_THRESHOLD", "5")?;
    let breaker_cooldown_secs = parse_u64("PULSE_BREAKER_COOLDOWN_SECS", "300")?;

    let weekly_run_day = parse_weekday(&or_default("PULSE_WEEKLY_RUN_DAY", "monday"))?;
    let weekly_run_time = parse_run_time(&or_default("PULSE_WEEKLY_RUN_TIME", "09:00"))?;

    Ok(AppConfig {
        database_url,
        env,
        bind_addr,
        log_level,
        subjects_path,
        db_max_connections,
        db_min_connections,
        db_acquire_timeout_secs,
        fetch_timeout_secs,
        scraper_user_agent,
        render_url,
        max_concurrent_targets,
        fetch_max_attempts,
        fetch_retry_delay_secs,
        run_timeout_secs,
        max_social_posts,
        significance_threshold,
        canonical_max_bytes,
        classifier_api_key,
        classifier_base_url,
        classifier_model,
        classifier_timeout_secs,
        classifier_max_attempts,
        classifier_backoff_base_secs,
        breaker_failure_threshold,
        breaker_cooldown_secs,
        weekly_run_day,
        weekly_run_time,
    })
}

/// Parse a string into an `Environment` variant.
///
/// Unrecognized values default to `Environment::Development`.
fn parse_environment(s: &str) -> Environment {
    match s {
        "production" => Environment::Production,
        "test" => Environment::Test,
        _ => Environment::Development,
    }
}

fn parse_threshold(raw: &str) -> Result<f64, ConfigError> {
    let value = raw
        .parse::<f64>()
        .map_err(|e| ConfigError::InvalidEnvVar {
            var: "PULSE_SIGNIFICANCE_THRESHOLD".to_string(),
            reason: e.to_string(),
        })?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::InvalidEnvVar {
            var: "PULSE_SIGNIFICANCE_THRESHOLD".to_string(),
            reason: format!("{value} is outside [0, 1]"),
        });
    }
    Ok(value)
}

fn parse_weekday(raw: &str) -> Result<Weekday, ConfigError> {
    raw.trim()
        .parse::<Weekday>()
        .map_err(|_| ConfigError::InvalidEnvVar {
            var: "PULSE_WEEKLY_RUN_DAY".to_string(),
            reason: format!("'{raw}' is not a day of the week"),
        })
}

fn parse_run_time(raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|e| ConfigError::InvalidEnvVar {
        var: "PULSE_WEEKLY_RUN_TIME".to_string(),
        reason: format!("expected HH:MM: {e}"),
    })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
