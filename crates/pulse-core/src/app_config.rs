use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::{NaiveTime, Weekday};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,
    pub subjects_path: PathBuf,
    pub db_max_connections: u32,
    pub db_min_connections: u32,
    pub db_acquire_timeout_secs: u64,

    pub fetch_timeout_secs: u64,
    pub scraper_user_agent: String,
    /// Endpoint of a headless rendering service; websites are fetched directly when unset.
    pub render_url: Option<String>,
    pub max_concurrent_targets: usize,
    pub fetch_max_attempts: u32,
    pub fetch_retry_delay_secs: u64,
    pub run_timeout_secs: Option<u64>,
    pub max_social_posts: usize,

    pub significance_threshold: f64,
    pub canonical_max_bytes: usize,

    pub classifier_api_key: Option<String>,
    pub classifier_base_url: String,
    pub classifier_model: String,
    pub classifier_timeout_secs: u64,
    pub classifier_max_attempts: u32,
    pub classifier_backoff_base_secs: u64,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,

    pub weekly_run_day: Weekday,
    pub weekly_run_time: NaiveTime,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("bind_addr", &self.bind_addr)
            .field("log_level", &self.log_level)
            .field("subjects_path", &self.subjects_path)
            .field("database_url", &"[redacted]")
            .field("db_max_connections", &self.db_max_connections)
            .field("db_min_connections", &self.db_min_connections)
            .field("db_acquire_timeout_secs", &self.db_acquire_timeout_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("scraper_user_agent", &self.scraper_user_agent)
            .field("render_url", &self.render_url)
            .field("max_concurrent_targets", &self.max_concurrent_targets)
            .field("fetch_max_attempts", &self.fetch_max_attempts)
            .field("fetch_retry_delay_secs", &self.fetch_retry_delay_secs)
            .field("run_timeout_secs", &self.run_timeout_secs)
            .field("max_social_posts", &self.max_social_posts)
            .field("significance_threshold", &self.significance_threshold)
            .field("canonical_max_bytes", &self.canonical_max_bytes)
            .field(
                "classifier_api_key",
                &self.classifier_api_key.as_ref().map(|_| "[redacted]"),
            )
            .field("classifier_base_url", &self.classifier_base_url)
            .field("classifier_model", &self.classifier_model)
            .field("classifier_timeout_secs", &self.classifier_timeout_secs)
            .field("classifier_max_attempts", &self.classifier_max_attempts)
            .field(
                "classifier_backoff_base_secs",
                &self.classifier_backoff_base_secs,
            )
            .field("breaker_failure_threshold", &self.breaker_failure_threshold)
            .field("breaker_cooldown_secs", &self.breaker_cooldown_secs)
            .field("weekly_run_day", &self.weekly_run_day)
            .field("weekly_run_time", &self.weekly_run_time)
            .finish()
    }
}
