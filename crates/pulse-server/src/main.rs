mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use pulse_tracker::{PgStore, Stores};
use tracing_subscriber::EnvFilter;

use crate::api::{build_app, AppState};

/// How long shutdown waits for an active run to finish its in-flight targets.
const RUN_DRAIN_LIMIT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(pulse_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = pulse_db::PoolConfig::from_app_config(&config);
    let pool = pulse_db::connect_pool(&config.database_url, pool_config).await?;
    pulse_db::run_migrations(&pool).await?;

    let stores = Stores::shared(Arc::new(PgStore::new(pool)));
    let tracker = pulse_tracker::build_tracker(&config, stores)?;

    let _scheduler = scheduler::build_scheduler(tracker.clone(), &config).await?;

    let app = build_app(AppState {
        tracker: tracker.clone(),
    });

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "pulse-server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if tracker.stop() {
        tracing::info!("asked the active tracking run to stop");
        if tracker.wait_idle(RUN_DRAIN_LIMIT).await {
            tracing::info!("tracking run finalized before shutdown");
        } else {
            tracing::warn!(
                limit_secs = RUN_DRAIN_LIMIT.as_secs(),
                "tracking run still active at shutdown; clear it with `pulse-cli run reset`"
            );
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
