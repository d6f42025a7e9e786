//! Prize draw HTTP server.
//!
//! Serves the API, exports Prometheus metrics, and runs the reclamation
//! sweep and automatic draws unless `SCHEDULER_ENABLED=false`.

use prize_draw_core::{CoreEnvironment, PrizeDrawCore};
use prize_draw_postgres::PostgresTicketStore;
use prize_draw_server::{AppState, Config, Scheduler, build_router, telemetry};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    telemetry::init_tracing(&config.server.log_level);
    info!("Starting prize draw server");

    telemetry::install_metrics(&config.server.metrics_host, config.server.metrics_port)?;

    info!(
        max_connections = config.postgres.max_connections,
        "Connecting to PostgreSQL"
    );
    let store =
        Arc::new(PostgresTicketStore::connect_with(&config.postgres.url, &config.pool_settings()).await?);
    store.migrate().await?;

    let core = PrizeDrawCore::new(
        CoreEnvironment::new(store.clone(), store),
        config.reservation_policy(),
        config.notification_policy(),
    );

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let jobs = if config.scheduler.enabled {
        Scheduler::new(core.clone(), config.scheduler.clone()).spawn(&shutdown_tx)
    } else {
        info!("Scheduler disabled");
        Vec::new()
    };

    let app = build_router(AppState::new(core, config.scheduler.default_winner_count));
    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(%address, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, stopping background jobs");
    let _ = shutdown_tx.send(());
    await_shutdown(jobs, Duration::from_secs(config.server.shutdown_timeout)).await;

    info!("Shutdown complete");
    Ok(())
}

async fn await_shutdown(handles: Vec<JoinHandle<()>>, timeout: Duration) {
    for (idx, handle) in handles.into_iter().enumerate() {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!(job = idx, "Job stopped"),
            Ok(Err(e)) => warn!(job = idx, error = %e, "Job task failed"),
            Err(_) => warn!(job = idx, "Job shutdown timed out"),
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
