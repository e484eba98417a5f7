//! carepath-webhookd
//!
//! Runs the webhook retry scheduler against PostgreSQL and, when
//! `ADMIN_BIND_ADDR` is set, serves the subscription admin API.

mod config;
mod logging;
mod tenant;

use std::sync::Arc;

use axum::Router;
use carepath_db::{run_migrations, DbPool};
use carepath_webhooks::{webhooks_router, Dispatcher, PgStore, RetryScheduler, WebhooksState};
use tokio_util::sync::CancellationToken;

use crate::config::Config;

#[tokio::main]
async fn main() {
    // Load configuration (fail fast on missing required vars)
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("FATAL: Configuration error: {e}");
            std::process::exit(1);
        }
    };

    logging::init_logging(&config.rust_log);

    tracing::info!(
        app_env = %config.app_env,
        admin_bind_addr = ?config.admin_bind_addr,
        "Starting carepath-webhookd"
    );

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "carepath-webhookd terminated with error");
        std::process::exit(1);
    }

    tracing::info!("carepath-webhookd stopped");
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let pool = DbPool::connect(&config.database_url).await?;
    run_migrations(&pool).await?;
    tracing::info!("Database ready");

    let store = Arc::new(PgStore::from_db_pool(&pool));
    let webhooks = &config.webhooks;

    let dispatcher = Dispatcher::new(webhooks.encryption_key.clone(), webhooks.request_timeout)?
        .with_backoff(webhooks.scheduler.backoff);

    let shutdown = CancellationToken::new();
    let scheduler = RetryScheduler::new(
        store.clone(),
        store.clone(),
        Arc::new(dispatcher),
        webhooks.scheduler.clone(),
    )
    .with_shutdown_token(shutdown.clone());

    let worker = tokio::spawn(async move { scheduler.run().await });

    let admin = match config.admin_bind_addr {
        Some(addr) => {
            let state = WebhooksState::new(store.clone(), store.clone(), webhooks);
            let app: Router = webhooks_router(state)
                .layer(axum::middleware::from_fn(tenant::require_tenant));

            let listener = tokio::net::TcpListener::bind(addr).await?;
            tracing::info!(addr = %addr, "Admin API listening");

            let token = shutdown.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await
            }))
        }
        None => None,
    };

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, draining in-flight deliveries");
    shutdown.cancel();

    if let Err(e) = worker.await {
        tracing::error!(error = %e, "Retry scheduler task failed");
    }
    if let Some(admin) = admin {
        match admin.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API server error"),
            Err(e) => tracing::error!(error = %e, "Admin API task failed"),
        }
    }

    pool.inner().close().await;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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
}
