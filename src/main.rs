use anyhow::Result;
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use lost_found::{config, db, services::lost_found_service::LostFoundService};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting lost-found with config: {:?}", cfg);

    // --- Initialize SQLite connection + schema ---
    let pool = db::connect(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Initialize core service + background sweeper ---
    let service = LostFoundService::new(Arc::new(pool), cfg.service_settings());
    let mut sweeper = service.expiry_sweeper(cfg.sweep_interval());
    sweeper.start();

    // --- Build router ---
    let app = lost_found::app(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => {
            sweeper.stop().await;
            return Err(err.into());
        }
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    sweeper.stop().await;
    tracing::info!("Shutdown complete");
    served?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
