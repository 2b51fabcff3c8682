mod migrations;

use anyhow::Result;
use tracing::info;

use reaparr_api::{build_router, AppState};
use reaparr_core::bootstrap::{init_database, init_services, load_config};
use reaparr_core::logging;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration (validated on load)
    let config_path = std::env::args().nth(1);
    let config = load_config(config_path.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("Reaparr starting...");

    // 3. Database pool + migrations
    let pool = init_database(&config).await?;
    migrations::run_migrations(&pool).await?;

    // 4. Services and the job schedule
    let services = init_services(&config, pool)?;
    services.orchestrator.start().await?;

    // 5. Operations HTTP surface
    let state = AppState {
        orchestrator: services.orchestrator.clone(),
    };
    let router = build_router(state);
    let address = config.http_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!(address = %address, "HTTP server listening");

    let orchestrator = services.orchestrator.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 6. Stop the schedule; in-flight passes finish their transaction
    orchestrator.shutdown().await;
    info!("Reaparr stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
