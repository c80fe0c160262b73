use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use lectern_core::config::PlatformConfig;
use lectern_core::db::sqlite::{
    SqliteAgsRepository, SqliteRosterRepository, SqliteToolRepository, SqliteValidationRepository,
};
use lectern_core::jwks_cache::JwksCache;
use lectern_core::keys::PlatformKeys;
use lectern_platform::{router, AppState};

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Run the `serve` command: start the platform HTTP server.
pub async fn run(port_override: Option<u16>) -> anyhow::Result<()> {
    let config = PlatformConfig::from_env();
    let port = port_override.unwrap_or(config.port);

    // Initialize signing keys before accepting traffic so a generated dev
    // key prints its export lines immediately at startup.
    let keys = Arc::new(PlatformKeys::from_config(&config).context("initialize signing keys")?);
    info!(kid = %keys.kid(), "platform signing key ready");

    let tools = SqliteToolRepository::connect(&config.tools_db_path)
        .await
        .context("open tools database")?;
    let validation = SqliteValidationRepository::connect(&config.validation_db_path)
        .await
        .context("open validation database")?;
    let scores = SqliteAgsRepository::connect(&config.scores_db_path)
        .await
        .context("open scores database")?;
    let roster = SqliteRosterRepository::connect(&config.roster_db_path)
        .await
        .context("open roster database")?;

    let pools = [
        tools.pool().clone(),
        validation.pool().clone(),
        scores.pool().clone(),
        roster.pool().clone(),
    ];

    let state = Arc::new(AppState {
        tools: Arc::new(tools),
        validation: Arc::new(validation),
        scores: Arc::new(scores),
        roster: Arc::new(roster),
        keys,
        jwks_cache: Arc::new(JwksCache::default()),
        config: config.clone(),
    });
    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(issuer = %config.issuer, "listening on {addr}");

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::watch::channel(false);
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
    });

    shutdown_signal().await;
    info!("shutting down...");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(joined) => joined?.context("server error")?,
        Err(_) => warn!("shutdown grace expired; dropping in-flight requests"),
    }

    for pool in pools {
        pool.close().await;
    }
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("received shutdown signal");
}
