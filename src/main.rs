mod backend;
mod config;
mod engine;
mod logging;
mod progress;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use backend::{AppState, RateLimiter, router::create_router};
use tokio_util::sync::CancellationToken;

/// Periodically forget callers whose rate limit window has passed
async fn purge_rate_limits(limiter: Arc<RateLimiter>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(limiter.window().max(Duration::from_secs(1)));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let removed = limiter.purge_stale();
                if removed > 0 {
                    tracing::debug!("Purged {removed} stale rate limit entries");
                }
            }
        }
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutting down, cancelling active downloads...");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    let config = config::config();
    logging::init_logging(&config.log)?;

    // create save root
    if !config.save_root.exists() {
        std::fs::create_dir_all(&config.save_root)?;
        tracing::info!("Directory '{}' does not exist, creating...", config.save_root.display());
    } else {
        tracing::info!("Saving downloads under '{}'", config.save_root.display());
    }

    if config.gateway.required_api_key().is_some() {
        tracing::info!("API key validation enabled");
    } else {
        tracing::warn!("API_KEY is not set, download requests are not authenticated");
    }
    tracing::info!(
        "Rate limit: {} requests per {}s per caller",
        config.gateway.rate_limit_max,
        config.gateway.rate_limit_window_secs
    );

    let addr = SocketAddr::new(config.host, config.port);
    let shutdown = CancellationToken::new();
    let state = AppState::new(config, shutdown.clone())?;

    tokio::spawn(purge_rate_limits(state.limiter.clone(), shutdown.clone()));

    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on: {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown))
    .await?;

    tracing::info!("Server stopped");
    Ok(())
}
