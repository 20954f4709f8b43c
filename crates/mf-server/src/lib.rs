//! mf-server: HTTP API for the meshforge conversion service.
//!
//! - Axum router over [`mf_convert::ConversionService`]
//! - Sync point (deferred removals, store reconciliation, task sweep) before
//!   every API request, plus a periodic background sweep
//! - Graceful shutdown via signal handling

pub mod context;
pub mod error;
pub mod middleware;
pub mod router;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use mf_convert::{start_sweeper, ConversionService};
use mf_core::config::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// Start the meshforge server and run until a shutdown signal arrives.
pub async fn start(config: Config) -> mf_core::Result<()> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| mf_core::Error::Internal(format!("Invalid server address: {e}")))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| mf_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal(shutdown.clone()).await;
        shutdown.cancel();
    });

    serve(listener, config, cancel).await
}

/// Build the service on `listener` and serve until `cancel` fires.
pub async fn serve(listener: TcpListener, config: Config, cancel: CancellationToken) -> mf_core::Result<()> {
    for info in mf_convert::check_tools(&config.tools) {
        if info.available {
            tracing::info!("Tool found: {} ({:?})", info.name, info.path);
        } else {
            tracing::warn!("Tool not found: {}", info.name);
        }
    }

    let service = Arc::new(ConversionService::open(&config, cancel.child_token()).await?);

    let sweeper = (config.tasks.sweep_interval_secs > 0).then(|| {
        start_sweeper(
            Arc::clone(service.registry()),
            config.tasks.sweep_interval(),
            cancel.clone(),
        )
    });

    let ctx = AppContext::new(Arc::clone(&service), config);
    let app = router::build_router(ctx);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Starting server on {addr}");
    }

    let graceful = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful.cancelled().await })
        .await
        .map_err(|e| mf_core::Error::Internal(format!("Server error: {e}")))?;

    cancel.cancel();
    if let Some(handle) = sweeper {
        if let Err(e) = handle.await {
            tracing::warn!("Task sweeper ended abnormally: {e}");
        }
    }
    service.shutdown().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
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
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = cancel.cancelled() => {}
    }

    tracing::info!("Shutdown signal received");
}
