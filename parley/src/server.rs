//! Server lifecycle management
//!
//! Binds the HTTP/WebSocket listener, waits for a shutdown signal, then
//! cancels live sessions and waits for them to drain before closing the
//! database pool.

use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use parley_api::{create_router, AppState, RelayContext};
use parley_core::Config;

pub struct ParleyServer {
    config: Config,
    relay: RelayContext,
    pool: Option<PgPool>,
}

impl ParleyServer {
    pub fn new(config: Config, relay: RelayContext, pool: Option<PgPool>) -> Self {
        Self {
            config,
            relay,
            pool,
        }
    }

    /// Start the server and wait for a shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let listener = tokio::net::TcpListener::bind(self.config.http_address())
            .await
            .map_err(|e| {
                anyhow::anyhow!("Failed to bind HTTP address {}: {e}", self.config.http_address())
            })?;
        info!("HTTP server listening on {}", listener.local_addr()?);

        let http_handle = self.start_http_server(listener, shutdown_rx);

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        // Stop accepting new connections
        let _ = shutdown_tx.send(true);

        self.shutdown().await;
        Ok(())
    }

    fn start_http_server(
        &self,
        listener: tokio::net::TcpListener,
        shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let state = AppState::new(
            self.relay.clone(),
            self.config.server.max_frame_bytes,
            self.config.relay.history_limit,
        );
        let router = create_router(state);

        tokio::spawn(async move {
            let mut rx = shutdown_rx;
            let graceful = async move {
                let _ = rx.changed().await;
            };

            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        })
    }

    async fn shutdown(&self) {
        info!("Shutting down Parley server...");

        // 1. Cancel live sessions and wait for them to drain (with timeout)
        let registry = &self.relay.registry;
        let active = registry.close_all();
        if active > 0 {
            let drain_timeout = Duration::from_secs(self.config.server.shutdown_drain_seconds);
            let drain_poll_interval = Duration::from_millis(100);
            info!(
                "Waiting up to {}s for {} session(s) to drain...",
                drain_timeout.as_secs(),
                active
            );
            let deadline = tokio::time::Instant::now() + drain_timeout;
            loop {
                let remaining = registry.session_count();
                if remaining == 0 {
                    info!("All sessions drained");
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    warn!(
                        "Drain timeout reached with {} session(s) still active, proceeding with shutdown",
                        remaining
                    );
                    break;
                }
                tokio::time::sleep(drain_poll_interval).await;
            }
        }

        // 2. Close the database connection pool
        if let Some(pool) = &self.pool {
            info!("Closing database connection pool...");
            pool.close().await;
            info!("Database pool closed");
        }

        info!("Parley server shut down complete");
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
