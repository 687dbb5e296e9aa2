//! API server setup and configuration.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::Request;
use hlsmux_engine::{Collaborators, DownloadError, HlsmuxConfig};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::routes;
use crate::error::{AppError, Result};

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address, `host:port`
    pub bind_address: String,
    /// Upper bound on one download request, including muxing
    pub request_timeout: Duration,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            request_timeout: Duration::from_secs(600),
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime logging
    pub start_time: Instant,
    /// Engine configuration every request session starts from
    pub config: Arc<HlsmuxConfig>,
    /// Manifest source, segment transport and mux backend shared by all sessions
    pub collaborators: Collaborators,
    pub request_timeout: Duration,
}

impl AppState {
    pub fn new(config: HlsmuxConfig, collaborators: Collaborators, request_timeout: Duration) -> Self {
        Self {
            start_time: Instant::now(),
            config: Arc::new(config),
            collaborators,
            request_timeout,
        }
    }

    /// State backed by the real HTTP client and ffmpeg.
    pub fn from_config(
        config: HlsmuxConfig,
        request_timeout: Duration,
    ) -> std::result::Result<Self, DownloadError> {
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::new(config, collaborators, request_timeout))
    }
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        routes::create_router(self.state.clone()).layer(
            TraceLayer::new_for_http().make_span_with(|req: &Request| {
                if req.uri().path().starts_with("/api/health") {
                    Span::none()
                } else {
                    tracing::info_span!(
                        "request",
                        method = %req.method(),
                        path = %req.uri().path(),
                    )
                }
            }),
        )
    }

    /// Start the server and run until the cancel token fires.
    pub async fn run(&self) -> Result<()> {
        let addr: SocketAddr = self
            .config
            .bind_address
            .parse()
            .map_err(|e| AppError::InvalidInput(format!("Invalid bind address: {e}")))?;

        let router = self.build_router();
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("API server listening on http://{}", listener.local_addr()?);

        let cancel_token = self.cancel_token.clone();
        let start_time = self.state.start_time;

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!(
                    uptime_secs = start_time.elapsed().as_secs(),
                    "API server shutting down..."
                );
            })
            .await?;

        Ok(())
    }
}
