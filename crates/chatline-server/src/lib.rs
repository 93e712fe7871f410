//! # chatline-server
//!
//! Real-time chat fan-out server.
//!
//! Two listeners share one [`Hub`]:
//!
//! - the **live-update** listener runs an authenticated, ack-gated
//!   [`Session`] per TCP connection;
//! - the **HTTP API** posts and pages messages and lists who is online.
//!
//! ```text
//!  HTTP POST ──▶ MessageBus ──┐
//!                             ├──▶ Session queue ──▶ MSG/ONLINE/OFFLINE ──▶ client
//!  handshake ──▶ Presence  ───┘                    ◀── ACK ─────────────────
//! ```

pub mod acceptor;
pub mod client;
pub mod config;
pub mod http;
pub mod hub;
pub mod metrics;
pub mod rate_limit;
pub mod session;

pub use acceptor::Acceptor;
pub use client::{ChatClient, ClientError, Push};
pub use config::Config;
pub use hub::Hub;
pub use session::{CloseReason, Session, SessionConfig, SessionError, SessionState};

use anyhow::{Context, Result};
use chatline_transport::{TcpConfig, TcpTransport};
use crate::http::AppState;
use crate::rate_limit::RateLimiter;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A server with both listeners bound.
pub struct Server {
    config: Config,
    hub: Arc<Hub>,
    live: TcpTransport,
    api: TcpListener,
}

impl Server {
    /// Bind the live-update and HTTP listeners.
    ///
    /// # Errors
    ///
    /// Returns an error if an address is invalid or cannot be bound.
    pub async fn bind(config: Config) -> Result<Self> {
        let live_addr = config.live_addr()?;
        let api_addr = config.api_addr()?;

        let live = TcpTransport::new(TcpConfig {
            bind_addr: live_addr,
            max_line_length: config.delivery.max_line_length,
        })
        .await
        .with_context(|| format!("Failed to bind live-update listener on {}", live_addr))?;
        let api = TcpListener::bind(api_addr)
            .await
            .with_context(|| format!("Failed to bind HTTP listener on {}", api_addr))?;

        Ok(Self {
            config,
            hub: Arc::new(Hub::new()),
            live,
            api,
        })
    }

    /// The shared stores.
    #[must_use]
    pub fn hub(&self) -> Arc<Hub> {
        self.hub.clone()
    }

    /// Bound address of the live-update listener.
    #[must_use]
    pub fn live_addr(&self) -> Option<SocketAddr> {
        self.live.local_addr()
    }

    /// Bound address of the HTTP listener.
    #[must_use]
    pub fn api_addr(&self) -> Option<SocketAddr> {
        self.api.local_addr().ok()
    }

    /// Serve until `cancel` fires, then wait for every session to close.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let session_config = SessionConfig {
            ack_timeout: self.config.delivery.ack_timeout(),
        };
        let limiter = RateLimiter::new(
            self.config.rate_limit.max_requests,
            self.config.rate_limit.window(),
        );

        let acceptor = Acceptor::new(self.live, self.hub.clone(), session_config, cancel.child_token());
        let live = tokio::spawn(acceptor.run());

        let state = Arc::new(AppState::new(self.hub, limiter));
        let api = crate::http::serve(self.api, state, cancel.child_token()).await;
        if let Err(e) = &api {
            error!("HTTP server failed: {}", e);
            cancel.cancel();
        }

        live.await.context("Live-update listener panicked")?;
        api.context("HTTP server failed")?;

        info!("Server stopped");
        Ok(())
    }
}

/// Start metrics (if enabled), bind both listeners and serve until `cancel`
/// fires.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config, cancel: CancellationToken) -> Result<()> {
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let server = Server::bind(config).await?;
    if let (Some(live), Some(api)) = (server.live_addr(), server.api_addr()) {
        info!("Chatline listening: live updates on {}, HTTP API on {}", live, api);
    }
    server.run(cancel).await
}
