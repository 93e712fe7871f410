//! Live-update listener.
//!
//! Accepts connections from a [`Transport`] and runs one [`Session`] task per
//! connection until the server's token is cancelled.

use crate::hub::Hub;
use crate::metrics;
use crate::session::{Session, SessionConfig};
use chatline_transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept loop for live-update sessions.
pub struct Acceptor<T> {
    transport: T,
    hub: Arc<Hub>,
    config: SessionConfig,
    cancel: CancellationToken,
    sessions: TaskTracker,
}

impl<T: Transport> Acceptor<T> {
    /// Create an acceptor. Every session gets a child of `cancel`.
    #[must_use]
    pub fn new(transport: T, hub: Arc<Hub>, config: SessionConfig, cancel: CancellationToken) -> Self {
        Self {
            transport,
            hub,
            config,
            cancel,
            sessions: TaskTracker::new(),
        }
    }

    /// Number of sessions still running.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Accept connections until cancelled, then wait for every session to
    /// finish its teardown.
    pub async fn run(self) {
        info!(transport = self.transport.name(), "Accepting live-update connections");

        loop {
            let conn = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                accepted = self.transport.accept() => accepted,
            };

            match conn {
                Ok(conn) => {
                    let session = Session::new(
                        conn,
                        self.hub.clone(),
                        self.config.clone(),
                        self.cancel.child_token(),
                    );
                    let id = session.id().clone();
                    self.sessions.spawn(async move {
                        let reason = session.run().await;
                        debug!(connection = %id, reason = %reason, "Session finished");
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    metrics::record_error("accept");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }

        self.sessions.close();
        info!(sessions = self.sessions.len(), "Waiting for sessions to close");
        self.sessions.wait().await;
        info!("Live-update listener stopped");
    }
}
