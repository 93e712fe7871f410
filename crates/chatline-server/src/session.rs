//! Live-update sessions.
//!
//! A session owns one client connection for its whole life:
//!
//! ```text
//! Connecting → AwaitUsername → AwaitPublicKey → AwaitSignature → Verifying
//!            → AwaitChannel → AwaitReadyAck → Active → Closing → Closed
//! ```
//!
//! Once active, bus and presence callbacks push delivery jobs onto the
//! session's queue, and the session's own task drains it one job at a time:
//! a push is sent, and the next one waits until the client acknowledges it.
//! Any failure, timeout or cancellation tears the whole session down.

use crate::hub::Hub;
use crate::metrics;
use chatline_core::{Message, MessageEvent, OnlineUser, PresenceEvent, Subscription};
use chatline_protocol::{ServerLine, ACK};
use chatline_transport::{Connection, ConnectionId, TransportError};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default time a client has to acknowledge a push.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on the best-effort disconnect notice.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-session settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time allowed for each push acknowledgement.
    pub ack_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

/// Lifecycle states of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    AwaitUsername,
    AwaitPublicKey,
    AwaitSignature,
    Verifying,
    AwaitChannel,
    AwaitReadyAck,
    Active,
    Closing,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The challenge signature did not verify.
    #[error("Signature verification failed")]
    AuthenticationFailed,

    /// The client sent something other than what the protocol requires.
    #[error("Protocol violation: expected {expected}, got {got:?}")]
    ProtocolViolation { expected: &'static str, got: String },

    /// Read or write failed, or the peer closed the connection.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    /// A push was not acknowledged in time.
    #[error("Client did not acknowledge within {0:?}")]
    AckTimeout(Duration),

    /// The session or the whole server was shut down.
    #[error("Session cancelled")]
    Cancelled,
}

impl SessionError {
    /// The error's category.
    #[must_use]
    pub fn reason(&self) -> CloseReason {
        match self {
            Self::AuthenticationFailed => CloseReason::AuthenticationFailed,
            Self::ProtocolViolation { .. } => CloseReason::ProtocolViolation,
            Self::Transport(_) => CloseReason::Transport,
            Self::AckTimeout(_) => CloseReason::AckTimeout,
            Self::Cancelled => CloseReason::Cancelled,
        }
    }
}

/// Category of a session's end, for callers and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    AuthenticationFailed,
    ProtocolViolation,
    Transport,
    AckTimeout,
    Cancelled,
}

impl CloseReason {
    /// Metric label.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::ProtocolViolation => "protocol_violation",
            Self::Transport => "transport",
            Self::AckTimeout => "ack_timeout",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued push.
#[derive(Debug, Clone)]
enum Delivery {
    Message(Arc<Message>),
    Online(Arc<OnlineUser>),
    Offline(Arc<OnlineUser>),
}

impl Delivery {
    fn to_line(&self) -> ServerLine {
        match self {
            Self::Message(message) => ServerLine::Msg(message.to_json()),
            Self::Online(user) => ServerLine::Online(user.to_json()),
            Self::Offline(user) => ServerLine::Offline(user.to_json()),
        }
    }
}

/// State held only while the session is active.
struct ActiveSession {
    user: Arc<OnlineUser>,
    jobs: mpsc::UnboundedReceiver<Delivery>,
    subscriptions: Vec<Subscription>,
}

/// One client connection and its lifecycle.
pub struct Session {
    id: ConnectionId,
    conn: Box<dyn Connection>,
    hub: Arc<Hub>,
    config: SessionConfig,
    cancel: CancellationToken,
    state: SessionState,
    username: String,
}

impl Session {
    /// Create a session for an accepted connection.
    ///
    /// `cancel` should be a child of the server's global token; cancelling
    /// it tears the session down.
    #[must_use]
    pub fn new(
        conn: Box<dyn Connection>,
        hub: Arc<Hub>,
        config: SessionConfig,
        cancel: CancellationToken,
    ) -> Self {
        let id = conn.id().clone();
        Self {
            username: id.to_string(),
            id,
            conn,
            hub,
            config,
            cancel,
            state: SessionState::Connecting,
        }
    }

    /// The connection's identifier.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion and report why it ended.
    pub async fn run(mut self) -> CloseReason {
        let _metrics_guard = metrics::SessionMetricsGuard::new();
        debug!(connection = %self.id, remote = ?self.conn.remote_addr(), "Handling connection");

        let (active, error) = match self.handshake().await {
            Ok(mut active) => {
                let error = self.deliver(&mut active).await;
                (Some(active), error)
            }
            Err(error) => (None, error),
        };

        self.teardown(active, &error).await;
        let reason = error.reason();
        metrics::record_close_reason(reason.as_str());
        reason
    }

    fn transition(&mut self, next: SessionState) {
        debug!(connection = %self.id, from = ?self.state, to = ?next, "Session state");
        self.state = next;
    }

    async fn send(&mut self, line: ServerLine) -> Result<(), SessionError> {
        let line = line.to_string();
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SessionError::Cancelled),
            result = self.conn.send_line(&line) => result.map_err(SessionError::from),
        }
    }

    async fn recv(&mut self) -> Result<String, SessionError> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SessionError::Cancelled),
            line = self.conn.recv_line() => match line? {
                Some(line) => Ok(line),
                None => Err(TransportError::ConnectionClosed.into()),
            },
        }
    }

    async fn handshake(&mut self) -> Result<ActiveSession, SessionError> {
        self.send(ServerLine::Username).await?;
        self.transition(SessionState::AwaitUsername);
        self.username = self.recv().await?;

        self.send(ServerLine::PublicKey).await?;
        self.transition(SessionState::AwaitPublicKey);
        let public_key = self.recv().await?;

        let nonce = chatline_crypto::generate_nonce();
        self.send(ServerLine::Sign(nonce.clone())).await?;
        self.transition(SessionState::AwaitSignature);
        let signature = self.recv().await?;

        self.transition(SessionState::Verifying);
        if !chatline_crypto::verify(&public_key, &signature, &nonce) {
            metrics::record_handshake_failure();
            return Err(SessionError::AuthenticationFailed);
        }

        self.send(ServerLine::Channel).await?;
        self.transition(SessionState::AwaitChannel);
        let channel = self.recv().await?;

        self.send(ServerLine::Ack).await?;
        self.transition(SessionState::AwaitReadyAck);
        let ready = self.recv().await?;
        if ready != ACK {
            return Err(SessionError::ProtocolViolation {
                expected: ACK,
                got: ready,
            });
        }

        let user = Arc::new(OnlineUser::new(self.username.clone(), public_key, channel));
        let (jobs_tx, jobs) = mpsc::unbounded_channel();
        let subscriptions = self.subscribe(&user, jobs_tx);

        self.hub.presence.connect(user.clone());
        metrics::set_users_online(self.hub.presence.count());

        self.transition(SessionState::Active);
        info!(connection = %self.id, user = %user.username, channel = %user.channel, "User connected");

        Ok(ActiveSession {
            user,
            jobs,
            subscriptions,
        })
    }

    /// Route bus and presence events into this session's queue.
    ///
    /// Messages are filtered to the session's channel. Presence events are
    /// not filtered by channel, only the session's own events are skipped.
    fn subscribe(
        &self,
        user: &Arc<OnlineUser>,
        jobs: mpsc::UnboundedSender<Delivery>,
    ) -> Vec<Subscription> {
        let channel = user.channel.clone();
        let message_jobs = jobs.clone();
        let messages = self.hub.bus.subscribe(move |event: &MessageEvent| {
            if event.channel == channel {
                let _ = message_jobs.send(Delivery::Message(event.message.clone()));
            }
        });

        let me = Arc::downgrade(user);
        let presence = self.hub.presence.subscribe(move |event: &PresenceEvent| {
            if std::ptr::eq(me.as_ptr(), Arc::as_ptr(event.user())) {
                return;
            }
            let job = match event {
                PresenceEvent::Online(user) => Delivery::Online(user.clone()),
                PresenceEvent::Offline(user) => Delivery::Offline(user.clone()),
            };
            let _ = jobs.send(job);
        });

        vec![messages, presence]
    }

    /// Drain the queue until something fails or the session is cancelled.
    async fn deliver(&mut self, active: &mut ActiveSession) -> SessionError {
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return SessionError::Cancelled,
                // Drain inbound lines first so a stray line is never taken
                // for the acknowledgement of the next push.
                line = self.conn.recv_line() => match line {
                    Ok(Some(line)) => {
                        debug!(connection = %self.id, line = %line, "Ignoring unsolicited line");
                    }
                    Ok(None) => return TransportError::ConnectionClosed.into(),
                    Err(e) => return e.into(),
                },
                job = active.jobs.recv() => {
                    let Some(job) = job else {
                        return SessionError::Cancelled;
                    };
                    if let Err(error) = self.push(job).await {
                        return error;
                    }
                }
            }
        }
    }

    /// Send one push and wait for its acknowledgement.
    async fn push(&mut self, job: Delivery) -> Result<(), SessionError> {
        let line = job.to_line();
        let kind = line.kind();
        debug!(connection = %self.id, user = %self.username, kind, "Sending push");

        // The write counts against the deadline too: a peer that stops
        // reading blocks the send once its buffer fills.
        let started = Instant::now();
        let ack_timeout = self.config.ack_timeout;
        let exchange = async {
            self.send(line).await?;
            self.recv().await
        };
        let reply = match timeout(ack_timeout, exchange).await {
            Ok(reply) => reply?,
            Err(_) => return Err(SessionError::AckTimeout(ack_timeout)),
        };
        if reply != ACK {
            return Err(SessionError::ProtocolViolation {
                expected: ACK,
                got: reply,
            });
        }

        metrics::record_delivery(kind, started.elapsed().as_secs_f64());
        debug!(connection = %self.id, user = %self.username, kind, "Push acknowledged");
        Ok(())
    }

    /// Release everything the session holds, exactly once.
    async fn teardown(&mut self, active: Option<ActiveSession>, error: &SessionError) {
        self.transition(SessionState::Closing);
        self.cancel.cancel();

        match error {
            SessionError::Cancelled => {
                debug!(connection = %self.id, user = %self.username, "Token cancelled, finishing")
            }
            SessionError::AuthenticationFailed => {
                debug!(connection = %self.id, user = %self.username, "Signature verification failed")
            }
            SessionError::Transport(e) => {
                debug!(connection = %self.id, user = %self.username, error = %e, "Socket disconnect")
            }
            SessionError::ProtocolViolation { .. } | SessionError::AckTimeout(_) => {
                metrics::record_error(error.reason().as_str());
                warn!(connection = %self.id, user = %self.username, error = %error, "Closing session")
            }
        }

        if let Some(ActiveSession {
            user,
            jobs,
            subscriptions,
        }) = active
        {
            drop(subscriptions);
            drop(jobs);
            if self.hub.presence.disconnect(&user) {
                metrics::set_users_online(self.hub.presence.count());
            }
            info!(connection = %self.id, user = %user.username, channel = %user.channel, "User disconnected");
        }

        // A failed signature never established presence; close silently.
        if !matches!(error, SessionError::AuthenticationFailed) {
            let notice = ServerLine::Disconnect.to_string();
            match timeout(DISCONNECT_TIMEOUT, self.conn.send_line(&notice)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) | Err(_) => {
                    debug!(connection = %self.id, "Error sending disconnect message")
                }
            }
        }
        let _ = timeout(DISCONNECT_TIMEOUT, self.conn.close()).await;

        self.transition(SessionState::Closed);
    }
}
