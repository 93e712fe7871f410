//! TCP transport implementation.
//!
//! Lines are framed with [`LineCodec`] over a `tokio` byte stream.

use async_trait::async_trait;
use chatline_protocol::{LineCodec, DEFAULT_MAX_LINE_LENGTH};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace};

use crate::traits::{Connection, ConnectionId, Transport, TransportError};

/// TCP transport configuration.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum inbound line length in bytes.
    pub max_line_length: usize,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9435)),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

/// TCP transport.
pub struct TcpTransport {
    listener: TcpListener,
    config: TcpConfig,
}

impl TcpTransport {
    /// Create a new TCP transport.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the address fails.
    pub async fn new(config: TcpConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .map_err(TransportError::Io)?;

        info!("TCP transport listening on {}", config.bind_addr);

        Ok(Self { listener, config })
    }

    /// Create a new TCP transport with default limits.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        Self::new(TcpConfig {
            bind_addr: addr,
            ..Default::default()
        })
        .await
    }

    /// Get the local address this transport is bound to.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr().ok()
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let (stream, addr) = self.listener.accept().await.map_err(TransportError::Io)?;
        let _ = stream.set_nodelay(true);

        debug!("Accepted TCP connection from {}", addr);

        let conn = LineConnection::with_max_length(stream, self.config.max_line_length)
            .with_remote_addr(addr);
        Ok(Box::new(conn))
    }

    fn name(&self) -> &'static str {
        "tcp"
    }
}

/// A line-framed connection over any byte stream.
pub struct LineConnection<S> {
    id: ConnectionId,
    framed: Framed<S, LineCodec>,
    remote_addr: Option<SocketAddr>,
    is_open: bool,
}

impl<S> LineConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    /// Wrap a stream with the default maximum line length.
    #[must_use]
    pub fn new(stream: S) -> Self {
        Self::with_max_length(stream, DEFAULT_MAX_LINE_LENGTH)
    }

    /// Wrap a stream, rejecting inbound lines longer than `max_line_length`.
    #[must_use]
    pub fn with_max_length(stream: S, max_line_length: usize) -> Self {
        Self {
            id: ConnectionId::generate(),
            framed: Framed::new(stream, LineCodec::with_max_length(max_line_length)),
            remote_addr: None,
            is_open: true,
        }
    }

    /// Record the peer address for logging.
    #[must_use]
    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl LineConnection<TcpStream> {
    /// Wrap an accepted TCP stream.
    #[must_use]
    pub fn from_tcp(stream: TcpStream) -> Self {
        let addr = stream.peer_addr().ok();
        let mut conn = Self::new(stream);
        conn.remote_addr = addr;
        conn
    }
}

#[async_trait]
impl<S> Connection for LineConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + Sync,
{
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    async fn recv_line(&mut self) -> Result<Option<String>, TransportError> {
        match self.framed.next().await {
            Some(Ok(line)) => {
                trace!(connection = %self.id, line = %line, "Received line");
                Ok(Some(line))
            }
            Some(Err(e)) => {
                self.is_open = false;
                Err(e.into())
            }
            None => {
                debug!(connection = %self.id, "Stream ended");
                self.is_open = false;
                Ok(None)
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        trace!(connection = %self.id, line = %line, "Sending line");
        self.framed
            .send(line)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !std::mem::replace(&mut self.is_open, false) {
            return Ok(()); // Already closed
        }

        SinkExt::<&str>::close(&mut self.framed)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.map(|addr| addr.to_string())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
