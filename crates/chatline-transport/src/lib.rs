//! # chatline-transport
//!
//! Transport abstraction layer for chatline.
//!
//! Live-update clients speak a newline-delimited text protocol over a
//! persistent connection. This crate hides the socket behind two traits:
//!
//! - **Transport** - accepts new connections
//! - **Connection** - sends and receives protocol lines
//!
//! [`LineConnection`] implements `Connection` over any byte stream, which
//! lets the server run sessions over TCP in production and over in-memory
//! pipes in tests.
//!
//! ```rust,ignore
//! use chatline_transport::{Connection, Transport};
//!
//! async fn echo(mut conn: Box<dyn Connection>) {
//!     while let Ok(Some(line)) = conn.recv_line().await {
//!         let _ = conn.send_line(&line).await;
//!     }
//! }
//! ```

pub mod tcp;
pub mod traits;

pub use tcp::{LineConnection, TcpConfig, TcpTransport};
pub use traits::{Connection, ConnectionId, Transport, TransportError};
