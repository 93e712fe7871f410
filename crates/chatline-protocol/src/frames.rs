//! Command lines sent by the server.
//!
//! Clients answer prompts with bare values (username, key, signature,
//! channel) and acknowledge everything else with [`ACK`].

use std::fmt;

/// The acknowledgement line, in both directions.
pub const ACK: &str = "ACK";

/// A line sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerLine {
    /// Ask the client for its username.
    Username,
    /// Ask the client for its public key.
    PublicKey,
    /// Challenge the client to sign the nonce.
    Sign(String),
    /// Ask the client which channel to join.
    Channel,
    /// Handshake complete, waiting for the client's ready signal.
    Ack,
    /// New message push (JSON `Message`).
    Msg(String),
    /// A user came online (JSON `OnlineUser`).
    Online(String),
    /// A user went offline (JSON `OnlineUser`).
    Offline(String),
    /// The server is tearing the session down.
    Disconnect,
}

impl ServerLine {
    /// Short label for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Username => "username",
            Self::PublicKey => "pubkey",
            Self::Sign(_) => "sign",
            Self::Channel => "channel",
            Self::Ack => "ack",
            Self::Msg(_) => "message",
            Self::Online(_) => "online",
            Self::Offline(_) => "offline",
            Self::Disconnect => "disconnect",
        }
    }

    /// Parse an (already unescaped) line received from a server.
    ///
    /// Returns `None` for unknown commands.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let (command, rest) = match line.split_once(' ') {
            Some((command, rest)) => (command, Some(rest)),
            None => (line, None),
        };

        match (command, rest) {
            ("USERNAME", None) => Some(Self::Username),
            ("PUBKEY", None) => Some(Self::PublicKey),
            ("SIGN", Some(nonce)) => Some(Self::Sign(nonce.to_string())),
            ("CHANNEL", None) => Some(Self::Channel),
            ("ACK", None) => Some(Self::Ack),
            ("MSG", Some(json)) => Some(Self::Msg(json.to_string())),
            ("ONLINE", Some(json)) => Some(Self::Online(json.to_string())),
            ("OFFLINE", Some(json)) => Some(Self::Offline(json.to_string())),
            ("DISCONNECT", None) => Some(Self::Disconnect),
            _ => None,
        }
    }
}

impl fmt::Display for ServerLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username => f.write_str("USERNAME"),
            Self::PublicKey => f.write_str("PUBKEY"),
            Self::Sign(nonce) => write!(f, "SIGN {nonce}"),
            Self::Channel => f.write_str("CHANNEL"),
            Self::Ack => f.write_str(ACK),
            Self::Msg(json) => write!(f, "MSG {json}"),
            Self::Online(json) => write!(f, "ONLINE {json}"),
            Self::Offline(json) => write!(f, "OFFLINE {json}"),
            Self::Disconnect => f.write_str("DISCONNECT"),
        }
    }
}
