//! Client side of the live-update protocol.
//!
//! Used by tests, benchmarks and tooling to drive a server the way a real
//! client would: answer the handshake, sign the challenge, acknowledge
//! pushes.

use chatline_core::{Message, OnlineUser};
use chatline_crypto::{CryptoError, KeyPair};
use chatline_protocol::{escape, ServerLine, ACK};
use chatline_transport::{Connection, TransportError};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The server closed the connection.
    #[error("Server closed the connection")]
    Closed,

    /// The server sent a line the client did not expect.
    #[error("Unexpected line from server: {0:?}")]
    Unexpected(String),

    /// A push payload did not parse.
    #[error("Invalid push payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Signing the challenge failed.
    #[error("Signing failed: {0}")]
    Crypto(#[from] CryptoError),

    /// Transport failure.
    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),
}

/// A decoded server push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Push {
    /// `MSG`
    Message(Message),
    /// `ONLINE`
    Online(OnlineUser),
    /// `OFFLINE`
    Offline(OnlineUser),
}

/// Decode a push payload.
///
/// Line unescaping also turns the JSON `\n` escapes into raw newlines, which
/// JSON strings may not contain, so they are put back first.
fn parse_payload<T: serde::de::DeserializeOwned>(json: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(&escape(json))
}

/// A live-update client.
pub struct ChatClient {
    conn: Box<dyn Connection>,
}

impl ChatClient {
    /// Wrap a connection to a server.
    #[must_use]
    pub fn new(conn: Box<dyn Connection>) -> Self {
        Self { conn }
    }

    /// Read and parse the next server line.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection closes or the line is unknown.
    pub async fn next_line(&mut self) -> Result<ServerLine, ClientError> {
        let line = self.conn.recv_line().await?.ok_or(ClientError::Closed)?;
        ServerLine::parse(&line).ok_or(ClientError::Unexpected(line))
    }

    /// Read the next line and require it to be `expected`.
    ///
    /// # Errors
    ///
    /// Returns an error if a different line arrives.
    pub async fn expect(&mut self, expected: ServerLine) -> Result<(), ClientError> {
        let line = self.next_line().await?;
        if line == expected {
            Ok(())
        } else {
            Err(ClientError::Unexpected(line.to_string()))
        }
    }

    /// Send a raw line.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn send(&mut self, line: &str) -> Result<(), ClientError> {
        Ok(self.conn.send_line(line).await?)
    }

    /// Acknowledge the last push.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub async fn ack(&mut self) -> Result<(), ClientError> {
        self.send(ACK).await
    }

    /// Run the full handshake and signal readiness.
    ///
    /// # Errors
    ///
    /// Returns an error if the server deviates from the handshake or closes
    /// the connection (for example because the signature was rejected).
    pub async fn handshake(
        &mut self,
        username: &str,
        keys: &KeyPair,
        channel: &str,
    ) -> Result<(), ClientError> {
        self.expect(ServerLine::Username).await?;
        self.send(username).await?;

        self.expect(ServerLine::PublicKey).await?;
        self.send(&keys.public_key).await?;

        let nonce = match self.next_line().await? {
            ServerLine::Sign(nonce) => nonce,
            other => return Err(ClientError::Unexpected(other.to_string())),
        };
        let signature = chatline_crypto::sign(&keys.private_key, &nonce)?;
        self.send(&signature).await?;

        self.expect(ServerLine::Channel).await?;
        self.send(channel).await?;

        self.expect(ServerLine::Ack).await?;
        self.ack().await
    }

    /// Read the next push without acknowledging it.
    ///
    /// # Errors
    ///
    /// Returns an error if the next line is not a push.
    pub async fn next_push(&mut self) -> Result<Push, ClientError> {
        match self.next_line().await? {
            ServerLine::Msg(json) => Ok(Push::Message(parse_payload(&json)?)),
            ServerLine::Online(json) => Ok(Push::Online(parse_payload(&json)?)),
            ServerLine::Offline(json) => Ok(Push::Offline(parse_payload(&json)?)),
            other => Err(ClientError::Unexpected(other.to_string())),
        }
    }

    /// Read the next push and acknowledge it.
    ///
    /// # Errors
    ///
    /// Returns an error if the next line is not a push or the ack fails.
    pub async fn recv_push(&mut self) -> Result<Push, ClientError> {
        let push = self.next_push().await?;
        self.ack().await?;
        Ok(push)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_transport::LineConnection;

    #[tokio::test]
    async fn test_push_with_multiline_text() {
        let (server, client) = tokio::io::duplex(4096);
        let mut server = LineConnection::new(server);
        let mut client = ChatClient::new(Box::new(LineConnection::new(client)));

        let message = Message::new("alice", "one\ntwo", "sig");
        let line = ServerLine::Msg(message.to_json()).to_string();
        server.send_line(&line).await.unwrap();

        assert_eq!(client.recv_push().await.unwrap(), Push::Message(message));
        assert_eq!(server.recv_line().await.unwrap().as_deref(), Some(ACK));
    }

    #[tokio::test]
    async fn test_unexpected_line() {
        let (server, client) = tokio::io::duplex(4096);
        let mut server = LineConnection::new(server);
        let mut client = ChatClient::new(Box::new(LineConnection::new(client)));

        server.send_line("HELLO").await.unwrap();
        assert!(matches!(
            client.expect(ServerLine::Username).await,
            Err(ClientError::Unexpected(line)) if line == "HELLO"
        ));

        server.send_line("CHANNEL").await.unwrap();
        assert!(matches!(client.next_push().await, Err(ClientError::Unexpected(_))));

        drop(server);
        assert!(matches!(client.next_line().await, Err(ClientError::Closed)));
    }
}
