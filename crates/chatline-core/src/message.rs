//! Chat data model.
//!
//! Field names on the wire follow the service's JSON contract
//! (`MessageId`, `CreatorName`, ...).

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A unique message identifier.
pub type MessageId = String;

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> MessageId {
    uuid::Uuid::new_v4().to_string()
}

/// Milliseconds since the unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// A message as submitted by a client, before the server stamps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SentMessage {
    /// Display name of the author.
    pub creator_name: String,
    /// Message body.
    pub text: String,
    /// Client-supplied signature. Stored as-is.
    pub signature: String,
}

/// A stored chat message. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Message {
    /// Server-assigned identifier.
    #[serde(rename = "MessageId")]
    pub id: MessageId,
    /// Display name of the author.
    pub creator_name: String,
    /// Message body.
    pub text: String,
    /// Server-assigned creation time (unix millis).
    pub created_at: u64,
    /// Client-supplied signature.
    pub signature: String,
}

impl Message {
    /// Create a message with a fresh ID and the current time.
    #[must_use]
    pub fn new(
        creator_name: impl Into<String>,
        text: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_message_id(),
            creator_name: creator_name.into(),
            text: text.into(),
            created_at: now_millis(),
            signature: signature.into(),
        }
    }

    /// Serialize to the JSON carried by a `MSG` push.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

impl From<SentMessage> for Message {
    fn from(sent: SentMessage) -> Self {
        Self::new(sent.creator_name, sent.text, sent.signature)
    }
}

/// An authenticated, connected user.
///
/// Registries compare users by allocation (`Arc::ptr_eq`), never by value:
/// two sessions with the same username and key are distinct users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OnlineUser {
    /// Username given during the handshake.
    pub username: String,
    /// Public key the user proved ownership of.
    pub public_key: String,
    /// Channel the user joined.
    pub channel: String,
}

impl OnlineUser {
    /// Create a new online user record.
    #[must_use]
    pub fn new(
        username: impl Into<String>,
        public_key: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            public_key: public_key.into(),
            channel: channel.into(),
        }
    }

    /// Serialize to the JSON carried by `ONLINE`/`OFFLINE` pushes.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let msg = Message::new("alice", "hello", "sig");
        assert_eq!(msg.creator_name, "alice");
        assert_eq!(msg.text, "hello");
        assert!(!msg.id.is_empty());
        assert!(msg.created_at > 0);
    }

    #[test]
    fn test_unique_message_ids() {
        let id1 = generate_message_id();
        let id2 = generate_message_id();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_message_json_field_names() {
        let msg = Message {
            id: "m-1".to_string(),
            creator_name: "alice".to_string(),
            text: "hi".to_string(),
            created_at: 42,
            signature: "sig".to_string(),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "MessageId": "m-1",
                "CreatorName": "alice",
                "Text": "hi",
                "CreatedAt": 42,
                "Signature": "sig"
            })
        );
    }

    #[test]
    fn test_sent_message_is_stamped() {
        let sent: SentMessage = serde_json::from_str(
            r#"{"CreatorName":"bob","Text":"yo","Signature":"unchecked"}"#,
        )
        .unwrap();
        let msg = Message::from(sent);
        assert_eq!(msg.creator_name, "bob");
        assert_eq!(msg.signature, "unchecked");
        assert!(!msg.id.is_empty());
    }

    #[test]
    fn test_online_user_json() {
        let user = OnlineUser::new("carol", "key", "lobby");
        assert_eq!(
            user.to_json(),
            r#"{"Username":"carol","PublicKey":"key","Channel":"lobby"}"#
        );
    }
}
