//! Identifier types shared across domains.
//!
//! Chats and users are keyed by relational integer ids. Message ids are opaque
//! strings assigned by the message store and must never be parsed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Relational id of a chat.
pub type ChatId = i64;

/// Relational id of a user.
pub type UserId = i64;

/// Opaque message identifier assigned by the message store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Blank ids can never match a stored message.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_serializes_as_plain_string() {
        let id = MessageId::new("m1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"m1\"");
    }

    #[test]
    fn test_blank_message_id() {
        assert!(MessageId::new("  ").is_blank());
        assert!(!MessageId::new("m1").is_blank());
    }
}
