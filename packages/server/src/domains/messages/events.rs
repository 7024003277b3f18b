//! Message lifecycle events published to the event bus.
//!
//! Events are signals to re-check the message store, not state deltas.
//! Consumers never trust the embedded text; they re-read the latest message.

use anyhow::{Context, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{ChatId, MessageId, UserId};
use crate::kernel::event_bus::{topic_of, IntoBusEvent};

pub const MSG_CREATED_TOPIC: &str = "msg_created_topic";
pub const MSG_DELETED_TOPIC: &str = "msg_deleted_topic";
pub const MSG_EDITED_TOPIC: &str = "msg_edited_topic";

/// All lifecycle topics, in the order consumers are started.
pub const LIFECYCLE_TOPICS: [&str; 3] = [MSG_CREATED_TOPIC, MSG_DELETED_TOPIC, MSG_EDITED_TOPIC];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCreated {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesDeleted {
    pub message_ids: Vec<MessageId>,
    pub chat_id: ChatId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEdited {
    pub message_id: MessageId,
    pub chat_id: ChatId,
}

/// Message lifecycle event. The topic carries the variant on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    Created(MessageCreated),
    Deleted(MessagesDeleted),
    Edited(MessageEdited),
}

impl MessageEvent {
    pub fn chat_id(&self) -> ChatId {
        match self {
            MessageEvent::Created(e) => e.chat_id,
            MessageEvent::Deleted(e) => e.chat_id,
            MessageEvent::Edited(e) => e.chat_id,
        }
    }

    /// Decode a delivery by its subject (`<topic>.<chat_id>`) and JSON payload.
    pub fn decode(subject: &str, payload: &[u8]) -> Result<Self> {
        match topic_of(subject) {
            MSG_CREATED_TOPIC => serde_json::from_slice(payload)
                .map(MessageEvent::Created)
                .context("Invalid msg_created payload"),
            MSG_DELETED_TOPIC => serde_json::from_slice(payload)
                .map(MessageEvent::Deleted)
                .context("Invalid msg_deleted payload"),
            MSG_EDITED_TOPIC => serde_json::from_slice(payload)
                .map(MessageEvent::Edited)
                .context("Invalid msg_edited payload"),
            other => anyhow::bail!("Unknown lifecycle topic: {}", other),
        }
    }
}

impl IntoBusEvent for MessageEvent {
    fn topic(&self) -> &'static str {
        match self {
            MessageEvent::Created(_) => MSG_CREATED_TOPIC,
            MessageEvent::Deleted(_) => MSG_DELETED_TOPIC,
            MessageEvent::Edited(_) => MSG_EDITED_TOPIC,
        }
    }

    fn partition_key(&self) -> String {
        self.chat_id().to_string()
    }

    fn to_payload(&self) -> Result<Bytes> {
        let json = match self {
            MessageEvent::Created(e) => serde_json::to_vec(e)?,
            MessageEvent::Deleted(e) => serde_json::to_vec(e)?,
            MessageEvent::Edited(e) => serde_json::to_vec(e)?,
        };
        Ok(Bytes::from(json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::event_bus::subject_for;
    use chrono::TimeZone;

    #[test]
    fn test_created_wire_format() {
        let event = MessageEvent::Created(MessageCreated {
            message_id: MessageId::new("m1"),
            chat_id: 7,
            sender_id: 1,
            text: "hi".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        });

        let payload: serde_json::Value =
            serde_json::from_slice(&event.to_payload().unwrap()).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({
                "message_id": "m1",
                "chat_id": 7,
                "sender_id": 1,
                "text": "hi",
                "created_at": "2024-05-01T12:00:00Z",
            })
        );
        assert_eq!(subject_for(&event), "msg_created_topic.7");
    }

    #[test]
    fn test_deleted_wire_format() {
        let event = MessageEvent::Deleted(MessagesDeleted {
            message_ids: vec![MessageId::new("m1"), MessageId::new("m2")],
            chat_id: 3,
        });

        let payload: serde_json::Value =
            serde_json::from_slice(&event.to_payload().unwrap()).unwrap();
        assert_eq!(
            payload,
            serde_json::json!({"message_ids": ["m1", "m2"], "chat_id": 3})
        );
    }

    #[test]
    fn test_decode_by_subject() {
        let payload = br#"{"message_ids":["a"],"chat_id":9}"#;
        let event = MessageEvent::decode("msg_deleted_topic.9", payload).unwrap();
        assert_eq!(event.chat_id(), 9);
        assert!(matches!(event, MessageEvent::Deleted(_)));
    }

    #[test]
    fn test_decode_rejects_unknown_topic_and_bad_json() {
        assert!(MessageEvent::decode("other_topic.1", b"{}").is_err());
        assert!(MessageEvent::decode("msg_created_topic.1", b"not json").is_err());
    }
}
