//! Real-time fan-out of message changes to online chat members.
//!
//! Fan-out is independent of the event pipeline: the delivery layer calls it
//! right after a successful mutation. Failures are invisible to the sender.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::common::{ChatId, MessageId};
use crate::domains::messages::Message;
use crate::kernel::{BaseChatMembership, ConnectionHub, ServerDeps, UnicastOutcome};

/// Outbound socket envelope: `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ChatFrame {
    NewMessage(Message),
    EditMessage(EditedMessage),
    DeleteMessage(DeletedMessages),
}

#[derive(Debug, Clone, Serialize)]
pub struct EditedMessage {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedMessages {
    pub message_ids: Vec<MessageId>,
    pub chat_id: ChatId,
}

/// Per-outcome counts of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub queued: usize,
    pub offline: usize,
    pub dropped: usize,
    pub closed: usize,
}

impl FanOutReport {
    fn record(&mut self, outcome: UnicastOutcome) {
        match outcome {
            UnicastOutcome::Queued => self.queued += 1,
            UnicastOutcome::Offline => self.offline += 1,
            UnicastOutcome::Dropped => self.dropped += 1,
            UnicastOutcome::Closed => self.closed += 1,
        }
    }
}

/// Push `frame` to every member of `chat_id` connected to this instance.
pub async fn fan_out(
    chat_id: ChatId,
    frame: &ChatFrame,
    membership: &dyn BaseChatMembership,
    hub: &ConnectionHub,
) -> Result<FanOutReport> {
    let encoded: Arc<str> = serde_json::to_string(frame)
        .context("Failed to encode chat frame")?
        .into();

    let members = membership
        .member_ids(chat_id)
        .await
        .context("Failed to resolve chat members")?;

    let mut report = FanOutReport::default();
    for member in members {
        report.record(hub.unicast(member, encoded.clone()).await);
    }

    debug!(
        chat_id = %chat_id,
        queued = report.queued,
        offline = report.offline,
        dropped = report.dropped,
        "Fanned out chat frame"
    );
    Ok(report)
}

/// Run `fan_out` in the background, bounded by the deps' publish timeout.
pub fn fan_out_detached(deps: &ServerDeps, chat_id: ChatId, frame: ChatFrame) -> JoinHandle<()> {
    let membership = deps.membership.clone();
    let hub = deps.hub.clone();
    let limit = deps.publish_timeout;

    tokio::spawn(async move {
        match tokio::time::timeout(limit, fan_out(chat_id, &frame, membership.as_ref(), &hub)).await
        {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(chat_id = %chat_id, error = %format!("{:#}", e), "Fan-out failed")
            }
            Err(_) => warn!(chat_id = %chat_id, "Fan-out timed out"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::test_dependencies::InMemoryChatStore;
    use chrono::TimeZone;

    fn message() -> Message {
        Message {
            id: MessageId::new("m1"),
            chat_id: 7,
            sender_id: 1,
            sender_username: "alice".to_string(),
            text: "hi".to_string(),
            created_at: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_frame_envelopes() {
        let new = serde_json::to_value(ChatFrame::NewMessage(message())).unwrap();
        assert_eq!(new["type"], "new_message");
        assert_eq!(new["data"]["text"], "hi");
        assert_eq!(new["data"]["id"], "m1");

        let edit = serde_json::to_value(ChatFrame::EditMessage(EditedMessage {
            message_id: MessageId::new("m1"),
            chat_id: 7,
            text: "edited".to_string(),
        }))
        .unwrap();
        assert_eq!(edit["type"], "edit_message");
        assert_eq!(edit["data"]["text"], "edited");

        let delete = serde_json::to_value(ChatFrame::DeleteMessage(DeletedMessages {
            message_ids: vec![MessageId::new("m1")],
            chat_id: 7,
        }))
        .unwrap();
        assert_eq!(delete["type"], "delete_message");
        assert_eq!(delete["data"]["message_ids"][0], "m1");
    }

    #[tokio::test]
    async fn test_fan_out_reaches_online_members_only() {
        let chats = InMemoryChatStore::new().with_chat(7, &[1, 2, 3]);
        let hub = ConnectionHub::new();
        let (bob, mut bob_rx) = hub.open_connection(2);
        let (outsider, mut outsider_rx) = hub.open_connection(9);
        hub.register(bob).await;
        hub.register(outsider).await;

        let report = fan_out(7, &ChatFrame::NewMessage(message()), &chats, &hub)
            .await
            .unwrap();

        assert_eq!(
            report,
            FanOutReport {
                queued: 1,
                offline: 2,
                dropped: 0,
                closed: 0
            }
        );
        let frame: serde_json::Value =
            serde_json::from_str(&bob_rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["type"], "new_message");
        assert!(outsider_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_membership_failure_is_reported() {
        let chats = InMemoryChatStore::new().with_chat(7, &[1]);
        chats.set_membership_failing(true);

        let result = fan_out(7, &ChatFrame::NewMessage(message()), &chats, &ConnectionHub::new()).await;

        assert!(result.is_err());
    }
}
