//! End-to-end message pipeline over in-memory infrastructure.
//!
//! Send / edit / delete go through the actions, events travel through the
//! in-memory broker to the reconciliation consumers, and frames reach the
//! recipient's registered connection.

use std::sync::Arc;
use std::time::Duration;

use chat_core::common::ChatId;
use chat_core::domains::auth::JwtService;
use chat_core::domains::messages::actions::{delete_message, edit_message, send_message};
use chat_core::domains::messages::effects::{
    fan_out_detached, ChatFrame, DeletedMessages, EditedMessage, LastMessageReconciler,
};
use chat_core::domains::messages::events::LIFECYCLE_TOPICS;
use chat_core::kernel::event_bus::{
    ConsumerExit, ConsumerManager, EventConsumer, EventHandler, InMemoryBroker, RunningConsumers,
};
use chat_core::kernel::test_dependencies::{InMemoryChatStore, InMemoryMessageStore};
use chat_core::kernel::{ConnectionHub, EventProducer, ServerDeps};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const CHAT: ChatId = 7;
const ALICE: i64 = 1;
const BOB: i64 = 2;

// ============================================================================
// Test Helpers
// ============================================================================

struct Pipeline {
    deps: ServerDeps,
    messages: Arc<InMemoryMessageStore>,
    chats: Arc<InMemoryChatStore>,
    broker: InMemoryBroker,
    consumers: RunningConsumers,
}

fn start_pipeline() -> Pipeline {
    let messages = Arc::new(InMemoryMessageStore::new());
    let chats = Arc::new(InMemoryChatStore::new().with_chat(CHAT, &[ALICE, BOB]));
    let broker = InMemoryBroker::new();

    let deps = ServerDeps::new(
        messages.clone(),
        chats.clone(),
        chats.clone(),
        EventProducer::new(Arc::new(broker.clone())),
        ConnectionHub::new(),
        Arc::new(JwtService::new("test_secret", "test_issuer".to_string())),
    );

    let reconciler: Arc<dyn EventHandler> = Arc::new(LastMessageReconciler::from_deps(&deps));
    let manager = LIFECYCLE_TOPICS
        .iter()
        .fold(ConsumerManager::new(), |manager, topic| {
            manager.with_consumer(EventConsumer::new(
                format!("reconciler-{}", topic),
                Box::new(broker.subscribe(topic)),
                reconciler.clone(),
            ))
        });
    let consumers = manager.start(CancellationToken::new());

    Pipeline {
        deps,
        messages,
        chats,
        broker,
        consumers,
    }
}

async fn connect(hub: &ConnectionHub, user_id: i64) -> mpsc::Receiver<Arc<str>> {
    let (handle, outbound) = hub.open_connection(user_id);
    hub.register(handle).await;
    outbound
}

async fn next_frame(outbound: &mut mpsc::Receiver<Arc<str>>) -> Value {
    let frame = tokio::time::timeout(Duration::from_secs(1), outbound.recv())
        .await
        .expect("no frame within 1s")
        .expect("outbound queue closed");
    serde_json::from_str(&frame).unwrap()
}

async fn eventually(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached within 2s");
}

fn total_acked(broker: &InMemoryBroker) -> usize {
    LIFECYCLE_TOPICS.iter().map(|t| broker.acked(t)).sum()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_send_reaches_recipient_and_updates_preview() {
    let pipeline = start_pipeline();
    let mut bob = connect(&pipeline.deps.hub, BOB).await;

    let message = send_message(CHAT, ALICE, "alice".to_string(), "hi".to_string(), &pipeline.deps)
        .await
        .unwrap();
    assert_eq!(message.id.as_str(), "m1");

    fan_out_detached(&pipeline.deps, CHAT, ChatFrame::NewMessage(message.clone()))
        .await
        .unwrap();

    let frame = next_frame(&mut bob).await;
    assert_eq!(frame["type"], "new_message");
    assert_eq!(frame["data"]["id"], "m1");
    assert_eq!(frame["data"]["text"], "hi");

    let chats = pipeline.chats.clone();
    eventually(|| chats.preview(CHAT).map(|p| p.text) == Some("hi".to_string())).await;
    assert_eq!(pipeline.chats.preview(CHAT).unwrap().at, message.created_at);

    let exits = pipeline.consumers.shutdown().await;
    assert!(exits.iter().all(|(_, exit)| *exit == ConsumerExit::Stopped));
}

#[tokio::test]
async fn test_edit_then_delete_converges_preview() {
    let pipeline = start_pipeline();
    let mut bob = connect(&pipeline.deps.hub, BOB).await;
    let deps = &pipeline.deps;

    let first = send_message(CHAT, ALICE, "alice".into(), "first".into(), deps)
        .await
        .unwrap();
    let second = send_message(CHAT, ALICE, "alice".into(), "second".into(), deps)
        .await
        .unwrap();
    let broker = pipeline.broker.clone();
    eventually(|| total_acked(&broker) == 2).await;

    edit_message(ALICE, CHAT, second.id.clone(), "second (edited)".into(), deps)
        .await
        .unwrap();
    fan_out_detached(
        deps,
        CHAT,
        ChatFrame::EditMessage(EditedMessage {
            message_id: second.id.clone(),
            chat_id: CHAT,
            text: "second (edited)".into(),
        }),
    )
    .await
    .unwrap();

    let frame = next_frame(&mut bob).await;
    assert_eq!(frame["type"], "edit_message");
    assert_eq!(frame["data"]["message_id"], second.id.as_str());

    eventually(|| total_acked(&broker) == 3).await;
    assert_eq!(
        pipeline.chats.preview(CHAT).map(|p| p.text),
        Some("second (edited)".to_string())
    );

    // Deleting the latest message falls back to the one before it
    let deleted = delete_message(ALICE, CHAT, vec![second.id.clone()], deps)
        .await
        .unwrap();
    assert_eq!(deleted, vec![second.id.clone()]);
    eventually(|| total_acked(&broker) == 4).await;
    assert_eq!(pipeline.chats.preview(CHAT).map(|p| p.text), Some("first".to_string()));

    // Emptying the chat clears the preview
    delete_message(ALICE, CHAT, vec![first.id.clone()], deps)
        .await
        .unwrap();
    fan_out_detached(
        deps,
        CHAT,
        ChatFrame::DeleteMessage(DeletedMessages {
            message_ids: vec![first.id.clone()],
            chat_id: CHAT,
        }),
    )
    .await
    .unwrap();

    let frame = next_frame(&mut bob).await;
    assert_eq!(frame["type"], "delete_message");
    assert_eq!(frame["data"]["message_ids"][0], first.id.as_str());

    eventually(|| total_acked(&broker) == 5).await;
    assert!(pipeline.chats.preview(CHAT).is_none());
    assert!(pipeline.messages.messages_in(CHAT).is_empty());

    pipeline.consumers.shutdown().await;
}

#[tokio::test]
async fn test_non_member_mutations_publish_nothing() {
    let pipeline = start_pipeline();
    let deps = &pipeline.deps;

    let message = send_message(CHAT, ALICE, "alice".into(), "hi".into(), deps)
        .await
        .unwrap();
    let broker = pipeline.broker.clone();
    eventually(|| total_acked(&broker) == 1).await;

    pipeline.chats.remove_member(CHAT, BOB);
    assert!(send_message(CHAT, BOB, "bob".into(), "let me in".into(), deps)
        .await
        .is_err());
    assert!(delete_message(BOB, CHAT, vec![message.id.clone()], deps)
        .await
        .is_err());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(total_acked(&pipeline.broker), 1);
    assert_eq!(pipeline.messages.messages_in(CHAT).len(), 1);

    pipeline.consumers.shutdown().await;
}

#[tokio::test]
async fn test_offline_recipient_is_skipped() {
    let pipeline = start_pipeline();
    let mut alice = connect(&pipeline.deps.hub, ALICE).await;

    let message = send_message(CHAT, ALICE, "alice".into(), "anyone?".into(), &pipeline.deps)
        .await
        .unwrap();
    fan_out_detached(&pipeline.deps, CHAT, ChatFrame::NewMessage(message))
        .await
        .unwrap();

    // The sender's own connection still gets the frame
    let frame = next_frame(&mut alice).await;
    assert_eq!(frame["type"], "new_message");
    assert!(!pipeline.deps.hub.is_online(BOB).await);

    pipeline.consumers.shutdown().await;
}
