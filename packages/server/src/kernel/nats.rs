//! NATS publish abstraction for production and testing.
//!
//! Production publishes go through JetStream and wait for the stream's ack,
//! so a successful publish means the event is durable. Tests swap in
//! `TestNats`, which only records what would have been sent.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// A published message.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// Trait for NATS publish operations.
#[async_trait]
pub trait NatsPublisher: Send + Sync {
    /// Publish a message to a subject.
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()>;
}

/// JetStream publisher. Resolves once the stream has persisted the message.
pub struct JetStreamPublisher {
    context: async_nats::jetstream::Context,
}

impl JetStreamPublisher {
    pub fn new(context: async_nats::jetstream::Context) -> Self {
        Self { context }
    }
}

#[async_trait]
impl NatsPublisher for JetStreamPublisher {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        let ack = self
            .context
            .publish(subject, payload)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        ack.await.map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(())
    }
}

/// Mock NATS publisher that tracks published messages for testing.
#[derive(Default)]
pub struct TestNats {
    published: RwLock<Vec<PublishedMessage>>,
    failing: AtomicBool,
}

impl TestNats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose every publish fails, as if the broker were down.
    pub fn failing() -> Self {
        let nats = Self::default();
        nats.set_failing(true);
        nats
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Record a published message.
    pub fn record_publish(&self, subject: String, payload: Bytes) {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage { subject, payload });
    }

    /// Get all published messages.
    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Get published messages matching a subject prefix.
    pub fn messages_with_prefix(&self, prefix: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.subject.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Check if any message was published to a subject.
    pub fn was_published_to(&self, subject: &str) -> bool {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|m| m.subject == subject)
    }

    /// Get the count of published messages.
    pub fn publish_count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Poll until at least `count` messages were recorded or `within` elapses.
    ///
    /// Publishes are detached from the request path, so tests wait for them.
    pub async fn wait_for_publishes(&self, count: usize, within: std::time::Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            if self.publish_count() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }

    /// Deserialize a published message payload as JSON.
    pub fn deserialize_message<T: serde::de::DeserializeOwned>(
        &self,
        msg: &PublishedMessage,
    ) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&msg.payload)
    }
}

#[async_trait]
impl NatsPublisher for TestNats {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("nats unavailable: publish to {} rejected", subject);
        }
        self.record_publish(subject, payload);
        Ok(())
    }
}
