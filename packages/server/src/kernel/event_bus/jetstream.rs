//! NATS JetStream binding for the event bus.
//!
//! One stream covers every lifecycle topic. Each (group, topic) pair is a
//! durable pull consumer with explicit acks and a single message in flight,
//! so a nak'd message is redelivered before anything behind it.

use anyhow::Result;
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, PullConsumer},
    stream, AckKind,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::pin::Pin;
use tracing::info;

use super::consumer::{BrokerSubscription, Delivery};

#[derive(Clone)]
pub struct JetStreamBus {
    context: jetstream::Context,
    stream: String,
}

impl JetStreamBus {
    pub fn new(client: async_nats::Client, stream: impl Into<String>) -> Self {
        Self {
            context: jetstream::new(client),
            stream: stream.into(),
        }
    }

    pub fn context(&self) -> jetstream::Context {
        self.context.clone()
    }

    /// Create the stream if missing, capturing `<topic>.>` for every topic.
    pub async fn ensure_stream(&self, topics: &[&str]) -> Result<()> {
        self.context
            .get_or_create_stream(stream::Config {
                name: self.stream.clone(),
                subjects: topics.iter().map(|t| format!("{}.>", t)).collect(),
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow::anyhow!("Failed to ensure stream {}: {}", self.stream, e))?;

        info!(stream = %self.stream, topics = ?topics, "JetStream stream ready");
        Ok(())
    }

    /// Join consumer group `group` on `topic`.
    pub async fn subscribe(&self, topic: &str, group: &str) -> Result<JetStreamSubscription> {
        let stream = self
            .context
            .get_stream(&self.stream)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open stream {}: {}", self.stream, e))?;

        let durable = format!("{}-{}", group, topic);
        let consumer: PullConsumer = stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    filter_subject: format!("{}.>", topic),
                    ack_policy: AckPolicy::Explicit,
                    max_ack_pending: 1,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create consumer {}: {}", durable, e))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to open message stream for {}: {}", durable, e))?;

        info!(consumer = %durable, topic = %topic, "JetStream consumer subscribed");
        Ok(JetStreamSubscription {
            messages: Box::pin(messages),
        })
    }
}

pub struct JetStreamSubscription {
    messages: Pin<Box<pull::Stream>>,
}

#[async_trait]
impl BrokerSubscription for JetStreamSubscription {
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>>> {
        let next = self.messages.next().await?;
        Some(
            next.map(|message| Box::new(JetStreamDelivery { message }) as Box<dyn Delivery>)
                .map_err(|e| anyhow::anyhow!("{}", e)),
        )
    }
}

struct JetStreamDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn subject(&self) -> &str {
        &self.message.subject
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn ack(self: Box<Self>) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
    }

    async fn nak(self: Box<Self>) -> Result<()> {
        self.message
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))
    }
}
