use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::{subject_for, IntoBusEvent};
use crate::kernel::nats::NatsPublisher;

/// Publishes lifecycle events keyed by their partition key.
#[derive(Clone)]
pub struct EventProducer {
    publisher: Arc<dyn NatsPublisher>,
}

impl EventProducer {
    pub fn new(publisher: Arc<dyn NatsPublisher>) -> Self {
        Self { publisher }
    }

    /// Publish and wait for the broker to accept the event.
    pub async fn publish<E: IntoBusEvent + ?Sized>(&self, event: &E) -> Result<()> {
        let subject = subject_for(event);
        let payload = event
            .to_payload()
            .with_context(|| format!("Failed to encode event for {}", subject))?;

        self.publisher
            .publish(subject.clone(), payload)
            .await
            .with_context(|| format!("Failed to publish event to {}", subject))?;

        debug!(subject = %subject, "Published event");
        Ok(())
    }

    /// Publish in the background, bounded by `timeout`.
    ///
    /// Failures are logged and counted, never returned: the caller's mutation
    /// has already been committed and the publish is best-effort.
    pub fn publish_detached<E>(&self, event: E, timeout: Duration) -> JoinHandle<()>
    where
        E: IntoBusEvent + Send + Sync + 'static,
    {
        let producer = self.clone();
        tokio::spawn(async move {
            let subject = subject_for(&event);
            let outcome = tokio::time::timeout(timeout, producer.publish(&event)).await;
            let failure = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(_) => anyhow::anyhow!("publish timed out after {:?}", timeout),
            };
            metrics::counter!("chat_event_publish_failures_total", "topic" => event.topic())
                .increment(1);
            error!(subject = %subject, error = %format!("{:#}", failure), "Event publish failed");
        })
    }
}
