//! Pull-based event consumer.
//!
//! A consumer holds one broker subscription and processes one delivery at a
//! time:
//!
//! ```text
//! Idle ─► Fetching ─► Processing ─┬─► Committing ─► Fetching
//!            ▲                    └─► Failed ─────► Fetching (same delivery again)
//!            └── shutdown ─► Stopped
//! ```
//!
//! A delivery is acknowledged only after the handler succeeds. Retryable
//! failures are nak'd so the broker redelivers them; permanent failures
//! (undecodable payloads) are acknowledged and logged.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// =============================================================================
// Broker seams
// =============================================================================

/// One fetched broker message awaiting acknowledgement.
#[async_trait]
pub trait Delivery: Send {
    fn subject(&self) -> &str;

    fn payload(&self) -> &[u8];

    /// Commit: the broker will not deliver this message to the group again.
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Reject: the broker redelivers this message.
    async fn nak(self: Box<Self>) -> Result<()>;
}

/// Stream of deliveries for one topic within one consumer group.
#[async_trait]
pub trait BrokerSubscription: Send {
    /// Next delivery. `None` means the subscription is closed for good.
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>>>;
}

// =============================================================================
// Handler
// =============================================================================

#[derive(Error, Debug)]
pub enum HandlerError {
    /// Transient failure; leave the message unacknowledged for redelivery.
    #[error("retryable: {0:#}")]
    Retry(anyhow::Error),

    /// The message can never be processed; acknowledge and drop it.
    #[error("discarded: {0:#}")]
    Discard(anyhow::Error),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, subject: &str, payload: &[u8]) -> Result<(), HandlerError>;
}

// =============================================================================
// Consumer
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerState {
    Idle,
    Fetching,
    Processing,
    Committing,
    Failed,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Pause after a nak before fetching again
    pub retry_backoff: Duration,
    /// Pause after the broker fails a fetch
    pub fetch_error_backoff: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            retry_backoff: Duration::from_millis(500),
            fetch_error_backoff: Duration::from_secs(1),
        }
    }
}

pub struct EventConsumer {
    name: String,
    subscription: Box<dyn BrokerSubscription>,
    handler: Arc<dyn EventHandler>,
    config: ConsumerConfig,
    state: Arc<watch::Sender<ConsumerState>>,
}

impl EventConsumer {
    pub fn new(
        name: impl Into<String>,
        subscription: Box<dyn BrokerSubscription>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self::with_config(name, subscription, handler, ConsumerConfig::default())
    }

    pub fn with_config(
        name: impl Into<String>,
        subscription: Box<dyn BrokerSubscription>,
        handler: Arc<dyn EventHandler>,
        config: ConsumerConfig,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            name: name.into(),
            subscription,
            handler,
            config,
            state: Arc::new(state),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Watch the consumer's state.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub(crate) fn state_sender(&self) -> Arc<watch::Sender<ConsumerState>> {
        self.state.clone()
    }

    fn set_state(&self, state: ConsumerState) {
        self.state.send_replace(state);
    }

    /// Run until `shutdown` fires. Returns an error only if the subscription
    /// closes underneath the consumer.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        info!(consumer = %self.name, "event consumer starting");

        loop {
            self.set_state(ConsumerState::Fetching);

            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = self.subscription.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    warn!(consumer = %self.name, error = %format!("{:#}", e), "fetch failed");
                    if Self::pause(self.config.fetch_error_backoff, &shutdown).await {
                        break;
                    }
                    continue;
                }
                None => {
                    self.set_state(ConsumerState::Stopped);
                    anyhow::bail!("subscription for consumer {} closed", self.name);
                }
            };

            self.set_state(ConsumerState::Processing);

            // Unacknowledged on shutdown: the broker redelivers it after restart.
            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                outcome = self.handler.handle(delivery.subject(), delivery.payload()) => outcome,
            };

            match outcome {
                Ok(()) => {
                    self.set_state(ConsumerState::Committing);
                    debug!(consumer = %self.name, subject = %delivery.subject(), "event processed");
                    if let Err(e) = delivery.ack().await {
                        warn!(consumer = %self.name, error = %format!("{:#}", e), "ack failed");
                    }
                }
                Err(HandlerError::Discard(e)) => {
                    self.set_state(ConsumerState::Committing);
                    error!(
                        consumer = %self.name,
                        subject = %delivery.subject(),
                        error = %format!("{:#}", e),
                        "discarding unprocessable event"
                    );
                    if let Err(e) = delivery.ack().await {
                        warn!(consumer = %self.name, error = %format!("{:#}", e), "ack failed");
                    }
                }
                Err(HandlerError::Retry(e)) => {
                    self.set_state(ConsumerState::Failed);
                    warn!(
                        consumer = %self.name,
                        subject = %delivery.subject(),
                        error = %format!("{:#}", e),
                        "event processing failed, requesting redelivery"
                    );
                    if let Err(e) = delivery.nak().await {
                        warn!(consumer = %self.name, error = %format!("{:#}", e), "nak failed");
                    }
                    if Self::pause(self.config.retry_backoff, &shutdown).await {
                        break;
                    }
                }
            }
        }

        self.set_state(ConsumerState::Stopped);
        info!(consumer = %self.name, "event consumer stopped");
        Ok(())
    }

    /// Sleep for `backoff`; true if shutdown fired meanwhile.
    async fn pause(backoff: Duration, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => true,
            _ = tokio::time::sleep(backoff) => false,
        }
    }
}
