//! In-memory broker with consumer-group semantics for tests.
//!
//! Each topic behaves like a durable group with one message in flight: the
//! front message is handed out, an ack removes it, a nak (or dropping the
//! delivery unsettled) makes it available again.

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use super::consumer::{BrokerSubscription, Delivery};
use super::topic_of;
use crate::kernel::nats::{NatsPublisher, PublishedMessage};

#[derive(Default)]
struct TopicLog {
    pending: VecDeque<PublishedMessage>,
    in_flight: bool,
    acked: usize,
    naks: usize,
    fetch_failures: usize,
}

#[derive(Default)]
struct BrokerInner {
    topics: Mutex<HashMap<String, TopicLog>>,
    notify: Notify,
    closed: AtomicBool,
}

impl BrokerInner {
    fn with_topic<T>(&self, topic: &str, f: impl FnOnce(&mut TopicLog) -> T) -> T {
        let mut topics = self.topics.lock().unwrap_or_else(|e| e.into_inner());
        f(topics.entry(topic.to_string()).or_default())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the group consuming `topic`.
    pub fn subscribe(&self, topic: &str) -> InMemorySubscription {
        InMemorySubscription {
            inner: self.inner.clone(),
            topic: topic.to_string(),
        }
    }

    /// Make the next `count` fetches on `topic` fail.
    pub fn fail_next_fetches(&self, topic: &str, count: usize) {
        self.inner.with_topic(topic, |log| log.fetch_failures += count);
    }

    /// Close every subscription.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn acked(&self, topic: &str) -> usize {
        self.inner.with_topic(topic, |log| log.acked)
    }

    pub fn naks(&self, topic: &str) -> usize {
        self.inner.with_topic(topic, |log| log.naks)
    }

    /// Messages not yet acknowledged, including one in flight.
    pub fn pending(&self, topic: &str) -> usize {
        self.inner.with_topic(topic, |log| log.pending.len())
    }
}

#[async_trait]
impl NatsPublisher for InMemoryBroker {
    async fn publish(&self, subject: String, payload: Bytes) -> Result<()> {
        let topic = topic_of(&subject).to_string();
        self.inner.with_topic(&topic, |log| {
            log.pending.push_back(PublishedMessage { subject, payload })
        });
        self.inner.notify.notify_waiters();
        Ok(())
    }
}

pub struct InMemorySubscription {
    inner: Arc<BrokerInner>,
    topic: String,
}

enum Fetch {
    Ready(PublishedMessage),
    Failed,
    Wait,
}

#[async_trait]
impl BrokerSubscription for InMemorySubscription {
    async fn next(&mut self) -> Option<Result<Box<dyn Delivery>>> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.closed.load(Ordering::SeqCst) {
                return None;
            }

            let fetch = self.inner.with_topic(&self.topic, |log| {
                if log.fetch_failures > 0 {
                    log.fetch_failures -= 1;
                    return Fetch::Failed;
                }
                if log.in_flight {
                    return Fetch::Wait;
                }
                match log.pending.front() {
                    Some(message) => {
                        log.in_flight = true;
                        Fetch::Ready(message.clone())
                    }
                    None => Fetch::Wait,
                }
            });

            match fetch {
                Fetch::Ready(message) => {
                    return Some(Ok(Box::new(InMemoryDelivery {
                        inner: self.inner.clone(),
                        topic: self.topic.clone(),
                        message,
                        settled: false,
                    })));
                }
                Fetch::Failed => return Some(Err(anyhow::anyhow!("broker fetch failed"))),
                Fetch::Wait => notified.await,
            }
        }
    }
}

struct InMemoryDelivery {
    inner: Arc<BrokerInner>,
    topic: String,
    message: PublishedMessage,
    settled: bool,
}

impl InMemoryDelivery {
    fn settle(&mut self, acked: bool) {
        self.settled = true;
        self.inner.with_topic(&self.topic, |log| {
            log.in_flight = false;
            if acked {
                log.pending.pop_front();
                log.acked += 1;
            } else {
                log.naks += 1;
            }
        });
        self.inner.notify.notify_waiters();
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn subject(&self) -> &str {
        &self.message.subject
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn ack(mut self: Box<Self>) -> Result<()> {
        self.settle(true);
        Ok(())
    }

    async fn nak(mut self: Box<Self>) -> Result<()> {
        self.settle(false);
        Ok(())
    }
}

impl Drop for InMemoryDelivery {
    fn drop(&mut self) {
        if !self.settled {
            // Ack wait expired: release it for redelivery.
            self.inner.with_topic(&self.topic, |log| log.in_flight = false);
            self.inner.notify.notify_waiters();
        }
    }
}
