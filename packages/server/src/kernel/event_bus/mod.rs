//! Event bus: durable, ordered, at-least-once delivery of lifecycle events.
//!
//! Subjects are `<topic>.<partition_key>`. All events sharing a partition key
//! land on the same subject and are delivered in publish order.

pub mod consumer;
pub mod jetstream;
pub mod manager;
pub mod producer;
pub mod testing;

use anyhow::Result;
use bytes::Bytes;

pub use consumer::{
    BrokerSubscription, ConsumerConfig, ConsumerState, Delivery, EventConsumer, EventHandler,
    HandlerError,
};
pub use jetstream::{JetStreamBus, JetStreamSubscription};
pub use manager::{ConsumerExit, ConsumerManager, RunningConsumers};
pub use producer::EventProducer;
pub use testing::InMemoryBroker;

/// An event that can be published on the bus.
pub trait IntoBusEvent {
    /// Topic the event is published under.
    fn topic(&self) -> &'static str;

    /// Ordering key. Events with equal keys are delivered in order.
    fn partition_key(&self) -> String;

    /// Wire payload.
    fn to_payload(&self) -> Result<Bytes>;
}

/// Full subject an event is published on.
pub fn subject_for<E: IntoBusEvent + ?Sized>(event: &E) -> String {
    format!("{}.{}", event.topic(), event.partition_key())
}

/// Topic portion of a subject (everything before the first `.`).
pub fn topic_of(subject: &str) -> &str {
    subject.split_once('.').map_or(subject, |(topic, _)| topic)
}
