//! Kernel module - server infrastructure and dependencies.

pub mod connection;
pub mod connection_hub;
pub mod deps;
pub mod event_bus;
pub mod nats;
pub mod test_dependencies;
pub mod traits;

pub use connection::{run_connection, WsFrame};
pub use connection_hub::{ConnectionHandle, ConnectionHub, OutboundFrame, UnicastOutcome};
pub use deps::{PgChatStore, PgMessageStore, ServerDeps};
pub use event_bus::EventProducer;
pub use nats::{JetStreamPublisher, NatsPublisher, PublishedMessage, TestNats};
pub use test_dependencies::TestDependencies;
pub use traits::*;
