//! Runs a set of consumers under one shutdown signal.
//!
//! Each consumer gets its own task plus a supervising task that records how it
//! ended. A panic or fatal error in one consumer is logged and does not touch
//! the others.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::consumer::{ConsumerState, EventConsumer};

/// How a consumer task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumerExit {
    Stopped,
    Failed(String),
    Panicked(String),
}

#[derive(Default)]
pub struct ConsumerManager {
    consumers: Vec<EventConsumer>,
}

impl ConsumerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_consumer(mut self, consumer: EventConsumer) -> Self {
        self.consumers.push(consumer);
        self
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// Launch every consumer concurrently.
    pub fn start(self, shutdown: CancellationToken) -> RunningConsumers {
        let mut tasks = Vec::with_capacity(self.consumers.len());
        let mut states = Vec::with_capacity(self.consumers.len());

        for consumer in self.consumers {
            let name = consumer.name().to_string();
            let state = consumer.state_sender();
            states.push((name.clone(), consumer.state()));

            let inner = tokio::spawn(consumer.run(shutdown.child_token()));
            let supervisor = tokio::spawn(supervise(name.clone(), inner, state));
            tasks.push((name, supervisor));
        }

        info!(count = tasks.len(), "event consumers started");
        RunningConsumers {
            tasks,
            states,
            shutdown,
        }
    }
}

async fn supervise(
    name: String,
    task: JoinHandle<anyhow::Result<()>>,
    state: Arc<watch::Sender<ConsumerState>>,
) -> ConsumerExit {
    let exit = match task.await {
        Ok(Ok(())) => ConsumerExit::Stopped,
        Ok(Err(e)) => {
            error!(consumer = %name, error = %format!("{:#}", e), "event consumer failed");
            ConsumerExit::Failed(format!("{:#}", e))
        }
        Err(e) if e.is_panic() => {
            error!(consumer = %name, error = %e, "event consumer panicked");
            ConsumerExit::Panicked(e.to_string())
        }
        Err(e) => ConsumerExit::Failed(e.to_string()),
    };
    state.send_replace(ConsumerState::Stopped);
    exit
}

/// Handles to started consumers.
pub struct RunningConsumers {
    tasks: Vec<(String, JoinHandle<ConsumerExit>)>,
    states: Vec<(String, watch::Receiver<ConsumerState>)>,
    shutdown: CancellationToken,
}

impl RunningConsumers {
    /// Snapshot of every consumer's current state.
    pub fn states(&self) -> Vec<(String, ConsumerState)> {
        self.states
            .iter()
            .map(|(name, rx)| (name.clone(), *rx.borrow()))
            .collect()
    }

    /// Cloneable state watchers, for reporting after `self` is consumed.
    pub fn state_watchers(&self) -> Vec<(String, watch::Receiver<ConsumerState>)> {
        self.states.clone()
    }

    /// Wait for every consumer to exit.
    pub async fn wait(self) -> Vec<(String, ConsumerExit)> {
        let mut exits = Vec::with_capacity(self.tasks.len());
        for (name, task) in self.tasks {
            let exit = task
                .await
                .unwrap_or_else(|e| ConsumerExit::Panicked(e.to_string()));
            exits.push((name, exit));
        }
        info!("event consumers stopped");
        exits
    }

    /// Cancel every consumer and wait for them to exit.
    pub async fn shutdown(self) -> Vec<(String, ConsumerExit)> {
        self.shutdown.cancel();
        self.wait().await
    }
}
