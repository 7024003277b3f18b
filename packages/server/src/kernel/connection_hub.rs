//! In-process registry of live client connections.
//!
//! One active connection per user. Each entry owns the sending half of the
//! connection's bounded outbound queue; the connection's writer task drains
//! the other half. No socket I/O happens while the table lock is held.
//!
//! # Usage
//!
//! WebSocket endpoint:
//!   let (handle, outbound_rx) = hub.open_connection(user_id);
//!   hub.register(handle.clone()).await;
//!
//! Delivery layer:
//!   hub.unicast(member_id, frame.clone()).await;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::common::UserId;

/// Serialized outbound frame, shared across recipients.
pub type OutboundFrame = Arc<str>;

/// A registered connection's handle.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    pub id: Uuid,
    pub user_id: UserId,
    outbound: mpsc::Sender<OutboundFrame>,
    closer: CancellationToken,
}

impl ConnectionHandle {
    /// Fires when the connection must shut down.
    pub fn closer(&self) -> CancellationToken {
        self.closer.clone()
    }

    pub fn close(&self) {
        self.closer.cancel();
    }
}

/// Result of a unicast attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnicastOutcome {
    /// Enqueued on the recipient's outbound queue
    Queued,
    /// Recipient has no connection on this instance
    Offline,
    /// Recipient's queue is full; the frame was discarded
    Dropped,
    /// Recipient's writer is gone; the entry is being torn down
    Closed,
}

/// Thread-safe, cloneable connection table keyed by user id.
#[derive(Clone)]
pub struct ConnectionHub {
    connections: Arc<RwLock<HashMap<UserId, ConnectionHandle>>>,
    capacity: usize,
}

impl ConnectionHub {
    /// Create a new hub with default outbound capacity (256 frames per connection).
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Allocate a handle and its outbound queue for a new connection.
    pub fn open_connection(
        &self,
        user_id: UserId,
    ) -> (ConnectionHandle, mpsc::Receiver<OutboundFrame>) {
        let (outbound, rx) = mpsc::channel(self.capacity);
        let handle = ConnectionHandle {
            id: Uuid::new_v4(),
            user_id,
            outbound,
            closer: CancellationToken::new(),
        };
        (handle, rx)
    }

    /// Make `handle` the user's active connection. A previous connection for
    /// the same user is closed.
    pub async fn register(&self, handle: ConnectionHandle) {
        let user_id = handle.user_id;
        let connection_id = handle.id;

        let (previous, active) = {
            let mut connections = self.connections.write().await;
            let previous = connections.insert(user_id, handle);
            (previous, connections.len())
        };
        metrics::gauge!("chat_ws_active_connections").set(active as f64);

        if let Some(previous) = previous {
            info!(user_id = %user_id, superseded = %previous.id, "closing superseded connection");
            previous.close();
        }
        debug!(user_id = %user_id, connection_id = %connection_id, active, "connection registered");
    }

    /// Push a frame to one user's connection without waiting.
    pub async fn unicast(&self, user_id: UserId, frame: OutboundFrame) -> UnicastOutcome {
        let connections = self.connections.read().await;
        let Some(handle) = connections.get(&user_id) else {
            return UnicastOutcome::Offline;
        };

        match handle.outbound.try_send(frame) {
            Ok(()) => UnicastOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::counter!("chat_ws_dropped_frames_total").increment(1);
                warn!(user_id = %user_id, connection_id = %handle.id, "outbound queue full, dropping frame");
                UnicastOutcome::Dropped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => UnicastOutcome::Closed,
        }
    }

    /// Remove the user's connection, whichever it is. Idempotent.
    pub async fn unregister(&self, user_id: UserId) {
        let (removed, active) = {
            let mut connections = self.connections.write().await;
            let removed = connections.remove(&user_id);
            (removed, connections.len())
        };
        metrics::gauge!("chat_ws_active_connections").set(active as f64);

        if let Some(handle) = removed {
            handle.close();
            debug!(user_id = %user_id, connection_id = %handle.id, active, "connection unregistered");
        }
    }

    /// Remove the user's entry only if it still belongs to `connection_id`.
    ///
    /// Returns false when a newer connection has already replaced it.
    pub async fn unregister_connection(&self, user_id: UserId, connection_id: Uuid) -> bool {
        let (removed, active) = {
            let mut connections = self.connections.write().await;
            let owned = connections
                .get(&user_id)
                .is_some_and(|handle| handle.id == connection_id);
            if owned {
                connections.remove(&user_id);
            }
            (owned, connections.len())
        };
        metrics::gauge!("chat_ws_active_connections").set(active as f64);

        if removed {
            debug!(user_id = %user_id, connection_id = %connection_id, active, "connection unregistered");
        }
        removed
    }

    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.connections.read().await.contains_key(&user_id)
    }

    pub async fn active_connections(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Close and forget every connection (process shutdown).
    pub async fn close_all(&self) {
        let drained: Vec<ConnectionHandle> = {
            let mut connections = self.connections.write().await;
            connections.drain().map(|(_, handle)| handle).collect()
        };
        metrics::gauge!("chat_ws_active_connections").set(0.0);

        for handle in &drained {
            handle.close();
        }
        info!(count = drained.len(), "closed all connections");
    }
}

impl Default for ConnectionHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(text: &str) -> OutboundFrame {
        Arc::from(text)
    }

    #[tokio::test]
    async fn test_unicast_reaches_only_target() {
        let hub = ConnectionHub::new();
        let (alice, mut alice_rx) = hub.open_connection(1);
        let (bob, mut bob_rx) = hub.open_connection(2);
        hub.register(alice).await;
        hub.register(bob).await;

        let outcome = hub.unicast(2, frame("hello bob")).await;

        assert_eq!(outcome, UnicastOutcome::Queued);
        assert_eq!(bob_rx.recv().await.as_deref(), Some("hello bob"));
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unicast_to_unknown_user_is_noop() {
        let hub = ConnectionHub::new();
        let (alice, mut alice_rx) = hub.open_connection(1);
        hub.register(alice).await;

        assert_eq!(hub.unicast(99, frame("x")).await, UnicastOutcome::Offline);
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let hub = ConnectionHub::with_capacity(2);
        let (alice, mut alice_rx) = hub.open_connection(1);
        hub.register(alice).await;

        assert_eq!(hub.unicast(1, frame("1")).await, UnicastOutcome::Queued);
        assert_eq!(hub.unicast(1, frame("2")).await, UnicastOutcome::Queued);
        assert_eq!(hub.unicast(1, frame("3")).await, UnicastOutcome::Dropped);

        assert_eq!(alice_rx.recv().await.as_deref(), Some("1"));
        assert_eq!(alice_rx.recv().await.as_deref(), Some("2"));
        assert!(alice_rx.try_recv().is_err());
        // The slow client keeps its connection.
        assert!(hub.is_online(1).await);
    }

    #[tokio::test]
    async fn test_reregister_closes_previous_connection() {
        let hub = ConnectionHub::new();
        let (first, _first_rx) = hub.open_connection(1);
        let (second, mut second_rx) = hub.open_connection(1);
        let first_closer = first.closer();
        hub.register(first.clone()).await;
        hub.register(second.clone()).await;

        assert!(first_closer.is_cancelled());
        assert_eq!(hub.active_connections().await, 1);

        // Late cleanup of the superseded connection leaves the new one alone.
        assert!(!hub.unregister_connection(1, first.id).await);
        assert_eq!(hub.unicast(1, frame("x")).await, UnicastOutcome::Queued);
        assert_eq!(second_rx.recv().await.as_deref(), Some("x"));

        assert!(hub.unregister_connection(1, second.id).await);
        assert!(!hub.is_online(1).await);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = ConnectionHub::new();
        let (alice, _rx) = hub.open_connection(1);
        let closer = alice.closer();
        hub.register(alice).await;

        hub.unregister(1).await;
        hub.unregister(1).await;

        assert!(closer.is_cancelled());
        assert_eq!(hub.active_connections().await, 0);
        assert_eq!(hub.unicast(1, frame("x")).await, UnicastOutcome::Offline);
    }

    #[tokio::test]
    async fn test_unicast_after_writer_gone_reports_closed() {
        let hub = ConnectionHub::new();
        let (alice, alice_rx) = hub.open_connection(1);
        hub.register(alice).await;
        drop(alice_rx);

        assert_eq!(hub.unicast(1, frame("x")).await, UnicastOutcome::Closed);
    }

    #[tokio::test]
    async fn test_close_all() {
        let hub = ConnectionHub::new();
        let (alice, _a) = hub.open_connection(1);
        let (bob, _b) = hub.open_connection(2);
        let closers = [alice.closer(), bob.closer()];
        hub.register(alice).await;
        hub.register(bob).await;

        hub.close_all().await;

        assert!(closers.iter().all(|c| c.is_cancelled()));
        assert_eq!(hub.active_connections().await, 0);
    }
}
