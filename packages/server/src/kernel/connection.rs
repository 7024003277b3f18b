//! Per-connection read and write loops.
//!
//! The writer task owns the socket's sending half: it drains the outbound
//! queue, sends heartbeat pings and is the only place the socket is closed.
//! The reader runs on the caller's task. Both stop on the connection's
//! cancellation token; whichever exits first cancels the other.

use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::common::UserId;
use crate::config::WsConfig;
use crate::kernel::connection_hub::{ConnectionHandle, ConnectionHub, OutboundFrame};

/// Transport-neutral socket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Drive a registered connection until either side ends it, then unregister.
pub async fn run_connection<R, W, E>(
    hub: ConnectionHub,
    handle: ConnectionHandle,
    outbound: mpsc::Receiver<OutboundFrame>,
    mut reader: R,
    writer: W,
    config: WsConfig,
) where
    R: Stream<Item = Result<WsFrame, E>> + Unpin,
    E: Display,
    W: Sink<WsFrame> + Unpin + Send + 'static,
    W::Error: Display,
{
    let closer = handle.closer();
    let user_id = handle.user_id;
    let connection_id = handle.id;

    let writer_task = tokio::spawn(write_loop(
        writer,
        outbound,
        closer.clone(),
        config.clone(),
        user_id,
    ));

    // Any inbound frame (including pongs) proves the peer is alive.
    let idle_limit = config.ping_interval + config.pong_timeout;
    loop {
        let next = tokio::select! {
            biased;
            _ = closer.cancelled() => break,
            next = timeout(idle_limit, reader.next()) => next,
        };

        match next {
            Err(_) => {
                warn!(user_id = %user_id, connection_id = %connection_id, "heartbeat timed out");
                break;
            }
            Ok(None) | Ok(Some(Ok(WsFrame::Close))) => {
                debug!(user_id = %user_id, connection_id = %connection_id, "client closed connection");
                break;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                warn!(user_id = %user_id, connection_id = %connection_id, error = %e, "read failed");
                break;
            }
        }
    }

    closer.cancel();
    if let Err(e) = writer_task.await {
        warn!(user_id = %user_id, error = %e, "writer task ended abnormally");
    }
    hub.unregister_connection(user_id, connection_id).await;
}

/// Next frame for the writer, or `None` when the connection should stop.
///
/// A due ping wins over queued frames so a backlogged client still gets
/// heartbeats.
async fn next_outgoing(
    outbound: &mut mpsc::Receiver<OutboundFrame>,
    ping: &mut Interval,
    closer: &CancellationToken,
) -> Option<WsFrame> {
    tokio::select! {
        biased;
        _ = closer.cancelled() => None,
        _ = ping.tick() => Some(WsFrame::Ping(Vec::new())),
        next = outbound.recv() => next.map(|text| WsFrame::Text(text.to_string())),
    }
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    closer: CancellationToken,
    config: WsConfig,
    user_id: UserId,
) where
    W: Sink<WsFrame> + Unpin,
    W::Error: Display,
{
    let mut ping = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let Some(frame) = next_outgoing(&mut outbound, &mut ping, &closer).await else {
            break;
        };

        match timeout(config.write_timeout, writer.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(user_id = %user_id, error = %e, "write failed");
                break;
            }
            Err(_) => {
                warn!(user_id = %user_id, "write timed out");
                break;
            }
        }
    }

    closer.cancel();
    let _ = timeout(config.write_timeout, writer.send(WsFrame::Close)).await;
    let _ = timeout(config.write_timeout, writer.close()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as fmpsc;
    use std::sync::Arc;
    use std::time::Duration;

    struct Peer {
        inbound: fmpsc::UnboundedSender<Result<WsFrame, String>>,
        written: fmpsc::UnboundedReceiver<WsFrame>,
    }

    fn test_config() -> WsConfig {
        WsConfig {
            outbound_capacity: 8,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
        }
    }

    async fn connect(
        hub: &ConnectionHub,
        user_id: i64,
    ) -> (Peer, ConnectionHandle, tokio::task::JoinHandle<()>) {
        let (handle, outbound) = hub.open_connection(user_id);
        hub.register(handle.clone()).await;

        let (inbound_tx, inbound_rx) = fmpsc::unbounded();
        let (written_tx, written_rx) = fmpsc::unbounded();
        let task = tokio::spawn(run_connection(
            hub.clone(),
            handle.clone(),
            outbound,
            inbound_rx,
            written_tx,
            test_config(),
        ));
        (
            Peer {
                inbound: inbound_tx,
                written: written_rx,
            },
            handle,
            task,
        )
    }

    #[tokio::test]
    async fn test_outbound_frames_are_written_in_order() {
        let hub = ConnectionHub::new();
        let (mut peer, _handle, task) = connect(&hub, 1).await;

        hub.unicast(1, Arc::from("one")).await;
        hub.unicast(1, Arc::from("two")).await;

        assert_eq!(peer.written.next().await, Some(WsFrame::Text("one".into())));
        assert_eq!(peer.written.next().await, Some(WsFrame::Text("two".into())));

        peer.inbound.unbounded_send(Ok(WsFrame::Close)).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_close_unregisters_and_closes_once() {
        let hub = ConnectionHub::new();
        let (peer, _handle, task) = connect(&hub, 1).await;

        peer.inbound.unbounded_send(Ok(WsFrame::Close)).unwrap();
        task.await.unwrap();

        assert!(!hub.is_online(1).await);
        let written: Vec<WsFrame> = peer.written.collect().await;
        assert_eq!(written, vec![WsFrame::Close]);
    }

    #[tokio::test]
    async fn test_read_error_terminates_connection() {
        let hub = ConnectionHub::new();
        let (peer, _handle, task) = connect(&hub, 1).await;

        peer.inbound
            .unbounded_send(Err("connection reset".to_string()))
            .unwrap();
        task.await.unwrap();

        assert!(!hub.is_online(1).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_then_times_out() {
        let hub = ConnectionHub::new();
        let (mut peer, _handle, task) = connect(&hub, 1).await;

        // First ping after one interval.
        assert_eq!(peer.written.next().await, Some(WsFrame::Ping(Vec::new())));

        // No pong ever arrives: the connection is closed and removed.
        task.await.unwrap();
        assert!(!hub.is_online(1).await);
        let rest: Vec<WsFrame> = peer.written.collect().await;
        assert_eq!(rest.last(), Some(&WsFrame::Close));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pongs_keep_connection_alive() {
        let hub = ConnectionHub::new();
        let (mut peer, _handle, task) = connect(&hub, 1).await;

        for _ in 0..3 {
            assert_eq!(peer.written.next().await, Some(WsFrame::Ping(Vec::new())));
            peer.inbound
                .unbounded_send(Ok(WsFrame::Pong(Vec::new())))
                .unwrap();
        }
        assert!(hub.is_online(1).await);

        peer.inbound.unbounded_send(Ok(WsFrame::Close)).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_superseded_connection_stops_without_removing_new_one() {
        let hub = ConnectionHub::new();
        let (_old_peer, _old, old_task) = connect(&hub, 1).await;
        let (new_peer, new_handle, new_task) = connect(&hub, 1).await;

        old_task.await.unwrap();

        assert!(hub.is_online(1).await);
        hub.unicast(1, Arc::from("still here")).await;
        drop(new_peer.inbound);
        new_task.await.unwrap();
        assert!(!hub.is_online(1).await);
        assert!(new_handle.closer().is_cancelled());
    }

    #[tokio::test]
    async fn test_due_ping_is_not_starved_by_backlog() {
        let (tx, mut outbound) = mpsc::channel(8);
        for i in 0..8 {
            tx.try_send(OutboundFrame::from(format!("frame {}", i))).unwrap();
        }
        // First tick is due immediately
        let mut ping = interval_at(Instant::now(), Duration::from_secs(30));
        let closer = CancellationToken::new();

        assert_eq!(
            next_outgoing(&mut outbound, &mut ping, &closer).await,
            Some(WsFrame::Ping(Vec::new()))
        );
        assert_eq!(
            next_outgoing(&mut outbound, &mut ping, &closer).await,
            Some(WsFrame::Text("frame 0".into()))
        );

        closer.cancel();
        assert_eq!(next_outgoing(&mut outbound, &mut ping, &closer).await, None);
    }

    #[tokio::test]
    async fn test_write_failure_terminates_connection() {
        let hub = ConnectionHub::new();
        let (peer, _handle, task) = connect(&hub, 1).await;
        let _inbound = peer.inbound;
        drop(peer.written);

        hub.unicast(1, Arc::from("lost")).await;
        task.await.unwrap();

        assert!(!hub.is_online(1).await);
    }
}
