//! Per-connection read and write pumps.
//!
//! Each admitted socket is split in two:
//! - the writer drains the connection's outbound queue into the socket and
//!   sends a ping every heartbeat interval
//! - the reader consumes control frames and watches for the peer going away
//!
//! Whichever side finishes first cancels the connection token, and the
//! connection is then unregistered from the hub exactly once.

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::config::WsConfig;
use super::hub::{ClientHandle, ConnectionId, Hub, Outbound};

/// Shortest heartbeat period the writer will schedule.
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(10);

/// Timing knobs shared by both pumps.
#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    /// Interval between server pings
    pub heartbeat_interval: Duration,
    /// Maximum time a single write may take
    pub write_timeout: Duration,
    /// Maximum silence tolerated from the peer
    pub idle_timeout: Duration,
}

impl From<&WsConfig> for PumpSettings {
    fn from(config: &WsConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            write_timeout: config.write_timeout(),
            idle_timeout: config.connection_timeout(),
        }
    }
}

/// Why the writer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterExit {
    /// The hub closed the outbound queue
    QueueClosed,
    /// The connection token was cancelled
    Cancelled,
    /// A write failed or timed out
    WriteFailed,
}

/// Why the reader stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderExit {
    /// Peer sent a close frame
    RemoteClosed,
    /// Stream ended without a close frame
    Disconnected,
    /// Transport reported an error
    ReadError,
    /// Nothing was received within the idle timeout
    IdleTimeout,
    /// The connection token was cancelled
    Cancelled,
}

#[derive(Debug, Error)]
enum WriteError {
    #[error("transport: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Runs both pumps for an admitted and registered connection until it ends.
pub async fn serve(
    socket: WebSocket,
    client: Arc<ClientHandle>,
    outbound: Outbound,
    hub: Arc<Hub>,
    settings: PumpSettings,
) {
    let conn_id = client.id();
    let cancel = client.cancel_token().clone();
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_pump(sink, outbound, cancel.clone(), settings, conn_id));
    let reader_exit = read_pump(stream, &cancel, settings.idle_timeout, conn_id).await;

    hub.unregister(conn_id);

    let writer_exit = match writer.await {
        Ok(exit) => Some(exit),
        Err(e) => {
            warn!(%conn_id, error = %e, "Writer task failed");
            None
        }
    };
    client.mark_closed();

    info!(
        %conn_id,
        user = %client.identity(),
        reader = ?reader_exit,
        writer = ?writer_exit,
        "WebSocket connection closed"
    );
}

/// Drains `outbound` into `sink` until the queue closes, the token is
/// cancelled, or a write fails. A failed write cancels the token.
pub async fn write_pump<S>(
    mut sink: S,
    mut outbound: Outbound,
    cancel: CancellationToken,
    settings: PumpSettings,
    conn_id: ConnectionId,
) -> WriterExit
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let period = settings.heartbeat_interval.max(MIN_HEARTBEAT_INTERVAL);
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                close(&mut sink, close_code::AWAY, "server closing", settings.write_timeout).await;
                break WriterExit::Cancelled;
            }

            next = outbound.recv() => {
                let Some(item) = next else {
                    close(&mut sink, close_code::NORMAL, "", settings.write_timeout).await;
                    break WriterExit::QueueClosed;
                };
                let json = match item.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(%conn_id, item_id = %item.id, error = %e, "Failed to encode notification");
                        continue;
                    }
                };
                if let Err(e) = send_bounded(&mut sink, Message::Text(json.into()), settings.write_timeout).await {
                    warn!(%conn_id, error = %e, "Write failed");
                    break WriterExit::WriteFailed;
                }
                trace!(%conn_id, item_id = %item.id, "Notification written");
            }

            _ = heartbeat.tick() => {
                if let Err(e) = send_bounded(&mut sink, Message::Ping(Vec::new().into()), settings.write_timeout).await {
                    warn!(%conn_id, error = %e, "Heartbeat ping failed");
                    break WriterExit::WriteFailed;
                }
                trace!(%conn_id, "Heartbeat ping sent");
            }
        }
    };

    if exit == WriterExit::WriteFailed {
        cancel.cancel();
    }
    debug!(%conn_id, ?exit, "Writer stopped");
    exit
}

/// Reads from `stream` until the peer leaves, the transport fails, the peer
/// stays silent past `idle_timeout`, or the token is cancelled.
///
/// Data frames are ignored; this channel only flows server to client.
pub async fn read_pump<S, E>(
    mut stream: S,
    cancel: &CancellationToken,
    idle_timeout: Duration,
    conn_id: ConnectionId,
) -> ReaderExit
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return ReaderExit::Cancelled,
            next = tokio::time::timeout(idle_timeout, stream.next()) => next,
        };

        match next {
            Err(_) => {
                info!(%conn_id, ?idle_timeout, "Peer idle, dropping connection");
                return ReaderExit::IdleTimeout;
            }
            Ok(None) => return ReaderExit::Disconnected,
            Ok(Some(Err(e))) => {
                debug!(%conn_id, error = %e, "WebSocket read error");
                return ReaderExit::ReadError;
            }
            Ok(Some(Ok(message))) => match message {
                Message::Close(frame) => {
                    debug!(%conn_id, code = frame.as_ref().map(|f| f.code), "Close requested by peer");
                    return ReaderExit::RemoteClosed;
                }
                Message::Ping(_) => trace!(%conn_id, "Received ping"),
                Message::Pong(_) => trace!(%conn_id, "Received pong"),
                Message::Text(text) => {
                    debug!(%conn_id, len = text.as_str().len(), "Ignoring inbound text frame");
                }
                Message::Binary(data) => {
                    debug!(%conn_id, len = data.len(), "Ignoring inbound binary frame");
                }
            },
        }
    }
}

async fn send_bounded<S>(sink: &mut S, message: Message, limit: Duration) -> Result<(), WriteError>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(WriteError::Transport(e.to_string())),
        Err(_) => Err(WriteError::Timeout(limit)),
    }
}

/// Best-effort close handshake. The peer may already be gone.
async fn close<S>(sink: &mut S, code: u16, reason: &'static str, limit: Duration)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    if let Err(e) = send_bounded(sink, Message::Close(Some(frame)), limit).await {
        trace!(error = %e, "Close frame not delivered");
    }
    let _ = tokio::time::timeout(limit, sink.close()).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::ws::message::{ActivityItem, ActivityType};
    use futures::channel::mpsc as fmpsc;

    fn settings() -> PumpSettings {
        PumpSettings {
            heartbeat_interval: Duration::from_secs(3600),
            write_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(3600),
        }
    }

    fn test_hub() -> Hub {
        Hub::new(&WsConfig::default())
    }

    fn item(message: &str) -> ActivityItem {
        ActivityItem::new(ActivityType::Comment, "post-1", "Post", message)
    }

    fn text_of(message: &Message) -> serde_json::Value {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_writer_drains_in_order_then_closes() {
        let hub = test_hub();
        let (client, outbound) = hub.connect(Identity::from("u1"));
        hub.register(&client);
        hub.deliver_to_user(client.identity(), item("first"));
        hub.deliver_to_user(client.identity(), item("second"));

        let (tx, rx) = fmpsc::unbounded::<Message>();
        let writer = tokio::spawn(write_pump(
            tx,
            outbound,
            CancellationToken::new(),
            settings(),
            client.id(),
        ));

        // Unregistering drops the hub's sender, ending the queue once drained.
        let sent: Vec<Message> = {
            let mut rx = rx;
            let mut out = Vec::new();
            out.push(rx.next().await.unwrap());
            out.push(rx.next().await.unwrap());
            hub.unregister(client.id());
            while let Some(message) = rx.next().await {
                out.push(message);
            }
            out
        };

        assert_eq!(text_of(&sent[0])["message"], "first");
        assert_eq!(text_of(&sent[1])["message"], "second");
        assert!(matches!(sent.last(), Some(Message::Close(Some(_)))));
        let exit = writer.await.unwrap();
        assert_eq!(exit, WriterExit::QueueClosed);
    }

    #[tokio::test]
    async fn test_writer_cancel_sends_going_away() {
        let hub = test_hub();
        let (client, outbound) = hub.connect(Identity::from("u1"));
        let cancel = CancellationToken::new();

        let (tx, mut rx) = fmpsc::unbounded::<Message>();
        let writer = tokio::spawn(write_pump(tx, outbound, cancel.clone(), settings(), client.id()));
        cancel.cancel();

        assert_eq!(writer.await.unwrap(), WriterExit::Cancelled);
        match rx.next().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, close_code::AWAY),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_writer_failure_cancels_connection() {
        let hub = test_hub();
        let (client, outbound) = hub.connect(Identity::from("u1"));
        hub.register(&client);

        let (tx, rx) = fmpsc::unbounded::<Message>();
        drop(rx);
        hub.deliver_to_user(client.identity(), item("lost"));

        let cancel = client.cancel_token().clone();
        let exit = write_pump(tx, outbound, cancel.clone(), settings(), client.id()).await;

        assert_eq!(exit, WriterExit::WriteFailed);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_writer_survives_zero_heartbeat_interval() {
        let hub = test_hub();
        let (client, outbound) = hub.connect(Identity::from("u1"));
        hub.register(&client);
        hub.deliver_to_user(client.identity(), item("still delivered"));
        let settings = PumpSettings {
            heartbeat_interval: Duration::ZERO,
            ..settings()
        };

        let (tx, mut rx) = fmpsc::unbounded::<Message>();
        let writer = tokio::spawn(write_pump(
            tx,
            outbound,
            CancellationToken::new(),
            settings,
            client.id(),
        ));

        let first = tokio::time::timeout(Duration::from_secs(2), rx.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(text_of(&first)["message"], "still delivered");

        hub.unregister(client.id());
        let exit = tokio::time::timeout(Duration::from_secs(2), writer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, WriterExit::QueueClosed);
    }

    #[tokio::test]
    async fn test_writer_sends_heartbeat_pings() {
        let hub = test_hub();
        let (client, outbound) = hub.connect(Identity::from("u1"));
        let cancel = CancellationToken::new();
        let settings = PumpSettings {
            heartbeat_interval: Duration::from_millis(20),
            ..settings()
        };

        let (tx, mut rx) = fmpsc::unbounded::<Message>();
        let writer = tokio::spawn(write_pump(tx, outbound, cancel.clone(), settings, client.id()));

        for _ in 0..2 {
            let message = tokio::time::timeout(Duration::from_secs(2), rx.next())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(message, Message::Ping(_)));
        }

        cancel.cancel();
        assert_eq!(writer.await.unwrap(), WriterExit::Cancelled);
    }

    #[tokio::test]
    async fn test_reader_stops_on_close_frame_and_ignores_data() {
        let (tx, rx) = fmpsc::unbounded::<Result<Message, std::io::Error>>();
        tx.unbounded_send(Ok(Message::Text("hello".into()))).unwrap();
        tx.unbounded_send(Ok(Message::Binary(vec![1, 2, 3].into()))).unwrap();
        tx.unbounded_send(Ok(Message::Pong(Vec::new().into()))).unwrap();
        tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        let exit = read_pump(
            rx,
            &CancellationToken::new(),
            Duration::from_secs(5),
            ConnectionId::generate(),
        )
        .await;
        assert_eq!(exit, ReaderExit::RemoteClosed);
    }

    #[tokio::test]
    async fn test_reader_terminal_conditions() {
        let id = ConnectionId::generate();
        let never = CancellationToken::new();

        let (tx, rx) = fmpsc::unbounded::<Result<Message, std::io::Error>>();
        drop(tx);
        assert_eq!(
            read_pump(rx, &never, Duration::from_secs(5), id).await,
            ReaderExit::Disconnected
        );

        let (tx, rx) = fmpsc::unbounded::<Result<Message, std::io::Error>>();
        tx.unbounded_send(Err(std::io::Error::other("reset"))).unwrap();
        assert_eq!(
            read_pump(rx, &never, Duration::from_secs(5), id).await,
            ReaderExit::ReadError
        );

        let (_tx, rx) = fmpsc::unbounded::<Result<Message, std::io::Error>>();
        assert_eq!(
            read_pump(rx, &never, Duration::from_millis(30), id).await,
            ReaderExit::IdleTimeout
        );

        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let (_tx, rx) = fmpsc::unbounded::<Result<Message, std::io::Error>>();
        assert_eq!(
            read_pump(rx, &cancelled, Duration::from_secs(5), id).await,
            ReaderExit::Cancelled
        );
    }

    #[tokio::test]
    async fn test_reader_activity_resets_idle_timer() {
        let (tx, rx) = fmpsc::unbounded::<Result<Message, std::io::Error>>();
        let reader = tokio::spawn(async move {
            read_pump(
                rx,
                &CancellationToken::new(),
                Duration::from_millis(150),
                ConnectionId::generate(),
            )
            .await
        });

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(60)).await;
            tx.unbounded_send(Ok(Message::Pong(Vec::new().into()))).unwrap();
        }
        tx.unbounded_send(Ok(Message::Close(None))).unwrap();

        assert_eq!(reader.await.unwrap(), ReaderExit::RemoteClosed);
    }
}
