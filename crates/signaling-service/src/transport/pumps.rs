//! Read and write pumps for one client connection.

use super::{Frame, PumpSettings, SignalSink, SignalStream};
use crate::actors::{ClientConnection, HubHandle};
use crate::errors::SignalingError;
use crate::observability::metrics;
use crate::signaling::{Flow, Router};

use bytes::Bytes;
use common::types::SessionKey;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Why the read pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// Peer closed the socket.
    Closed,
    /// No frame within the liveness deadline.
    TimedOut,
    /// Inbound frame over the size limit.
    TooLarge,
    /// Client sent `leave` or `disconnect`.
    Left,
    /// Socket read error.
    Failed,
    /// Hub eviction, write failure or shutdown.
    Cancelled,
}

impl ReadEnd {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ReadEnd::Closed => "closed",
            ReadEnd::TimedOut => "timed_out",
            ReadEnd::TooLarge => "too_large",
            ReadEnd::Left => "left",
            ReadEnd::Failed => "read_failed",
            ReadEnd::Cancelled => "cancelled",
        }
    }
}

/// Drive a registered connection until either side ends it, then
/// unregister it from the hub.
pub async fn run_connection<S, K>(
    mut stream: S,
    sink: K,
    connection: ClientConnection,
    hub: HubHandle,
    router: Router,
    settings: PumpSettings,
) -> ReadEnd
where
    S: SignalStream,
    K: SignalSink + 'static,
{
    let ClientConnection {
        key,
        connection_id,
        outbound,
        cancel,
    } = connection;

    let writer = tokio::spawn(write_pump(
        sink,
        key.clone(),
        outbound,
        settings,
        cancel.clone(),
    ));

    let end = read_pump(&mut stream, &key, &router, &settings, &cancel).await;
    info!(
        target: "sig.transport",
        client = %key,
        connection_id = %connection_id,
        reason = end.as_str(),
        "Connection ended"
    );

    hub.unregister(key.clone(), connection_id).await;
    cancel.cancel();

    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            debug!(target: "sig.transport", client = %key, error = %e, "Write pump failed");
        }
        Err(e) => {
            warn!(target: "sig.transport", client = %key, error = %e, "Write pump task failed");
        }
    }

    end
}

/// Read frames and hand text to the router until the socket ends, the
/// liveness deadline passes or `cancel` fires.
#[instrument(skip_all, name = "sig.transport.read", fields(client = %key))]
pub async fn read_pump<S: SignalStream>(
    stream: &mut S,
    key: &SessionKey,
    router: &Router,
    settings: &PumpSettings,
    cancel: &CancellationToken,
) -> ReadEnd {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => return ReadEnd::Cancelled,
            next = tokio::time::timeout(settings.pong_wait, stream.next_frame()) => next,
        };

        let frame = match next {
            Err(_) => {
                info!(target: "sig.transport", client = %key, "Liveness deadline passed");
                return ReadEnd::TimedOut;
            }
            Ok(None) => return ReadEnd::Closed,
            Ok(Some(Err(e))) => {
                debug!(target: "sig.transport", client = %key, error = %e, "Socket read failed");
                return ReadEnd::Failed;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let text = match frame {
            Frame::Text(text) => text,
            Frame::Binary(data) => {
                if let Ok(text) = String::from_utf8(data.to_vec()) {
                    text
                } else {
                    metrics::record_message_dropped("invalid");
                    debug!(target: "sig.transport", client = %key, "Dropping non-UTF-8 binary frame");
                    continue;
                }
            }
            Frame::Ping(_) | Frame::Pong(_) => continue,
            Frame::Close => return ReadEnd::Closed,
        };

        if text.len() > settings.max_message_bytes {
            warn!(
                target: "sig.transport",
                client = %key,
                size = text.len(),
                limit = settings.max_message_bytes,
                "Inbound frame over size limit"
            );
            return ReadEnd::TooLarge;
        }

        if router.route(key, &text).await == Flow::Close {
            return ReadEnd::Left;
        }
    }
}

/// Write queued frames and keepalive pings.
///
/// Sends a close frame once the hub drops the queue or `cancel` fires.
/// Frames already queued when `cancel` fires are flushed first, within one
/// write deadline. A failed write cancels the connection.
///
/// # Errors
///
/// Returns `Transport` if a write fails or misses its deadline.
#[instrument(skip_all, name = "sig.transport.write", fields(client = %key))]
pub async fn write_pump<K: SignalSink>(
    mut sink: K,
    key: SessionKey,
    mut outbound: mpsc::Receiver<Bytes>,
    settings: PumpSettings,
    cancel: CancellationToken,
) -> Result<(), SignalingError> {
    let mut ping = tokio::time::interval_at(
        Instant::now() + settings.ping_period,
        settings.ping_period,
    );

    let result = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                flush_queued(&mut sink, &key, &mut outbound, settings.write_wait).await;
                break Ok(());
            }

            queued = outbound.recv() => {
                let Some(bytes) = queued else {
                    debug!(target: "sig.transport", client = %key, "Outbound queue closed");
                    break Ok(());
                };
                let text = match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(target: "sig.transport", client = %key, error = %e, "Skipping non-UTF-8 outbound frame");
                        continue;
                    }
                };
                if let Err(e) = send_with_deadline(&mut sink, Frame::Text(text), settings.write_wait).await {
                    break Err(e);
                }
            }

            _ = ping.tick() => {
                if let Err(e) = send_with_deadline(&mut sink, Frame::Ping(Bytes::new()), settings.write_wait).await {
                    break Err(e);
                }
            }
        }
    };

    match &result {
        Ok(()) => {
            if let Err(e) = send_with_deadline(&mut sink, Frame::Close, settings.write_wait).await {
                debug!(target: "sig.transport", client = %key, error = %e, "Close frame not sent");
            }
        }
        Err(e) => {
            debug!(target: "sig.transport", client = %key, error = %e, "Write failed, closing connection");
            cancel.cancel();
        }
    }

    result
}

/// Best-effort write of whatever is still queued, bounded by `deadline`.
async fn flush_queued<K: SignalSink>(
    sink: &mut K,
    key: &SessionKey,
    outbound: &mut mpsc::Receiver<Bytes>,
    deadline: Duration,
) {
    let flush = async {
        let mut flushed = 0usize;
        while let Ok(bytes) = outbound.try_recv() {
            let Ok(text) = String::from_utf8(bytes.to_vec()) else {
                continue;
            };
            if sink.send_frame(Frame::Text(text)).await.is_err() {
                break;
            }
            flushed += 1;
        }
        flushed
    };

    match tokio::time::timeout(deadline, flush).await {
        Ok(0) => {}
        Ok(flushed) => {
            debug!(target: "sig.transport", client = %key, flushed, "Flushed queued frames before close");
        }
        Err(_) => {
            debug!(target: "sig.transport", client = %key, "Flush before close timed out");
        }
    }
}

async fn send_with_deadline<K: SignalSink>(
    sink: &mut K,
    frame: Frame,
    deadline: Duration,
) -> Result<(), SignalingError> {
    tokio::time::timeout(deadline, sink.send_frame(frame))
        .await
        .map_err(|_| SignalingError::Transport("write deadline exceeded".to_string()))?
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        frames: Arc<Mutex<Vec<Frame>>>,
        fail: bool,
    }

    #[async_trait]
    impl SignalSink for RecordingSink {
        async fn send_frame(&mut self, frame: Frame) -> Result<(), SignalingError> {
            if self.fail {
                return Err(SignalingError::Transport("broken pipe".to_string()));
            }
            self.frames.lock().unwrap().push(frame);
            Ok(())
        }
    }

    fn settings() -> PumpSettings {
        PumpSettings {
            pong_wait: Duration::from_secs(60),
            write_wait: Duration::from_secs(10),
            ping_period: Duration::from_secs(54),
            max_message_bytes: 1024,
        }
    }

    fn key() -> SessionKey {
        SessionKey::new("general", "alice")
    }

    #[tokio::test]
    async fn test_writes_queue_in_order_then_closes() {
        let sink = RecordingSink::default();
        let (tx, rx) = mpsc::channel(8);
        tx.send(Bytes::from_static(b"{\"type\":\"pong\"}")).await.unwrap();
        tx.send(Bytes::from_static(b"{\"type\":\"user-left\"}")).await.unwrap();
        drop(tx);

        write_pump(sink.clone(), key(), rx, settings(), CancellationToken::new())
            .await
            .unwrap();

        let frames = sink.frames.lock().unwrap().clone();
        assert_eq!(
            frames,
            vec![
                Frame::Text("{\"type\":\"pong\"}".to_string()),
                Frame::Text("{\"type\":\"user-left\"}".to_string()),
                Frame::Close,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_on_period() {
        let sink = RecordingSink::default();
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(write_pump(
            sink.clone(),
            key(),
            rx,
            settings(),
            CancellationToken::new(),
        ));

        tokio::time::sleep(Duration::from_secs(53)).await;
        assert!(sink.frames.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(tx);
        task.await.unwrap().unwrap();

        let frames = sink.frames.lock().unwrap().clone();
        assert_eq!(frames, vec![Frame::Ping(Bytes::new()), Frame::Close]);
    }

    #[tokio::test]
    async fn test_write_failure_cancels_connection() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let (tx, rx) = mpsc::channel(8);
        tx.send(Bytes::from_static(b"{}")).await.unwrap();
        let cancel = CancellationToken::new();

        let result = write_pump(sink, key(), rx, settings(), cancel.clone()).await;

        assert!(matches!(result, Err(SignalingError::Transport(_))));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_sends_close() {
        let sink = RecordingSink::default();
        let (_tx, rx) = mpsc::channel::<Bytes>(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        write_pump(sink.clone(), key(), rx, settings(), cancel)
            .await
            .unwrap();

        assert_eq!(sink.frames.lock().unwrap().clone(), vec![Frame::Close]);
    }

    #[tokio::test]
    async fn test_cancel_flushes_queued_frames_before_close() {
        let sink = RecordingSink::default();
        let (tx, rx) = mpsc::channel(8);
        tx.send(Bytes::from_static(b"{\"type\":\"error\"}")).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        write_pump(sink.clone(), key(), rx, settings(), cancel)
            .await
            .unwrap();

        assert_eq!(
            sink.frames.lock().unwrap().clone(),
            vec![
                Frame::Text("{\"type\":\"error\"}".to_string()),
                Frame::Close,
            ]
        );
        drop(tx);
    }

    #[test]
    fn test_read_end_labels() {
        assert_eq!(ReadEnd::TimedOut.as_str(), "timed_out");
        assert_eq!(ReadEnd::Left.as_str(), "left");
    }
}
