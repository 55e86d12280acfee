//! In-memory client socket.
//!
//! [`MemorySocket::pair`] returns the server halves (handed to the pumps)
//! and the client end a test drives like a browser would.

use async_trait::async_trait;
use signaling_service::errors::SignalingError;
use signaling_service::signaling::Envelope;
use signaling_service::transport::{Frame, SignalSink, SignalStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long `recv_*` helpers wait before giving up.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Server-side read half.
pub struct MemoryStream {
    inbound: mpsc::UnboundedReceiver<Result<Frame, SignalingError>>,
}

#[async_trait]
impl SignalStream for MemoryStream {
    async fn next_frame(&mut self) -> Option<Result<Frame, SignalingError>> {
        self.inbound.recv().await
    }
}

/// Server-side write half.
pub struct MemorySink {
    outbound: mpsc::UnboundedSender<Frame>,
    fail_writes: Arc<AtomicBool>,
}

#[async_trait]
impl SignalSink for MemorySink {
    async fn send_frame(&mut self, frame: Frame) -> Result<(), SignalingError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SignalingError::Transport("scripted write failure".to_string()));
        }
        self.outbound
            .send(frame)
            .map_err(|_| SignalingError::Transport("client end dropped".to_string()))
    }
}

/// Client end of an in-memory socket.
pub struct MemorySocket {
    inbound: Option<mpsc::UnboundedSender<Result<Frame, SignalingError>>>,
    outbound: mpsc::UnboundedReceiver<Frame>,
    fail_writes: Arc<AtomicBool>,
}

impl MemorySocket {
    /// Server read half, server write half, client end.
    #[must_use]
    pub fn pair() -> (MemoryStream, MemorySink, MemorySocket) {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let fail_writes = Arc::new(AtomicBool::new(false));

        (
            MemoryStream { inbound: in_rx },
            MemorySink {
                outbound: out_tx,
                fail_writes: Arc::clone(&fail_writes),
            },
            MemorySocket {
                inbound: Some(in_tx),
                outbound: out_rx,
                fail_writes,
            },
        )
    }

    /// Send a frame to the server.
    pub fn send_frame(&self, frame: Frame) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Ok(frame));
        }
    }

    pub fn send_text(&self, text: &str) {
        self.send_frame(Frame::Text(text.to_string()));
    }

    pub fn send_json(&self, value: &serde_json::Value) {
        self.send_text(&value.to_string());
    }

    /// Deliver a read error to the server.
    pub fn send_error(&self, reason: &str) {
        if let Some(tx) = &self.inbound {
            let _ = tx.send(Err(SignalingError::Transport(reason.to_string())));
        }
    }

    /// Drop the client's sending side; the server sees end-of-stream.
    pub fn hang_up(&mut self) {
        self.inbound = None;
    }

    /// Make every subsequent server write fail.
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Next frame from the server, or `None` on timeout or once the server
    /// side is gone.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        tokio::time::timeout(RECV_TIMEOUT, self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next envelope from the server, skipping keepalive pings. `None` on
    /// close, timeout or end of stream.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        loop {
            match self.recv_frame().await? {
                Frame::Text(text) => return Some(serde_json::from_str(&text).unwrap()),
                Frame::Ping(_) | Frame::Pong(_) | Frame::Binary(_) => {}
                Frame::Close => return None,
            }
        }
    }

    /// Wait for the server's close frame. Returns `false` if something else
    /// arrived first or nothing arrived in time.
    pub async fn recv_close(&mut self) -> bool {
        loop {
            match self.recv_frame().await {
                Some(Frame::Close) => return true,
                Some(Frame::Ping(_)) => {}
                _ => return false,
            }
        }
    }

    /// Frames already queued by the server, without waiting.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// `true` if no text frame arrives within `window`.
    pub async fn is_silent_for(&mut self, window: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.outbound.recv()).await {
                Err(_) | Ok(None) => return true,
                Ok(Some(Frame::Text(_))) => return false,
                Ok(Some(_)) => {}
            }
        }
    }
}
