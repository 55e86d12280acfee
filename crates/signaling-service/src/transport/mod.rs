//! Client socket transport.
//!
//! Every registered client runs two tasks:
//!
//! ```text
//! socket ──► read pump ──► Router ──► HubHandle
//! socket ◄── write pump ◄── outbound queue (owned by the hub)
//! ```
//!
//! The pumps are generic over [`SignalStream`] / [`SignalSink`] so the same
//! code drives an axum WebSocket in production and an in-memory socket in
//! tests.

pub mod pumps;
pub mod websocket;

use crate::config::Config;
use crate::errors::SignalingError;

use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

pub use pumps::{read_pump, run_connection, write_pump, ReadEnd};

/// One socket frame, independent of the socket implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close,
}

/// Inbound half of a client socket.
#[async_trait]
pub trait SignalStream: Send {
    /// Next frame, or `None` once the peer has gone.
    async fn next_frame(&mut self) -> Option<Result<Frame, SignalingError>>;
}

/// Outbound half of a client socket.
#[async_trait]
pub trait SignalSink: Send {
    /// # Errors
    ///
    /// Returns `Transport` if the frame cannot be written.
    async fn send_frame(&mut self, frame: Frame) -> Result<(), SignalingError>;
}

/// Timing and size limits for the pumps.
#[derive(Debug, Clone, Copy)]
pub struct PumpSettings {
    /// Read deadline, reset by every inbound frame.
    pub pong_wait: Duration,
    /// Deadline for a single socket write.
    pub write_wait: Duration,
    /// Keepalive ping period; shorter than `pong_wait`.
    pub ping_period: Duration,
    /// Largest accepted inbound frame.
    pub max_message_bytes: usize,
}

impl PumpSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            pong_wait: config.pong_wait,
            write_wait: config.write_wait,
            ping_period: config.ping_period(),
            max_message_bytes: config.max_message_bytes,
        }
    }
}
