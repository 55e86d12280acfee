//! Message types for the hub actor.
//!
//! Requests go over `tokio::sync::mpsc`; replies come back on
//! `tokio::sync::oneshot`.

use crate::errors::SignalingError;
use crate::signaling::envelope::Envelope;

use bytes::Bytes;
use common::types::{ClientId, RoomId, SessionKey};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Messages sent to `HubActor`.
#[derive(Debug)]
pub enum HubMessage {
    /// Add a client to its room, replacing any previous entry for the key.
    Register {
        key: SessionKey,
        respond_to: oneshot::Sender<ClientConnection>,
    },

    /// Remove a client. Ignored if `connection_id` is not the current entry.
    Unregister {
        key: SessionKey,
        connection_id: Uuid,
    },

    /// Point-to-point delivery within the target's room.
    Relay {
        target: SessionKey,
        envelope: Envelope,
        respond_to: oneshot::Sender<Result<Delivery, SignalingError>>,
    },

    /// Deliver to every client in the room except `sender`.
    Broadcast {
        room_id: RoomId,
        sender: Option<ClientId>,
        envelope: Envelope,
        respond_to: oneshot::Sender<Result<BroadcastReport, SignalingError>>,
    },

    GetStats {
        respond_to: oneshot::Sender<HubStats>,
    },
}

/// A registered client's end of the hub.
///
/// The write pump drains `outbound`; when the hub drops the sending half
/// (unregister, eviction, shutdown) the pump sends a close frame. `cancel`
/// stops both pumps.
#[derive(Debug)]
pub struct ClientConnection {
    pub key: SessionKey,
    pub connection_id: Uuid,
    pub outbound: mpsc::Receiver<Bytes>,
    pub cancel: CancellationToken,
}

/// Outcome of a single relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the target.
    Delivered,
    /// The target's queue was full or closed; it has been unregistered.
    Evicted,
}

/// Outcome of a broadcast. Every recipient is in exactly one bucket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<ClientId>,
    pub evicted: Vec<ClientId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    pub rooms: usize,
    pub clients: usize,
}
