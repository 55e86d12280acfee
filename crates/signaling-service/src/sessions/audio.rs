//! Best-effort audio fan-out between sessions in the same room.
//!
//! Every session registers a bounded packet queue drained by a writer task
//! into its local track. A forwarder task per remote track copies each
//! packet into the queues of every other session in the room with
//! `try_send`, so a slow destination only loses its own packets.

use super::engine::{AudioPacket, LocalAudioTrack, RemoteAudioTrack};
use super::session::Session;
use crate::observability::metrics;

use common::types::{ClientId, RoomId, SessionKey};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Packets buffered per destination before new ones are dropped.
pub const AUDIO_QUEUE_CAPACITY: usize = 64;

/// Result of copying one packet to the rest of a room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub dropped: usize,
}

type RoomQueues = HashMap<ClientId, mpsc::Sender<AudioPacket>>;

#[derive(Debug, Default)]
pub struct AudioRouter {
    rooms: RwLock<HashMap<RoomId, RoomQueues>>,
}

impl AudioRouter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` as a destination and spawn the writer that drains its
    /// queue into `track`. The writer stops on `cancel` or [`detach`](Self::detach).
    pub fn attach(
        &self,
        key: &SessionKey,
        track: Arc<dyn LocalAudioTrack>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::channel::<AudioPacket>(AUDIO_QUEUE_CAPACITY);

        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.room_id.clone())
            .or_default()
            .insert(key.client_id.clone(), tx);

        let key = key.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    packet = rx.recv() => {
                        let Some(packet) = packet else { break };
                        if let Err(e) = track.write_packet(&packet).await {
                            debug!(
                                target: "sig.sessions",
                                session = %key,
                                error = %e,
                                "Audio write failed, skipping packet"
                            );
                        }
                    }
                }
            }
            trace!(target: "sig.sessions", session = %key, "Audio writer stopped");
        })
    }

    /// Remove `key` as a destination. Its writer exits once the queue drains.
    pub fn detach(&self, key: &SessionKey) {
        let mut rooms = self.rooms.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(room) = rooms.get_mut(&key.room_id) {
            room.remove(&key.client_id);
            if room.is_empty() {
                rooms.remove(&key.room_id);
            }
        }
    }

    /// Copy `packet` to every other destination in the sender's room.
    pub fn fan_out(&self, from: &SessionKey, packet: &AudioPacket) -> FanOut {
        let rooms = self.rooms.read().unwrap_or_else(PoisonError::into_inner);
        let mut result = FanOut::default();

        let Some(room) = rooms.get(&from.room_id) else {
            return result;
        };

        for (client_id, tx) in room {
            if *client_id == from.client_id {
                continue;
            }
            match tx.try_send(packet.clone()) {
                Ok(()) => result.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    result.dropped += 1;
                    metrics::record_audio_packet_dropped();
                    trace!(
                        target: "sig.sessions",
                        from = %from,
                        to = %client_id,
                        "Audio queue full, packet dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => result.dropped += 1,
            }
        }

        result
    }

    /// Number of destinations registered in `room_id`.
    #[must_use]
    pub fn destinations(&self, room_id: &RoomId) -> usize {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room_id)
            .map_or(0, HashMap::len)
    }

    /// Read `track` until it ends or the session closes, fanning out each
    /// packet and refreshing the session's activity.
    pub fn spawn_forwarder(
        self: &Arc<Self>,
        session: Arc<Session>,
        track: Arc<dyn RemoteAudioTrack>,
    ) -> JoinHandle<()> {
        let router = Arc::clone(self);
        let cancel = session.cancel_token().clone();

        tokio::spawn(async move {
            debug!(
                target: "sig.sessions",
                session = %session.key(),
                track = %track.id(),
                "Audio forwarder started"
            );

            let mut forwarded: u64 = 0;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    packet = track.read_packet() => {
                        let Some(packet) = packet else { break };
                        session.touch();
                        router.fan_out(session.key(), &packet);
                        forwarded += 1;
                    }
                }
            }

            debug!(
                target: "sig.sessions",
                session = %session.key(),
                forwarded = forwarded,
                "Audio forwarder stopped"
            );
        })
    }
}
