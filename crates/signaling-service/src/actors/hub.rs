//! `HubActor` - single owner of the room/client registry.
//!
//! Every register, unregister, relay and broadcast is processed in order by
//! one task, so the maps need no locking and each client's queue is closed
//! exactly once: by dropping its sender when the entry leaves the map.
//!
//! Delivery never blocks. A client whose outbound queue is full (or whose
//! pumps are gone) is evicted on the spot; its room gets a `user-left`.
//!
//! Session teardowns run off the loop. A key with a teardown still in
//! flight gets its register reply only after that teardown finishes, so a
//! reconnecting client never negotiates against its old session.
//!
//! Session notices from the manager arrive on a second channel:
//! - `Closed(key)` drops the client without another session teardown
//! - `LocalCandidate(key, candidate)` is delivered as a server candidate

use super::messages::{BroadcastReport, ClientConnection, Delivery, HubMessage, HubStats};
use super::metrics::{ActorType, MailboxMonitor};
use crate::errors::SignalingError;
use crate::observability::metrics;
use crate::sessions::{SessionNotice, SessionTeardown};
use crate::signaling::envelope::Envelope;

use bytes::Bytes;
use common::types::{ClientId, RoomId, SessionKey};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Hub mailbox capacity.
const HUB_CHANNEL_BUFFER: usize = 4096;

/// Handle to the `HubActor`.
#[derive(Clone, Debug)]
pub struct HubHandle {
    sender: mpsc::Sender<HubMessage>,
    cancel_token: CancellationToken,
}

impl HubHandle {
    /// Spawn the hub.
    ///
    /// `queue_capacity` bounds each client's outbound queue. `teardown` is
    /// invoked (off the loop) whenever the hub drops a client for its own
    /// reasons.
    #[must_use]
    pub fn spawn(
        queue_capacity: usize,
        teardown: Arc<dyn SessionTeardown>,
        notices: mpsc::Receiver<SessionNotice>,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(HUB_CHANNEL_BUFFER);

        let actor = HubActor {
            receiver,
            notices,
            notices_open: true,
            cancel_token: cancel_token.clone(),
            queue_capacity,
            rooms: HashMap::new(),
            teardown,
            teardowns: HashMap::new(),
            mailbox: MailboxMonitor::new(ActorType::Hub),
        };
        let task = tokio::spawn(actor.run());

        (
            Self {
                sender,
                cancel_token,
            },
            task,
        )
    }

    async fn request<T>(
        &self,
        message: HubMessage,
        rx: oneshot::Receiver<T>,
    ) -> Result<T, SignalingError> {
        if self.cancel_token.is_cancelled() {
            return Err(SignalingError::Draining);
        }
        self.sender
            .send(message)
            .await
            .map_err(|e| SignalingError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SignalingError::Internal(format!("response receive failed: {e}")))
    }

    /// Register a client. Any existing entry for the key is replaced and its
    /// session torn down.
    ///
    /// # Errors
    ///
    /// `Draining` once the hub is shutting down.
    pub async fn register(&self, key: SessionKey) -> Result<ClientConnection, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.request(HubMessage::Register { key, respond_to: tx }, rx)
            .await
    }

    /// Unregister a client. Safe to call any number of times.
    pub async fn unregister(&self, key: SessionKey, connection_id: Uuid) {
        if self
            .sender
            .send(HubMessage::Unregister { key, connection_id })
            .await
            .is_err()
        {
            debug!(target: "sig.actor.hub", "Unregister after hub stopped");
        }
    }

    /// Deliver `envelope` to `target`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the target is not registered in that room.
    pub async fn relay(
        &self,
        target: SessionKey,
        envelope: Envelope,
    ) -> Result<Delivery, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            HubMessage::Relay {
                target,
                envelope,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// Deliver `envelope` to every client in `room_id` except `sender`.
    ///
    /// # Errors
    ///
    /// `Internal` if the envelope cannot be encoded or the hub is gone.
    pub async fn broadcast(
        &self,
        room_id: RoomId,
        sender: Option<ClientId>,
        envelope: Envelope,
    ) -> Result<BroadcastReport, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.request(
            HubMessage::Broadcast {
                room_id,
                sender,
                envelope,
                respond_to: tx,
            },
            rx,
        )
        .await?
    }

    /// # Errors
    ///
    /// `Draining` once the hub is shutting down.
    pub async fn stats(&self) -> Result<HubStats, SignalingError> {
        let (tx, rx) = oneshot::channel();
        self.request(HubMessage::GetStats { respond_to: tx }, rx)
            .await
    }

    /// Stop the hub; every client is cancelled and its queue closed.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

struct ClientEntry {
    connection_id: Uuid,
    outbound: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

/// A client leaving the registry.
struct Removal {
    key: SessionKey,
    reason: &'static str,
    /// Ask the session manager to close the client's session.
    teardown: bool,
}

pub struct HubActor {
    receiver: mpsc::Receiver<HubMessage>,
    notices: mpsc::Receiver<SessionNotice>,
    notices_open: bool,
    cancel_token: CancellationToken,
    queue_capacity: usize,
    rooms: HashMap<RoomId, HashMap<ClientId, ClientEntry>>,
    teardown: Arc<dyn SessionTeardown>,
    /// In-flight session teardowns, chained per key.
    teardowns: HashMap<SessionKey, JoinHandle<()>>,
    mailbox: MailboxMonitor,
}

impl HubActor {
    #[instrument(skip_all, name = "sig.actor.hub")]
    async fn run(mut self) {
        info!(target: "sig.actor.hub", "Hub started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(target: "sig.actor.hub", "Hub received cancellation signal");
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        info!(target: "sig.actor.hub", "Hub channel closed, exiting");
                        break;
                    };
                    self.handle_message(message);
                    self.mailbox.record_dequeue(self.receiver.len());
                }

                notice = self.notices.recv(), if self.notices_open => {
                    match notice {
                        Some(notice) => self.handle_notice(notice),
                        None => self.notices_open = false,
                    }
                }
            }
        }

        self.close_all();
        info!(
            target: "sig.actor.hub",
            messages_processed = self.mailbox.messages_processed(),
            "Hub stopped"
        );
    }

    fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::Register { key, respond_to } => {
                let connection = self.handle_register(key);
                // Latest link of the chain; it waits for any earlier ones.
                match self.teardowns.remove(&connection.key) {
                    None => {
                        let _ = respond_to.send(connection);
                    }
                    Some(teardown) => {
                        tokio::spawn(async move {
                            if let Err(e) = teardown.await {
                                warn!(target: "sig.actor.hub", error = %e, "Session teardown task failed");
                            }
                            let _ = respond_to.send(connection);
                        });
                    }
                }
            }

            HubMessage::Unregister { key, connection_id } => {
                self.handle_unregister(&key, connection_id);
            }

            HubMessage::Relay {
                target,
                envelope,
                respond_to,
            } => {
                let result = self.handle_relay(&target, &envelope);
                let _ = respond_to.send(result);
            }

            HubMessage::Broadcast {
                room_id,
                sender,
                envelope,
                respond_to,
            } => {
                let result = self.handle_broadcast(&room_id, sender.as_ref(), &envelope);
                let _ = respond_to.send(result);
            }

            HubMessage::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
        }
    }

    fn handle_notice(&mut self, notice: SessionNotice) {
        match notice {
            SessionNotice::Closed(key) => {
                self.remove_clients(vec![Removal {
                    key,
                    reason: "session_closed",
                    teardown: false,
                }]);
            }
            SessionNotice::LocalCandidate(key, candidate) => {
                let envelope = Envelope::server_candidate(&key, candidate);
                match envelope.to_bytes() {
                    Ok(frame) => {
                        if self.deliver(&key, frame, envelope.kind.as_str()).is_none() {
                            debug!(
                                target: "sig.actor.hub",
                                client = %key,
                                "Server candidate for unregistered client dropped"
                            );
                        }
                    }
                    Err(e) => {
                        warn!(target: "sig.actor.hub", error = %e, "Server candidate encode failed");
                    }
                }
            }
        }
    }

    /// Insert the entry for `key`. A replaced entry's teardown is left in
    /// `teardowns` for the caller to wait on.
    fn handle_register(&mut self, key: SessionKey) -> ClientConnection {
        let (outbound_tx, outbound_rx) = mpsc::channel(self.queue_capacity);
        let cancel = self.cancel_token.child_token();
        let connection_id = Uuid::new_v4();

        if let Some(previous) = self.take_entry(&key) {
            previous.cancel.cancel();
            let teardown = self.spawn_teardown(key.clone(), "replaced");
            self.teardowns.insert(key.clone(), teardown);
            info!(
                target: "sig.actor.hub",
                client = %key,
                previous_connection = %previous.connection_id,
                "Replacing existing registration"
            );
        }

        self.rooms
            .entry(key.room_id.clone())
            .or_default()
            .insert(
                key.client_id.clone(),
                ClientEntry {
                    connection_id,
                    outbound: outbound_tx,
                    cancel: cancel.clone(),
                },
            );

        info!(
            target: "sig.actor.hub",
            client = %key,
            connection_id = %connection_id,
            "Client registered"
        );

        // Presence goes out after the entry exists so evictions it causes
        // are processed with the room in its final shape.
        if let Err(e) = self.handle_broadcast(
            &key.room_id,
            Some(&key.client_id),
            &Envelope::user_joined(&key, None),
        ) {
            warn!(target: "sig.actor.hub", error = %e, "user-joined broadcast failed");
        }
        self.update_gauges();

        ClientConnection {
            key,
            connection_id,
            outbound: outbound_rx,
            cancel,
        }
    }

    fn handle_unregister(&mut self, key: &SessionKey, connection_id: Uuid) {
        let current = self
            .rooms
            .get(&key.room_id)
            .and_then(|room| room.get(&key.client_id))
            .map(|entry| entry.connection_id);

        if current != Some(connection_id) {
            debug!(
                target: "sig.actor.hub",
                client = %key,
                connection_id = %connection_id,
                "Unregister for unknown or replaced connection ignored"
            );
            return;
        }

        self.remove_clients(vec![Removal {
            key: key.clone(),
            reason: "unregistered",
            teardown: true,
        }]);
    }

    fn handle_relay(
        &mut self,
        target: &SessionKey,
        envelope: &Envelope,
    ) -> Result<Delivery, SignalingError> {
        let frame = envelope.to_bytes()?;
        self.deliver(target, frame, envelope.kind.as_str())
            .ok_or_else(|| {
                metrics::record_message_dropped("not_found");
                debug!(
                    target: "sig.actor.hub",
                    to = %target,
                    kind = envelope.kind.as_str(),
                    "Relay target not registered"
                );
                SignalingError::NotFound(target.client_id.to_string())
            })
    }

    fn handle_broadcast(
        &mut self,
        room_id: &RoomId,
        sender: Option<&ClientId>,
        envelope: &Envelope,
    ) -> Result<BroadcastReport, SignalingError> {
        let frame = envelope.to_bytes()?;
        let kind = envelope.kind.as_str();
        let mut report = BroadcastReport::default();

        let Some(room) = self.rooms.get(room_id) else {
            return Ok(report);
        };

        for (client_id, entry) in room {
            if Some(client_id) == sender {
                continue;
            }
            match entry.outbound.try_send(frame.clone()) {
                Ok(()) => {
                    metrics::record_message_relayed(kind);
                    report.delivered.push(client_id.clone());
                }
                Err(e) => {
                    record_failed_send(&e);
                    report.evicted.push(client_id.clone());
                }
            }
        }

        if !report.evicted.is_empty() {
            let removals = report
                .evicted
                .iter()
                .map(|client_id| Removal {
                    key: SessionKey {
                        room_id: room_id.clone(),
                        client_id: client_id.clone(),
                    },
                    reason: "queue_full",
                    teardown: true,
                })
                .collect();
            self.remove_clients(removals);
        }

        Ok(report)
    }

    /// Queue `frame` for `key`, evicting the client if its queue rejects it.
    ///
    /// Returns `None` if the client is not registered.
    fn deliver(&mut self, key: &SessionKey, frame: Bytes, kind: &'static str) -> Option<Delivery> {
        let entry = self
            .rooms
            .get(&key.room_id)
            .and_then(|room| room.get(&key.client_id))?;

        match entry.outbound.try_send(frame) {
            Ok(()) => {
                metrics::record_message_relayed(kind);
                Some(Delivery::Delivered)
            }
            Err(e) => {
                record_failed_send(&e);
                self.remove_clients(vec![Removal {
                    key: key.clone(),
                    reason: "queue_full",
                    teardown: true,
                }]);
                Some(Delivery::Evicted)
            }
        }
    }

    /// Remove clients, announcing each departure to its room. Clients that
    /// cannot take the announcement are evicted in turn.
    fn remove_clients(&mut self, removals: Vec<Removal>) {
        let mut pending: VecDeque<Removal> = removals.into();

        while let Some(removal) = pending.pop_front() {
            let Some(entry) = self.take_entry(&removal.key) else {
                continue;
            };
            entry.cancel.cancel();
            drop(entry);

            info!(
                target: "sig.actor.hub",
                client = %removal.key,
                reason = removal.reason,
                "Client removed"
            );

            if removal.teardown {
                let teardown = self.spawn_teardown(removal.key.clone(), removal.reason);
                self.teardowns.insert(removal.key.clone(), teardown);
            }

            let frame = match Envelope::user_left(&removal.key).to_bytes() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(target: "sig.actor.hub", error = %e, "user-left encode failed");
                    continue;
                }
            };
            let Some(room) = self.rooms.get(&removal.key.room_id) else {
                continue;
            };
            for (client_id, entry) in room {
                match entry.outbound.try_send(frame.clone()) {
                    Ok(()) => metrics::record_message_relayed("user-left"),
                    Err(e) => {
                        record_failed_send(&e);
                        pending.push_back(Removal {
                            key: SessionKey {
                                room_id: removal.key.room_id.clone(),
                                client_id: client_id.clone(),
                            },
                            reason: "queue_full",
                            teardown: true,
                        });
                    }
                }
            }
        }

        self.update_gauges();
    }

    fn take_entry(&mut self, key: &SessionKey) -> Option<ClientEntry> {
        let room = self.rooms.get_mut(&key.room_id)?;
        let entry = room.remove(&key.client_id);
        if room.is_empty() {
            self.rooms.remove(&key.room_id);
            debug!(target: "sig.actor.hub", room = %key.room_id, "Room emptied");
        }
        entry
    }

    /// Start tearing down the session for `key`, after any teardown already
    /// running for it.
    fn spawn_teardown(&mut self, key: SessionKey, reason: &'static str) -> JoinHandle<()> {
        self.teardowns.retain(|_, task| !task.is_finished());
        let previous = self.teardowns.remove(&key);
        let teardown = Arc::clone(&self.teardown);

        tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            teardown.teardown(&key, reason).await;
        })
    }

    fn stats(&self) -> HubStats {
        HubStats {
            rooms: self.rooms.len(),
            clients: self.rooms.values().map(HashMap::len).sum(),
        }
    }

    fn update_gauges(&self) {
        let stats = self.stats();
        metrics::set_rooms_active(stats.rooms);
        metrics::set_clients_active(stats.clients);
    }

    fn close_all(&mut self) {
        let stats = self.stats();
        for (_, room) in self.rooms.drain() {
            for (_, entry) in room {
                entry.cancel.cancel();
            }
        }
        self.update_gauges();

        info!(
            target: "sig.actor.hub",
            rooms = stats.rooms,
            clients = stats.clients,
            "Closed all clients"
        );
    }
}

fn record_failed_send<T>(err: &TrySendError<T>) {
    metrics::record_message_dropped(match err {
        TrySendError::Full(_) => "queue_full",
        TrySendError::Closed(_) => "closed",
    });
    metrics::record_client_evicted();
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::signaling::envelope::EnvelopeType;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTeardown {
        calls: Mutex<Vec<(SessionKey, &'static str)>>,
    }

    #[async_trait]
    impl SessionTeardown for RecordingTeardown {
        async fn teardown(&self, key: &SessionKey, reason: &'static str) {
            self.calls.lock().unwrap().push((key.clone(), reason));
        }
    }

    struct Fixture {
        hub: HubHandle,
        notices: mpsc::Sender<SessionNotice>,
        teardown: Arc<RecordingTeardown>,
    }

    fn fixture(queue_capacity: usize) -> Fixture {
        let teardown = Arc::new(RecordingTeardown::default());
        let (notices, notices_rx) = mpsc::channel(16);
        let (hub, _task) = HubHandle::spawn(
            queue_capacity,
            Arc::clone(&teardown) as Arc<dyn SessionTeardown>,
            notices_rx,
            CancellationToken::new(),
        );
        Fixture {
            hub,
            notices,
            teardown,
        }
    }

    fn key(room: &str, client: &str) -> SessionKey {
        SessionKey::new(room, client)
    }

    fn decode(frame: &Bytes) -> Envelope {
        serde_json::from_slice(frame).unwrap()
    }

    fn drain(conn: &mut ClientConnection) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Ok(frame) = conn.outbound.try_recv() {
            out.push(decode(&frame));
        }
        out
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_register_announces_to_room() {
        let f = fixture(8);
        let mut alice = f.hub.register(key("general", "alice")).await.unwrap();
        let _bob = f.hub.register(key("general", "bob")).await.unwrap();

        let seen = drain(&mut alice);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen.first().unwrap().kind, EnvelopeType::UserJoined);
        assert_eq!(seen.first().unwrap().from.as_deref(), Some("bob"));

        let stats = f.hub.stats().await.unwrap();
        assert_eq!(stats, HubStats { rooms: 1, clients: 2 });
    }

    #[tokio::test]
    async fn test_relay_to_missing_target_is_not_found() {
        let f = fixture(8);
        let _alice = f.hub.register(key("general", "alice")).await.unwrap();

        let result = f
            .hub
            .relay(key("general", "ghost"), Envelope::new(EnvelopeType::Ping))
            .await;
        assert!(matches!(result, Err(SignalingError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent_and_removes_empty_room() {
        let f = fixture(8);
        let alice = f.hub.register(key("general", "alice")).await.unwrap();

        f.hub.unregister(alice.key.clone(), alice.connection_id).await;
        f.hub.unregister(alice.key.clone(), alice.connection_id).await;

        let stats = f.hub.stats().await.unwrap();
        assert_eq!(stats, HubStats::default());
        assert!(alice.cancel.is_cancelled());

        settle().await;
        let calls = f.teardown.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(key("general", "alice"), "unregistered")]);
    }

    #[tokio::test]
    async fn test_unregister_closes_queue_once() {
        let f = fixture(8);
        let mut alice = f.hub.register(key("general", "alice")).await.unwrap();

        f.hub.unregister(alice.key.clone(), alice.connection_id).await;
        f.hub.stats().await.unwrap();

        assert!(alice.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_stale_unregister_does_not_remove_new_connection() {
        let f = fixture(8);
        let old = f.hub.register(key("general", "alice")).await.unwrap();
        let new = f.hub.register(key("general", "alice")).await.unwrap();
        assert!(old.cancel.is_cancelled());
        assert!(!new.cancel.is_cancelled());

        f.hub.unregister(old.key.clone(), old.connection_id).await;

        let stats = f.hub.stats().await.unwrap();
        assert_eq!(stats.clients, 1);
        assert!(!new.cancel.is_cancelled());

        settle().await;
        let calls = f.teardown.calls.lock().unwrap().clone();
        assert_eq!(calls, vec![(key("general", "alice"), "replaced")]);
    }

    /// Teardown that holds until the test hands out a permit.
    struct GatedTeardown {
        gate: tokio::sync::Semaphore,
        finished: Mutex<Vec<(SessionKey, &'static str)>>,
    }

    #[async_trait]
    impl SessionTeardown for GatedTeardown {
        async fn teardown(&self, key: &SessionKey, reason: &'static str) {
            self.gate.acquire().await.unwrap().forget();
            self.finished.lock().unwrap().push((key.clone(), reason));
        }
    }

    fn gated_hub() -> (HubHandle, Arc<GatedTeardown>) {
        let teardown = Arc::new(GatedTeardown {
            gate: tokio::sync::Semaphore::new(0),
            finished: Mutex::new(Vec::new()),
        });
        let (_notices, notices_rx) = mpsc::channel(16);
        let (hub, _task) = HubHandle::spawn(
            8,
            Arc::clone(&teardown) as Arc<dyn SessionTeardown>,
            notices_rx,
            CancellationToken::new(),
        );
        (hub, teardown)
    }

    #[tokio::test]
    async fn test_reconnect_waits_for_previous_session_teardown() {
        let (hub, teardown) = gated_hub();
        let old = hub.register(key("general", "alice")).await.unwrap();

        let reconnect = tokio::spawn({
            let hub = hub.clone();
            async move { hub.register(key("general", "alice")).await.unwrap() }
        });

        settle().await;
        assert!(old.cancel.is_cancelled());
        assert!(!reconnect.is_finished());
        // The hub keeps serving other clients meanwhile.
        let _bob = hub.register(key("general", "bob")).await.unwrap();

        teardown.gate.add_permits(1);
        let new = reconnect.await.unwrap();
        assert!(!new.cancel.is_cancelled());
        assert_eq!(
            teardown.finished.lock().unwrap().clone(),
            vec![(key("general", "alice"), "replaced")]
        );
    }

    #[tokio::test]
    async fn test_register_after_unregister_waits_for_teardown() {
        let (hub, teardown) = gated_hub();
        let first = hub.register(key("general", "alice")).await.unwrap();
        hub.unregister(first.key.clone(), first.connection_id).await;

        let second = tokio::spawn({
            let hub = hub.clone();
            async move { hub.register(key("general", "alice")).await.unwrap() }
        });

        settle().await;
        assert!(!second.is_finished());

        teardown.gate.add_permits(1);
        second.await.unwrap();
        assert_eq!(
            teardown.finished.lock().unwrap().clone(),
            vec![(key("general", "alice"), "unregistered")]
        );
    }

    #[tokio::test]
    async fn test_full_queue_evicts_only_that_client() {
        let f = fixture(2);
        let mut alice = f.hub.register(key("general", "alice")).await.unwrap();
        let mut bob = f.hub.register(key("general", "bob")).await.unwrap();
        drain(&mut alice);

        // Carol never drains; her queue holds the two messages below.
        let carol = f.hub.register(key("general", "carol")).await.unwrap();
        drain(&mut alice);
        drain(&mut bob);

        let mut evicted = Vec::new();
        for _ in 0..3 {
            let report = f
                .hub
                .broadcast(
                    RoomId::new("general"),
                    Some(ClientId::new("alice")),
                    Envelope::new(EnvelopeType::Ping),
                )
                .await
                .unwrap();
            evicted.extend(report.evicted);
            drain(&mut bob);
        }

        assert_eq!(evicted, vec![ClientId::new("carol")]);
        assert!(carol.cancel.is_cancelled());
        assert_eq!(f.hub.stats().await.unwrap().clients, 2);

        let left: Vec<_> = drain(&mut alice)
            .into_iter()
            .filter(|e| e.kind == EnvelopeType::UserLeft)
            .collect();
        assert_eq!(left.len(), 1);
        assert_eq!(left.first().unwrap().from.as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn test_session_closed_notice_drops_client_without_teardown() {
        let f = fixture(8);
        let alice = f.hub.register(key("general", "alice")).await.unwrap();

        f.notices
            .send(SessionNotice::Closed(key("general", "alice")))
            .await
            .unwrap();
        settle().await;

        assert!(alice.cancel.is_cancelled());
        assert_eq!(f.hub.stats().await.unwrap().clients, 0);
        assert!(f.teardown.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_local_candidate_notice_delivered_as_server_candidate() {
        let f = fixture(8);
        let mut alice = f.hub.register(key("general", "alice")).await.unwrap();

        f.notices
            .send(SessionNotice::LocalCandidate(
                key("general", "alice"),
                serde_json::json!({"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host"}),
            ))
            .await
            .unwrap();
        settle().await;

        let seen = drain(&mut alice);
        assert_eq!(seen.len(), 1);
        let envelope = seen.first().unwrap();
        assert_eq!(envelope.kind, EnvelopeType::IceCandidate);
        assert_eq!(envelope.from.as_deref(), Some("server"));
    }

    #[tokio::test]
    async fn test_shutdown_closes_every_client() {
        let f = fixture(8);
        let mut alice = f.hub.register(key("general", "alice")).await.unwrap();
        let mut bob = f.hub.register(key("music", "bob")).await.unwrap();
        drain(&mut alice);

        f.hub.shutdown();
        assert!(alice.cancel.is_cancelled());
        assert!(bob.cancel.is_cancelled());
        assert!(alice.outbound.recv().await.is_none());
        assert!(bob.outbound.recv().await.is_none());

        assert!(matches!(
            f.hub.register(key("general", "carol")).await,
            Err(SignalingError::Draining)
        ));
    }
}
