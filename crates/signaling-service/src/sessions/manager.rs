//! `SessionManager` - owns every server-side peer session.
//!
//! Background tasks (both stop on the manager's cancellation token):
//! - event loop: applies queued [`EngineEvent`]s (state changes, gathered
//!   candidates, remote tracks)
//! - cleanup sweep: closes sessions idle longer than the configured timeout
//!
//! The Hub is told about closed sessions and server-gathered candidates
//! through [`SessionNotice`]s, never by a direct call.
//!
//! A key outlives its sessions: a reconnecting client gets a fresh session
//! under the same [`SessionKey`]. Anything that closes a session it looked
//! up earlier (engine events, the sweep, a failed negotiation) removes it by
//! instance id, never by key alone.

use super::audio::AudioRouter;
use super::engine::{
    CandidateInit, EngineEvent, EngineEventSender, IceServer, MediaEngine, SessionEvent,
};
use super::session::{CandidateOutcome, Session};
use super::state::ConnectionState;
use crate::actors::metrics::{ActorType, MailboxMonitor};
use crate::config::Config;
use crate::errors::SignalingError;
use crate::observability::metrics;

use async_trait::async_trait;
use common::secret::ExposeSecret;
use common::types::SessionKey;
use relay_credentials::CredentialService;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Engine event queue depth shared by all sessions.
const ENGINE_EVENT_BUFFER: usize = 1024;

/// Messages from the manager to the Hub.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    /// The session is gone; drop and close the client socket.
    Closed(SessionKey),
    /// Candidate gathered by the server for this client.
    LocalCandidate(SessionKey, Value),
}

/// Teardown hook the Hub calls when a client goes away.
#[async_trait]
pub trait SessionTeardown: Send + Sync {
    async fn teardown(&self, key: &SessionKey, reason: &'static str);
}

/// Session tuning, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub stun_urls: Vec<String>,
    pub turn_urls: Vec<String>,
    pub credential_ttl: Duration,
    pub idle_timeout: Duration,
    pub cleanup_interval: Duration,
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            stun_urls: config.stun_urls.clone(),
            turn_urls: config.turn_urls.clone(),
            credential_ttl: config.credential_ttl,
            idle_timeout: config.session_idle_timeout,
            cleanup_interval: config.cleanup_interval,
        }
    }
}

pub struct SessionManager {
    engine: Arc<dyn MediaEngine>,
    credentials: Arc<CredentialService>,
    settings: SessionSettings,
    sessions: Mutex<HashMap<SessionKey, Arc<Session>>>,
    audio: Arc<AudioRouter>,
    events_tx: mpsc::Sender<SessionEvent>,
    notices: mpsc::Sender<SessionNotice>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create the manager and start its event loop and cleanup sweep.
    ///
    /// Notices for the Hub are sent on `notices`. Both background tasks stop
    /// when `cancel_token` is cancelled.
    pub fn start(
        engine: Arc<dyn MediaEngine>,
        credentials: Arc<CredentialService>,
        settings: SessionSettings,
        notices: mpsc::Sender<SessionNotice>,
        cancel_token: CancellationToken,
    ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let (events_tx, events_rx) = mpsc::channel(ENGINE_EVENT_BUFFER);
        let cleanup_interval = settings.cleanup_interval;

        let manager = Arc::new(Self {
            engine,
            credentials,
            settings,
            sessions: Mutex::new(HashMap::new()),
            audio: Arc::new(AudioRouter::new()),
            events_tx,
            notices,
            cancel_token,
        });

        let tasks = vec![
            Arc::clone(&manager).spawn_event_loop(events_rx),
            manager.spawn_cleanup_task(cleanup_interval),
        ];
        (manager, tasks)
    }

    /// ICE servers for `client`: configured STUN plus TURN with a fresh
    /// ephemeral credential.
    ///
    /// # Errors
    ///
    /// Returns `Credential` if a relay credential cannot be issued.
    pub fn ice_servers_for(&self, client: &str) -> Result<Vec<IceServer>, SignalingError> {
        let mut servers: Vec<IceServer> = self
            .settings
            .stun_urls
            .iter()
            .map(IceServer::open)
            .collect();

        if !self.settings.turn_urls.is_empty() {
            let credential = self
                .credentials
                .generate(client, self.settings.credential_ttl)?;
            metrics::record_credential_issued();

            servers.push(IceServer {
                urls: self.settings.turn_urls.clone(),
                username: Some(credential.username.clone()),
                credential: Some(credential.password.expose_secret().to_string()),
            });
        }

        Ok(servers)
    }

    /// Return the live session for `key`, creating one if none exists.
    ///
    /// Get-or-create runs under the map lock, so concurrent callers for the
    /// same key share one session.
    ///
    /// # Errors
    ///
    /// - `Draining` after shutdown
    /// - `Negotiation` while a failed session for `key` is being closed
    /// - `Credential` if the relay credential cannot be issued
    /// - `Internal` if the engine cannot build a peer connection
    pub async fn create_or_get_session(
        &self,
        key: &SessionKey,
    ) -> Result<Arc<Session>, SignalingError> {
        if self.cancel_token.is_cancelled() {
            return Err(SignalingError::Draining);
        }

        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get(key) {
            if existing.state().is_terminal() {
                // A failed session is removed by its pending close.
                return Err(SignalingError::Negotiation(format!(
                    "session {key} is closing"
                )));
            }
            return Ok(Arc::clone(existing));
        }

        let ice_servers = self.ice_servers_for(key.client_id.as_str())?;
        let session_id = Uuid::new_v4();
        let events = EngineEventSender::new(key.clone(), session_id, self.events_tx.clone());
        let peer = self
            .engine
            .create_peer(key, ice_servers, events)
            .await
            .map_err(|e| SignalingError::Internal(format!("peer setup failed: {e}")))?;

        let session = Arc::new(Session::new(
            key.clone(),
            session_id,
            peer,
            self.cancel_token.child_token(),
        ));
        self.audio.attach(
            key,
            session.peer().local_track(),
            session.cancel_token().clone(),
        );

        sessions.insert(key.clone(), Arc::clone(&session));
        metrics::set_sessions_active(sessions.len());
        drop(sessions);

        info!(target: "sig.sessions", session = %key, session_id = %session_id, "Session created");
        Ok(session)
    }

    async fn get(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(key).cloned()
    }

    /// Apply a client offer and return the server's answer SDP.
    ///
    /// # Errors
    ///
    /// Returns `Negotiation` if the offer cannot be applied. The session is
    /// closed in that case but the Hub is not told; see
    /// [`notify_closed`](Self::notify_closed). See
    /// [`create_or_get_session`](Self::create_or_get_session) for setup
    /// failures.
    pub async fn handle_offer(&self, key: &SessionKey, sdp: &str) -> Result<String, SignalingError> {
        let session = self.create_or_get_session(key).await?;
        let start = std::time::Instant::now();

        match session.apply_offer(sdp).await {
            Ok(answer) => {
                metrics::record_negotiation_duration("offer", start.elapsed());
                debug!(target: "sig.sessions", session = %key, "Offer applied");
                Ok(answer)
            }
            Err(e) => {
                warn!(target: "sig.sessions", session = %key, error = %e, "Offer rejected");
                self.discard(&session, "negotiation_failed").await;
                Err(SignalingError::Negotiation(e.to_string()))
            }
        }
    }

    /// Apply a client answer to the server's earlier offer.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` if no session exists; none is created
    /// - `Negotiation` if the answer cannot be applied (session closed, Hub
    ///   not told)
    pub async fn handle_answer(&self, key: &SessionKey, sdp: &str) -> Result<(), SignalingError> {
        let session = self
            .get(key)
            .await
            .ok_or_else(|| SignalingError::SessionNotFound(key.to_string()))?;
        let start = std::time::Instant::now();

        match session.apply_answer(sdp).await {
            Ok(()) => {
                metrics::record_negotiation_duration("answer", start.elapsed());
                debug!(target: "sig.sessions", session = %key, "Answer applied");
                Ok(())
            }
            Err(e) => {
                warn!(target: "sig.sessions", session = %key, error = %e, "Answer rejected");
                self.discard(&session, "negotiation_failed").await;
                Err(SignalingError::Negotiation(e.to_string()))
            }
        }
    }

    /// Start server-initiated negotiation and return the local offer SDP.
    ///
    /// # Errors
    ///
    /// Returns `Negotiation` if the engine cannot produce an offer (session
    /// closed, Hub not told).
    pub async fn create_offer(&self, key: &SessionKey) -> Result<String, SignalingError> {
        let session = self.create_or_get_session(key).await?;
        let start = std::time::Instant::now();

        match session.local_offer().await {
            Ok(offer) => {
                metrics::record_negotiation_duration("local_offer", start.elapsed());
                Ok(offer)
            }
            Err(e) => {
                warn!(target: "sig.sessions", session = %key, error = %e, "Local offer failed");
                self.discard(&session, "negotiation_failed").await;
                Err(SignalingError::Negotiation(e.to_string()))
            }
        }
    }

    /// Apply a trickled candidate, buffering it until a remote description
    /// is set.
    ///
    /// Accepts the browser's `RTCIceCandidateInit` object or a bare
    /// candidate string. An empty candidate marks end-of-candidates.
    ///
    /// # Errors
    ///
    /// - `Validation` for an unparseable candidate body
    /// - `SessionNotFound` if no session exists
    /// - `Negotiation` if the engine rejects it (session closed, Hub not told)
    pub async fn add_candidate(
        &self,
        key: &SessionKey,
        candidate: &Value,
    ) -> Result<CandidateOutcome, SignalingError> {
        let candidate = parse_candidate(candidate)?;
        let session = self
            .get(key)
            .await
            .ok_or_else(|| SignalingError::SessionNotFound(key.to_string()))?;

        if candidate.candidate.is_empty() {
            session.touch();
            return Ok(CandidateOutcome::EndOfCandidates);
        }

        match session.add_candidate(candidate).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(target: "sig.sessions", session = %key, error = %e, "Candidate rejected");
                self.discard(&session, "negotiation_failed").await;
                Err(SignalingError::Negotiation(e.to_string()))
            }
        }
    }

    /// Close and remove the session for `key`.
    ///
    /// Notifies the Hub with [`SessionNotice::Closed`]. Returns `false` if
    /// there was no session.
    pub async fn close_session(&self, key: &SessionKey, reason: &'static str) -> bool {
        self.remove_session(key, reason, true, |_| true).await
    }

    /// Tell the Hub the session for `key` is gone so it drops the client.
    ///
    /// Negotiation failures close the session without a notice, which lets
    /// the caller answer the client first and then call this.
    pub async fn notify_closed(&self, key: &SessionKey) {
        if self
            .notices
            .send(SessionNotice::Closed(key.clone()))
            .await
            .is_err()
        {
            debug!(target: "sig.sessions", session = %key, "Hub gone, close notice dropped");
        }
    }

    // Failed negotiation: close this instance only, without a notice.
    async fn discard(&self, session: &Session, reason: &'static str) {
        let id = session.id();
        self.remove_session(session.key(), reason, false, |current| current.id() == id)
            .await;
    }

    /// Remove and close the session under `key` if `matches` accepts it.
    ///
    /// The check and the removal happen under one lock, together with the
    /// audio detach, so a newer session under the same key is never touched.
    async fn remove_session<F>(
        &self,
        key: &SessionKey,
        reason: &'static str,
        notify: bool,
        matches: F,
    ) -> bool
    where
        F: FnOnce(&Session) -> bool,
    {
        let removed = {
            let mut sessions = self.sessions.lock().await;
            if !sessions.get(key).is_some_and(|current| matches(current.as_ref())) {
                return false;
            }
            let removed = sessions.remove(key);
            self.audio.detach(key);
            metrics::set_sessions_active(sessions.len());
            removed
        };
        let Some(session) = removed else {
            return false;
        };

        session.close().await;

        info!(
            target: "sig.sessions",
            session = %key,
            session_id = %session.id(),
            reason = reason,
            "Session closed"
        );

        if notify {
            self.notify_closed(key).await;
        }
        true
    }

    /// Close every session idle longer than the timeout as of now.
    pub async fn cleanup_sweep(&self) -> Vec<SessionKey> {
        self.cleanup_sweep_at(Instant::now()).await
    }

    /// Close every session idle longer than the timeout as of `now`.
    ///
    /// Idleness is checked again at removal, so a session that was replaced
    /// or touched since the scan survives.
    pub async fn cleanup_sweep_at(&self, now: Instant) -> Vec<SessionKey> {
        let timeout = self.settings.idle_timeout;
        let idle: Vec<(SessionKey, Uuid)> = self
            .sessions
            .lock()
            .await
            .iter()
            .filter(|(_, session)| session.is_idle(now, timeout))
            .map(|(key, session)| (key.clone(), session.id()))
            .collect();

        let mut closed = Vec::with_capacity(idle.len());
        for (key, id) in idle {
            let still_idle =
                |current: &Session| current.id() == id && current.is_idle(now, timeout);
            if self.remove_session(&key, "idle", true, still_idle).await {
                closed.push(key);
            }
        }

        if !closed.is_empty() {
            metrics::record_sessions_swept(closed.len());
            info!(
                target: "sig.sessions",
                closed = closed.len(),
                "Cleanup sweep closed idle sessions"
            );
        }
        closed
    }

    fn spawn_cleanup_task(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = manager.cancel_token.cancelled() => break,
                    _ = ticker.tick() => {
                        manager.cleanup_sweep().await;
                    }
                }
            }
            debug!(target: "sig.sessions", "Cleanup task stopped");
        })
    }

    #[instrument(skip_all, name = "sig.sessions.events")]
    async fn run_event_loop(self: Arc<Self>, mut events: mpsc::Receiver<SessionEvent>) {
        let mailbox = MailboxMonitor::new(ActorType::SessionEvents);
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.handle_event(event).await;
                    mailbox.record_dequeue(events.len());
                }
            }
        }
        debug!(
            target: "sig.sessions",
            processed = mailbox.messages_processed(),
            "Engine event loop stopped"
        );
    }

    fn spawn_event_loop(
        self: Arc<Self>,
        events: mpsc::Receiver<SessionEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run_event_loop(events))
    }

    async fn handle_event(self: &Arc<Self>, tagged: SessionEvent) {
        let SessionEvent {
            key,
            session_id,
            event,
        } = tagged;
        let Some(session) = self.get(&key).await else {
            debug!(target: "sig.sessions", session = %key, ?event, "Event for unknown session");
            return;
        };
        if session.id() != session_id {
            debug!(
                target: "sig.sessions",
                session = %key,
                session_id = %session_id,
                ?event,
                "Event from replaced session ignored"
            );
            return;
        }

        match event {
            EngineEvent::LocalCandidate(candidate) => {
                let value = match serde_json::to_value(&candidate) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(target: "sig.sessions", session = %key, error = %e, "Candidate encode failed");
                        return;
                    }
                };
                if self
                    .notices
                    .send(SessionNotice::LocalCandidate(key, value))
                    .await
                    .is_err()
                {
                    debug!(target: "sig.sessions", "Hub gone, candidate dropped");
                }
            }

            EngineEvent::StateChanged(peer_state) => {
                let Some(next) = ConnectionState::from_peer(peer_state) else {
                    return;
                };
                if next == ConnectionState::Closed {
                    self.spawn_close(key, session_id, "transport_closed");
                } else if session.transition(next) && next == ConnectionState::Failed {
                    self.spawn_close(key, session_id, "transport_failed");
                }
            }

            EngineEvent::RemoteTrack(track) => {
                self.audio.spawn_forwarder(session, track);
            }
        }
    }

    // Closing awaits the engine, which may itself be emitting events.
    fn spawn_close(self: &Arc<Self>, key: SessionKey, id: Uuid, reason: &'static str) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager
                .remove_session(&key, reason, true, |current| current.id() == id)
                .await;
        });
    }

    /// Current state of the session for `key`, if one exists.
    pub async fn session_state(&self, key: &SessionKey) -> Option<ConnectionState> {
        self.get(key).await.map(|session| session.state())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Stop background tasks and close every session.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();

        let keys: Vec<SessionKey> = self.sessions.lock().await.keys().cloned().collect();
        let count = keys.len();
        for key in keys {
            self.close_session(&key, "shutdown").await;
        }

        info!(target: "sig.sessions", closed = count, "Session manager shut down");
    }
}

#[async_trait]
impl SessionTeardown for SessionManager {
    /// The Hub has already dropped the client, so no notice is sent back.
    async fn teardown(&self, key: &SessionKey, reason: &'static str) {
        self.remove_session(key, reason, false, |_| true).await;
    }
}

fn parse_candidate(body: &Value) -> Result<CandidateInit, SignalingError> {
    match body {
        Value::String(candidate) => Ok(CandidateInit {
            candidate: candidate.clone(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }),
        Value::Object(_) => serde_json::from_value(body.clone())
            .map_err(|e| SignalingError::Validation(format!("invalid candidate: {e}"))),
        _ => Err(SignalingError::Validation(
            "candidate must be an object or string".to_string(),
        )),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candidate_object() {
        let body = serde_json::json!({
            "candidate": "candidate:1 1 udp 2130706431 10.0.0.2 5000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0
        });
        let candidate = parse_candidate(&body).unwrap();
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
    }

    #[test]
    fn test_parse_candidate_string() {
        let body = Value::String("candidate:1 1 udp 1 10.0.0.2 5000 typ host".to_string());
        let candidate = parse_candidate(&body).unwrap();
        assert!(candidate.candidate.starts_with("candidate:1"));
        assert!(candidate.sdp_mid.is_none());
    }

    #[test]
    fn test_parse_candidate_rejects_other_shapes() {
        assert!(matches!(
            parse_candidate(&serde_json::json!(7)),
            Err(SignalingError::Validation(_))
        ));
        assert!(matches!(
            parse_candidate(&serde_json::json!({"sdpMid": "0"})),
            Err(SignalingError::Validation(_))
        ));
    }
}
