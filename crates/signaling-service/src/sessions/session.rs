//! One client's server-side peer session.
//!
//! Lock usage inside a session:
//! - `status` (std mutex) guards state and last activity; never held across `.await`
//! - `negotiation` (tokio mutex) serializes description and candidate
//!   application against the peer connection, in arrival order

use super::engine::{CandidateInit, EngineError, PeerConnection};
use super::state::ConnectionState;
use crate::observability::metrics;

use common::types::SessionKey;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What happened to a trickled candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Handed to the peer connection.
    Applied,
    /// Held until a remote description is set.
    Buffered,
    /// Empty end-of-candidates marker; nothing to apply.
    EndOfCandidates,
}

#[derive(Debug)]
struct Status {
    state: ConnectionState,
    last_activity: Instant,
}

#[derive(Debug, Default)]
struct Negotiation {
    remote_description_set: bool,
    pending_candidates: Vec<CandidateInit>,
}

pub struct Session {
    key: SessionKey,
    /// Distinguishes this instance from later sessions under the same key.
    id: Uuid,
    peer: Arc<dyn PeerConnection>,
    status: Mutex<Status>,
    negotiation: tokio::sync::Mutex<Negotiation>,
    cancel_token: CancellationToken,
    created_at: Instant,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("state", &self.state())
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl Session {
    #[must_use]
    pub fn new(
        key: SessionKey,
        id: Uuid,
        peer: Arc<dyn PeerConnection>,
        cancel_token: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        metrics::record_session_transition(ConnectionState::New.as_str());
        Self {
            key,
            id,
            peer,
            status: Mutex::new(Status {
                state: ConnectionState::New,
                last_activity: now,
            }),
            negotiation: tokio::sync::Mutex::new(Negotiation::default()),
            cancel_token,
            created_at: now,
        }
    }

    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn peer(&self) -> &Arc<dyn PeerConnection> {
        &self.peer
    }

    /// Cancelled when the session closes; audio tasks watch it.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.status.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_activity
    }

    /// Whether the session has been idle for longer than `timeout` as of `now`.
    #[must_use]
    pub fn is_idle(&self, now: Instant, timeout: std::time::Duration) -> bool {
        now.saturating_duration_since(self.last_activity()) > timeout
    }

    pub fn touch(&self) {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_activity = Instant::now();
    }

    /// Move to `next` if the state machine allows it.
    ///
    /// Returns `true` when the state changed. Illegal moves are logged and
    /// ignored; same-state moves are silent no-ops.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
        let current = status.state;

        if current == next {
            return false;
        }
        if !current.can_transition_to(next) {
            debug!(
                target: "sig.sessions",
                session = %self.key,
                from = %current,
                to = %next,
                "Ignoring illegal session transition"
            );
            return false;
        }

        status.state = next;
        if next == ConnectionState::Connected {
            status.last_activity = Instant::now();
        }
        drop(status);

        metrics::record_session_transition(next.as_str());
        info!(
            target: "sig.sessions",
            session = %self.key,
            from = %current,
            to = %next,
            "Session state changed"
        );
        true
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.state().is_terminal() {
            Err(EngineError::Closed)
        } else {
            Ok(())
        }
    }

    /// Apply a remote offer and return the local answer.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or `Closed` for a terminal session.
    pub async fn apply_offer(&self, sdp: &str) -> Result<String, EngineError> {
        let mut negotiation = self.negotiation.lock().await;
        self.ensure_open()?;
        self.transition(ConnectionState::Negotiating);
        self.touch();

        let answer = self.peer.accept_offer(sdp).await?;
        negotiation.remote_description_set = true;
        self.drain_pending(&mut negotiation).await;

        Ok(answer)
    }

    /// Apply a remote answer to our earlier offer.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or `Closed` for a terminal session.
    pub async fn apply_answer(&self, sdp: &str) -> Result<(), EngineError> {
        let mut negotiation = self.negotiation.lock().await;
        self.ensure_open()?;
        self.touch();

        self.peer.accept_answer(sdp).await?;
        negotiation.remote_description_set = true;
        self.drain_pending(&mut negotiation).await;

        Ok(())
    }

    /// Create and apply a local offer.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or `Closed` for a terminal session.
    pub async fn local_offer(&self) -> Result<String, EngineError> {
        let _negotiation = self.negotiation.lock().await;
        self.ensure_open()?;
        self.transition(ConnectionState::Negotiating);
        self.touch();

        self.peer.create_offer().await
    }

    /// Apply `candidate`, or buffer it if no remote description is set yet.
    ///
    /// # Errors
    ///
    /// Returns the engine's error, or `Closed` for a terminal session.
    pub async fn add_candidate(
        &self,
        candidate: CandidateInit,
    ) -> Result<CandidateOutcome, EngineError> {
        let mut negotiation = self.negotiation.lock().await;
        self.ensure_open()?;
        self.touch();

        if !negotiation.remote_description_set {
            negotiation.pending_candidates.push(candidate);
            debug!(
                target: "sig.sessions",
                session = %self.key,
                pending = negotiation.pending_candidates.len(),
                "Candidate buffered until remote description is set"
            );
            return Ok(CandidateOutcome::Buffered);
        }

        self.peer.add_candidate(candidate).await?;
        Ok(CandidateOutcome::Applied)
    }

    /// Candidates waiting for a remote description.
    pub async fn pending_candidates(&self) -> usize {
        self.negotiation.lock().await.pending_candidates.len()
    }

    async fn drain_pending(&self, negotiation: &mut Negotiation) {
        let pending = std::mem::take(&mut negotiation.pending_candidates);
        if pending.is_empty() {
            return;
        }

        let count = pending.len();
        for candidate in pending {
            if let Err(e) = self.peer.add_candidate(candidate).await {
                warn!(
                    target: "sig.sessions",
                    session = %self.key,
                    error = %e,
                    "Buffered candidate rejected, skipping"
                );
            }
        }
        debug!(
            target: "sig.sessions",
            session = %self.key,
            count = count,
            "Applied buffered candidates"
        );
    }

    /// Move to `Closed`, stop audio tasks and close the peer connection.
    ///
    /// Returns `false` if the session was already closed.
    pub async fn close(&self) -> bool {
        if !self.transition(ConnectionState::Closed) {
            return false;
        }
        self.cancel_token.cancel();

        if let Err(e) = self.peer.close().await {
            debug!(
                target: "sig.sessions",
                session = %self.key,
                error = %e,
                "Peer connection close reported an error"
            );
        }
        true
    }
}
