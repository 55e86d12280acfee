//! Per-message routing between a client, its room and its server session.
//!
//! | Type | Target | Action |
//! |------|--------|--------|
//! | `ping` | - | `pong` back to the sender |
//! | `pong` | - | nothing (the read deadline was already reset) |
//! | `offer`/`answer`/`ice-candidate` | peer | relay within the sender's room |
//! | `offer`/`answer`/`ice-candidate` | server | apply to the sender's session |
//! | `join` | - | `user-joined` to the room |
//! | `leave` | - | end the connection (`user-left` follows unregister) |
//! | `disconnect` | peer or none | relay if targeted, close the sender's session |
//!
//! Frames that fail to parse are dropped and the connection stays open.

use super::envelope::{sdp_of, Envelope, EnvelopeType};
use crate::actors::HubHandle;
use crate::errors::SignalingError;
use crate::observability::metrics;
use crate::sessions::SessionManager;

use common::types::{ClientId, SessionKey};
use std::sync::Arc;
use tracing::{debug, warn};

/// What the read pump should do after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The client asked to leave; stop reading and unregister.
    Close,
}

#[derive(Clone, Debug)]
pub struct Router {
    hub: HubHandle,
    sessions: Arc<SessionManager>,
}

impl Router {
    #[must_use]
    pub fn new(hub: HubHandle, sessions: Arc<SessionManager>) -> Self {
        Self { hub, sessions }
    }

    /// Route one raw text frame from `sender`.
    pub async fn route(&self, sender: &SessionKey, raw: &str) -> Flow {
        let envelope = match Envelope::parse(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics::record_message_dropped("invalid");
                debug!(target: "sig.signaling", client = %sender, error = %e, "Dropping invalid frame");
                return Flow::Continue;
            }
        };

        let kind = envelope.kind;
        match self.dispatch(sender, envelope).await {
            Ok(flow) => flow,
            // Peer went away between send and delivery; not the sender's fault.
            Err(SignalingError::NotFound(target)) => {
                debug!(
                    target: "sig.signaling",
                    client = %sender,
                    to = %target,
                    kind = kind.as_str(),
                    "Relay target not connected"
                );
                Flow::Continue
            }
            Err(e) => {
                warn!(
                    target: "sig.signaling",
                    client = %sender,
                    kind = kind.as_str(),
                    error = %e,
                    "Message failed"
                );
                self.reply(sender, Envelope::error(sender, &e)).await;
                // The failed session is already closed; drop the client only
                // once the error is queued ahead of the close.
                if matches!(e, SignalingError::Negotiation(_)) {
                    self.sessions.notify_closed(sender).await;
                }
                Flow::Continue
            }
        }
    }

    /// Act on a validated envelope.
    ///
    /// # Errors
    ///
    /// Returns the per-client error to report back to the sender.
    pub async fn dispatch(
        &self,
        sender: &SessionKey,
        envelope: Envelope,
    ) -> Result<Flow, SignalingError> {
        match envelope.kind {
            EnvelopeType::Ping => {
                self.reply(sender, Envelope::pong(sender)).await;
                Ok(Flow::Continue)
            }

            EnvelopeType::Pong => Ok(Flow::Continue),

            EnvelopeType::Join => {
                let announce = Envelope::user_joined(sender, envelope.payload);
                self.hub
                    .broadcast(
                        sender.room_id.clone(),
                        Some(sender.client_id.clone()),
                        announce,
                    )
                    .await?;
                Ok(Flow::Continue)
            }

            EnvelopeType::Leave => Ok(Flow::Close),

            EnvelopeType::Disconnect => {
                if envelope.peer_target().is_some() {
                    if let Err(e) = self.relay_to_peer(sender, envelope).await {
                        debug!(target: "sig.signaling", client = %sender, error = %e, "Disconnect relay failed");
                    }
                }
                self.sessions
                    .close_session(sender, "client_disconnect")
                    .await;
                Ok(Flow::Close)
            }

            EnvelopeType::Offer | EnvelopeType::Answer | EnvelopeType::IceCandidate => {
                if envelope.peer_target().is_some() {
                    self.relay_to_peer(sender, envelope).await?;
                } else {
                    self.to_server(sender, envelope).await?;
                }
                Ok(Flow::Continue)
            }

            EnvelopeType::UserJoined | EnvelopeType::UserLeft | EnvelopeType::Error => {
                Err(SignalingError::Validation(format!(
                    "{} is reserved for the server",
                    envelope.kind.as_str()
                )))
            }
        }
    }

    async fn relay_to_peer(
        &self,
        sender: &SessionKey,
        envelope: Envelope,
    ) -> Result<(), SignalingError> {
        let to = envelope
            .peer_target()
            .ok_or_else(|| SignalingError::Validation("missing target".to_string()))?;
        let target = SessionKey {
            room_id: sender.room_id.clone(),
            client_id: ClientId::new(to),
        };

        self.hub.relay(target, envelope.stamped(sender)).await?;
        Ok(())
    }

    async fn to_server(&self, sender: &SessionKey, envelope: Envelope) -> Result<(), SignalingError> {
        match envelope.kind {
            EnvelopeType::Offer => {
                let sdp = envelope
                    .offer
                    .as_ref()
                    .and_then(sdp_of)
                    .ok_or_else(|| SignalingError::Validation("offer has no sdp".to_string()))?;
                let answer = self.sessions.handle_offer(sender, sdp).await?;
                self.reply(sender, Envelope::server_answer(sender, &answer))
                    .await;
            }
            EnvelopeType::Answer => {
                let sdp = envelope
                    .answer
                    .as_ref()
                    .and_then(sdp_of)
                    .ok_or_else(|| SignalingError::Validation("answer has no sdp".to_string()))?;
                self.sessions.handle_answer(sender, sdp).await?;
            }
            EnvelopeType::IceCandidate => {
                let candidate = envelope
                    .candidate
                    .as_ref()
                    .ok_or_else(|| SignalingError::Validation("missing candidate".to_string()))?;
                self.sessions.add_candidate(sender, candidate).await?;
            }
            other => {
                return Err(SignalingError::Validation(format!(
                    "{} cannot be sent to the server",
                    other.as_str()
                )));
            }
        }
        Ok(())
    }

    /// Server-originated message back to `to`. Failures only mean the client
    /// is already gone.
    async fn reply(&self, to: &SessionKey, envelope: Envelope) {
        if let Err(e) = self.hub.relay(to.clone(), envelope).await {
            debug!(target: "sig.signaling", client = %to, error = %e, "Reply not delivered");
        }
    }
}
