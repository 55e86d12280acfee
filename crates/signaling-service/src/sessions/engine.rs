//! Media engine seam.
//!
//! The session manager drives negotiation through these traits and never
//! touches webrtc-rs types directly. Engine callbacks (gathered candidates,
//! connection state, remote tracks) are turned into [`EngineEvent`]s and
//! pushed onto a channel; the manager applies them from its own event loop.
//!
//! [`WebRtcEngine`](super::webrtc_engine::WebRtcEngine) is the production
//! implementation. Tests use the mock in `signaling-test-utils`.

use async_trait::async_trait;
use bytes::Bytes;
use common::types::SessionKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Failures reported by a media engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A session description could not be parsed or applied.
    #[error("description rejected: {0}")]
    Description(String),

    /// A candidate could not be parsed or applied.
    #[error("candidate rejected: {0}")]
    Candidate(String),

    /// Reading or writing media failed.
    #[error("media error: {0}")]
    Media(String),

    /// The engine could not build a peer connection.
    #[error("engine setup failed: {0}")]
    Setup(String),

    /// The peer connection is already closed.
    #[error("peer connection closed")]
    Closed,
}

/// Trickle candidate as exchanged with browsers (`RTCIceCandidateInit`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// One STUN or TURN server handed to a peer connection.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl fmt::Debug for IceServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IceServer")
            .field("urls", &self.urls)
            .field("username", &self.username)
            .field("credential", &self.credential.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl IceServer {
    /// A server that needs no credential (STUN).
    #[must_use]
    pub fn open(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Transport-level state reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// One RTP audio packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub payload_type: u8,
    pub marker: bool,
    pub payload: Bytes,
}

/// Callback output from the engine, queued for the manager's event loop.
pub enum EngineEvent {
    /// The local agent gathered a candidate for the client.
    LocalCandidate(CandidateInit),
    /// The transport moved to a new state.
    StateChanged(PeerState),
    /// The client started sending audio.
    RemoteTrack(Arc<dyn RemoteAudioTrack>),
}

impl fmt::Debug for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineEvent::LocalCandidate(candidate) => {
                f.debug_tuple("LocalCandidate").field(candidate).finish()
            }
            EngineEvent::StateChanged(state) => f.debug_tuple("StateChanged").field(state).finish(),
            EngineEvent::RemoteTrack(track) => {
                f.debug_tuple("RemoteTrack").field(&track.id()).finish()
            }
        }
    }
}

/// An [`EngineEvent`] tagged with the session instance that raised it.
///
/// A reconnecting client reuses its [`SessionKey`], so the manager matches
/// `session_id` before acting; events from a replaced peer are ignored.
#[derive(Debug)]
pub struct SessionEvent {
    pub key: SessionKey,
    pub session_id: Uuid,
    pub event: EngineEvent,
}

/// Sender half handed to each peer connection.
///
/// Callbacks only enqueue; they never call back into the manager.
#[derive(Clone)]
pub struct EngineEventSender {
    key: SessionKey,
    session_id: Uuid,
    tx: mpsc::Sender<SessionEvent>,
}

impl fmt::Debug for EngineEventSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineEventSender")
            .field("key", &self.key)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl EngineEventSender {
    #[must_use]
    pub fn new(key: SessionKey, session_id: Uuid, tx: mpsc::Sender<SessionEvent>) -> Self {
        Self {
            key,
            session_id,
            tx,
        }
    }

    /// Session this sender reports for.
    #[must_use]
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Queue an event. Dropped with a debug log once the manager is gone.
    pub async fn emit(&self, event: EngineEvent) {
        let tagged = SessionEvent {
            key: self.key.clone(),
            session_id: self.session_id,
            event,
        };
        if self.tx.send(tagged).await.is_err() {
            debug!(
                target: "sig.sessions",
                session = %self.key,
                "Engine event dropped, manager stopped"
            );
        }
    }
}

/// Factory for peer connections.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Build a peer connection for `key` with one local audio track.
    async fn create_peer(
        &self,
        key: &SessionKey,
        ice_servers: Vec<IceServer>,
        events: EngineEventSender,
    ) -> Result<Arc<dyn PeerConnection>, EngineError>;
}

/// One server-side peer connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Apply a remote offer and return the local answer SDP.
    async fn accept_offer(&self, sdp: &str) -> Result<String, EngineError>;

    /// Create and apply a local offer, returning its SDP.
    async fn create_offer(&self) -> Result<String, EngineError>;

    /// Apply a remote answer to a previously created local offer.
    async fn accept_answer(&self, sdp: &str) -> Result<(), EngineError>;

    /// Apply a trickled remote candidate.
    async fn add_candidate(&self, candidate: CandidateInit) -> Result<(), EngineError>;

    /// Outbound audio track other room members' audio is written to.
    fn local_track(&self) -> Arc<dyn LocalAudioTrack>;

    async fn close(&self) -> Result<(), EngineError>;
}

#[async_trait]
pub trait LocalAudioTrack: Send + Sync {
    async fn write_packet(&self, packet: &AudioPacket) -> Result<(), EngineError>;
}

#[async_trait]
pub trait RemoteAudioTrack: Send + Sync {
    fn id(&self) -> String;

    /// Next packet, or `None` once the track has ended.
    async fn read_packet(&self) -> Option<AudioPacket>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_init_browser_field_names() {
        let raw = r#"{"candidate":"candidate:1 1 udp 2130706431 10.0.0.2 54321 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":"abcd"}"#;
        let candidate: CandidateInit = serde_json::from_str(raw).unwrap();

        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert_eq!(candidate.username_fragment.as_deref(), Some("abcd"));

        let json = serde_json::to_value(&candidate).unwrap();
        assert_eq!(json["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_candidate_init_minimal() {
        let candidate: CandidateInit =
            serde_json::from_str(r#"{"candidate":"candidate:1 1 udp 1 10.0.0.2 5000 typ host"}"#)
                .unwrap();
        assert!(candidate.sdp_mid.is_none());
        assert!(candidate.sdp_mline_index.is_none());
    }

    #[test]
    fn test_ice_server_debug_redacts_credential() {
        let server = IceServer {
            urls: vec!["turn:relay.example:3478".to_string()],
            username: Some("1700000000:alice".to_string()),
            credential: Some("c2VjcmV0LXBhc3N3b3Jk".to_string()),
        };

        let debug_output = format!("{server:?}");
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("c2VjcmV0"));
    }

    #[test]
    fn test_open_ice_server_serializes_without_credentials() {
        let json = serde_json::to_value(IceServer::open("stun:stun.example:3478")).unwrap();
        assert_eq!(json["urls"][0], "stun:stun.example:3478");
        assert!(json.get("credential").is_none());
    }

    #[tokio::test]
    async fn test_emit_tags_events_with_session_instance() {
        let (tx, mut rx) = mpsc::channel(4);
        let session_id = Uuid::new_v4();
        let sender = EngineEventSender::new(SessionKey::new("general", "alice"), session_id, tx);

        sender
            .emit(EngineEvent::StateChanged(PeerState::Connected))
            .await;

        let tagged = rx.recv().await.unwrap();
        assert_eq!(tagged.key, SessionKey::new("general", "alice"));
        assert_eq!(tagged.session_id, session_id);
        assert!(matches!(
            tagged.event,
            EngineEvent::StateChanged(PeerState::Connected)
        ));
    }

    #[tokio::test]
    async fn test_emit_after_manager_stopped_is_harmless() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EngineEventSender::new(SessionKey::new("general", "alice"), Uuid::new_v4(), tx);
        sender
            .emit(EngineEvent::StateChanged(PeerState::Failed))
            .await;
    }
}
