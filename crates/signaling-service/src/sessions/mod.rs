//! Connection Manager: one server-side peer session per `(room, client)`.
//!
//! Lock ordering: the manager's map lock is taken only to look up, insert or
//! remove a session and is released before any negotiation work. Each
//! session then serializes its own negotiation behind its own lock. Engine
//! callbacks never touch either lock; they enqueue [`engine::EngineEvent`]s
//! that the manager's event loop applies.

pub mod audio;
pub mod engine;
pub mod manager;
pub mod session;
pub mod state;
pub mod webrtc_engine;

pub use audio::AudioRouter;
pub use engine::{
    AudioPacket, CandidateInit, EngineError, EngineEvent, EngineEventSender, IceServer,
    LocalAudioTrack, MediaEngine, PeerConnection, PeerState, RemoteAudioTrack, SessionEvent,
};
pub use manager::{SessionManager, SessionNotice, SessionSettings, SessionTeardown};
pub use session::{CandidateOutcome, Session};
pub use state::ConnectionState;
pub use webrtc_engine::WebRtcEngine;
