//! Session connection state machine.
//!
//! ```text
//! New ──> Negotiating ──> Connected <──> Disconnected
//!  │           │              │               │
//!  └───────────┴──> Failed ───┴──> Closed <───┘
//! ```
//!
//! Transitions only move forward. The one exception is
//! `Disconnected -> Connected`, which the transport reports when ICE
//! recovers. `Failed` always ends in `Closed`; `Closed` is terminal.

use super::engine::PeerState;

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Negotiating,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionState::New => "new",
            ConnectionState::Negotiating => "negotiating",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Failed => "failed",
            ConnectionState::Closed => "closed",
        }
    }

    /// `Failed` and `Closed` accept no further negotiation.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Closed)
    }

    /// Whether `self -> next` is a legal move. Same-state is not a move.
    #[must_use]
    pub const fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::{Closed, Connected, Disconnected, Failed, Negotiating, New};

        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Failed, _) => false,
            (_, Failed) => true,
            (New, Negotiating | Connected) => true,
            (Negotiating, Connected) => true,
            (Connected, Disconnected) => true,
            (Disconnected, Connected) => true,
            _ => false,
        }
    }

    /// Map a transport report onto the session state it implies, if any.
    ///
    /// `New` and `Connecting` carry no information beyond what negotiation
    /// already recorded.
    #[must_use]
    pub const fn from_peer(state: PeerState) -> Option<Self> {
        match state {
            PeerState::New | PeerState::Connecting => None,
            PeerState::Connected => Some(ConnectionState::Connected),
            PeerState::Disconnected => Some(ConnectionState::Disconnected),
            PeerState::Failed => Some(ConnectionState::Failed),
            PeerState::Closed => Some(ConnectionState::Closed),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    const ALL: [ConnectionState; 6] = [New, Negotiating, Connected, Disconnected, Failed, Closed];

    #[test]
    fn test_happy_path() {
        assert!(New.can_transition_to(Negotiating));
        assert!(Negotiating.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Disconnected.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Closed));
    }

    #[test]
    fn test_no_backwards_moves() {
        assert!(!Negotiating.can_transition_to(New));
        assert!(!Connected.can_transition_to(Negotiating));
        assert!(!Disconnected.can_transition_to(Negotiating));
        assert!(!Connected.can_transition_to(New));
    }

    #[test]
    fn test_closed_is_absorbing() {
        for next in ALL {
            assert!(!Closed.can_transition_to(next), "closed -> {next}");
        }
    }

    #[test]
    fn test_failed_only_moves_to_closed() {
        for next in ALL {
            assert_eq!(Failed.can_transition_to(next), next == Closed, "failed -> {next}");
        }
    }

    #[test]
    fn test_any_live_state_can_fail_or_close() {
        for state in [New, Negotiating, Connected, Disconnected] {
            assert!(state.can_transition_to(Failed));
            assert!(state.can_transition_to(Closed));
            assert!(!state.is_terminal());
        }
        assert!(Failed.is_terminal());
        assert!(Closed.is_terminal());
    }

    #[test]
    fn test_from_peer() {
        assert_eq!(ConnectionState::from_peer(PeerState::Connecting), None);
        assert_eq!(
            ConnectionState::from_peer(PeerState::Connected),
            Some(Connected)
        );
        assert_eq!(ConnectionState::from_peer(PeerState::Failed), Some(Failed));
    }

    #[test]
    fn test_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Disconnected).unwrap(), "\"disconnected\"");
    }
}
