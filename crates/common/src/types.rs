//! Identifier types shared by the hub, the session manager and the edge.
//!
//! Room and client identifiers are opaque strings handed to us by the
//! authentication and membership collaborators. They are wrapped so the two
//! can never be swapped at a call site.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a voice room (channel).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap a room identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier for a connected client (the authenticated user id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Wrap a client identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Composite key for a client's presence in one room.
///
/// The same user may be connected to several rooms at once; each pairing
/// gets its own hub entry and its own peer session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub room_id: RoomId,
    pub client_id: ClientId,
}

impl SessionKey {
    #[must_use]
    pub fn new(room_id: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            room_id: RoomId::new(room_id),
            client_id: ClientId::new(client_id),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.room_id, self.client_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let room = RoomId::new("general");
        assert_eq!(serde_json::to_string(&room).unwrap(), "\"general\"");

        let client: ClientId = serde_json::from_str("\"alice\"").unwrap();
        assert_eq!(client.as_str(), "alice");
    }

    #[test]
    fn test_session_key_distinguishes_rooms() {
        let a = SessionKey::new("general", "alice");
        let b = SessionKey::new("music", "alice");
        assert_ne!(a, b);

        let set: HashSet<_> = [a.clone(), b, a].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_session_key_display() {
        assert_eq!(SessionKey::new("general", "bob").to_string(), "general/bob");
    }
}
