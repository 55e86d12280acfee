//! Signaling envelope wire format.
//!
//! ```text
//! { "type": "offer", "from": "alice", "to": "bob", "roomId": "general",
//!   "offer": { "type": "offer", "sdp": "v=0..." } }
//! ```
//!
//! Only one of `offer`, `answer`, `candidate`, `payload` is meaningful for a
//! given type. Bodies are kept as raw JSON values so peer-to-peer relays pass
//! them through untouched.

use crate::errors::SignalingError;

use bytes::Bytes;
use common::types::SessionKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved `to`/`from` value addressing the server's own peer session.
pub const SERVER_PEER: &str = "server";

/// Envelope `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvelopeType {
    Join,
    Leave,
    Offer,
    Answer,
    IceCandidate,
    Ping,
    Pong,
    Disconnect,
    UserJoined,
    UserLeft,
    Error,
}

impl EnvelopeType {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            EnvelopeType::Join => "join",
            EnvelopeType::Leave => "leave",
            EnvelopeType::Offer => "offer",
            EnvelopeType::Answer => "answer",
            EnvelopeType::IceCandidate => "ice-candidate",
            EnvelopeType::Ping => "ping",
            EnvelopeType::Pong => "pong",
            EnvelopeType::Disconnect => "disconnect",
            EnvelopeType::UserJoined => "user-joined",
            EnvelopeType::UserLeft => "user-left",
            EnvelopeType::Error => "error",
        }
    }

    /// Types only the server may emit.
    #[must_use]
    pub const fn is_server_originated(self) -> bool {
        matches!(
            self,
            EnvelopeType::UserJoined | EnvelopeType::UserLeft | EnvelopeType::Error
        )
    }
}

/// One signaling message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Envelope {
    /// Bare envelope of the given type.
    #[must_use]
    pub fn new(kind: EnvelopeType) -> Self {
        Self {
            kind,
            from: None,
            to: None,
            room_id: None,
            offer: None,
            answer: None,
            candidate: None,
            payload: None,
        }
    }

    /// Parse and validate an inbound frame.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for invalid JSON, an unknown type, a
    /// server-originated type, or a missing type-specific body.
    pub fn parse(raw: &str) -> Result<Self, SignalingError> {
        let envelope: Envelope = serde_json::from_str(raw)
            .map_err(|e| SignalingError::Validation(format!("invalid envelope: {e}")))?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Check that the body required by `kind` is present.
    ///
    /// # Errors
    ///
    /// Returns `Validation` describing the first problem found.
    pub fn validate(&self) -> Result<(), SignalingError> {
        if self.kind.is_server_originated() {
            return Err(SignalingError::Validation(format!(
                "{} is reserved for the server",
                self.kind.as_str()
            )));
        }

        let missing = match self.kind {
            EnvelopeType::Offer if self.offer.is_none() => Some("offer"),
            EnvelopeType::Answer if self.answer.is_none() => Some("answer"),
            EnvelopeType::IceCandidate if self.candidate.is_none() => Some("candidate"),
            _ => None,
        };
        if let Some(field) = missing {
            return Err(SignalingError::Validation(format!(
                "{} requires a {field} body",
                self.kind.as_str()
            )));
        }

        if matches!(self.to.as_deref(), Some("")) {
            return Err(SignalingError::Validation("empty target".to_string()));
        }

        Ok(())
    }

    /// The peer this envelope is addressed to, if it is not the server.
    #[must_use]
    pub fn peer_target(&self) -> Option<&str> {
        self.to.as_deref().filter(|to| *to != SERVER_PEER)
    }

    /// Overwrite sender fields with the authenticated identity.
    #[must_use]
    pub fn stamped(mut self, sender: &SessionKey) -> Self {
        self.from = Some(sender.client_id.to_string());
        self.room_id = Some(sender.room_id.to_string());
        self
    }

    /// Serialize once for delivery to any number of recipients.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if serialization fails.
    pub fn to_bytes(&self) -> Result<Bytes, SignalingError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|e| SignalingError::Internal(format!("envelope encode failed: {e}")))
    }

    /// Presence notice: `client` joined `room`.
    #[must_use]
    pub fn user_joined(client: &SessionKey, payload: Option<Value>) -> Self {
        let mut envelope = Self::new(EnvelopeType::UserJoined).stamped(client);
        envelope.payload = payload;
        envelope
    }

    /// Presence notice: `client` left `room`.
    #[must_use]
    pub fn user_left(client: &SessionKey) -> Self {
        Self::new(EnvelopeType::UserLeft).stamped(client)
    }

    /// Keepalive reply.
    #[must_use]
    pub fn pong(to: &SessionKey) -> Self {
        let mut envelope = Self::new(EnvelopeType::Pong);
        envelope.from = Some(SERVER_PEER.to_string());
        envelope.to = Some(to.client_id.to_string());
        envelope.room_id = Some(to.room_id.to_string());
        envelope
    }

    /// Error report for the sender of a rejected message.
    #[must_use]
    pub fn error(to: &SessionKey, err: &SignalingError) -> Self {
        let mut envelope = Self::new(EnvelopeType::Error);
        envelope.from = Some(SERVER_PEER.to_string());
        envelope.to = Some(to.client_id.to_string());
        envelope.room_id = Some(to.room_id.to_string());
        envelope.payload = Some(serde_json::json!({
            "code": err.error_code(),
            "error": err.code_str(),
            "message": err.client_message(),
        }));
        envelope
    }

    /// Server session's answer to a client offer.
    #[must_use]
    pub fn server_answer(to: &SessionKey, sdp: &str) -> Self {
        let mut envelope = Self::new(EnvelopeType::Answer);
        envelope.from = Some(SERVER_PEER.to_string());
        envelope.to = Some(to.client_id.to_string());
        envelope.room_id = Some(to.room_id.to_string());
        envelope.answer = Some(serde_json::json!({ "type": "answer", "sdp": sdp }));
        envelope
    }

    /// Candidate gathered by the server session.
    #[must_use]
    pub fn server_candidate(to: &SessionKey, candidate: Value) -> Self {
        let mut envelope = Self::new(EnvelopeType::IceCandidate);
        envelope.from = Some(SERVER_PEER.to_string());
        envelope.to = Some(to.client_id.to_string());
        envelope.room_id = Some(to.room_id.to_string());
        envelope.candidate = Some(candidate);
        envelope
    }
}

/// Pull the SDP text out of a description body.
///
/// Accepts either `{"type": "...", "sdp": "..."}` or a bare string.
#[must_use]
pub fn sdp_of(body: &Value) -> Option<&str> {
    match body {
        Value::String(sdp) => Some(sdp.as_str()),
        Value::Object(map) => map.get("sdp").and_then(Value::as_str),
        _ => None,
    }
    .filter(|sdp| !sdp.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_offer() {
        let raw = r#"{"type":"offer","to":"bob","roomId":"general","offer":{"type":"offer","sdp":"v=0"}}"#;
        let envelope = Envelope::parse(raw).unwrap();

        assert_eq!(envelope.kind, EnvelopeType::Offer);
        assert_eq!(envelope.peer_target(), Some("bob"));
        assert_eq!(sdp_of(envelope.offer.as_ref().unwrap()), Some("v=0"));
    }

    #[test]
    fn test_invalid_json_is_validation_error() {
        assert!(matches!(
            Envelope::parse("{not json"),
            Err(SignalingError::Validation(_))
        ));
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(matches!(
            Envelope::parse(r#"{"type":"teleport"}"#),
            Err(SignalingError::Validation(_))
        ));
    }

    #[test]
    fn test_missing_body_rejected() {
        for raw in [
            r#"{"type":"offer","to":"bob"}"#,
            r#"{"type":"answer","to":"bob"}"#,
            r#"{"type":"ice-candidate","to":"bob"}"#,
        ] {
            assert!(
                matches!(Envelope::parse(raw), Err(SignalingError::Validation(_))),
                "accepted {raw}"
            );
        }
    }

    #[test]
    fn test_server_types_rejected_from_clients() {
        for raw in [
            r#"{"type":"user-joined"}"#,
            r#"{"type":"user-left"}"#,
            r#"{"type":"error"}"#,
        ] {
            assert!(matches!(
                Envelope::parse(raw),
                Err(SignalingError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_server_target_is_not_a_peer() {
        let envelope =
            Envelope::parse(r#"{"type":"offer","to":"server","offer":"v=0"}"#).unwrap();
        assert_eq!(envelope.peer_target(), None);

        let envelope = Envelope::parse(r#"{"type":"offer","offer":"v=0"}"#).unwrap();
        assert_eq!(envelope.peer_target(), None);
    }

    #[test]
    fn test_stamped_overwrites_sender_fields() {
        let envelope = Envelope::parse(
            r#"{"type":"offer","from":"mallory","roomId":"elsewhere","to":"bob","offer":"v=0"}"#,
        )
        .unwrap()
        .stamped(&SessionKey::new("general", "alice"));

        assert_eq!(envelope.from.as_deref(), Some("alice"));
        assert_eq!(envelope.room_id.as_deref(), Some("general"));
        assert_eq!(envelope.to.as_deref(), Some("bob"));
    }

    #[test]
    fn test_serialization_uses_wire_names() {
        let bytes = Envelope::server_candidate(
            &SessionKey::new("general", "alice"),
            serde_json::json!({"candidate": "candidate:1 1 udp 1 10.0.0.1 5000 typ host"}),
        )
        .to_bytes()
        .unwrap();
        let json: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(json["type"], "ice-candidate");
        assert_eq!(json["from"], "server");
        assert_eq!(json["to"], "alice");
        assert_eq!(json["roomId"], "general");
        assert!(json.get("offer").is_none());
    }

    #[test]
    fn test_error_envelope_uses_client_message() {
        let err = SignalingError::Negotiation("bad fingerprint at 10.1.1.1".to_string());
        let envelope = Envelope::error(&SessionKey::new("general", "alice"), &err);
        let payload = envelope.payload.unwrap();

        assert_eq!(payload["code"], 5);
        assert_eq!(payload["error"], "NEGOTIATION_FAILED");
        assert!(!payload["message"].as_str().unwrap().contains("10.1.1.1"));
    }

    #[test]
    fn test_sdp_of_shapes() {
        assert_eq!(sdp_of(&Value::String("v=0".to_string())), Some("v=0"));
        assert_eq!(sdp_of(&serde_json::json!({"sdp": "v=0"})), Some("v=0"));
        assert_eq!(sdp_of(&serde_json::json!({"sdp": ""})), None);
        assert_eq!(sdp_of(&serde_json::json!(42)), None);
    }
}
