//! Signaling service error types.
//!
//! Every per-client failure maps to one variant here. Variants carry internal
//! detail for the logs; `client_message()` is what goes back over a socket or
//! HTTP response.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_credentials::CredentialError;
use serde::Serialize;
use thiserror::Error;

/// Signaling service error type.
///
/// Error codes sent to clients:
/// - `Validation`: `INVALID_REQUEST` (1)
/// - `Unauthorized`, `Credential`: `UNAUTHORIZED` (2)
/// - `Forbidden`: `FORBIDDEN` (3)
/// - `NotFound`, `SessionNotFound`: `NOT_FOUND` (4)
/// - `Negotiation`: `NEGOTIATION_FAILED` (5)
/// - `Transport`, `Internal`, `Fatal`: `INTERNAL_ERROR` (6)
/// - `Draining`: `UNAVAILABLE` (7)
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Malformed envelope or request body. The connection stays open.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Relay target is not registered.
    #[error("Client not found: {0}")]
    NotFound(String),

    /// No peer session exists for the client.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Description or candidate could not be applied.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// Socket write failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Relay credential rejected or could not be issued.
    #[error("Credential error: {0}")]
    Credential(CredentialError),

    /// Caller token missing or invalid.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Caller is not a member of the room.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Service is shutting down.
    #[error("Service is draining")]
    Draining,

    /// Internal error (channel closed, engine setup failure).
    #[error("Internal error: {0}")]
    Internal(String),

    /// Startup failure (bind, recorder install). Never raised per client.
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl SignalingError {
    /// Returns the numeric error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            SignalingError::Validation(_) => 1,
            SignalingError::Unauthorized(_) | SignalingError::Credential(_) => 2,
            SignalingError::Forbidden(_) => 3,
            SignalingError::NotFound(_) | SignalingError::SessionNotFound(_) => 4,
            SignalingError::Negotiation(_) => 5,
            SignalingError::Transport(_) | SignalingError::Internal(_) | SignalingError::Fatal(_) => {
                6
            }
            SignalingError::Draining => 7,
        }
    }

    /// Short machine-readable code used in error envelopes and HTTP bodies.
    #[must_use]
    pub fn code_str(&self) -> &'static str {
        match self {
            SignalingError::Validation(_) => "INVALID_REQUEST",
            SignalingError::Unauthorized(_) | SignalingError::Credential(_) => "UNAUTHORIZED",
            SignalingError::Forbidden(_) => "FORBIDDEN",
            SignalingError::NotFound(_) | SignalingError::SessionNotFound(_) => "NOT_FOUND",
            SignalingError::Negotiation(_) => "NEGOTIATION_FAILED",
            SignalingError::Transport(_) | SignalingError::Internal(_) | SignalingError::Fatal(_) => {
                "INTERNAL_ERROR"
            }
            SignalingError::Draining => "UNAVAILABLE",
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SignalingError::Validation(msg) => msg.clone(),
            SignalingError::NotFound(_) => "Recipient is not connected".to_string(),
            SignalingError::SessionNotFound(_) => "No active session".to_string(),
            SignalingError::Negotiation(_) => "Session negotiation failed".to_string(),
            SignalingError::Credential(_) | SignalingError::Unauthorized(_) => {
                "Invalid or expired credentials".to_string()
            }
            SignalingError::Forbidden(_) => "Not a member of this room".to_string(),
            SignalingError::Draining => "Server is shutting down, please reconnect".to_string(),
            SignalingError::Transport(_) | SignalingError::Internal(_) | SignalingError::Fatal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }

    /// HTTP status for the request/response surface.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            SignalingError::Validation(_) => StatusCode::BAD_REQUEST,
            SignalingError::Unauthorized(_) | SignalingError::Credential(_) => {
                StatusCode::UNAUTHORIZED
            }
            SignalingError::Forbidden(_) => StatusCode::FORBIDDEN,
            SignalingError::NotFound(_) | SignalingError::SessionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            SignalingError::Negotiation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            SignalingError::Draining => StatusCode::SERVICE_UNAVAILABLE,
            SignalingError::Transport(_) | SignalingError::Internal(_) | SignalingError::Fatal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<CredentialError> for SignalingError {
    fn from(err: CredentialError) -> Self {
        SignalingError::Credential(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl IntoResponse for SignalingError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(target: "sig.edge", error = %self, "Request failed");
        } else {
            tracing::debug!(target: "sig.edge", error = %self, "Request rejected");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code_str(),
                message: self.client_message(),
            },
        };

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(value) = "Bearer error=\"invalid_token\"".parse() {
                response
                    .headers_mut()
                    .insert(axum::http::header::WWW_AUTHENTICATE, value);
            }
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(SignalingError::Validation("bad".to_string()).error_code(), 1);
        assert_eq!(SignalingError::Unauthorized("no".to_string()).error_code(), 2);
        assert_eq!(
            SignalingError::Credential(CredentialError::Expired).error_code(),
            2
        );
        assert_eq!(SignalingError::Forbidden("room".to_string()).error_code(), 3);
        assert_eq!(SignalingError::NotFound("bob".to_string()).error_code(), 4);
        assert_eq!(
            SignalingError::SessionNotFound("general/bob".to_string()).error_code(),
            4
        );
        assert_eq!(SignalingError::Negotiation("sdp".to_string()).error_code(), 5);
        assert_eq!(SignalingError::Transport("reset".to_string()).error_code(), 6);
        assert_eq!(SignalingError::Internal("chan".to_string()).error_code(), 6);
        assert_eq!(SignalingError::Fatal("bind".to_string()).error_code(), 6);
        assert_eq!(SignalingError::Draining.error_code(), 7);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = SignalingError::Negotiation("failed to parse m-line at 10.0.0.5".to_string());
        assert!(!err.client_message().contains("10.0.0.5"));

        let err = SignalingError::Internal("channel send failed: closed".to_string());
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = SignalingError::Credential(CredentialError::InvalidSignature);
        assert_eq!(err.client_message(), "Invalid or expired credentials");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            SignalingError::Validation(String::new()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SignalingError::SessionNotFound(String::new()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SignalingError::Negotiation(String::new()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            SignalingError::Draining.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_credential_error_conversion() {
        let err: SignalingError = CredentialError::Expired.into();
        assert!(matches!(err, SignalingError::Credential(CredentialError::Expired)));
    }

    #[test]
    fn test_unauthorized_response_has_challenge_header() {
        let response = SignalingError::Unauthorized("missing token".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response
            .headers()
            .contains_key(axum::http::header::WWW_AUTHENTICATE));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            SignalingError::SessionNotFound("general/bob".to_string()).to_string(),
            "Session not found: general/bob"
        );
        assert_eq!(
            SignalingError::Credential(CredentialError::Expired).to_string(),
            "Credential error: Credential expired"
        );
    }
}
