//! Credential error types.

use thiserror::Error;

/// Errors from credential generation, validation and relay authentication.
///
/// Rejections never say which check failed beyond the variant; the variant is
/// for our logs and metrics, not for the relay client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// `now` is past the credential's expiry.
    #[error("Credential expired")]
    Expired,

    /// MAC mismatch (forged or corrupted password).
    #[error("Invalid credential")]
    InvalidSignature,

    /// Username or password could not be parsed.
    #[error("Malformed credential: {0}")]
    Malformed(String),

    /// Requested TTL is zero or above the allowed maximum.
    #[error("Invalid credential TTL: {0}s")]
    InvalidTtl(u64),

    /// Relay handshake arrived for a realm we do not serve.
    #[error("Unknown realm")]
    WrongRealm,

    /// Shared secret unusable (too short, empty).
    #[error("Invalid shared secret: {0}")]
    InvalidSecret(String),
}
