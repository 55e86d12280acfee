//! Caller token validation for the signaling edge.
//!
//! Callers present an HS256 JWT whose `sub` claim is their user id. The
//! signaling core only needs `validateToken(token) -> user id`; everything
//! else about issuing tokens belongs to the account service.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - Only HS256 is accepted; the algorithm in the header is not trusted
//! - Error messages are generic; details go to debug logs
//! - `sub` is redacted in `Debug` output

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum accepted token size in bytes (8KB).
///
/// Oversized tokens are rejected before any base64 decoding or MAC work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Clock skew tolerance applied to `exp` and `iat`.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

// =============================================================================
// Error Types
// =============================================================================

/// Errors returned by [`validate_user_token`].
///
/// Every variant renders the same message so callers cannot tell which
/// check failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Signature, structure or expiry check failed.
    #[error("The access token is invalid or expired")]
    Invalid,

    /// Token `iat` is too far in the future.
    #[error("The access token is invalid or expired")]
    IatTooFarInFuture,

    /// `sub` is empty.
    #[error("The access token is invalid or expired")]
    MissingSubject,
}

// =============================================================================
// Claims
// =============================================================================

/// Claims carried by a caller token.
#[derive(Clone, Serialize, Deserialize)]
pub struct UserClaims {
    /// User id. Redacted in `Debug` output.
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default)]
    pub iat: i64,
}

impl fmt::Debug for UserClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClaims")
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .finish()
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Verify an HS256 caller token and return its claims.
///
/// # Errors
///
/// Returns a [`JwtValidationError`] when the token is oversized, badly signed,
/// expired, issued in the future or has an empty subject.
pub fn validate_user_token(token: &str, secret: &[u8]) -> Result<UserClaims, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = DEFAULT_CLOCK_SKEW.as_secs();
    validation.set_required_spec_claims(&["exp", "sub"]);

    let data = decode::<UserClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(|e| {
            tracing::debug!(target: "common.jwt", error = %e, "Token rejected");
            JwtValidationError::Invalid
        })?;

    validate_iat_at(
        data.claims.iat,
        DEFAULT_CLOCK_SKEW,
        chrono::Utc::now().timestamp(),
    )?;

    if data.claims.sub.is_empty() {
        return Err(JwtValidationError::MissingSubject);
    }

    Ok(data.claims)
}

/// Reject tokens whose `iat` lies more than `clock_skew` past `now`.
pub(crate) fn validate_iat_at(
    iat: i64,
    clock_skew: Duration,
    now: i64,
) -> Result<(), JwtValidationError> {
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(i64::MAX);
    let max_iat = now.saturating_add(skew);

    if iat > max_iat {
        tracing::debug!(
            target: "common.jwt",
            iat = iat,
            now = now,
            max_allowed = max_iat,
            "Token rejected: iat too far in the future"
        );
        return Err(JwtValidationError::IatTooFarInFuture);
    }

    Ok(())
}
