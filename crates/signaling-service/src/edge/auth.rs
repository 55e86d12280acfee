//! Caller authentication and room membership for the edge.
//!
//! The token comes from `Authorization: Bearer <token>` or, for browser
//! WebSocket upgrades that cannot set headers, the `?token=` query
//! parameter. Validated callers are stored as a [`Caller`] extension.

use super::AppState;
use crate::errors::SignalingError;

use async_trait::async_trait;
use axum::{
    extract::{Query, Request, State},
    middleware::Next,
    response::IntoResponse,
};
use common::jwt::validate_user_token;
use common::secret::{ExposeSecret, SecretString};
use common::types::RoomId;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;

/// Authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
}

/// `validateToken(token) -> user id`.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// # Errors
    ///
    /// Returns `Unauthorized` for any invalid token.
    async fn validate(&self, token: &str) -> Result<String, SignalingError>;
}

/// HS256 JWT validation against a shared secret.
pub struct JwtTokenValidator {
    secret: SecretString,
}

impl JwtTokenValidator {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }
}

#[async_trait]
impl TokenValidator for JwtTokenValidator {
    async fn validate(&self, token: &str) -> Result<String, SignalingError> {
        let claims = validate_user_token(token, self.secret.expose_secret().as_bytes())
            .map_err(|e| SignalingError::Unauthorized(e.to_string()))?;
        Ok(claims.sub)
    }
}

/// `isMember(room, user) -> bool`.
#[async_trait]
pub trait MembershipChecker: Send + Sync {
    /// # Errors
    ///
    /// Returns `Internal` if membership cannot be determined.
    async fn is_member(&self, room_id: &RoomId, user_id: &str) -> Result<bool, SignalingError>;
}

/// Used when membership is enforced upstream of this service.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllMembership;

#[async_trait]
impl MembershipChecker for AllowAllMembership {
    async fn is_member(&self, _room_id: &RoomId, _user_id: &str) -> Result<bool, SignalingError> {
        Ok(true)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Validate the caller token and attach a [`Caller`] to the request.
#[instrument(skip_all, name = "sig.edge.auth")]
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TokenQuery>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, SignalingError> {
    let header_token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::to_string);

    let token = header_token.or(query.token).ok_or_else(|| {
        tracing::debug!(target: "sig.edge", "Missing caller token");
        SignalingError::Unauthorized("missing token".to_string())
    })?;

    let user_id = state.tokens.validate(&token).await?;
    req.extensions_mut().insert(Caller { user_id });

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::jwt::UserClaims;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    const SECRET: &str = "edge-test-secret-0123456789";

    fn sign(sub: &str) -> String {
        let now = chrono::Utc::now().timestamp();
        encode(
            &Header::new(Algorithm::HS256),
            &UserClaims {
                sub: sub.to_string(),
                exp: now + 600,
                iat: now,
            },
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_jwt_validator_returns_subject() {
        let validator = JwtTokenValidator::new(SecretString::from(SECRET));
        assert_eq!(validator.validate(&sign("alice")).await.unwrap(), "alice");
    }

    #[tokio::test]
    async fn test_jwt_validator_rejects_garbage() {
        let validator = JwtTokenValidator::new(SecretString::from(SECRET));
        assert!(matches!(
            validator.validate("not.a.jwt").await,
            Err(SignalingError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_allow_all_membership() {
        assert!(AllowAllMembership
            .is_member(&RoomId::new("general"), "alice")
            .await
            .unwrap());
    }
}
