//! Credential generation and validation.
//!
//! - **Generation**: `base64(HMAC-SHA1(shared_secret, "{expires_at}:{user}"))`
//! - **Validation**: expiry check first, then `ring::hmac::verify` (constant time)
//!
//! SHA-1 is what relay servers implementing the TURN REST API compute; the
//! MAC is only as long-lived as the TTL.

use crate::errors::CredentialError;

use base64::{engine::general_purpose::STANDARD, Engine};
use common::secret::{ExposeSecret, SecretString};
use ring::hmac;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Default credential lifetime (10 minutes).
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(600);

/// Longest lifetime a caller may request.
pub const MAX_CREDENTIAL_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Minimum shared secret length in bytes.
pub const MIN_SHARED_SECRET_LEN: usize = 16;

/// An issued relay credential.
///
/// `username` embeds the expiry so the relay server can validate it
/// statelessly. The password is redacted in `Debug` output.
#[derive(Clone)]
pub struct RelayCredential {
    /// TURN REST username, `"{expires_at}:{user}"`.
    pub username: String,
    /// Derived password.
    pub password: SecretString,
    /// Expiry (Unix epoch seconds).
    pub expires_at: i64,
    /// Lifetime the credential was issued with.
    pub ttl_seconds: u64,
}

impl fmt::Debug for RelayCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayCredential")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish()
    }
}

impl RelayCredential {
    /// The user part of the username (after the expiry prefix).
    #[must_use]
    pub fn user(&self) -> &str {
        self.username
            .split_once(':')
            .map_or(self.username.as_str(), |(_, user)| user)
    }
}

/// Issues and validates relay credentials from a shared secret.
#[derive(Clone)]
pub struct CredentialService {
    key: hmac::Key,
    default_ttl: Duration,
}

impl fmt::Debug for CredentialService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialService")
            .field("key", &"[REDACTED]")
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl CredentialService {
    /// Create a service from the relay shared secret.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSecret` if the secret is shorter than
    /// [`MIN_SHARED_SECRET_LEN`] bytes, or `InvalidTtl` if `default_ttl` is
    /// out of range.
    pub fn new(shared_secret: &SecretString, default_ttl: Duration) -> Result<Self, CredentialError> {
        let secret = shared_secret.expose_secret().as_bytes();
        if secret.len() < MIN_SHARED_SECRET_LEN {
            return Err(CredentialError::InvalidSecret(format!(
                "must be at least {MIN_SHARED_SECRET_LEN} bytes, got {}",
                secret.len()
            )));
        }
        check_ttl(default_ttl)?;

        Ok(Self {
            key: hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, secret),
            default_ttl,
        })
    }

    /// Lifetime used when callers do not pick one.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Issue a credential for `user` valid for `ttl` from now.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTtl` for a zero TTL or one above [`MAX_CREDENTIAL_TTL`],
    /// and `Malformed` for an empty user.
    pub fn generate(&self, user: &str, ttl: Duration) -> Result<RelayCredential, CredentialError> {
        self.generate_at(user, ttl, chrono::Utc::now().timestamp())
    }

    /// Deterministic variant of [`generate`](Self::generate) against an explicit `now`.
    ///
    /// # Errors
    ///
    /// See [`generate`](Self::generate).
    pub fn generate_at(
        &self,
        user: &str,
        ttl: Duration,
        now: i64,
    ) -> Result<RelayCredential, CredentialError> {
        check_ttl(ttl)?;
        if user.is_empty() {
            return Err(CredentialError::Malformed("empty user".to_string()));
        }

        let expires_at = i64::try_from(ttl.as_secs())
            .ok()
            .and_then(|secs| now.checked_add(secs))
            .ok_or(CredentialError::InvalidTtl(ttl.as_secs()))?;
        let username = format!("{expires_at}:{user}");
        let password = self.password_for(&username);

        debug!(
            target: "sig.credentials",
            expires_at = expires_at,
            ttl_seconds = ttl.as_secs(),
            "Issued relay credential"
        );

        Ok(RelayCredential {
            username,
            password: SecretString::from(password),
            expires_at,
            ttl_seconds: ttl.as_secs(),
        })
    }

    /// Check a presented credential.
    ///
    /// # Errors
    ///
    /// - `Expired` when `now > expires_at`, even if the MAC matches
    /// - `Malformed` when the password is not valid base64
    /// - `InvalidSignature` when the MAC does not match
    pub fn validate(&self, user: &str, expires_at: i64, password: &str) -> Result<(), CredentialError> {
        self.validate_at(user, expires_at, password, chrono::Utc::now().timestamp())
    }

    /// Deterministic variant of [`validate`](Self::validate) against an explicit `now`.
    ///
    /// # Errors
    ///
    /// See [`validate`](Self::validate).
    pub fn validate_at(
        &self,
        user: &str,
        expires_at: i64,
        password: &str,
        now: i64,
    ) -> Result<(), CredentialError> {
        if now > expires_at {
            debug!(
                target: "sig.credentials",
                expires_at = expires_at,
                now = now,
                "Relay credential rejected: expired"
            );
            return Err(CredentialError::Expired);
        }

        let tag = STANDARD
            .decode(password)
            .map_err(|_| CredentialError::Malformed("password is not base64".to_string()))?;

        let username = format!("{expires_at}:{user}");
        hmac::verify(&self.key, username.as_bytes(), &tag).map_err(|_| {
            debug!(target: "sig.credentials", "Relay credential rejected: MAC mismatch");
            CredentialError::InvalidSignature
        })
    }

    /// Derive the password for a full TURN REST username.
    pub(crate) fn password_for(&self, username: &str) -> String {
        let tag = hmac::sign(&self.key, username.as_bytes());
        STANDARD.encode(tag.as_ref())
    }
}

fn check_ttl(ttl: Duration) -> Result<(), CredentialError> {
    if ttl.is_zero() || ttl > MAX_CREDENTIAL_TTL {
        return Err(CredentialError::InvalidTtl(ttl.as_secs()));
    }
    Ok(())
}
