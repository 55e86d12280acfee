//! Relay-server authentication callback.
//!
//! The relay server calls [`RelayAuthenticator::authenticate`] with the
//! username and realm from an allocation request. We never see the client's
//! MESSAGE-INTEGRITY; the relay server needs the password back so it can derive
//! the long-term key and check the request itself.

use crate::errors::CredentialError;
use crate::service::CredentialService;

use common::secret::SecretString;
use tracing::debug;

/// Stateless authenticator shared with the relay listener.
#[derive(Debug, Clone)]
pub struct RelayAuthenticator {
    credentials: CredentialService,
    realm: String,
}

impl RelayAuthenticator {
    #[must_use]
    pub fn new(credentials: CredentialService, realm: impl Into<String>) -> Self {
        Self {
            credentials,
            realm: realm.into(),
        }
    }

    /// Realm this authenticator answers for.
    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Resolve the password for a TURN REST username.
    ///
    /// # Errors
    ///
    /// - `WrongRealm` if `realm` differs from the configured realm
    /// - `Malformed` if the username is not `"{expires_at}:{user}"`
    /// - `Expired` if the embedded expiry has passed
    pub fn authenticate(&self, username: &str, realm: &str) -> Result<SecretString, CredentialError> {
        self.authenticate_at(username, realm, chrono::Utc::now().timestamp())
    }

    /// Deterministic variant of [`authenticate`](Self::authenticate).
    ///
    /// # Errors
    ///
    /// See [`authenticate`](Self::authenticate).
    pub fn authenticate_at(
        &self,
        username: &str,
        realm: &str,
        now: i64,
    ) -> Result<SecretString, CredentialError> {
        if realm != self.realm {
            debug!(target: "sig.credentials", realm = %realm, "Relay auth rejected: realm");
            return Err(CredentialError::WrongRealm);
        }

        let (expires_at, user) = parse_username(username)?;
        if now > expires_at {
            debug!(
                target: "sig.credentials",
                expires_at = expires_at,
                "Relay auth rejected: expired"
            );
            return Err(CredentialError::Expired);
        }

        debug!(target: "sig.credentials", user = %user, "Relay auth accepted");
        Ok(SecretString::from(self.credentials.password_for(username)))
    }
}

/// Split `"{expires_at}:{user}"`.
fn parse_username(username: &str) -> Result<(i64, &str), CredentialError> {
    let (expiry, user) = username
        .split_once(':')
        .ok_or_else(|| CredentialError::Malformed("username missing expiry".to_string()))?;

    if user.is_empty() {
        return Err(CredentialError::Malformed("username missing user".to_string()));
    }

    let expires_at = expiry
        .parse::<i64>()
        .map_err(|_| CredentialError::Malformed("expiry is not a timestamp".to_string()))?;

    Ok((expires_at, user))
}
