//! Relay (TURN) credential service.
//!
//! Issues short-lived relay usernames and passwords derived from a secret
//! shared with the relay server, following the TURN REST API convention:
//!
//! ```text
//! username = "{expires_at}:{user}"
//! password = base64(HMAC-SHA1(shared_secret, username))
//! ```
//!
//! Nothing is stored. Validation recomputes the MAC from the shared secret and
//! the expiry embedded in the username, so any relay node holding the same
//! secret can authenticate a client without talking to us.
//!
//! # Modules
//!
//! - [`service`] - generation and validation
//! - [`authenticator`] - relay-server authentication callback
//! - [`listener`] - relay listener configuration handed to the relay server
//! - [`errors`] - error types

#![warn(clippy::pedantic)]

pub mod authenticator;
pub mod errors;
pub mod listener;
pub mod service;

pub use authenticator::RelayAuthenticator;
pub use errors::CredentialError;
pub use listener::RelayListenerConfig;
pub use service::{CredentialService, RelayCredential};
