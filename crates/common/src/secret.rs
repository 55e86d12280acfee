//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for the relay shared secret, the
//! caller-token signing key and every issued relay password. `SecretString`
//! and `SecretBox<T>` print `[REDACTED]` under `Debug`, so structs that derive
//! `Debug` stay safe to hand to `tracing`. Values are zeroized on drop.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct IssuedCredential {
//!     username: String,
//!     password: SecretString,
//! }
//!
//! let cred = IssuedCredential {
//!     username: "1700000000:alice".to_string(),
//!     password: SecretString::from("c2VjcmV0"),
//! };
//!
//! assert!(!format!("{cred:?}").contains("c2VjcmV0"));
//! assert_eq!(cred.password.expose_secret(), "c2VjcmV0");
//! ```
//!
//! Use `SecretString` for textual secrets (shared secrets from env, relay
//! passwords) and `SecretBox<Vec<u8>>` for decoded key material.

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
