//! Relay listener configuration.
//!
//! Bind address, realm and rate limits are enforced by the relay server.
//! This crate only loads them and hands them over together with the
//! [`RelayAuthenticator`](crate::RelayAuthenticator).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Default relay listener bind address.
pub const DEFAULT_RELAY_BIND_ADDRESS: &str = "0.0.0.0:3478";

/// Default relay realm.
pub const DEFAULT_RELAY_REALM: &str = "voice.local";

/// Default maximum concurrent relay allocations.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 1000;

/// Default per-client request rate (requests per second).
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 10;

/// Default per-client burst size.
pub const DEFAULT_BURST: u32 = 20;

/// Default idle allocation timeout in seconds.
pub const DEFAULT_CONNECTION_TIMEOUT_SECONDS: u64 = 30;

/// Settings handed to the external relay listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayListenerConfig {
    pub bind_address: String,
    pub realm: String,
    pub max_connections: u32,
    pub requests_per_second: u32,
    pub burst: u32,
    #[serde(with = "duration_secs")]
    pub connection_timeout: Duration,
}

impl Default for RelayListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_RELAY_BIND_ADDRESS.to_string(),
            realm: DEFAULT_RELAY_REALM.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            burst: DEFAULT_BURST,
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECONDS),
        }
    }
}

impl RelayListenerConfig {
    /// Load from `TURN_*` variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns the offending variable name when a value is present but does
    /// not parse.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, String> {
        let defaults = Self::default();

        Ok(Self {
            bind_address: vars
                .get("TURN_BIND_ADDRESS")
                .cloned()
                .unwrap_or(defaults.bind_address),
            realm: vars.get("TURN_REALM").cloned().unwrap_or(defaults.realm),
            max_connections: parse_or(vars, "TURN_MAX_CONNECTIONS", defaults.max_connections)?,
            requests_per_second: parse_or(
                vars,
                "TURN_RATE_LIMIT_RPS",
                defaults.requests_per_second,
            )?,
            burst: parse_or(vars, "TURN_RATE_LIMIT_BURST", defaults.burst)?,
            connection_timeout: Duration::from_secs(parse_or(
                vars,
                "TURN_CONNECTION_TIMEOUT_SECONDS",
                DEFAULT_CONNECTION_TIMEOUT_SECONDS,
            )?),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, String> {
    match vars.get(name) {
        Some(raw) => raw.parse().map_err(|_| name.to_string()),
        None => Ok(default),
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
