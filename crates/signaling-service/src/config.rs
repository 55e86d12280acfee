//! Signaling service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::config::ObservabilityConfig;
use common::secret::SecretString;
use relay_credentials::RelayListenerConfig;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default signaling (WebSocket + HTTP) bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default public STUN server.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Default relay credential TTL in seconds.
pub const DEFAULT_CREDENTIAL_TTL_SECONDS: u64 = 600;

/// Default liveness deadline in seconds. Pings go out at 9/10 of this.
pub const DEFAULT_PONG_WAIT_SECONDS: u64 = 60;

/// Default socket write deadline in seconds.
pub const DEFAULT_WRITE_WAIT_SECONDS: u64 = 10;

/// Default inbound frame limit (512 KiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 512 * 1024;

/// Default outbound queue capacity per client.
pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;

/// Default session idle timeout in seconds.
pub const DEFAULT_SESSION_IDLE_TIMEOUT_SECONDS: u64 = 300;

/// Default cleanup sweep period in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 30;

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "signaling_service=debug,tower_http=debug";

/// Signaling service configuration.
#[derive(Clone)]
pub struct Config {
    /// WebSocket + HTTP bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// HS256 secret for caller tokens.
    /// Protected by `SecretString` to prevent accidental logging.
    pub jwt_secret: SecretString,

    /// Secret shared with the relay server for credential derivation.
    /// Protected by `SecretString` to prevent accidental logging.
    pub turn_shared_secret: SecretString,

    /// Relay credential lifetime.
    pub credential_ttl: Duration,

    /// STUN server URLs handed to every session.
    pub stun_urls: Vec<String>,

    /// TURN server URLs; each gets an ephemeral credential per session.
    pub turn_urls: Vec<String>,

    /// Relay listener settings passed through to the relay server.
    pub relay_listener: RelayListenerConfig,

    /// Liveness deadline for client sockets.
    pub pong_wait: Duration,

    /// Socket write deadline.
    pub write_wait: Duration,

    /// Inbound frame size limit in bytes.
    pub max_message_bytes: usize,

    /// Outbound queue capacity per client.
    pub client_queue_capacity: usize,

    /// Sessions idle longer than this are closed by the sweep.
    pub session_idle_timeout: Duration,

    /// Sweep period.
    pub cleanup_interval: Duration,

    /// Log filter and format.
    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("jwt_secret", &"[REDACTED]")
            .field("turn_shared_secret", &"[REDACTED]")
            .field("credential_ttl", &self.credential_ttl)
            .field("stun_urls", &self.stun_urls)
            .field("turn_urls", &self.turn_urls)
            .field("relay_listener", &self.relay_listener)
            .field("pong_wait", &self.pong_wait)
            .field("write_wait", &self.write_wait)
            .field("max_message_bytes", &self.max_message_bytes)
            .field("client_queue_capacity", &self.client_queue_capacity)
            .field("session_idle_timeout", &self.session_idle_timeout)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let jwt_secret = SecretString::from(
            vars.get("SIG_JWT_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("SIG_JWT_SECRET".to_string()))?
                .clone(),
        );

        let turn_shared_secret = SecretString::from(
            vars.get("TURN_SHARED_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("TURN_SHARED_SECRET".to_string()))?
                .clone(),
        );

        let bind_address = vars
            .get("SIG_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("SIG_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let stun_urls = vars
            .get("SIG_STUN_URLS")
            .map_or_else(|| vec![DEFAULT_STUN_URL.to_string()], |raw| split_list(raw));

        let turn_urls = vars
            .get("SIG_TURN_URLS")
            .map(|raw| split_list(raw))
            .unwrap_or_default();

        let relay_listener = RelayListenerConfig::from_vars(vars).map_err(|name| {
            ConfigError::InvalidValue(format!("{name} must be a number"))
        })?;

        let credential_ttl =
            seconds_var(vars, "TURN_CREDENTIAL_TTL_SECONDS", DEFAULT_CREDENTIAL_TTL_SECONDS)?;
        let pong_wait = seconds_var(vars, "SIG_PONG_WAIT_SECONDS", DEFAULT_PONG_WAIT_SECONDS)?;
        let write_wait = seconds_var(vars, "SIG_WRITE_WAIT_SECONDS", DEFAULT_WRITE_WAIT_SECONDS)?;
        let session_idle_timeout = seconds_var(
            vars,
            "SIG_SESSION_IDLE_TIMEOUT_SECONDS",
            DEFAULT_SESSION_IDLE_TIMEOUT_SECONDS,
        )?;
        let cleanup_interval = seconds_var(
            vars,
            "SIG_CLEANUP_INTERVAL_SECONDS",
            DEFAULT_CLEANUP_INTERVAL_SECONDS,
        )?;

        let max_message_bytes =
            positive_var(vars, "SIG_MAX_MESSAGE_BYTES", DEFAULT_MAX_MESSAGE_BYTES)?;
        let client_queue_capacity = positive_var(
            vars,
            "SIG_CLIENT_QUEUE_CAPACITY",
            DEFAULT_CLIENT_QUEUE_CAPACITY,
        )?;

        let observability = ObservabilityConfig::from_vars(vars, DEFAULT_LOG_FILTER);

        Ok(Config {
            bind_address,
            health_bind_address,
            jwt_secret,
            turn_shared_secret,
            credential_ttl,
            stun_urls,
            turn_urls,
            relay_listener,
            pong_wait,
            write_wait,
            max_message_bytes,
            client_queue_capacity,
            session_idle_timeout,
            cleanup_interval,
            observability,
        })
    }

    /// Keepalive ping period: 9/10 of the liveness deadline.
    #[must_use]
    pub fn ping_period(&self) -> Duration {
        self.pong_wait * 9 / 10
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn positive_var<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialEq + Default,
{
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = raw
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{name} must be a number, got {raw:?}")))?;

    if value == T::default() {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than zero"
        )));
    }

    Ok(value)
}

fn seconds_var(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<Duration, ConfigError> {
    positive_var(vars, name, default).map(Duration::from_secs)
}
