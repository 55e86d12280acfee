//! Configuration shared by every binary in the workspace.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable, one line per event.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Default filter directive used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl ObservabilityConfig {
    /// Read `SIG_LOG_FORMAT` from the given variables, falling back to text.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>, default_filter: &str) -> Self {
        let log_format = match vars.get("SIG_LOG_FORMAT").map(String::as_str) {
            Some("json" | "JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Self {
            default_filter: default_filter.to_string(),
            log_format,
        }
    }
}
