//! Common utilities and types shared across the voice signaling crates.

#![warn(clippy::pedantic)]

/// Module for identifier types (rooms, clients, session keys)
pub mod types;

/// Module for configuration shared by every binary
pub mod config;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for caller token validation
pub mod jwt;
