//! Voice room signaling service library.
//!
//! Brokers WebRTC call setup between browser clients in voice rooms:
//!
//! - Room membership and message routing over WebSockets (the hub)
//! - One server-side peer session per client with trickle ICE and idle cleanup
//! - Best-effort audio fan-out between the sessions of a room
//! - Ephemeral TURN credentials (via `relay-credentials`)
//!
//! # Architecture
//!
//! ```text
//! edge (axum) ──► transport pumps ──► signaling::Router ──► HubActor
//!                                              │               ▲
//!                                              ▼               │ SessionNotice
//!                                        SessionManager ───────┘
//!                                              │
//!                                        MediaEngine (webrtc-rs)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Composite key**: clients and sessions are keyed by `(room, client)`
//! - **Single owner**: room/client maps live in one actor task; no locks
//! - **Own queue per client**: closed only when that client's entry is removed
//! - **Engine callbacks are events**: applied by one loop, never under a lock
//!
//! # Modules
//!
//! - [`actors`] - Hub actor and mailbox monitoring
//! - [`config`] - Service configuration from environment
//! - [`edge`] - HTTP and WebSocket routes
//! - [`errors`] - Error types with client-safe messages
//! - [`observability`] - Metrics and health endpoints
//! - [`sessions`] - Connection Manager and media engine seam
//! - [`signaling`] - Envelope format and routing
//! - [`transport`] - Socket read/write pumps

pub mod actors;
pub mod config;
pub mod edge;
pub mod errors;
pub mod observability;
pub mod sessions;
pub mod signaling;
pub mod transport;
