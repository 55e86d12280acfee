//! Observability for the signaling service.
//!
//! Metric labels are bounded to prevent cardinality explosion:
//! - `type`: envelope types (~11 values)
//! - `reason`: drop reasons (queue_full, not_found, invalid, closed)
//! - `state`: connection states (6 values)
//! - `actor_type`: hub, session_events
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sig_clients_active` | Gauge | none | Registered sockets |
//! | `sig_rooms_active` | Gauge | none | Non-empty rooms |
//! | `sig_sessions_active` | Gauge | none | Live peer sessions |
//! | `sig_messages_relayed_total` | Counter | `type` | Delivered envelopes |
//! | `sig_messages_dropped_total` | Counter | `reason` | Undeliverable envelopes |
//! | `sig_clients_evicted_total` | Counter | none | Slow consumers dropped |
//! | `sig_session_transitions_total` | Counter | `state` | State machine activity |
//! | `sig_sessions_swept_total` | Counter | none | Idle sessions closed |
//! | `sig_audio_packets_dropped_total` | Counter | none | Fan-out drops |
//! | `sig_credentials_issued_total` | Counter | none | Relay credentials handed out |
//! | `sig_negotiation_duration_seconds` | Histogram | `kind` | Offer/answer latency |
//! | `sig_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
