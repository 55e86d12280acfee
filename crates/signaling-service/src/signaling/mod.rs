//! Signaling wire format and per-message routing.
//!
//! - [`envelope`] - JSON envelope parsing, validation and server-built replies
//! - [`router`] - dispatch of validated envelopes to the hub or the session manager

pub mod envelope;
pub mod router;

pub use envelope::{Envelope, EnvelopeType, SERVER_PEER};
pub use router::{Flow, Router};
