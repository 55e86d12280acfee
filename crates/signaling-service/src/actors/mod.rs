//! Actor implementation for the signaling hub.
//!
//! ```text
//! HubActor (singleton)
//! ├── owns rooms: RoomId -> { ClientId -> outbound queue }
//! ├── mailbox: register / unregister / relay / broadcast / stats
//! └── notices: SessionManager -> Hub (session closed, server candidates)
//! ```
//!
//! Each client connection runs a read pump and a write pump (see
//! [`crate::transport`]) that talk to the hub only through [`HubHandle`].
//!
//! # Modules
//!
//! - [`hub`] - `HubActor` and its handle
//! - [`messages`] - Message types for the hub mailbox
//! - [`metrics`] - Mailbox depth monitoring

pub mod hub;
pub mod messages;
pub mod metrics;

pub use hub::{HubActor, HubHandle};
pub use messages::*;
pub use metrics::{ActorType, MailboxMonitor};
