//! # Signaling Test Utilities
//!
//! Shared test utilities for the signaling service.
//!
//! Mocks stand in for the media engine and the client socket so the hub,
//! the session manager and the router can be exercised end to end without
//! a browser or a network.
//!
//! ## Modules
//!
//! - `mock_engine` - Scriptable media engine, peers and audio tracks
//! - `memory_socket` - In-memory client socket driving the real pumps
//! - `fixtures` - Wired-up test room, tokens and membership
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signaling_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let room = TestRoom::builder()
//!         .engine(MockMediaEngine::builder().auto_connect().build())
//!         .build();
//!
//!     let mut alice = room.connect("general", "alice").await;
//!     let mut bob = room.connect("general", "bob").await;
//!
//!     alice.socket.send_json(&serde_json::json!({"type": "ping"}));
//!     let pong = alice.socket.recv_envelope().await.unwrap();
//!
//!     room.shutdown().await;
//! }
//! ```

pub mod fixtures;
pub mod memory_socket;
pub mod mock_engine;

pub use fixtures::*;
pub use memory_socket::*;
pub use mock_engine::*;
