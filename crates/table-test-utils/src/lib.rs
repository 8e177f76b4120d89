//! # Table Test Utilities
//!
//! Shared fixtures for table server integration tests.
//!
//! ## Modules
//!
//! - `fixtures` - Participants with a drainable outbound queue, local configs, polling helpers
//! - `rules` - Rules engines with scripted outcomes
//! - `lifecycle` - Lifecycle observer that journals start/end calls
//! - `ws_client` - Minimal WebSocket client speaking the server's JSON messages
//!
//! ## Usage
//!
//! ```rust,ignore
//! use table_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let alice = TestParticipant::new(1);
//!     room.push(alice.participant());
//!
//!     assert_eq!(alice.drain(), vec![ServerMessage::Waiting { position: 1 }]);
//! }
//! ```

pub mod fixtures;
pub mod lifecycle;
pub mod rules;
pub mod ws_client;

pub use fixtures::*;
pub use lifecycle::*;
pub use rules::*;
pub use ws_client::*;
